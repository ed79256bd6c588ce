//! Compute device selection.
//!
//! The pipeline always has a CPU path. An accelerator is used only when it
//! is both requested and detected; otherwise the run logs the fact at info
//! level and continues on the CPU.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Device type for backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    /// CPU backend
    Cpu,
    /// GPU backend (when available)
    Gpu(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Whether an accelerator should be used when present
    pub prefer_gpu: bool,
    /// Whether this binary was built with an accelerator backend
    pub accelerator_compiled: bool,
}

/// Pick the device for this run. Never fails: a missing accelerator falls back to CPU.
pub fn init_backend(config: &BackendConfig) -> Device {
    if !config.prefer_gpu {
        info!("Using CPU backend (accelerator not requested)");
        Device::Cpu
    } else if !config.accelerator_compiled {
        info!("GPU not available: built without an accelerator backend, using CPU");
        Device::Cpu
    } else if is_gpu_available() {
        info!("GPU is available");
        Device::Gpu(0)
    } else {
        info!("GPU not available, using CPU");
        Device::Cpu
    }
}

/// Check if any GPU acceleration is available
pub fn is_gpu_available() -> bool {
    has_nvidia_gpu() || has_amd_gpu()
}

/// Check for NVIDIA GPU (CUDA)
fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("nvidia-smi.exe")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

/// Check for AMD GPU (ROCm)
fn has_amd_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/sys/module/amdgpu").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
