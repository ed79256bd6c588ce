//! Model-serving endpoint
//!
//! Loads `models/<name>-saved_model/` and answers
//! `POST /v1/models/<name>:predict`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rps_core::{setup_cli_logging, PathsConfig, WORKSPACE_DIR_ENV};
use rps_gateway::{serving_router, Predictor, ServingState};
use rps_training::ExportedModel;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "serve")]
#[command(about = "Serve an exported rock/paper/scissors model")]
struct Cli {
    /// Address to bind to
    #[arg(long, env = "SERVING_BIND", default_value = "0.0.0.0:8501")]
    bind: SocketAddr,

    /// Model name used in the URL and in the export directory name
    #[arg(long, env = "MODEL_NAME", default_value = "rock_paper_scissors")]
    model_name: String,

    /// Workspace root holding `models/`
    #[arg(long, env = WORKSPACE_DIR_ENV)]
    workspace_dir: Option<PathBuf>,

    /// Export directory; defaults to `<workspace>/models/<name>-saved_model`
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(not(feature = "wgpu"))]
fn load_predictor(export_dir: &std::path::Path) -> rps_core::Result<Box<dyn Predictor + Send>> {
    use burn_ndarray::NdArray;
    let model = ExportedModel::<NdArray>::load(export_dir, &Default::default())?;
    Ok(Box::new(model))
}

#[cfg(feature = "wgpu")]
fn load_predictor(export_dir: &std::path::Path) -> rps_core::Result<Box<dyn Predictor + Send>> {
    use burn_wgpu::{Wgpu, WgpuDevice};
    let model = ExportedModel::<Wgpu>::load(export_dir, &WgpuDevice::default())?;
    Ok(Box::new(model))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_cli_logging(cli.verbose)?;

    let paths = cli
        .workspace_dir
        .map(PathsConfig::new)
        .unwrap_or_else(PathsConfig::from_env);
    let export_dir = cli
        .export_dir
        .unwrap_or_else(|| paths.export_dir(&cli.model_name));

    info!("Loading serving export from {}", export_dir.display());
    let predictor = load_predictor(&export_dir)
        .with_context(|| format!("Failed to load {}", export_dir.display()))?;
    let signature = predictor.signature();
    info!(
        "  Signature '{}': input {:?}, classes {:?}",
        signature.signature_name, signature.input_shape, signature.class_names
    );

    let app = serving_router(Arc::new(ServingState::new(cli.model_name.clone(), predictor)));

    info!(
        "Serving http://{}/v1/models/{}:predict",
        cli.bind, cli.model_name
    );
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
