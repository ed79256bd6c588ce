//! Conversion of prepared image batches into tensors.

use burn::tensor::{backend::Backend, Int, Tensor};
use rps_dataset::ImageBatch;

/// Tensors for one batch
#[derive(Clone, Debug)]
pub struct RpsBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Moves [`ImageBatch`]es onto a device
#[derive(Clone, Debug)]
pub struct RpsBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> RpsBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Uploads one batch in a single transfer per tensor
    pub fn to_tensors(&self, batch: &ImageBatch) -> RpsBatch<B> {
        let size = batch.len();
        let images = Tensor::<B, 1>::from_floats(batch.images.as_slice(), &self.device).reshape([
            size,
            3,
            batch.dims.height as usize,
            batch.dims.width as usize,
        ]);
        let targets: Vec<i64> = batch.labels.iter().map(|&l| l as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device);

        RpsBatch { images, targets }
    }
}
