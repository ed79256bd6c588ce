//! Turning a partition into a stream of model-ready batches.
//!
//! `prepare_for_training` optionally decodes every image once and keeps the
//! raw pixels in memory. Each call to [`PreparedDataset::epoch`] then
//! shuffles sample order (seeded by `(seed, epoch)`), preprocesses samples in
//! parallel with rayon, groups them into batches (the last one may be
//! smaller) and prefetches them on a background thread through a bounded
//! channel.
//!
//! Augmentation randomness is derived per sample from `(seed, epoch, index)`
//! where `index` is the position in the partition, not the shuffled
//! position, so output does not depend on thread scheduling.

use image::{Rgb32FImage, RgbImage};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rps_core::{DataSplit, Error, ImageDimensions, ImageSample, PipelineConfig, Result};
use std::borrow::Cow;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::augmentation::{to_chw, PreprocessOptions, Processing};
use crate::loader::ImageLoader;
use crate::partition::Partition;

/// Offset separating the augmentation seed from the shuffle seed
const AUGMENT_SEED_OFFSET: u64 = 0x9E37_79B9_7F4A_7C15;

/// How a partition is prepared
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareOptions {
    pub target_size: ImageDimensions,
    pub batch_size: usize,
    pub augment: bool,
    pub shuffle: bool,
    pub cache: bool,
    pub normalize_m1_p1: bool,
    /// Batches buffered ahead of the consumer
    pub prefetch: usize,
}

impl PrepareOptions {
    /// Shuffled and augmented, for the train partition
    pub fn training(config: &PipelineConfig) -> Self {
        Self {
            target_size: config.data.target_size,
            batch_size: config.training.batch_size,
            augment: true,
            shuffle: true,
            cache: config.training.cache,
            normalize_m1_p1: config.data.normalize_m1_p1,
            prefetch: config.training.prefetch,
        }
    }

    /// In order and unaugmented, for validation and test
    pub fn evaluation(config: &PipelineConfig) -> Self {
        Self {
            augment: false,
            shuffle: false,
            ..Self::training(config)
        }
    }
}

/// A batch in NCHW layout
#[derive(Debug, Clone)]
pub struct ImageBatch {
    /// `len * 3 * height * width` values, one CHW block per sample
    pub images: Vec<f32>,
    pub labels: Vec<usize>,
    pub dims: ImageDimensions,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

struct Shared {
    samples: Vec<ImageSample>,
    cached: Option<Vec<RgbImage>>,
    processing: Processing,
    seed: u64,
    options: PrepareOptions,
}

impl Shared {
    fn process(&self, index: usize, epoch: usize) -> Result<Rgb32FImage> {
        let image = match &self.cached {
            Some(images) => Cow::Borrowed(&images[index]),
            None => Cow::Owned(ImageLoader::load_rgb(&self.samples[index].path)?),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(AUGMENT_SEED_OFFSET));
        rng.set_stream(((epoch as u64) << 32) | index as u64);

        let options = PreprocessOptions {
            target_size: self.options.target_size,
            augment: self.options.augment,
            normalize_m1_p1: self.options.normalize_m1_p1,
        };
        self.processing.preprocess(&image, &options, &mut rng)
    }

    fn build_batch(&self, indices: &[usize], epoch: usize) -> Result<ImageBatch> {
        let tensors = indices
            .par_iter()
            .map(|&i| self.process(i, epoch).map(|image| to_chw(&image)))
            .collect::<Result<Vec<_>>>()?;

        Ok(ImageBatch {
            images: tensors.concat(),
            labels: indices.iter().map(|&i| self.samples[i].label).collect(),
            dims: self.options.target_size,
        })
    }
}

/// A partition ready to be streamed epoch after epoch
#[derive(Clone)]
pub struct PreparedDataset {
    split: DataSplit,
    shared: Arc<Shared>,
}

/// Prepares a partition for consumption by the trainer or evaluator
pub fn prepare_for_training(
    partition: &Partition,
    processing: &Processing,
    seed: u64,
    options: PrepareOptions,
) -> Result<PreparedDataset> {
    if options.batch_size == 0 {
        return Err(Error::Config("batch size must be greater than 0".into()));
    }
    if options.target_size.num_values() == 0 {
        return Err(Error::Config("target size must be non-zero".into()));
    }

    let cached = if options.cache {
        let images = partition
            .samples
            .par_iter()
            .map(|sample| ImageLoader::load_rgb(&sample.path))
            .collect::<Result<Vec<_>>>()?;
        info!("Cached {} {} images in memory", images.len(), partition.split);
        Some(images)
    } else {
        None
    };

    debug!(
        "Prepared {} partition: augment={}, shuffle={}, batch_size={}",
        partition.split, options.augment, options.shuffle, options.batch_size
    );

    Ok(PreparedDataset {
        split: partition.split,
        shared: Arc::new(Shared {
            samples: partition.samples.clone(),
            cached,
            processing: processing.clone(),
            seed,
            options,
        }),
    })
}

impl PreparedDataset {
    pub fn split(&self) -> DataSplit {
        self.split
    }

    pub fn options(&self) -> &PrepareOptions {
        &self.shared.options
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.shared.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.samples.is_empty()
    }

    /// Number of batches per epoch
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.shared.options.batch_size)
    }

    /// Labels in partition order
    pub fn labels(&self) -> Vec<usize> {
        self.shared.samples.iter().map(|s| s.label).collect()
    }

    /// Sample order for `epoch`
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if self.shared.options.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.shared.seed);
            rng.set_stream(epoch as u64);
            order.shuffle(&mut rng);
        }
        order
    }

    /// One preprocessed sample, as it would appear in `epoch`
    pub fn sample(&self, index: usize, epoch: usize) -> Result<Rgb32FImage> {
        if index >= self.len() {
            return Err(Error::InvalidArgument(format!(
                "sample {index} out of range for {} samples",
                self.len()
            )));
        }
        self.shared.process(index, epoch)
    }

    /// Starts streaming the batches of `epoch`
    pub fn epoch(&self, epoch: usize) -> Result<BatchStream> {
        let batches: Vec<Vec<usize>> = self
            .order(epoch)
            .chunks(self.shared.options.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        let (sender, receiver) = sync_channel(self.shared.options.prefetch.max(1));
        let shared = Arc::clone(&self.shared);
        let worker = std::thread::Builder::new()
            .name("rps-prefetch".into())
            .spawn(move || produce(&shared, batches, epoch, &sender))?;

        Ok(BatchStream {
            receiver: Some(receiver),
            worker: Some(worker),
        })
    }
}

fn produce(
    shared: &Shared,
    batches: Vec<Vec<usize>>,
    epoch: usize,
    sender: &SyncSender<Result<ImageBatch>>,
) {
    for indices in batches {
        let batch = shared.build_batch(&indices, epoch);
        let failed = batch.is_err();
        // The consumer hung up
        if sender.send(batch).is_err() || failed {
            break;
        }
    }
}

/// Batches of one epoch, produced ahead on a background thread.
///
/// Iteration stops after the first error. Dropping the stream early stops
/// the producer.
pub struct BatchStream {
    receiver: Option<Receiver<Result<ImageBatch>>>,
    worker: Option<JoinHandle<()>>,
}

impl Iterator for BatchStream {
    type Item = Result<ImageBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        // Unblocks a producer waiting on a full channel
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
