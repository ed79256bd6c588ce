//! Dataset loading, partitioning and augmentation for the rock/paper/scissors
//! classifier.
//!
//! The flow is `Collection::load` → `Partitioner::split` →
//! `prepare_for_training` → `PreparedDataset::epoch`, which yields batches of
//! preprocessed images ready to be turned into tensors.

pub mod augmentation;
pub mod loader;
pub mod partition;
pub mod pipeline;
pub mod preprocess;

pub use augmentation::{PreprocessOptions, Processing};
pub use loader::{class_counts, Collection, ImageLoader};
pub use partition::{Partition, Partitioner, Partitions};
pub use pipeline::{prepare_for_training, BatchStream, ImageBatch, PrepareOptions, PreparedDataset};
pub use preprocess::{HwcInstance, ImagePreprocessor};
