//! Train/validation/test partitioning.
//!
//! Validation is the tail of the nominal train split: with `N` train samples
//! and proportion `p`, `num_val = floor(N * p)`, train keeps indices
//! `[0, N - num_val)` and validation gets `[N - num_val, N)`. The test
//! partition is the collection's own test split. Nothing here is random;
//! shuffling happens later, during training preparation.
//!
//! Both train and validation must end up non-empty; a proportion that
//! rounds either side down to zero samples is rejected.

use rps_core::{DataSplit, Error, ImageSample, Result};
use std::ops::Range;
use tracing::info;

use crate::loader::Collection;

/// An ordered sequence of samples belonging to one split
#[derive(Debug, Clone)]
pub struct Partition {
    /// Which split this is
    pub split: DataSplit,
    /// Index range within the source split
    pub range: Range<usize>,
    /// Samples in order
    pub samples: Vec<ImageSample>,
}

impl Partition {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the partition holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Labels in order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

/// The three partitions of a collection
#[derive(Debug, Clone)]
pub struct Partitions {
    pub train: Partition,
    pub validation: Partition,
    pub test: Partition,
}

/// Splits a collection into train/validation/test
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    validation_proportion: f64,
}

impl Partitioner {
    /// Creates a partitioner. The proportion must lie in `(0, 1)`.
    pub fn new(validation_proportion: f64) -> Result<Self> {
        if !validation_proportion.is_finite()
            || validation_proportion <= 0.0
            || validation_proportion >= 1.0
        {
            return Err(Error::Config(format!(
                "validation proportion must be in (0, 1), got {validation_proportion}"
            )));
        }
        Ok(Self {
            validation_proportion,
        })
    }

    /// Validation sample count for a train split of `total` samples
    pub fn num_validation(&self, total: usize) -> usize {
        (total as f64 * self.validation_proportion).floor() as usize
    }

    /// Index ranges `(train, validation)` for a train split of `total` samples
    pub fn ranges(&self, total: usize) -> Result<(Range<usize>, Range<usize>)> {
        let num_val = self.num_validation(total);
        if num_val == 0 || num_val >= total {
            return Err(Error::Dataset(format!(
                "degenerate partition: {num_val} validation samples out of {total}"
            )));
        }
        let boundary = total - num_val;
        Ok((0..boundary, boundary..total))
    }

    /// Computes the three partitions
    pub fn split(&self, collection: &Collection) -> Result<Partitions> {
        let total = collection.train.len();
        let (train_range, val_range) = self.ranges(total)?;

        let partitions = Partitions {
            train: Partition {
                split: DataSplit::Train,
                samples: collection.train[train_range.clone()].to_vec(),
                range: train_range,
            },
            validation: Partition {
                split: DataSplit::Validation,
                samples: collection.train[val_range.clone()].to_vec(),
                range: val_range,
            },
            test: Partition {
                split: DataSplit::Test,
                range: 0..collection.test.len(),
                samples: collection.test.clone(),
            },
        };

        info!(
            "Partitioned '{}': train={}, validation={}, test={}",
            collection.name,
            partitions.train.len(),
            partitions.validation.len(),
            partitions.test.len()
        );
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn collection(train: usize, test: usize) -> Collection {
        let make = |prefix: &str, n: usize| {
            (0..n)
                .map(|i| ImageSample::new(PathBuf::from(format!("{prefix}/{i}.png")), i % 3))
                .collect()
        };
        Collection::from_samples("synthetic", make("train", train), make("test", test))
    }

    #[test]
    fn test_hundred_samples_at_fifteen_percent() {
        let partitions = Partitioner::new(0.15).unwrap().split(&collection(100, 37)).unwrap();
        assert_eq!(partitions.train.len(), 85);
        assert_eq!(partitions.validation.len(), 15);
        assert_eq!(partitions.test.len(), 37);
        assert_eq!(partitions.validation.range, 85..100);
    }

    #[test]
    fn test_sizes_and_disjointness_over_grid() {
        for total in [1usize, 2, 7, 64, 100, 2520] {
            for p in [0.05, 0.15, 0.333, 0.5, 0.9] {
                let partitioner = Partitioner::new(p).unwrap();
                let num_val = (total as f64 * p).floor() as usize;
                let Ok(parts) = partitioner.split(&collection(total, 3)) else {
                    assert!(num_val == 0 || num_val >= total);
                    continue;
                };
                assert!(!parts.train.is_empty());
                assert!(!parts.validation.is_empty());
                assert_eq!(parts.train.len(), total - num_val);
                assert_eq!(parts.train.len() + parts.validation.len(), total);

                let train: HashSet<_> = parts.train.samples.iter().map(|s| &s.path).collect();
                assert!(parts.validation.samples.iter().all(|s| !train.contains(&s.path)));
            }
        }
    }

    #[test]
    fn test_test_split_independent_of_proportion() {
        let a = Partitioner::new(0.1).unwrap().split(&collection(50, 11)).unwrap();
        let b = Partitioner::new(0.4).unwrap().split(&collection(50, 11)).unwrap();
        assert_eq!(a.test.len(), 11);
        assert_eq!(b.test.len(), 11);
    }

    #[test]
    fn test_split_is_deterministic() {
        let c = collection(40, 5);
        let a = Partitioner::new(0.25).unwrap().split(&c).unwrap();
        let b = Partitioner::new(0.25).unwrap().split(&c).unwrap();
        assert_eq!(a.validation.samples, b.validation.samples);
        assert_eq!(a.validation.samples, c.train[30..].to_vec());
    }

    #[test]
    fn test_invalid_proportions() {
        assert!(matches!(Partitioner::new(1.0), Err(Error::Config(_))));
        assert!(matches!(Partitioner::new(0.0), Err(Error::Config(_))));
        assert!(Partitioner::new(-0.1).is_err());
        assert!(Partitioner::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_degenerate_partition() {
        let partitioner = Partitioner::new(0.5).unwrap();
        assert!(matches!(partitioner.split(&collection(0, 1)), Err(Error::Dataset(_))));
        // floor(1 * 0.5) = 0 validation samples
        assert!(matches!(partitioner.split(&collection(1, 1)), Err(Error::Dataset(_))));
        assert!(partitioner.split(&collection(2, 1)).is_ok());
    }

    #[test]
    fn test_empty_validation_rejected() {
        // floor(12 * 0.05) = 0
        let partitioner = Partitioner::new(0.05).unwrap();
        assert_eq!(partitioner.num_validation(12), 0);
        assert!(matches!(partitioner.split(&collection(12, 3)), Err(Error::Dataset(_))));
        assert!(matches!(partitioner.ranges(12), Err(Error::Dataset(_))));

        let (train, validation) = partitioner.ranges(20).unwrap();
        assert_eq!(train, 0..19);
        assert_eq!(validation, 19..20);
    }
}
