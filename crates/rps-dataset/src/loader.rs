//! Loading the named image collection from disk.
//!
//! A collection lives at `<datasets>/<name>/` with one directory per split
//! and one sub-directory per class:
//!
//! ```text
//! rock_paper_scissors/
//! ├── train/
//! │   ├── rock/*.png
//! │   ├── paper/*.png
//! │   └── scissors/*.png
//! └── test/
//!     └── ...
//! ```
//!
//! File order within a split is fixed by a seeded shuffle of the sorted
//! listing, so the collection is identical across runs with the same seed
//! and the validation tail is not a single class.

use image::RgbImage;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rps_core::{Error, HandGesture, ImageSample, Result, NUM_CLASSES};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A named collection with its pre-existing train and test splits
#[derive(Debug, Clone)]
pub struct Collection {
    /// Collection name
    pub name: String,
    /// The nominal train split, before validation is carved out of it
    pub train: Vec<ImageSample>,
    /// The separately named test split
    pub test: Vec<ImageSample>,
}

impl Collection {
    /// Builds a collection from samples that are already listed
    pub fn from_samples(
        name: impl Into<String>,
        train: Vec<ImageSample>,
        test: Vec<ImageSample>,
    ) -> Self {
        Self {
            name: name.into(),
            train,
            test,
        }
    }

    /// Loads `<datasets_root>/<name>/{train,test}`
    pub fn load(collection_dir: &Path, seed: u64) -> Result<Self> {
        let name = collection_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Loading collection '{}' from {}", name, collection_dir.display());

        let train = ImageLoader::scan_split(&collection_dir.join("train"), seed, 0)?;
        let test = ImageLoader::scan_split(&collection_dir.join("test"), seed, 1)?;

        let collection = Self { name, train, test };
        info!(
            "Loaded {} train samples {:?} and {} test samples {:?}",
            collection.train.len(),
            class_counts(&collection.train),
            collection.test.len(),
            class_counts(&collection.test)
        );
        Ok(collection)
    }
}

/// Number of samples per label, in label order
pub fn class_counts(samples: &[ImageSample]) -> [usize; NUM_CLASSES] {
    let mut counts = [0; NUM_CLASSES];
    for sample in samples {
        if let Some(count) = counts.get_mut(sample.label) {
            *count += 1;
        }
    }
    counts
}

/// Image loading helpers
pub struct ImageLoader;

impl ImageLoader {
    /// Lists `split_dir/<class>/*` with a deterministic, seeded order
    pub fn scan_split(split_dir: &Path, seed: u64, stream: u64) -> Result<Vec<ImageSample>> {
        if !split_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Split directory not found: {}",
                split_dir.display()
            )));
        }

        let mut samples = Vec::new();
        for entry in std::fs::read_dir(split_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let Some(gesture) = HandGesture::from_name(&dir_name) else {
                warn!("Skipping unknown class directory: {}", entry.path().display());
                continue;
            };

            let before = samples.len();
            for path in Self::scan_directory(&entry.path())? {
                samples.push(ImageSample::new(path, gesture.index()));
            }
            debug!("Class '{}': {} images", gesture, samples.len() - before);
        }

        // read_dir order is platform dependent
        samples.sort_by(|a, b| a.path.cmp(&b.path));
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        samples.shuffle(&mut rng);

        Ok(samples)
    }

    /// Lists image files directly inside `dir`
    pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ext) = path.extension() {
                let ext = ext.to_string_lossy().to_lowercase();
                if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                    images.push(path.to_path_buf());
                }
            }
        }
        Ok(images)
    }

    /// Loads an image from disk as 8-bit RGB
    pub fn load_rgb(path: &Path) -> Result<RgbImage> {
        let image = image::open(path)
            .map_err(|e| Error::Image(format!("Failed to load image {}: {}", path.display(), e)))?;
        Ok(image.to_rgb8())
    }

    /// Decodes an in-memory image (PNG, JPEG, ...) as 8-bit RGB
    pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
        let image = image::load_from_memory(bytes)?;
        Ok(image.to_rgb8())
    }
}
