//! Core type definitions shared across the workspace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Number of output classes.
pub const NUM_CLASSES: usize = 3;

/// Class names in label order. This is the order the model emits, not alphabetical.
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["rock", "paper", "scissors"];

/// A hand gesture class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HandGesture {
    Rock,
    Paper,
    Scissors,
}

impl HandGesture {
    /// All gestures in label order
    pub const ALL: [HandGesture; NUM_CLASSES] =
        [HandGesture::Rock, HandGesture::Paper, HandGesture::Scissors];

    /// Label index used by the model
    pub fn index(self) -> usize {
        match self {
            HandGesture::Rock => 0,
            HandGesture::Paper => 1,
            HandGesture::Scissors => 2,
        }
    }

    /// Class name as it appears in directory names and API responses
    pub fn name(self) -> &'static str {
        CLASS_NAMES[self.index()]
    }

    /// Maps a label index back to a gesture
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("class index {index} out of range")))
    }

    /// Parses a class name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|g| g.name() == lower)
    }
}

impl std::fmt::Display for HandGesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Represents an image sample on disk with its label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label (index)
    pub label: usize,
}

impl ImageSample {
    /// Creates a new image sample
    pub fn new(path: PathBuf, label: usize) -> Self {
        Self { path, label }
    }

    /// Gesture for this sample's label
    pub fn gesture(&self) -> Result<HandGesture> {
        HandGesture::from_index(self.label)
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Validation,
    /// Test data
    Test,
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "validation"),
            DataSplit::Test => write!(f, "test"),
        }
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image height in pixels
    pub height: u32,
    /// Image width in pixels
    pub width: u32,
}

impl ImageDimensions {
    /// Creates new image dimensions
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Square dimensions
    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Number of f32 values in an RGB image of this size
    pub fn num_values(&self) -> usize {
        3 * self.height as usize * self.width as usize
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::square(160)
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}
