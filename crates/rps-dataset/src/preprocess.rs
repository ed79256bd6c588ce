//! Preprocessing for single images at serving time.
//!
//! The gateway sends the model server one instance per request: a
//! `[height][width][3]` array of `[0, 1]` floats. `ImagePreprocessor`
//! produces that array from raw image bytes, and turns it back into an
//! image on the server side.

use image::{imageops, imageops::FilterType, DynamicImage, Rgb, Rgb32FImage};
use rps_core::{Error, ImageDimensions, Result};

use crate::augmentation::normalize_to_unit;

/// One serving instance in height-width-channel order
pub type HwcInstance = Vec<Vec<[f32; 3]>>;

/// Resizes and scales images for the model server
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    target_size: ImageDimensions,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(ImageDimensions::default())
    }
}

impl ImagePreprocessor {
    pub fn new(target_size: ImageDimensions) -> Self {
        Self { target_size }
    }

    pub fn target_size(&self) -> ImageDimensions {
        self.target_size
    }

    /// Converts to RGB, resizes bilinearly and scales to `[0, 1]`
    pub fn preprocess(&self, image: &DynamicImage) -> Rgb32FImage {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let resized = if width == self.target_size.width && height == self.target_size.height {
            rgb
        } else {
            imageops::resize(
                &rgb,
                self.target_size.width,
                self.target_size.height,
                FilterType::Triangle,
            )
        };
        normalize_to_unit(&resized)
    }

    /// Decodes image bytes and preprocesses them
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<Rgb32FImage> {
        let image = image::load_from_memory(bytes)?;
        Ok(self.preprocess(&image))
    }

    /// Nested `[H][W][3]` array for the predict request
    pub fn to_instance(image: &Rgb32FImage) -> HwcInstance {
        let (width, height) = image.dimensions();
        (0..height)
            .map(|y| (0..width).map(|x| image.get_pixel(x, y).0).collect())
            .collect()
    }

    /// Rebuilds an image from a predict instance, checking it against the target size
    pub fn from_instance(&self, instance: &[Vec<[f32; 3]>]) -> Result<Rgb32FImage> {
        let height = instance.len() as u32;
        let width = instance.first().map_or(0, |row| row.len()) as u32;
        if height != self.target_size.height || width != self.target_size.width {
            return Err(Error::InvalidArgument(format!(
                "expected a {} instance, got {}x{}",
                self.target_size, height, width
            )));
        }
        if instance.iter().any(|row| row.len() as u32 != width) {
            return Err(Error::InvalidArgument("ragged instance rows".into()));
        }

        Ok(Rgb32FImage::from_fn(width, height, |x, y| {
            Rgb(instance[y as usize][x as usize])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_preprocess_resizes_and_scales() {
        let preprocessor = ImagePreprocessor::new(ImageDimensions::square(16));
        let image = RgbImage::from_pixel(40, 30, Rgb([255, 0, 51]));

        let out = preprocessor.preprocess_bytes(&png_bytes(&image)).unwrap();
        assert_eq!(out.dimensions(), (16, 16));
        let p = out.get_pixel(5, 5).0;
        assert!((p[0] - 1.0).abs() < 1e-6);
        assert!(p[1].abs() < 1e-6);
        assert!((p[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_instance_layout() {
        let image = Rgb32FImage::from_fn(3, 2, |x, y| Rgb([x as f32, y as f32, 0.5]));
        let instance = ImagePreprocessor::to_instance(&image);
        assert_eq!(instance.len(), 2);
        assert_eq!(instance[0].len(), 3);
        assert_eq!(instance[1][2], [2.0, 1.0, 0.5]);

        let preprocessor = ImagePreprocessor::new(ImageDimensions::new(2, 3));
        assert_eq!(preprocessor.from_instance(&instance).unwrap(), image);
    }

    #[test]
    fn test_instance_size_mismatch() {
        let preprocessor = ImagePreprocessor::new(ImageDimensions::square(4));
        let instance = vec![vec![[0.0; 3]; 4]; 3];
        assert!(matches!(
            preprocessor.from_instance(&instance),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_undecodable_bytes() {
        let preprocessor = ImagePreprocessor::default();
        assert!(matches!(
            preprocessor.preprocess_bytes(b"<html>not found</html>"),
            Err(Error::Image(_))
        ));
    }
}
