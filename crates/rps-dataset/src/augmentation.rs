//! Image normalization, augmentation and resizing.
//!
//! `Processing::preprocess` runs the fixed chain used for every sample:
//!
//! 1. scale 8-bit RGB to `[0, 1]`,
//! 2. when augmenting: flip, hue, saturation, brightness, contrast,
//!    rotation, random crop, translation, zoom (in that order),
//! 3. bilinear resize to the target size,
//! 4. optionally rescale to `[-1, 1]`.
//!
//! The crop runs before the resize, so its window is a fraction of the
//! source image side, not of the target side. Every random draw comes from
//! the caller's RNG, which makes each transform a pure function of its input
//! and RNG state.

use image::{imageops, imageops::FilterType, Rgb, Rgb32FImage, RgbImage};
use rand::Rng;
use rps_core::{AugmentationConfig, Error, ImageDimensions, Result};

/// Per-call preprocessing switches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    /// Resize target
    pub target_size: ImageDimensions,
    /// Apply the randomized transforms
    pub augment: bool,
    /// Rescale the output from `[0, 1]` to `[-1, 1]`
    pub normalize_m1_p1: bool,
}

/// The augmentation engine
#[derive(Debug, Clone)]
pub struct Processing {
    config: AugmentationConfig,
}

impl Processing {
    /// Creates the engine, rejecting invalid magnitudes up front
    pub fn new(config: AugmentationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in use
    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Full chain: normalize, optional augmentation, resize, optional `[-1, 1]`
    pub fn preprocess<R: Rng + ?Sized>(
        &self,
        image: &RgbImage,
        options: &PreprocessOptions,
        rng: &mut R,
    ) -> Result<Rgb32FImage> {
        let mut out = normalize_to_unit(image);
        if options.augment {
            out = self.augment(out, rng)?;
        }
        out = resize_bilinear(&out, options.target_size);
        if options.normalize_m1_p1 {
            out = normalize_to_signed(&out);
        }
        Ok(out)
    }

    /// Randomized transforms on a `[0, 1]` image
    pub fn augment<R: Rng + ?Sized>(&self, image: Rgb32FImage, rng: &mut R) -> Result<Rgb32FImage> {
        let config = &self.config;
        let mut image = image;

        if config.flip_left_right && rng.gen_bool(0.5) {
            image = imageops::flip_horizontal(&image);
        }
        if let Some(delta) = config.hue {
            image = adjust_hue(&image, symmetric(rng, delta));
        }
        if let Some(delta) = config.saturation {
            image = adjust_saturation(&image, 1.0 + symmetric(rng, delta));
        }
        if let Some(delta) = config.brightness {
            image = adjust_brightness(&image, symmetric(rng, delta));
        }
        if let Some(delta) = config.contrast {
            image = adjust_contrast(&image, 1.0 + symmetric(rng, delta));
        }
        if let Some(degrees) = config.rotation {
            if degrees != 0.0 {
                image = rotate(&image, symmetric(rng, degrees));
            }
        }
        if let Some(fraction) = config.crop {
            image = random_crop(&image, fraction, rng)?;
        }
        if let Some(fraction) = config.translate {
            let dy = symmetric(rng, fraction);
            let dx = symmetric(rng, fraction);
            image = translate(&image, dy, dx);
        }
        if let Some(fraction) = config.zoom {
            let zy = symmetric(rng, fraction);
            let zx = symmetric(rng, fraction);
            image = zoom(&image, zy, zx);
        }

        Ok(image)
    }
}

/// Uniform draw in `[-magnitude, magnitude]`
fn symmetric<R: Rng + ?Sized>(rng: &mut R, magnitude: f32) -> f32 {
    if magnitude > 0.0 {
        rng.gen_range(-magnitude..=magnitude)
    } else {
        0.0
    }
}

/// Scales 8-bit channels to `[0, 1]`
pub fn normalize_to_unit(image: &RgbImage) -> Rgb32FImage {
    let (width, height) = image.dimensions();
    Rgb32FImage::from_fn(width, height, |x, y| {
        let p = image.get_pixel(x, y).0;
        Rgb([p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0])
    })
}

/// Rescales `[0, 1]` to `[-1, 1]`
pub fn normalize_to_signed(image: &Rgb32FImage) -> Rgb32FImage {
    map_pixels(image, |p| p.map(|v| v * 2.0 - 1.0))
}

/// Converts a `[0, 1]` image back to 8-bit, clipping out-of-range values
pub fn revert_normalize_to_u8(image: &Rgb32FImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let p = image.get_pixel(x, y).0;
        Rgb(p.map(|v| (v * 255.0).clamp(0.0, 255.0) as u8))
    })
}

/// Bilinear resize
pub fn resize_bilinear(image: &Rgb32FImage, target: ImageDimensions) -> Rgb32FImage {
    imageops::resize(image, target.width, target.height, FilterType::Triangle)
}

/// Planar `[3, H, W]` layout, as the model consumes it
pub fn to_chw(image: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut out = vec![0.0; 3 * plane];
    for (i, pixel) in image.pixels().enumerate() {
        out[i] = pixel[0];
        out[plane + i] = pixel[1];
        out[2 * plane + i] = pixel[2];
    }
    out
}

fn map_pixels(image: &Rgb32FImage, f: impl Fn([f32; 3]) -> [f32; 3]) -> Rgb32FImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0 = f(pixel.0);
    }
    out
}

/// Adds `delta` to every channel
pub fn adjust_brightness(image: &Rgb32FImage, delta: f32) -> Rgb32FImage {
    map_pixels(image, |p| p.map(|v| (v + delta).clamp(0.0, 1.0)))
}

/// Scales each channel's distance from that channel's mean
pub fn adjust_contrast(image: &Rgb32FImage, factor: f32) -> Rgb32FImage {
    let count = image.pixels().len().max(1) as f32;
    let mut mean = [0.0f32; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            mean[c] += pixel[c];
        }
    }
    let mean = mean.map(|m| m / count);

    map_pixels(image, |p| {
        let mut out = p;
        for c in 0..3 {
            out[c] = ((p[c] - mean[c]) * factor + mean[c]).clamp(0.0, 1.0);
        }
        out
    })
}

/// Multiplies HSV saturation by `factor`
pub fn adjust_saturation(image: &Rgb32FImage, factor: f32) -> Rgb32FImage {
    map_pixels(image, |p| {
        let [h, s, v] = rgb_to_hsv(p);
        hsv_to_rgb([h, (s * factor).clamp(0.0, 1.0), v])
    })
}

/// Rotates hue by `delta`, a fraction of the full circle
pub fn adjust_hue(image: &Rgb32FImage, delta: f32) -> Rgb32FImage {
    map_pixels(image, |p| {
        let [h, s, v] = rgb_to_hsv(p);
        hsv_to_rgb([(h + delta).rem_euclid(1.0), s, v])
    })
}

/// RGB in `[0, 1]` to HSV with hue in `[0, 1)`
pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;

    let hue = if chroma <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / chroma).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / chroma + 2.0) / 6.0
    } else {
        ((r - g) / chroma + 4.0) / 6.0
    };
    let saturation = if max > 0.0 { chroma / max } else { 0.0 };

    [hue, saturation, max]
}

/// HSV (hue in `[0, 1)`) back to RGB
pub fn hsv_to_rgb([h, s, v]: [f32; 3]) -> [f32; 3] {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let sector = h6.floor();
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match sector as u32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Samples at fractional coordinates. Coordinates outside the image are
/// clamped to the border, which replicates edge pixels ("nearest" fill).
fn sample_bilinear(image: &Rgb32FImage, x: f32, y: f32) -> Rgb<f32> {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = top * (1.0 - fy) + bottom * fy;
    }
    Rgb(out)
}

/// Resamples the image through an output-to-source coordinate map
fn warp(image: &Rgb32FImage, map: impl Fn(f32, f32) -> (f32, f32)) -> Rgb32FImage {
    let (width, height) = image.dimensions();
    Rgb32FImage::from_fn(width, height, |x, y| {
        let (sx, sy) = map(x as f32, y as f32);
        sample_bilinear(image, sx, sy)
    })
}

fn center(image: &Rgb32FImage) -> (f32, f32) {
    let (width, height) = image.dimensions();
    ((width as f32 - 1.0) / 2.0, (height as f32 - 1.0) / 2.0)
}

/// Rotates counter-clockwise by `degrees` about the image center
pub fn rotate(image: &Rgb32FImage, degrees: f32) -> Rgb32FImage {
    let (cx, cy) = center(image);
    let (sin, cos) = degrees.to_radians().sin_cos();
    warp(image, |x, y| {
        let dx = x - cx;
        let dy = y - cy;
        (cos * dx + sin * dy + cx, -sin * dx + cos * dy + cy)
    })
}

/// Shifts content by fractions of the height and width
pub fn translate(image: &Rgb32FImage, dy_fraction: f32, dx_fraction: f32) -> Rgb32FImage {
    let (width, height) = image.dimensions();
    let shift_x = dx_fraction * width as f32;
    let shift_y = dy_fraction * height as f32;
    warp(image, |x, y| (x - shift_x, y - shift_y))
}

/// Scales sampling distance from the center by `1 + z`; positive values zoom out
pub fn zoom(image: &Rgb32FImage, zy: f32, zx: f32) -> Rgb32FImage {
    let (cx, cy) = center(image);
    let (sx, sy) = (1.0 + zx, 1.0 + zy);
    warp(image, |x, y| (cx + (x - cx) * sx, cy + (y - cy) * sy))
}

/// Side of the square crop window for an image of side `side`: `round(side * (1 - fraction))`
pub fn crop_window(side: u32, fraction: f32) -> Result<u32> {
    if !(0.0..1.0).contains(&fraction) {
        return Err(Error::Config(format!(
            "crop fraction must be in [0, 1), got {fraction}"
        )));
    }
    let size = (side as f64 * (1.0 - fraction as f64)).round() as u32;
    if size == 0 {
        return Err(Error::Config(format!(
            "crop fraction {fraction} leaves no pixels of a {side}px image"
        )));
    }
    Ok(size)
}

/// Square crop at a random offset. The window derives from the image height.
pub fn random_crop<R: Rng + ?Sized>(
    image: &Rgb32FImage,
    fraction: f32,
    rng: &mut R,
) -> Result<Rgb32FImage> {
    let (width, height) = image.dimensions();
    let size = crop_window(height, fraction)?;
    if size > width {
        return Err(Error::InvalidArgument(format!(
            "crop window {size} exceeds image width {width}"
        )));
    }

    let x = rng.gen_range(0..=width - size);
    let y = rng.gen_range(0..=height - size);
    Ok(imageops::crop_imm(image, x, y, size, size).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn create_test_image() -> RgbImage {
        RgbImage::from_fn(100, 100, |x, y| {
            if x < 50 && y < 50 {
                Rgb([255u8, 0u8, 0u8]) // Red
            } else if x >= 50 && y < 50 {
                Rgb([0u8, 255u8, 0u8]) // Green
            } else if x < 50 && y >= 50 {
                Rgb([0u8, 0u8, 255u8]) // Blue
            } else {
                Rgb([255u8, 255u8, 0u8]) // Yellow
            }
        })
    }

    fn options(augment: bool) -> PreprocessOptions {
        PreprocessOptions {
            target_size: ImageDimensions::square(32),
            augment,
            normalize_m1_p1: false,
        }
    }

    fn gray(side: u32, value: f32) -> Rgb32FImage {
        Rgb32FImage::from_pixel(side, side, Rgb([value; 3]))
    }

    #[test]
    fn test_normalize_to_unit() {
        let image = normalize_to_unit(&create_test_image());
        assert_eq!(image.get_pixel(0, 0).0, [1.0, 0.0, 0.0]);
        assert_eq!(image.get_pixel(99, 99).0, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_preprocess_without_augmentation_is_deterministic() {
        let processing = Processing::new(AugmentationConfig::default()).unwrap();
        let image = create_test_image();

        let a = processing
            .preprocess(&image, &options(false), &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        let b = processing
            .preprocess(&image, &options(false), &mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();
        assert_eq!(a, b);

        let expected = resize_bilinear(&normalize_to_unit(&image), ImageDimensions::square(32));
        assert_eq!(a, expected);
        assert_eq!(a.dimensions(), (32, 32));
    }

    #[test]
    fn test_augmentation_reproducible_with_seed() {
        let processing = Processing::new(AugmentationConfig::moderate()).unwrap();
        let image = create_test_image();

        let run = |seed| {
            processing
                .preprocess(&image, &options(true), &mut ChaCha8Rng::seed_from_u64(seed))
                .unwrap()
        };
        assert_eq!(run(1234), run(1234));
        assert_ne!(run(1234), run(4321));
    }

    #[test]
    fn test_signed_normalization() {
        let processing = Processing::new(AugmentationConfig::disabled()).unwrap();
        let opts = PreprocessOptions {
            normalize_m1_p1: true,
            ..options(false)
        };
        let out = processing
            .preprocess(&create_test_image(), &opts, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert!(out.pixels().all(|p| p.0.iter().all(|v| (-1.0..=1.0).contains(v))));
        assert_eq!(out.get_pixel(0, 0).0, [1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_crop_window_from_source_side() {
        assert_eq!(crop_window(300, 0.05).unwrap(), 285);
        assert_eq!(crop_window(100, 0.1).unwrap(), 90);
        assert_eq!(crop_window(64, 0.25).unwrap(), 48);
        assert_eq!(crop_window(160, 0.0).unwrap(), 160);
    }

    #[test]
    fn test_crop_happens_before_resize() {
        let config = AugmentationConfig {
            crop: Some(0.05),
            ..AugmentationConfig::disabled()
        };
        let processing = Processing::new(config).unwrap();
        let source = normalize_to_unit(&RgbImage::from_pixel(300, 300, Rgb([9, 9, 9])));

        // The crop window is a fraction of the 300px source, whatever the target size
        let augmented = processing
            .augment(source, &mut ChaCha8Rng::seed_from_u64(5))
            .unwrap();
        assert_eq!(augmented.dimensions(), (285, 285));
    }

    #[test]
    fn test_crop_fraction_rejected() {
        assert!(matches!(crop_window(100, 1.0), Err(Error::Config(_))));
        assert!(matches!(crop_window(1, 0.9), Err(Error::Config(_))));

        let config = AugmentationConfig {
            crop: Some(1.5),
            ..AugmentationConfig::disabled()
        };
        assert!(matches!(Processing::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_crop_wider_than_image_rejected() {
        let tall = Rgb32FImage::from_pixel(10, 40, Rgb([0.5; 3]));
        let result = random_crop(&tall, 0.1, &mut ChaCha8Rng::seed_from_u64(0));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_brightness_uses_configured_magnitude() {
        let config = AugmentationConfig {
            brightness: Some(0.3),
            ..AugmentationConfig::disabled()
        };
        let processing = Processing::new(config).unwrap();

        let deltas: Vec<f32> = (0..64)
            .map(|seed| {
                let out = processing
                    .augment(gray(4, 0.5), &mut ChaCha8Rng::seed_from_u64(seed))
                    .unwrap();
                out.get_pixel(0, 0)[0] - 0.5
            })
            .collect();

        assert!(deltas.iter().all(|d| d.abs() <= 0.3 + 1e-6));
        // A hardcoded 0.1 delta could never move the pixel this far
        assert!(deltas.iter().any(|d| d.abs() > 0.1));
    }

    #[test]
    fn test_brightness_and_contrast_identity() {
        let image = normalize_to_unit(&create_test_image());
        assert_eq!(adjust_brightness(&image, 0.0), image);
        assert_eq!(adjust_contrast(&image, 1.0), image);
    }

    #[test]
    fn test_contrast_scales_around_mean() {
        let image = Rgb32FImage::from_fn(2, 1, |x, _| Rgb([if x == 0 { 0.4 } else { 0.6 }; 3]));
        let out = adjust_contrast(&image, 2.0);
        assert!((out.get_pixel(0, 0)[0] - 0.3).abs() < 1e-6);
        assert!((out.get_pixel(1, 0)[0] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_hsv_conversion() {
        for rgb in [[1.0, 0.0, 0.0], [0.2, 0.7, 0.4], [0.5, 0.5, 0.5], [0.1, 0.2, 0.9]] {
            let back = hsv_to_rgb(rgb_to_hsv(rgb));
            for c in 0..3 {
                assert!((back[c] - rgb[c]).abs() < 1e-5, "{rgb:?} -> {back:?}");
            }
        }
        assert_eq!(rgb_to_hsv([0.0, 1.0, 0.0])[0], 1.0 / 3.0);
    }

    #[test]
    fn test_hue_shift_red_to_green() {
        let red = Rgb32FImage::from_pixel(1, 1, Rgb([1.0, 0.0, 0.0]));
        let shifted = adjust_hue(&red, 1.0 / 3.0);
        let p = shifted.get_pixel(0, 0).0;
        assert!(p[0].abs() < 1e-5 && (p[1] - 1.0).abs() < 1e-5 && p[2].abs() < 1e-5);
    }

    #[test]
    fn test_zero_saturation_is_gray() {
        let image = normalize_to_unit(&create_test_image());
        let out = adjust_saturation(&image, 0.0);
        assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn test_rotate_half_turn() {
        let image = normalize_to_unit(&create_test_image());
        assert_eq!(rotate(&image, 0.0), image);

        let rotated = rotate(&image, 180.0);
        let corner = rotated.get_pixel(0, 0).0;
        assert!((corner[0] - 1.0).abs() < 1e-4 && (corner[1] - 1.0).abs() < 1e-4);
        assert!(corner[2].abs() < 1e-4);
    }

    #[test]
    fn test_translate_fills_with_nearest() {
        let image = normalize_to_unit(&create_test_image());
        let shifted = translate(&image, 0.0, 0.5);
        // Right edge now shows the red quadrant, left edge repeats the border column
        assert_eq!(shifted.get_pixel(99, 0).0, [1.0, 0.0, 0.0]);
        assert_eq!(shifted.get_pixel(0, 0).0, [1.0, 0.0, 0.0]);
        assert_eq!(shifted.get_pixel(0, 99).0, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zoom_identity() {
        let image = normalize_to_unit(&create_test_image());
        assert_eq!(zoom(&image, 0.0, 0.0), image);
        assert_eq!(zoom(&image, 0.3, -0.2).dimensions(), image.dimensions());
    }

    #[test]
    fn test_flip_moves_quadrants() {
        let image = normalize_to_unit(&create_test_image());
        let flipped = imageops::flip_horizontal(&image);
        assert_eq!(flipped.get_pixel(0, 0).0, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_revert_normalize_clips() {
        let image = Rgb32FImage::from_pixel(1, 1, Rgb([1.2, -0.1, 0.5]));
        assert_eq!(revert_normalize_to_u8(&image).get_pixel(0, 0).0, [255, 0, 127]);
    }

    #[test]
    fn test_to_chw_layout() {
        let image = Rgb32FImage::from_fn(2, 1, |x, _| Rgb([x as f32, 10.0 + x as f32, 20.0 + x as f32]));
        assert_eq!(to_chw(&image), vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
    }
}
