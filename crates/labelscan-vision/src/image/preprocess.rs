// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Preprocessing pipeline — turns any bitmap source into the canonical image
// the barcode engines and the recognizer consume: bounded resize, luminance
// grayscale, gated median denoise, gated mean threshold and coarse rotation
// correction.

use std::path::PathBuf;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use imageproc::filter::median_filter;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use labelscan_core::config::PreprocessConfig;
use labelscan_core::error::{Result, ScanError};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// Side length the rotation scorer downsamples to.
const ROTATION_PROBE_SIDE: u32 = 256;

/// Weight of the left/right energy asymmetry in the upside-down score.
const ASYMMETRY_WEIGHT: f32 = 0.25;

/// Pixel difference from the neighbour mean that counts as a speckle.
const SPECKLE_DELTA: i32 = 96;

/// Any bitmap the pipeline can start from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded file contents (JPEG, PNG, WebP, ...).
    Encoded(Vec<u8>),
    /// A file on disk.
    Path(PathBuf),
    /// A raw RGBA video frame.
    Frame {
        rgba: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// An already decoded image.
    Image(DynamicImage),
}

impl ImageSource {
    /// Decode into a working image.
    #[instrument(skip_all)]
    pub fn decode(&self) -> Result<DynamicImage> {
        match self {
            Self::Encoded(bytes) => image::load_from_memory(bytes).map_err(|err| {
                ScanError::Image(format!("failed to decode image ({} bytes): {err}", bytes.len()))
            }),
            Self::Path(path) => image::open(path).map_err(|err| {
                ScanError::Image(format!("failed to open {}: {err}", path.display()))
            }),
            Self::Frame {
                rgba,
                width,
                height,
            } => RgbaImage::from_raw(*width, *height, rgba.clone())
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| {
                    ScanError::Image(format!(
                        "frame buffer of {} bytes does not match {width}x{height} RGBA",
                        rgba.len()
                    ))
                }),
            Self::Image(image) => Ok(image.clone()),
        }
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl From<GrayImage> for ImageSource {
    fn from(image: GrayImage) -> Self {
        Self::Image(DynamicImage::ImageLuma8(image))
    }
}

/// What the pipeline did to the image. Feeds recognition-mode selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub pixel_count: u64,
    pub original_width: u32,
    pub original_height: u32,
    /// Output size relative to the source (1.0 when not resized).
    pub scale: f32,
    pub grayscale_applied: bool,
    pub denoise_applied: bool,
    pub threshold_applied: bool,
    /// Clockwise rotation applied, in degrees (0, 90, 180 or 270).
    pub rotation_applied: u16,
    /// Fraction of speckle pixels measured before denoising.
    pub noise_density: f32,
}

impl ImageMeta {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// Canonical image plus metadata, owned by one preprocessing call.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: DynamicImage,
    pub meta: ImageMeta,
}

impl PreprocessedImage {
    /// Luminance view for the barcode engines.
    pub fn to_gray(&self) -> GrayImage {
        match &self.image {
            DynamicImage::ImageLuma8(gray) => gray.clone(),
            other => luminance(&other.to_rgba8()),
        }
    }
}

/// Run the full pipeline synchronously.
#[instrument(skip_all, fields(max_side = config.max_side))]
pub fn preprocess(source: &ImageSource, config: &PreprocessConfig) -> Result<PreprocessedImage> {
    let decoded = source.decode()?;
    let pipeline = Pipeline::new(decoded)
        .resize(config.max_side)
        .grayscale(config.grayscale)
        .denoise(config)
        .threshold(config)
        .correct_rotation(config);

    let out = pipeline.finish();
    info!(
        width = out.meta.width,
        height = out.meta.height,
        denoise = out.meta.denoise_applied,
        threshold = out.meta.threshold_applied,
        rotation = out.meta.rotation_applied,
        "Image preprocessed"
    );
    Ok(out)
}

/// Run the pipeline on the blocking pool so the caller's task stays responsive.
pub async fn preprocess_blocking(
    source: ImageSource,
    config: PreprocessConfig,
) -> Result<PreprocessedImage> {
    tokio::task::spawn_blocking(move || preprocess(&source, &config))
        .await
        .map_err(|err| ScanError::Image(format!("preprocessing task failed: {err}")))?
}

/// Working state threaded through the steps. Each step consumes `self` and
/// returns the transformed pipeline.
struct Pipeline {
    image: DynamicImage,
    meta: ImageMeta,
}

impl Pipeline {
    fn new(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        Self {
            image,
            meta: ImageMeta {
                width,
                height,
                pixel_count: width as u64 * height as u64,
                original_width: width,
                original_height: height,
                scale: 1.0,
                grayscale_applied: false,
                denoise_applied: false,
                threshold_applied: false,
                rotation_applied: 0,
                noise_density: 0.0,
            },
        }
    }

    fn resize(mut self, max_side: u32) -> Self {
        let longest = self.image.width().max(self.image.height());
        if max_side == 0 || longest <= max_side {
            return self;
        }
        self.image = self.image.resize(max_side, max_side, FilterType::Lanczos3);
        self.meta.scale = self.image.width().max(self.image.height()) as f32 / longest as f32;
        debug!(
            width = self.image.width(),
            height = self.image.height(),
            scale = self.meta.scale,
            "Resized"
        );
        self.sync_dimensions()
    }

    fn grayscale(mut self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }
        let gray = match &self.image {
            DynamicImage::ImageLuma8(gray) => gray.clone(),
            other => luminance(&other.to_rgba8()),
        };
        self.image = DynamicImage::ImageLuma8(gray);
        self.meta.grayscale_applied = true;
        self
    }

    fn denoise(mut self, config: &PreprocessConfig) -> Self {
        let DynamicImage::ImageLuma8(gray) = &self.image else {
            return self;
        };
        let density = noise_density(gray);
        self.meta.noise_density = density;

        if !config.denoise
            || self.meta.pixel_count < config.denoise_min_pixels
            || density < config.noise_density_threshold
        {
            return self;
        }
        let filtered = median_filter(gray, 1, 1);
        debug!(noise_density = density, "Median denoise applied");
        self.image = DynamicImage::ImageLuma8(filtered);
        self.meta.denoise_applied = true;
        self
    }

    fn threshold(mut self, config: &PreprocessConfig) -> Self {
        if !config.threshold || self.meta.pixel_count < config.threshold_min_pixels {
            return self;
        }
        let DynamicImage::ImageLuma8(gray) = &self.image else {
            return self;
        };
        let cut = mean_luminance(gray) * config.threshold_factor;
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if (gray.get_pixel(x, y).0[0] as f32) < cut {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        debug!(cut, "Mean threshold applied");
        self.image = DynamicImage::ImageLuma8(binary);
        self.meta.threshold_applied = true;
        self
    }

    fn correct_rotation(mut self, config: &PreprocessConfig) -> Self {
        if !config.rotation {
            return self;
        }
        let probe = match &self.image {
            DynamicImage::ImageLuma8(gray) => gray.clone(),
            other => luminance(&other.to_rgba8()),
        };
        let degrees = choose_rotation(&probe, config.rotation_min_deviation);
        self.image = match degrees {
            90 => self.image.rotate90(),
            180 => self.image.rotate180(),
            270 => self.image.rotate270(),
            _ => return self,
        };
        debug!(degrees, "Rotation corrected");
        self.meta.rotation_applied = degrees;
        self.sync_dimensions()
    }

    fn sync_dimensions(mut self) -> Self {
        self.meta.width = self.image.width();
        self.meta.height = self.image.height();
        self.meta.pixel_count = self.meta.width as u64 * self.meta.height as u64;
        self
    }

    fn finish(self) -> PreprocessedImage {
        PreprocessedImage {
            image: self.image,
            meta: self.meta,
        }
    }
}

/// 0.299 R + 0.587 G + 0.114 B, rounded.
pub fn luminance(rgba: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, _] = rgba.get_pixel(x, y).0;
        let l = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([l.round().clamp(0.0, 255.0) as u8])
    })
}

fn mean_luminance(gray: &GrayImage) -> f32 {
    let n = gray.width() as u64 * gray.height() as u64;
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    sum as f32 / n as f32
}

/// Fraction of interior pixels that differ sharply from all of their
/// 4-neighbours.
fn noise_density(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as i32;
    let mut speckles = 0u64;
    let mut total = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let centre = px(x, y);
            let neighbours = [px(x - 1, y), px(x + 1, y), px(x, y - 1), px(x, y + 1)];
            let mean = neighbours.iter().sum::<i32>() / 4;
            if (centre - mean).abs() > SPECKLE_DELTA {
                speckles += 1;
            }
            total += 1;
        }
    }
    speckles as f32 / total as f32
}

/// Pick a clockwise correction (0, 90, 180 or 270).
///
/// Horizontal text lines make the row profile of edge energy strongly
/// periodic, so its squared coefficient of variation dominates the column
/// profile's when the image is upright or upside-down. Sideways wins only when
/// the column score beats the row score by `min_deviation`; which way to turn
/// comes from where the energy concentrates, since label text is left-aligned.
fn choose_rotation(gray: &GrayImage, min_deviation: f32) -> u16 {
    let probe = downsample(gray, ROTATION_PROBE_SIDE);
    let (rows, cols) = edge_profiles(&probe);

    let s_h = cv_squared(&rows);
    let s_v = cv_squared(&cols);
    if s_h <= f32::EPSILON && s_v <= f32::EPSILON {
        return 0;
    }

    if s_v > s_h * (1.0 + min_deviation) {
        // Text start (left edge) landed on top when the image was turned clockwise.
        let top_heavy = asymmetry(&rows) >= 0.0;
        return if top_heavy { 270 } else { 90 };
    }

    let a = asymmetry(&cols);
    let upright = s_h * (1.0 + ASYMMETRY_WEIGHT * a);
    let flipped = s_h * (1.0 - ASYMMETRY_WEIGHT * a);
    if flipped > upright * (1.0 + min_deviation) {
        180
    } else {
        0
    }
}

fn downsample(gray: &GrayImage, side: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= side {
        return gray.clone();
    }
    let factor = side as f32 / longest as f32;
    let nw = ((w as f32 * factor).round() as u32).max(1);
    let nh = ((h as f32 * factor).round() as u32).max(1);
    image::imageops::resize(gray, nw, nh, FilterType::Triangle)
}

/// Row and column sums of |gx| + |gy|.
fn edge_profiles(gray: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    let (w, h) = gray.dimensions();
    let mut rows = vec![0.0f32; h as usize];
    let mut cols = vec![0.0f32; w as usize];
    for y in 0..h {
        for x in 0..w {
            let e = (gx.get_pixel(x, y).0[0] as f32).abs() + (gy.get_pixel(x, y).0[0] as f32).abs();
            rows[y as usize] += e;
            cols[x as usize] += e;
        }
    }
    (rows, cols)
}

fn cv_squared(profile: &[f32]) -> f32 {
    if profile.is_empty() {
        return 0.0;
    }
    let n = profile.len() as f32;
    let mean = profile.iter().sum::<f32>() / n;
    if mean <= f32::EPSILON {
        return 0.0;
    }
    let var = profile.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    var / (mean * mean)
}

/// (first half - second half) / total, in [-1, 1].
fn asymmetry(profile: &[f32]) -> f32 {
    let mid = profile.len() / 2;
    let first: f32 = profile[..mid].iter().sum();
    let second: f32 = profile[mid..].iter().sum();
    let total = first + second;
    if total <= f32::EPSILON {
        0.0
    } else {
        (first - second) / total
    }
}
