// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition-mode selection from preprocessing metadata.

use labelscan_core::types::RecognitionMode;

use crate::image::ImageMeta;

/// Minimum pixel count for a near-square image to be read as sparse text.
const SPARSE_MIN_PIXELS: u64 = 1_000_000;

/// Pick the layout hint for an image.
///
/// - wide and short (a single printed line): `SingleLine`
/// - dense, near-square, high resolution (a full label panel): `SparseText`
/// - label-shaped, landscape or portrait: `SingleBlock`
/// - anything else: `Auto`
pub fn select_mode(meta: &ImageMeta) -> RecognitionMode {
    let aspect = meta.aspect_ratio();
    if aspect >= 4.0 && meta.height <= 200 {
        return RecognitionMode::SingleLine;
    }
    if (0.8..=1.25).contains(&aspect)
        && meta.pixel_count >= SPARSE_MIN_PIXELS
        && meta.denoise_applied
    {
        return RecognitionMode::SparseText;
    }
    if (1.3..=3.0).contains(&aspect) || (1.0 / 3.0..=1.0 / 1.3).contains(&aspect) {
        return RecognitionMode::SingleBlock;
    }
    RecognitionMode::Auto
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32, denoised: bool) -> ImageMeta {
        ImageMeta {
            width,
            height,
            pixel_count: width as u64 * height as u64,
            original_width: width,
            original_height: height,
            scale: 1.0,
            grayscale_applied: true,
            denoise_applied: denoised,
            threshold_applied: false,
            rotation_applied: 0,
            noise_density: 0.0,
        }
    }

    #[test]
    fn strip_reads_as_single_line() {
        assert_eq!(select_mode(&meta(900, 120, false)), RecognitionMode::SingleLine);
        // Too tall for a single line.
        assert_ne!(select_mode(&meta(1500, 300, false)), RecognitionMode::SingleLine);
    }

    #[test]
    fn dense_square_reads_as_sparse_text() {
        assert_eq!(select_mode(&meta(1200, 1100, true)), RecognitionMode::SparseText);
        assert_eq!(select_mode(&meta(1200, 1100, false)), RecognitionMode::Auto);
        assert_eq!(select_mode(&meta(500, 500, true)), RecognitionMode::Auto);
    }

    #[test]
    fn label_shapes_read_as_single_block() {
        assert_eq!(select_mode(&meta(1200, 600, false)), RecognitionMode::SingleBlock);
        assert_eq!(select_mode(&meta(600, 1200, false)), RecognitionMode::SingleBlock);
    }
}
