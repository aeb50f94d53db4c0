// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cascade engine — re-runs the direct decoders over transformed copies of the
// frame for symbols the raw frame does not yield: blurred (print texture and
// sensor noise), Otsu-binarized (glare, low contrast), rotated 90 degrees
// (vertical barcodes) and downscaled (oversized modules, thin quiet zones).

use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use image::imageops::{self, FilterType};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use labelscan_core::types::BarcodeFormat;
use tracing::debug;

use super::engine::{BarcodeEngine, EngineError, EngineHit};

/// Hits found on a transformed frame are discounted by this factor.
const CASCADE_DISCOUNT: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Blur,
    Otsu,
    Rotate90,
    Downscale,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Blur,
        Variant::Otsu,
        Variant::Rotate90,
        Variant::Downscale,
    ];

    pub fn apply(&self, gray: &GrayImage) -> Option<GrayImage> {
        match self {
            Self::Blur => Some(gaussian_blur_f32(gray, 1.5)),
            Self::Otsu => Some(threshold(gray, otsu_level(gray), ThresholdType::Binary)),
            Self::Rotate90 => Some(imageops::rotate90(gray)),
            Self::Downscale => {
                let (w, h) = gray.dimensions();
                if w < 200 || h < 40 {
                    return None;
                }
                Some(imageops::resize(gray, w / 2, h / 2, FilterType::Triangle))
            }
        }
    }
}

/// Meta-engine over a set of direct decoders.
pub struct CascadeEngine {
    inner: Vec<Arc<dyn BarcodeEngine>>,
}

impl CascadeEngine {
    pub fn new(inner: Vec<Arc<dyn BarcodeEngine>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BarcodeEngine for CascadeEngine {
    fn id(&self) -> &'static str {
        "cascade"
    }

    fn supports(&self, format: BarcodeFormat) -> bool {
        self.inner.iter().any(|e| e.supports(format))
    }

    async fn detect(
        &self,
        image: Arc<GrayImage>,
        formats: &[BarcodeFormat],
    ) -> Result<Option<EngineHit>, EngineError> {
        for variant in Variant::ALL {
            let source = Arc::clone(&image);
            let transformed =
                tokio::task::spawn_blocking(move || variant.apply(&source)).await?;
            let Some(transformed) = transformed else {
                continue;
            };
            let transformed = Arc::new(transformed);

            for engine in self.inner.iter().filter(|e| e.supports_any(formats)) {
                match engine.detect(Arc::clone(&transformed), formats).await {
                    Ok(Some(hit)) => {
                        debug!(engine = engine.id(), ?variant, "Cascade hit");
                        return Ok(Some(EngineHit {
                            confidence: hit.confidence * CASCADE_DISCOUNT,
                            ..hit
                        }));
                    }
                    Ok(None) => {}
                    Err(err) => debug!(engine = engine.id(), ?variant, %err, "Cascade inner engine failed"),
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::linear::{LinearEngine, synthesize_ean13};
    use crate::barcode::qr::RqrrEngine;

    fn cascade() -> CascadeEngine {
        CascadeEngine::new(vec![Arc::new(LinearEngine::new()), Arc::new(RqrrEngine::new())])
    }

    #[tokio::test]
    async fn finds_vertical_barcode_via_rotation() {
        let upright = synthesize_ean13("5901234123457", 2, 60).unwrap();
        // Turned counter-clockwise; the rotate-90 variant brings it back.
        let vertical = imageops::rotate270(&upright);
        assert!(LinearEngine::decode(&vertical, &[BarcodeFormat::Ean13]).is_none());

        let hit = cascade()
            .detect(Arc::new(vertical), &[BarcodeFormat::Ean13])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.code, "5901234123457");
        assert!(hit.confidence < 1.0);
    }

    #[test]
    fn supports_union_of_inner_engines() {
        let engine = cascade();
        assert!(engine.supports(BarcodeFormat::Qr));
        assert!(engine.supports(BarcodeFormat::Ean8));
    }
}
