// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// QR engine backed by `rqrr`.

use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use labelscan_core::types::BarcodeFormat;
use rqrr::PreparedImage;
use tracing::debug;

use super::engine::{BarcodeEngine, EngineError, EngineHit};

/// QR decoder. rqrr either decodes a grid (with Reed-Solomon correction) or
/// fails, so hits are reported at full confidence.
#[derive(Debug, Default, Clone)]
pub struct RqrrEngine;

impl RqrrEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(image: &GrayImage) -> Option<EngineHit> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w < 21 || h < 21 {
            return None;
        }
        let raw = image.as_raw();
        let mut prepared = PreparedImage::prepare_from_greyscale(w, h, |x, y| raw[y * w + x]);
        let grids = prepared.detect_grids();
        debug!(grids = grids.len(), "QR grids detected");
        grids
            .iter()
            .find_map(|g| g.decode().ok())
            .map(|(_, content)| EngineHit {
                code: content,
                format: BarcodeFormat::Qr,
                confidence: 1.0,
            })
    }
}

#[async_trait]
impl BarcodeEngine for RqrrEngine {
    fn id(&self) -> &'static str {
        "rqrr"
    }

    fn supports(&self, format: BarcodeFormat) -> bool {
        format == BarcodeFormat::Qr
    }

    async fn detect(
        &self,
        image: Arc<GrayImage>,
        formats: &[BarcodeFormat],
    ) -> Result<Option<EngineHit>, EngineError> {
        if !self.supports_any(formats) {
            return Ok(None);
        }
        let hit = tokio::task::spawn_blocking(move || Self::decode(&image)).await?;
        Ok(hit)
    }
}
