// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode engine capability shared by all decoders.

use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use labelscan_core::types::BarcodeFormat;
use thiserror::Error;

/// Errors an engine may raise. The adapter swallows all of them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine task failed: {0}")]
    Task(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// A decoded symbol as reported by one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineHit {
    pub code: String,
    pub format: BarcodeFormat,
    /// Engine-specific certainty in [0, 1].
    pub confidence: f32,
}

/// A barcode decoder the adapter can drive.
///
/// Implementations run their CPU work on the blocking pool and return
/// `Ok(None)` when the frame holds no symbol they can read.
#[async_trait]
pub trait BarcodeEngine: Send + Sync {
    /// Stable identifier reported in [`BarcodeResult::engine`](labelscan_core::BarcodeResult).
    fn id(&self) -> &'static str;

    fn supports(&self, format: BarcodeFormat) -> bool;

    fn supports_any(&self, formats: &[BarcodeFormat]) -> bool {
        formats.iter().any(|f| self.supports(*f))
    }

    async fn detect(
        &self,
        image: Arc<GrayImage>,
        formats: &[BarcodeFormat],
    ) -> Result<Option<EngineHit>, EngineError>;
}
