// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition backend seams: one recognizer context per pooled worker, the
// factory that builds them, and the clock the pool measures idleness with.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::DynamicImage;
use labelscan_core::error::Result;
use labelscan_core::types::{OcrWord, RecognitionMode};

/// Backend output before normalization. `confidence` may be on the backend's
/// native scale (0-1 or 0-100).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<OcrWord>,
    pub warnings: Vec<String>,
}

/// An expensive, stateful recognition context.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(
        &self,
        image: Arc<DynamicImage>,
        mode: RecognitionMode,
    ) -> Result<RawRecognition>;

    /// Release backend resources. Called once, when the pool drops the worker.
    fn terminate(&self) {}
}

/// Builds recognizers for a language.
#[async_trait]
pub trait RecognizerFactory: Send + Sync {
    async fn create(&self, language: &str) -> Result<Arc<dyn TextRecognizer>>;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}
