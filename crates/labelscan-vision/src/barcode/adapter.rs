// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode adapter — one decode contract over interchangeable engines.
//
// Engines run strictly in priority order, each bounded by its own timeout.
// Engine errors and timeouts are absorbed here and never fail the decode;
// only cancellation surfaces as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::GrayImage;
use labelscan_core::config::BarcodeConfig;
use labelscan_core::error::{ErrorCode, Result, ScanError};
use labelscan_core::types::{BarcodeFormat, BarcodeResult, EngineStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::cascade::CascadeEngine;
use super::engine::BarcodeEngine;
use super::linear::LinearEngine;
use super::qr::RqrrEngine;

/// Per-call decode settings.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub formats: Vec<BarcodeFormat>,
    pub strategy: EngineStrategy,
    pub engine_timeout: Duration,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::from(&BarcodeConfig::default())
    }
}

impl From<&BarcodeConfig> for DecodeOptions {
    fn from(config: &BarcodeConfig) -> Self {
        Self {
            formats: config.formats.clone(),
            strategy: config.strategy,
            engine_timeout: Duration::from_millis(config.engine_timeout_ms),
        }
    }
}

/// How a single engine invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Hit,
    NoMatch,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct EngineAttempt {
    pub engine: &'static str,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
}

/// Result of a decode plus the per-engine trail that led to it.
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub result: Option<BarcodeResult>,
    pub attempts: Vec<EngineAttempt>,
}

impl DecodeReport {
    /// Code explaining a miss, if the miss has a more specific cause than
    /// "no barcode in frame".
    pub fn failure_code(&self) -> Option<ErrorCode> {
        if self.result.is_some() {
            return None;
        }
        if self.attempts.is_empty() {
            return Some(ErrorCode::BarcodeUnsupported);
        }
        if self
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::TimedOut)
        {
            return Some(ErrorCode::BarcodeTimeout);
        }
        None
    }
}

/// Uniform decode front-end over the registered engines.
#[derive(Clone)]
pub struct BarcodeAdapter {
    /// Priority order: first entry is tried first.
    engines: Vec<Arc<dyn BarcodeEngine>>,
}

impl BarcodeAdapter {
    pub fn new(engines: Vec<Arc<dyn BarcodeEngine>>) -> Self {
        Self { engines }
    }

    /// `linear`, then `rqrr`, then the `cascade` over both.
    pub fn with_default_engines() -> Self {
        let linear: Arc<dyn BarcodeEngine> = Arc::new(LinearEngine::new());
        let qr: Arc<dyn BarcodeEngine> = Arc::new(RqrrEngine::new());
        let cascade = Arc::new(CascadeEngine::new(vec![
            Arc::clone(&linear),
            Arc::clone(&qr),
        ]));
        Self::new(vec![linear, qr, cascade])
    }

    pub fn engine_ids(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    fn selected(&self, strategy: EngineStrategy) -> impl Iterator<Item = &Arc<dyn BarcodeEngine>> {
        let pinned = match strategy {
            EngineStrategy::Auto => None,
            EngineStrategy::Linear => Some("linear"),
            EngineStrategy::Rqrr => Some("rqrr"),
            EngineStrategy::Cascade => Some("cascade"),
        };
        self.engines
            .iter()
            .filter(move |e| pinned.is_none_or(|id| e.id() == id))
    }

    /// Decode a frame. `Ok(None)` means no engine found a symbol.
    pub async fn decode(
        &self,
        image: Arc<GrayImage>,
        options: &DecodeOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<BarcodeResult>> {
        Ok(self.decode_detailed(image, options, cancel).await?.result)
    }

    #[instrument(skip_all, fields(strategy = ?options.strategy, width = image.width(), height = image.height()))]
    pub async fn decode_detailed(
        &self,
        image: Arc<GrayImage>,
        options: &DecodeOptions,
        cancel: &CancellationToken,
    ) -> Result<DecodeReport> {
        let mut report = DecodeReport::default();

        for engine in self.selected(options.strategy) {
            if !engine.supports_any(&options.formats) {
                debug!(engine = engine.id(), "Engine supports none of the requested formats");
                continue;
            }
            if cancel.is_cancelled() {
                return Err(ScanError::Aborted);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Aborted),
                res = tokio::time::timeout(
                    options.engine_timeout,
                    engine.detect(Arc::clone(&image), &options.formats),
                ) => res,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let attempt = match outcome {
                Ok(Ok(Some(hit))) if options.formats.contains(&hit.format) => {
                    info!(engine = engine.id(), code = %hit.code, format = %hit.format, duration_ms, "Barcode decoded");
                    report.result = Some(BarcodeResult::hit(
                        hit.code,
                        hit.format,
                        hit.confidence,
                        engine.id(),
                        duration_ms,
                    ));
                    AttemptOutcome::Hit
                }
                Ok(Ok(_)) => AttemptOutcome::NoMatch,
                Ok(Err(err)) => {
                    warn!(engine = engine.id(), %err, "Barcode engine failed");
                    AttemptOutcome::Failed(err.to_string())
                }
                Err(_) => {
                    warn!(engine = engine.id(), budget_ms = options.engine_timeout.as_millis() as u64, "Barcode engine timed out");
                    AttemptOutcome::TimedOut
                }
            };
            let hit = attempt == AttemptOutcome::Hit;
            report.attempts.push(EngineAttempt {
                engine: engine.id(),
                outcome: attempt,
                duration_ms,
            });
            if hit {
                break;
            }
        }

        if report.result.is_none() {
            debug!(attempts = report.attempts.len(), "No barcode found");
        }
        Ok(report)
    }
}
