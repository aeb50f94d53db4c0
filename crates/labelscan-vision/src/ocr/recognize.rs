// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition service — preprocess, pick a mode, borrow a pooled worker
// and race the recognition against its timeout and the cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use labelscan_core::config::{OcrConfig, PreprocessConfig};
use labelscan_core::error::{ErrorCode, Result, ScanError};
use labelscan_core::types::{OcrResult, OcrWord, RecognitionMode, normalize_confidence};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::mode::select_mode;
use super::pool::WorkerPool;
use crate::image::{ImageSource, preprocess_blocking};

/// Per-call recognition settings.
#[derive(Debug, Clone)]
pub struct RecognizeOptions {
    pub language: String,
    pub timeout: Duration,
    /// Force a mode instead of deriving one from the image.
    pub mode: Option<RecognitionMode>,
}

impl Default for RecognizeOptions {
    fn default() -> Self {
        Self::from(&OcrConfig::default())
    }
}

impl From<&OcrConfig> for RecognizeOptions {
    fn from(config: &OcrConfig) -> Self {
        Self {
            language: config.language.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            mode: None,
        }
    }
}

/// Pooled recognition front-end.
#[derive(Clone)]
pub struct TextRecognitionService {
    pool: WorkerPool,
    preprocess: PreprocessConfig,
}

impl TextRecognitionService {
    pub fn new(pool: WorkerPool, preprocess: PreprocessConfig) -> Self {
        Self { pool, preprocess }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Recognize the text in `source`.
    ///
    /// Stage failures (timeout, backend error, saturated pool, bad image) come
    /// back as an `OcrResult` with `ok == false` and an error code. Only
    /// cancellation is an `Err`.
    #[instrument(skip_all, fields(language = %options.language, timeout_ms = options.timeout.as_millis() as u64))]
    pub async fn recognize(
        &self,
        source: ImageSource,
        options: &RecognizeOptions,
        cancel: &CancellationToken,
    ) -> Result<OcrResult> {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Aborted),
            res = preprocess_blocking(source, self.preprocess.clone()) => res,
        };
        let prepared = match prepared {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "Preprocessing failed");
                return Ok(OcrResult::failure(ErrorCode::OcrFailed, elapsed(), RecognitionMode::Auto)
                    .with_warning(err.to_string()));
            }
        };
        let mode = options.mode.unwrap_or_else(|| select_mode(&prepared.meta));
        debug!(?mode, width = prepared.meta.width, height = prepared.meta.height, "Recognition mode selected");

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Aborted),
            res = self.pool.acquire(&options.language) => res,
        };
        let mut worker = match acquired {
            Ok(w) => w,
            Err(err @ ScanError::CapacityExceeded { .. }) => {
                warn!(%err, "No recognition worker available");
                return Ok(OcrResult::failure(ErrorCode::CapacityExceeded, elapsed(), mode));
            }
            Err(err) => {
                warn!(%err, "Could not obtain a recognition worker");
                return Ok(OcrResult::failure(ErrorCode::OcrFailed, elapsed(), mode)
                    .with_warning(err.to_string()));
            }
        };

        let image = Arc::new(prepared.image);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker = %worker.id(), "Recognition cancelled; returning worker");
                return Err(ScanError::Aborted);
            }
            res = tokio::time::timeout(options.timeout, worker.recognize(image, mode)) => res,
        };

        let raw = match outcome {
            Err(_) => {
                worker.mark_timed_out();
                warn!(worker = %worker.id(), "Recognition timed out");
                return Ok(OcrResult::failure(ErrorCode::OcrTimeout, elapsed(), mode));
            }
            Ok(Err(err)) => {
                warn!(%err, "Recognition failed");
                return Ok(OcrResult::failure(ErrorCode::OcrFailed, elapsed(), mode)
                    .with_warning(err.to_string()));
            }
            Ok(Ok(raw)) => raw,
        };
        drop(worker);

        let text = raw.text.trim().to_string();
        let confidence = normalize_confidence(raw.confidence);
        let words = raw
            .words
            .into_iter()
            .map(|w| OcrWord {
                confidence: normalize_confidence(w.confidence),
                ..w
            })
            .collect();
        let empty = text.is_empty();
        let result = OcrResult {
            ok: !empty,
            text,
            confidence,
            words,
            duration_ms: elapsed(),
            warnings: raw.warnings,
            error_code: empty.then_some(ErrorCode::OcrFailed),
            mode,
        };
        info!(
            ok = result.ok,
            confidence = result.confidence,
            chars = result.text.len(),
            duration_ms = result.duration_ms,
            "Recognition complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::pool::tests::FakeFactory;
    use image::{DynamicImage, GrayImage, Luma};
    use labelscan_core::config::PoolConfig;

    fn source() -> ImageSource {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 120, Luma([200]))).into()
    }

    fn service(factory: Arc<FakeFactory>, max_workers: usize) -> TextRecognitionService {
        let pool = WorkerPool::new(
            factory,
            PoolConfig {
                max_workers,
                ..PoolConfig::default()
            },
        );
        TextRecognitionService::new(pool, PreprocessConfig::default())
    }

    fn options(timeout_ms: u64) -> RecognizeOptions {
        RecognizeOptions {
            language: "eng".into(),
            timeout: Duration::from_millis(timeout_ms),
            mode: None,
        }
    }

    #[tokio::test]
    async fn confident_text_is_ok() {
        let svc = service(FakeFactory::answering("Vitamin D3 1000 IU", 0.93), 1);
        let result = svc
            .recognize(source(), &options(1_000), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.text, "Vitamin D3 1000 IU");
        assert!((result.confidence - 0.93).abs() < 1e-6);
        assert_eq!(result.error_code, None);
    }

    #[tokio::test]
    async fn native_percent_scale_is_normalized() {
        let svc = service(FakeFactory::answering("Zinc 15 mg", 87.0), 1);
        let result = svc
            .recognize(source(), &options(1_000), &CancellationToken::new())
            .await
            .unwrap();
        assert!((result.confidence - 0.87).abs() < 1e-6);
    }

    #[tokio::test]
    async fn never_resolving_backend_times_out() {
        let factory = FakeFactory::hanging();
        let svc = service(factory.clone(), 1);
        let result = svc
            .recognize(source(), &options(10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::OcrTimeout));
        // One timeout is below the wedge limit, so the worker went back.
        assert_eq!(svc.pool().stats().idle, 1);
    }

    #[tokio::test]
    async fn empty_text_is_a_failure() {
        let svc = service(FakeFactory::answering("   ", 0.99), 1);
        let result = svc
            .recognize(source(), &options(1_000), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_code, Some(ErrorCode::OcrFailed));
    }

    #[tokio::test]
    async fn saturated_pool_reports_capacity_exceeded() {
        let svc = service(FakeFactory::answering("x", 1.0), 1);
        let _held = svc.pool().acquire("eng").await.unwrap();
        let result = svc
            .recognize(source(), &options(1_000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.error_code, Some(ErrorCode::CapacityExceeded));
    }

    #[tokio::test]
    async fn cancellation_returns_the_worker() {
        let svc = service(FakeFactory::hanging(), 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = svc
            .recognize(source(), &options(5_000), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(svc.pool().stats().busy, 0);
    }

    #[tokio::test]
    async fn undecodable_bytes_fail_without_a_worker() {
        let factory = FakeFactory::answering("x", 1.0);
        let svc = service(factory.clone(), 1);
        let result = svc
            .recognize(
                ImageSource::Encoded(vec![1, 2, 3]),
                &options(1_000),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.error_code, Some(ErrorCode::OcrFailed));
        assert_eq!(factory.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
