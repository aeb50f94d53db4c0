// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan controller — runs the stages, feeds their outcomes to the reducer and
// publishes a snapshot after every transition.
//
// The controller is one cooperative flow. Every stage races its work against
// its own timeout budget and the session's cancellation token; a budget
// overrun is a stage failure and hands over to the fallback stage, never an
// in-place retry.

use std::sync::Arc;
use std::time::Duration;

use labelscan_core::config::{PreprocessConfig, ScanConfig};
use labelscan_core::error::{ErrorCode, ScanError};
use labelscan_core::types::{ScanSession, ScanSource, ScanStep, Stage};
use labelscan_vision::barcode::{BarcodeAdapter, DecodeOptions};
use labelscan_vision::image::{ImageSource, preprocess_blocking};
use labelscan_vision::ocr::{RecognizeOptions, RecognizerFactory, TextRecognitionService, WorkerPool};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{Analyzer, Searcher};
use crate::gate::OcrVerdict;
use crate::machine::{ScanEvent, ScanPolicy, StartRequest, reduce};
use crate::snapshot::{ScanSnapshot, StageStatus, StageTracker};

/// One image to scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub image: ImageSource,
    pub source: ScanSource,
    /// Run OCR even when a barcode was found.
    pub force_ocr: bool,
}

impl ScanRequest {
    pub fn upload(image: impl Into<ImageSource>) -> Self {
        Self {
            image: image.into(),
            source: ScanSource::Upload,
            force_ocr: false,
        }
    }

    pub fn camera(image: impl Into<ImageSource>) -> Self {
        Self {
            source: ScanSource::Camera,
            ..Self::upload(image)
        }
    }

    pub fn with_force_ocr(mut self, force_ocr: bool) -> Self {
        self.force_ocr = force_ocr;
        self
    }
}

/// Drives one session at a time through barcode, OCR, manual correction,
/// analysis and search.
pub struct ScanController {
    config: ScanConfig,
    policy: ScanPolicy,
    barcode: BarcodeAdapter,
    recognition: TextRecognitionService,
    analyzer: Arc<dyn Analyzer>,
    searcher: Arc<dyn Searcher>,
    session: ScanSession,
    image: Option<ImageSource>,
    tracker: StageTracker,
    history: Vec<ScanStep>,
}

impl ScanController {
    pub fn new(
        config: ScanConfig,
        barcode: BarcodeAdapter,
        recognition: TextRecognitionService,
        analyzer: Arc<dyn Analyzer>,
        searcher: Arc<dyn Searcher>,
    ) -> Self {
        let session = ScanSession::new();
        let tracker = StageTracker::new(&session);
        Self {
            policy: ScanPolicy::from(&config),
            config,
            barcode,
            recognition,
            analyzer,
            searcher,
            session,
            image: None,
            tracker,
            history: Vec::new(),
        }
    }

    /// Wire up the default barcode engines and a fresh worker pool.
    pub fn from_config(
        config: ScanConfig,
        factory: Arc<dyn RecognizerFactory>,
        analyzer: Arc<dyn Analyzer>,
        searcher: Arc<dyn Searcher>,
    ) -> Self {
        let pool = WorkerPool::new(factory, config.pool.clone());
        let recognition = TextRecognitionService::new(pool, config.preprocess.clone());
        Self::new(
            config,
            BarcodeAdapter::with_default_engines(),
            recognition,
            analyzer,
            searcher,
        )
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        self.recognition.pool()
    }

    /// Steps entered since the current scan started, in order.
    pub fn history(&self) -> &[ScanStep] {
        &self.history
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.tracker.subscribe()
    }

    /// Start a new scan and run it until it finishes, fails, is aborted or
    /// waits for a manual correction. A session waiting for correction is
    /// discarded.
    #[instrument(skip_all, fields(source = ?request.source, force_ocr = request.force_ocr))]
    pub async fn run(&mut self, request: ScanRequest, cancel: &CancellationToken) -> ScanSession {
        if !matches!(
            self.session.step,
            ScanStep::Idle | ScanStep::Done | ScanStep::Error
        ) {
            debug!(step = %self.session.step, "Discarding unfinished session");
            self.apply(ScanEvent::Reset);
        }
        self.tracker.clear();
        self.history.clear();
        self.image = Some(request.image);
        self.apply(ScanEvent::Start(StartRequest::new(
            request.source,
            request.force_ocr,
        )));
        self.drive(cancel).await
    }

    /// Replace the draft shown in manual correction.
    pub fn edit_manual(&mut self, text: impl Into<String>) {
        self.apply(ScanEvent::ManualEdited(text.into()));
    }

    /// Accept the user's corrected text and continue with analysis.
    pub async fn confirm_manual(
        &mut self,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> ScanSession {
        if self.session.step != ScanStep::ManualCorrection {
            warn!(step = %self.session.step, "No correction pending");
            return self.session.clone();
        }
        let text: String = text.into();
        if text.trim().is_empty() {
            warn!("Ignoring empty correction");
            return self.session.clone();
        }
        self.tracker.finish(
            Stage::ManualCorrection,
            StageStatus::Succeeded,
            Some(1.0),
            None,
        );
        self.apply(ScanEvent::ManualConfirmed(text));
        self.drive(cancel).await
    }

    /// Re-enter the stage that failed.
    pub async fn retry(&mut self, cancel: &CancellationToken) -> ScanSession {
        self.apply(ScanEvent::Retry);
        if self.session.step == ScanStep::Error {
            warn!("Retry not available");
            return self.session.clone();
        }
        if self.session.step == ScanStep::ManualCorrection {
            self.tracker.begin(Stage::ManualCorrection);
            self.tracker.publish(&self.session);
        }
        self.drive(cancel).await
    }

    pub fn reset(&mut self) {
        self.image = None;
        self.tracker.clear();
        self.history.clear();
        self.apply(ScanEvent::Reset);
        self.tracker.publish(&self.session);
    }

    #[instrument(skip_all, fields(session_id = %self.session.id))]
    async fn drive(&mut self, cancel: &CancellationToken) -> ScanSession {
        loop {
            if self.session.step.stage().is_some() && cancel.is_cancelled() {
                self.abort();
                break;
            }
            match self.session.step {
                ScanStep::ScanningBarcode => self.barcode_stage(cancel).await,
                ScanStep::Ocr => self.ocr_stage(cancel).await,
                ScanStep::Analyzing => self.analysis_stage(cancel).await,
                ScanStep::Searching => self.search_stage(cancel).await,
                ScanStep::ManualCorrection
                | ScanStep::Idle
                | ScanStep::Done
                | ScanStep::Error => break,
            }
        }
        self.session.clone()
    }

    fn apply(&mut self, event: ScanEvent) {
        let name = event.name();
        let from = self.session.step;
        let next = reduce(self.session.clone(), event, &self.policy);
        if next == self.session {
            debug!(event = name, step = %from, "Event ignored");
            return;
        }
        if next.step != from {
            info!(session_id = %next.id, %from, to = %next.step, event = name, "Scan transition");
            self.history.push(next.step);
        }
        self.session = next;
        self.tracker.publish(&self.session);
    }

    fn abort(&mut self) {
        info!(step = %self.session.step, "Scan aborted");
        self.tracker.abort_running();
        self.apply(ScanEvent::Aborted);
    }

    fn finish_progress(&mut self, stage: Stage) {
        let end = self.policy.progress.band(stage).end;
        self.apply(ScanEvent::Progress(end));
    }

    async fn barcode_stage(&mut self, cancel: &CancellationToken) {
        self.tracker.begin(Stage::Barcode);
        let Some(image) = self.image.clone() else {
            self.tracker.finish(Stage::Barcode, StageStatus::Failed, None, None);
            self.apply(ScanEvent::BarcodeFailed { code: None });
            return;
        };

        // Scanlines need the original contrast; skip the OCR-oriented steps.
        let preprocess = PreprocessConfig {
            denoise: false,
            threshold: false,
            rotation: false,
            ..self.config.preprocess.clone()
        };
        let options = DecodeOptions::from(&self.config.barcode);
        let budget_ms = self.config.barcode.stage_timeout_ms;
        let adapter = self.barcode.clone();
        let work = async move {
            let prepared = preprocess_blocking(image, preprocess).await?;
            adapter
                .decode_detailed(Arc::new(prepared.to_gray()), &options, cancel)
                .await
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abort();
                return;
            }
            res = tokio::time::timeout(Duration::from_millis(budget_ms), work) => res,
        };

        match outcome {
            Ok(Ok(report)) => match report.result {
                Some(result) => {
                    self.tracker.finish(
                        Stage::Barcode,
                        StageStatus::Succeeded,
                        Some(result.confidence),
                        None,
                    );
                    self.finish_progress(Stage::Barcode);
                    self.apply(ScanEvent::BarcodeDecoded(result));
                }
                None => {
                    let code = report.failure_code();
                    debug!(attempts = report.attempts.len(), code = ?code, "No barcode; falling back to OCR");
                    self.tracker
                        .finish(Stage::Barcode, StageStatus::Failed, None, code);
                    self.apply(ScanEvent::BarcodeFailed { code });
                }
            },
            Ok(Err(err)) if err.is_aborted() => self.abort(),
            Ok(Err(err)) => {
                warn!(%err, "Barcode stage failed; falling back to OCR");
                self.tracker
                    .finish(Stage::Barcode, StageStatus::Failed, None, None);
                self.apply(ScanEvent::BarcodeFailed { code: None });
            }
            Err(_) => {
                warn!(budget_ms, "Barcode stage timed out; falling back to OCR");
                let code = Some(ErrorCode::BarcodeTimeout);
                self.tracker
                    .finish(Stage::Barcode, StageStatus::Failed, None, code);
                self.apply(ScanEvent::BarcodeFailed { code });
            }
        }
    }

    async fn ocr_stage(&mut self, cancel: &CancellationToken) {
        self.tracker.begin(Stage::Ocr);
        let Some(image) = self.image.clone() else {
            self.tracker
                .finish(Stage::Ocr, StageStatus::Failed, None, Some(ErrorCode::OcrFailed));
            self.apply(ScanEvent::OcrFailed {
                code: ErrorCode::OcrFailed,
                message: Some("no image to recognize".into()),
            });
            return;
        };

        let options = RecognizeOptions::from(&self.config.ocr);
        let budget_ms = self.config.ocr.stage_timeout_ms;
        let outcome = tokio::time::timeout(
            Duration::from_millis(budget_ms),
            self.recognition.recognize(image, &options, cancel),
        )
        .await
        .unwrap_or_else(|_| {
            warn!(budget_ms, "OCR stage timed out");
            Err(ScanError::Timeout {
                stage: Stage::Ocr,
                budget_ms,
            })
        });
        let result = match outcome {
            Ok(result) => result,
            Err(err) if err.is_aborted() => {
                self.abort();
                return;
            }
            Err(err) => {
                let code = err.code().unwrap_or(ErrorCode::OcrFailed);
                self.tracker
                    .finish(Stage::Ocr, StageStatus::Failed, None, Some(code));
                self.apply(ScanEvent::OcrFailed {
                    code,
                    message: Some(err.to_string()),
                });
                return;
            }
        };

        match self.policy.gate.judge_ocr(&result) {
            OcrVerdict::Accept => {
                self.tracker.finish(
                    Stage::Ocr,
                    StageStatus::Succeeded,
                    Some(result.confidence),
                    None,
                );
                self.finish_progress(Stage::Ocr);
            }
            OcrVerdict::ManualCorrection { .. } => {
                self.tracker.finish(
                    Stage::Ocr,
                    StageStatus::Succeeded,
                    Some(result.confidence),
                    Some(ErrorCode::OcrLowConfidence),
                );
                self.tracker.begin(Stage::ManualCorrection);
            }
            OcrVerdict::Fail(code) => {
                self.tracker
                    .finish(Stage::Ocr, StageStatus::Failed, None, Some(code));
            }
        }
        self.apply(ScanEvent::OcrCompleted(result));
    }

    async fn analysis_stage(&mut self, cancel: &CancellationToken) {
        self.tracker.begin(Stage::Analysis);
        let Some(input) = self.session.accepted_input() else {
            self.tracker.finish(
                Stage::Analysis,
                StageStatus::Failed,
                None,
                Some(ErrorCode::AnalyzeFailed),
            );
            self.apply(ScanEvent::AnalysisFailed {
                message: "no accepted input".into(),
            });
            return;
        };

        let budget_ms = self.config.stages.analysis_timeout_ms;
        let analyzer = Arc::clone(&self.analyzer);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abort();
                return;
            }
            res = tokio::time::timeout(Duration::from_millis(budget_ms), analyzer.analyze(&input)) => res,
        };

        let message = match outcome {
            Ok(Ok(analysis)) => {
                self.tracker.finish(
                    Stage::Analysis,
                    StageStatus::Succeeded,
                    Some(input.confidence),
                    None,
                );
                self.finish_progress(Stage::Analysis);
                self.apply(ScanEvent::AnalysisSucceeded(analysis));
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => ScanError::Timeout {
                stage: Stage::Analysis,
                budget_ms,
            }
            .to_string(),
        };
        warn!(%message, "Analysis failed");
        self.tracker.finish(
            Stage::Analysis,
            StageStatus::Failed,
            None,
            Some(ErrorCode::AnalyzeFailed),
        );
        self.apply(ScanEvent::AnalysisFailed { message });
    }

    async fn search_stage(&mut self, cancel: &CancellationToken) {
        self.tracker.begin(Stage::Search);
        let analysis = self.session.analysis.clone().unwrap_or_default();
        let budget_ms = self.config.stages.search_timeout_ms;
        let searcher = Arc::clone(&self.searcher);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.abort();
                return;
            }
            res = tokio::time::timeout(Duration::from_millis(budget_ms), searcher.search(&analysis)) => res,
        };

        let message = match outcome {
            Ok(Ok(())) => {
                self.tracker
                    .finish(Stage::Search, StageStatus::Succeeded, None, None);
                self.finish_progress(Stage::Search);
                self.apply(ScanEvent::SearchSucceeded);
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => ScanError::Timeout {
                stage: Stage::Search,
                budget_ms,
            }
            .to_string(),
        };
        warn!(%message, "Search failed");
        self.tracker.finish(
            Stage::Search,
            StageStatus::Failed,
            None,
            Some(ErrorCode::SearchFailed),
        );
        self.apply(ScanEvent::SearchFailed { message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage};
    use labelscan_core::error::Result;
    use labelscan_core::types::{AcceptedInput, BarcodeFormat, RecognitionMode, ResultAuthority};
    use labelscan_vision::barcode::{BarcodeEngine, EngineError, EngineHit};
    use labelscan_vision::ocr::{RawRecognition, TextRecognizer};
    use serde_json::json;

    // -- Fakes ---------------------------------------------------------------

    enum Barcode {
        Hit(&'static str),
        Miss,
        Hang,
    }

    struct FakeEngine {
        behaviour: Barcode,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BarcodeEngine for FakeEngine {
        fn id(&self) -> &'static str {
            "fake"
        }

        fn supports(&self, _format: BarcodeFormat) -> bool {
            true
        }

        async fn detect(
            &self,
            _image: Arc<GrayImage>,
            _formats: &[BarcodeFormat],
        ) -> std::result::Result<Option<EngineHit>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Barcode::Hit(code) => Ok(Some(EngineHit {
                    code: code.into(),
                    format: BarcodeFormat::Ean13,
                    confidence: 1.0,
                })),
                Barcode::Miss => Ok(None),
                Barcode::Hang => std::future::pending().await,
            }
        }
    }

    struct FakeRecognizer {
        text: &'static str,
        confidence: f32,
        hang: bool,
    }

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(
            &self,
            _image: Arc<DynamicImage>,
            _mode: RecognitionMode,
        ) -> Result<RawRecognition> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(RawRecognition {
                text: self.text.into(),
                confidence: self.confidence,
                ..RawRecognition::default()
            })
        }
    }

    struct FakeFactory {
        text: &'static str,
        confidence: f32,
        hang: bool,
        created: AtomicUsize,
    }

    #[async_trait]
    impl RecognizerFactory for FakeFactory {
        async fn create(&self, _language: &str) -> Result<Arc<dyn TextRecognizer>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeRecognizer {
                text: self.text,
                confidence: self.confidence,
                hang: self.hang,
            }))
        }
    }

    /// Model loading that never finishes.
    struct StalledFactory;

    #[async_trait]
    impl RecognizerFactory for StalledFactory {
        async fn create(&self, _language: &str) -> Result<Arc<dyn TextRecognizer>> {
            std::future::pending().await
        }
    }

    /// Fails the first `failures` calls.
    struct FlakyAnalyzer {
        failures: usize,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<AcceptedInput>>,
    }

    #[async_trait]
    impl Analyzer for FlakyAnalyzer {
        async fn analyze(&self, input: &AcceptedInput) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(input.clone());
            if call < self.failures {
                return Err(ScanError::Analysis("upstream unavailable".into()));
            }
            Ok(json!({ "query": input.text }))
        }
    }

    struct OkSearcher;

    #[async_trait]
    impl Searcher for OkSearcher {
        async fn search(&self, _analysis: &serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        controller: ScanController,
        engine: Arc<FakeEngine>,
        factory: Arc<FakeFactory>,
        analyzer: Arc<FlakyAnalyzer>,
    }

    fn harness(barcode: Barcode, text: &'static str, confidence: f32, hang: bool) -> Harness {
        harness_with(barcode, text, confidence, hang, 0, ScanConfig::default())
    }

    fn harness_with(
        barcode: Barcode,
        text: &'static str,
        confidence: f32,
        hang: bool,
        analysis_failures: usize,
        config: ScanConfig,
    ) -> Harness {
        let engine = Arc::new(FakeEngine {
            behaviour: barcode,
            calls: AtomicUsize::new(0),
        });
        let factory = Arc::new(FakeFactory {
            text,
            confidence,
            hang,
            created: AtomicUsize::new(0),
        });
        let analyzer = Arc::new(FlakyAnalyzer {
            failures: analysis_failures,
            calls: AtomicUsize::new(0),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(factory.clone(), config.pool.clone());
        let controller = ScanController::new(
            config.clone(),
            BarcodeAdapter::new(vec![engine.clone() as Arc<dyn BarcodeEngine>]),
            TextRecognitionService::new(pool, config.preprocess.clone()),
            analyzer.clone(),
            Arc::new(OkSearcher),
        );
        Harness {
            controller,
            engine,
            factory,
            analyzer,
        }
    }

    fn label() -> ScanRequest {
        ScanRequest::upload(DynamicImage::new_luma8(160, 100))
    }

    // -- Tests ---------------------------------------------------------------

    #[tokio::test]
    async fn barcode_hit_skips_ocr() {
        let mut h = harness(Barcode::Hit("5901234123457"), "unused", 0.99, false);
        let session = h.controller.run(label(), &CancellationToken::new()).await;

        assert_eq!(session.step, ScanStep::Done);
        assert_eq!(session.authority, Some(ResultAuthority::Barcode));
        assert!(!h.controller.history().contains(&ScanStep::Ocr));
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 0);
        assert_eq!(session.analysis, Some(json!({ "query": "5901234123457" })));
    }

    #[tokio::test]
    async fn forced_ocr_visits_ocr_before_analysis() {
        let mut h = harness(Barcode::Hit("5901234123457"), "Omega-3 1000 mg", 0.93, false);
        let session = h
            .controller
            .run(label().with_force_ocr(true), &CancellationToken::new())
            .await;

        assert_eq!(session.step, ScanStep::Done);
        let history = h.controller.history();
        let ocr = history.iter().position(|s| *s == ScanStep::Ocr).unwrap();
        let analyzing = history
            .iter()
            .position(|s| *s == ScanStep::Analyzing)
            .unwrap();
        assert!(ocr < analyzing);
        assert_eq!(session.authority, Some(ResultAuthority::Ocr));
    }

    #[tokio::test]
    async fn confident_ocr_is_accepted() {
        let mut h = harness(Barcode::Miss, "Vitamin B12 500 mcg", 0.93, false);
        let session = h.controller.run(label(), &CancellationToken::new()).await;

        assert_eq!(session.step, ScanStep::Done);
        assert!(!h.controller.history().contains(&ScanStep::ManualCorrection));
        let ocr = session.ocr_result.unwrap();
        assert!(ocr.ok);
        assert_eq!(ocr.text, "Vitamin B12 500 mcg");
    }

    #[tokio::test]
    async fn low_confidence_waits_for_correction() {
        let mut h = harness(Barcode::Miss, "Vltamin B12 5OO mcg", 0.40, false);
        let cancel = CancellationToken::new();
        let session = h.controller.run(label(), &cancel).await;

        assert_eq!(session.step, ScanStep::ManualCorrection);
        assert_eq!(session.manual_text.as_deref(), Some("Vltamin B12 5OO mcg"));
        assert_eq!(session.error_code, Some(ErrorCode::OcrLowConfidence));

        h.controller.edit_manual("Vitamin B12 500");
        let session = h.controller.confirm_manual("Vitamin B12 500 mcg", &cancel).await;
        assert_eq!(session.step, ScanStep::Done);
        assert_eq!(session.authority, Some(ResultAuthority::Manual));
        let seen = h.analyzer.seen.lock().unwrap();
        assert_eq!(seen[0].text, "Vitamin B12 500 mcg");
        assert_eq!(seen[0].origin, ResultAuthority::Manual);
    }

    #[tokio::test]
    async fn abort_before_start_invokes_nothing() {
        let mut h = harness(Barcode::Hit("5901234123457"), "unused", 0.9, false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = h.controller.run(label(), &cancel).await;

        assert!(session.was_aborted);
        assert_eq!(session.step, ScanStep::Idle);
        assert_eq!(session.error_code, Some(ErrorCode::Aborted));
        assert!(!session.retry_available);
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hanging_barcode_stage_falls_back_to_ocr() {
        let mut config = ScanConfig::default();
        config.barcode.engine_timeout_ms = 5_000;
        config.barcode.stage_timeout_ms = 50;
        let mut h = harness_with(Barcode::Hang, "Iron 14 mg", 0.95, false, 0, config);
        let rx = h.controller.subscribe();
        let session = h.controller.run(label(), &CancellationToken::new()).await;

        assert_eq!(session.step, ScanStep::Done);
        assert_eq!(session.authority, Some(ResultAuthority::Ocr));
        let snapshot = rx.borrow().clone();
        let barcode = snapshot.stage(Stage::Barcode);
        assert_eq!(barcode.status, StageStatus::Failed);
        assert_eq!(barcode.error_code, Some(ErrorCode::BarcodeTimeout));
        assert_eq!(snapshot.stage(Stage::Search).status, StageStatus::Succeeded);
        assert_eq!(snapshot.progress, 100);
    }

    #[tokio::test]
    async fn ocr_timeout_is_retryable() {
        let mut config = ScanConfig::default();
        config.ocr.timeout_ms = 10;
        let mut h = harness_with(Barcode::Miss, "", 0.0, true, 0, config);
        let cancel = CancellationToken::new();
        let session = h.controller.run(label(), &cancel).await;

        assert_eq!(session.step, ScanStep::Error);
        assert_eq!(session.error_code, Some(ErrorCode::OcrTimeout));
        assert_eq!(session.failed_stage, Some(Stage::Ocr));
        assert!(session.retry_available);

        let session = h.controller.retry(&cancel).await;
        assert_eq!(session.error_code, Some(ErrorCode::OcrTimeout));
        // Barcode is not re-run for an OCR retry.
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_model_load_hits_stage_budget() {
        let mut config = ScanConfig::default();
        config.ocr.stage_timeout_ms = 50;
        let engine = Arc::new(FakeEngine {
            behaviour: Barcode::Miss,
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::new(Arc::new(StalledFactory), config.pool.clone());
        let mut controller = ScanController::new(
            config.clone(),
            BarcodeAdapter::new(vec![engine as Arc<dyn BarcodeEngine>]),
            TextRecognitionService::new(pool, config.preprocess.clone()),
            Arc::new(FlakyAnalyzer {
                failures: 0,
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }),
            Arc::new(OkSearcher),
        );
        let rx = controller.subscribe();

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            controller.run(label(), &CancellationToken::new()),
        )
        .await
        .expect("scan stuck in OCR");

        assert_eq!(session.step, ScanStep::Error);
        assert_eq!(session.error_code, Some(ErrorCode::OcrTimeout));
        assert_eq!(session.failed_stage, Some(Stage::Ocr));
        assert!(session.retry_available);
        let ocr = rx.borrow().stage(Stage::Ocr).clone();
        assert_eq!(ocr.status, StageStatus::Failed);
        assert_eq!(ocr.error_code, Some(ErrorCode::OcrTimeout));
        // The abandoned creation gives its slot back.
        let stats = controller.pool().stats();
        assert_eq!(stats.creating, 0);
        assert_eq!(stats.busy, 0);
    }

    #[tokio::test]
    async fn analysis_retry_rescans_barcode() {
        let mut h = harness_with(
            Barcode::Hit("5901234123457"),
            "unused",
            0.9,
            false,
            1,
            ScanConfig::default(),
        );
        let cancel = CancellationToken::new();
        let session = h.controller.run(label(), &cancel).await;
        assert_eq!(session.step, ScanStep::Error);
        assert_eq!(session.error_code, Some(ErrorCode::AnalyzeFailed));
        assert!(session.error_message.unwrap().contains("upstream unavailable"));

        let session = h.controller.retry(&cancel).await;
        assert_eq!(session.step, ScanStep::Done);
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn new_scan_discards_pending_correction() {
        let mut h = harness(Barcode::Miss, "Calcium 6OO", 0.5, false);
        let cancel = CancellationToken::new();
        let first = h.controller.run(label(), &cancel).await;
        assert_eq!(first.step, ScanStep::ManualCorrection);

        let second = h.controller.run(label(), &cancel).await;
        assert_ne!(second.id, first.id);
        assert_eq!(second.step, ScanStep::ManualCorrection);
        assert_eq!(h.controller.history()[0], ScanStep::ScanningBarcode);
    }
}
