// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan state machine — a pure reducer over `ScanEvent`.
//
// All I/O lives in the controller. The reducer only decides what the next
// session looks like; events that make no sense in the current step leave
// the session untouched.

use chrono::{DateTime, Utc};
use labelscan_core::config::{ProgressBands, ScanConfig};
use labelscan_core::error::ErrorCode;
use labelscan_core::types::{
    BarcodeResult, OcrResult, ResultAuthority, ScanSession, ScanSource, ScanStep, SessionId, Stage,
};

use crate::gate::{GatePolicy, OcrVerdict, fallback_for};

/// Everything needed to begin a scan. Built outside the reducer so that the
/// reducer never reads the clock or the RNG.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub id: SessionId,
    pub source: ScanSource,
    pub force_ocr: bool,
    pub started_at: DateTime<Utc>,
}

impl StartRequest {
    pub fn new(source: ScanSource, force_ocr: bool) -> Self {
        Self {
            id: SessionId::new(),
            source,
            force_ocr,
            started_at: Utc::now(),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Start(StartRequest),
    BarcodeDecoded(BarcodeResult),
    /// No barcode: every engine missed, failed or timed out.
    BarcodeFailed { code: Option<ErrorCode> },
    OcrCompleted(OcrResult),
    /// Hard failure outside the recognition service.
    OcrFailed {
        code: ErrorCode,
        message: Option<String>,
    },
    /// Draft edited in place; stays in manual correction.
    ManualEdited(String),
    ManualConfirmed(String),
    AnalysisSucceeded(serde_json::Value),
    AnalysisFailed { message: String },
    SearchSucceeded,
    SearchFailed { message: String },
    /// Progress report from the running stage; clamped into its band.
    Progress(u8),
    Aborted,
    Retry,
    Reset,
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::BarcodeDecoded(_) => "barcode_decoded",
            Self::BarcodeFailed { .. } => "barcode_failed",
            Self::OcrCompleted(_) => "ocr_completed",
            Self::OcrFailed { .. } => "ocr_failed",
            Self::ManualEdited(_) => "manual_edited",
            Self::ManualConfirmed(_) => "manual_confirmed",
            Self::AnalysisSucceeded(_) => "analysis_succeeded",
            Self::AnalysisFailed { .. } => "analysis_failed",
            Self::SearchSucceeded => "search_succeeded",
            Self::SearchFailed { .. } => "search_failed",
            Self::Progress(_) => "progress",
            Self::Aborted => "aborted",
            Self::Retry => "retry",
            Self::Reset => "reset",
        }
    }
}

/// Gate thresholds plus progress bands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanPolicy {
    pub gate: GatePolicy,
    pub progress: ProgressBands,
}

impl From<&ScanConfig> for ScanPolicy {
    fn from(config: &ScanConfig) -> Self {
        Self {
            gate: GatePolicy::from(config),
            progress: config.progress.clone(),
        }
    }
}

/// Working step for a stage.
pub fn step_for(stage: Stage) -> ScanStep {
    match stage {
        Stage::Barcode => ScanStep::ScanningBarcode,
        Stage::Ocr => ScanStep::Ocr,
        Stage::ManualCorrection => ScanStep::ManualCorrection,
        Stage::Analysis => ScanStep::Analyzing,
        Stage::Search => ScanStep::Searching,
    }
}

/// Apply one event.
pub fn reduce(mut session: ScanSession, event: ScanEvent, policy: &ScanPolicy) -> ScanSession {
    use ScanStep::*;

    match (session.step, event) {
        (Idle | Done | Error, ScanEvent::Start(request)) => {
            let mut next = ScanSession::with_id(request.id);
            next.source = request.source;
            next.force_ocr = request.force_ocr;
            next.started_at = Some(request.started_at);
            enter(next, ScanningBarcode, policy)
        }

        (ScanningBarcode, ScanEvent::BarcodeDecoded(result))
            if policy.gate.accepts_barcode(&result) =>
        {
            let next = policy.gate.after_barcode(session.force_ocr);
            if next == Analyzing {
                session.authority = Some(ResultAuthority::Barcode);
            }
            session.barcode_result = Some(result);
            enter(session, next, policy)
        }
        (ScanningBarcode, ScanEvent::BarcodeDecoded(_) | ScanEvent::BarcodeFailed { .. }) => {
            session.barcode_result = None;
            match fallback_for(Stage::Barcode) {
                Some(stage) => enter(session, step_for(stage), policy),
                None => fail(session, Stage::Barcode, ErrorCode::BarcodeUnsupported, None),
            }
        }

        (Ocr, ScanEvent::OcrCompleted(result)) => match policy.gate.judge_ocr(&result) {
            OcrVerdict::Accept => {
                session.ocr_result = Some(result);
                session.authority = Some(ResultAuthority::Ocr);
                session.error_code = None;
                enter(session, Analyzing, policy)
            }
            OcrVerdict::ManualCorrection { draft } => {
                session.ocr_result = Some(result);
                session.manual_text = Some(draft);
                session.error_code = Some(ErrorCode::OcrLowConfidence);
                session.error_message = None;
                enter(session, ManualCorrection, policy)
            }
            OcrVerdict::Fail(code) => {
                let message = result.warnings.first().cloned();
                session.ocr_result = Some(result);
                fail(session, Stage::Ocr, code, message)
            }
        },
        (Ocr, ScanEvent::OcrFailed { code, message }) => fail(session, Stage::Ocr, code, message),

        (ManualCorrection, ScanEvent::ManualEdited(text)) => {
            session.manual_text = Some(text);
            session
        }
        (ManualCorrection, ScanEvent::ManualConfirmed(text)) if !text.trim().is_empty() => {
            let text = text.trim().to_string();
            session.ocr_result = Some(OcrResult::manual(text.clone()));
            session.manual_text = Some(text);
            session.authority = Some(ResultAuthority::Manual);
            session.error_code = None;
            enter(session, Analyzing, policy)
        }

        (Analyzing, ScanEvent::AnalysisSucceeded(analysis)) => {
            session.analysis = Some(analysis);
            enter(session, Searching, policy)
        }
        (Analyzing, ScanEvent::AnalysisFailed { message }) => {
            fail(session, Stage::Analysis, ErrorCode::AnalyzeFailed, Some(message))
        }

        (Searching, ScanEvent::SearchSucceeded) => enter(session, Done, policy),
        (Searching, ScanEvent::SearchFailed { message }) => {
            fail(session, Stage::Search, ErrorCode::SearchFailed, Some(message))
        }

        (step, ScanEvent::Progress(value)) => {
            if let Some(stage) = step.stage() {
                let band = policy.progress.band(stage);
                session.progress = session.progress.max(band.clamp(value));
            }
            session
        }

        (Idle | ScanningBarcode | Ocr | ManualCorrection | Analyzing | Searching, ScanEvent::Aborted) => {
            session.step = Idle;
            session.progress = 0;
            session.was_aborted = true;
            session.error_code = Some(ErrorCode::Aborted);
            session.error_message = None;
            session.retry_available = false;
            session.failed_stage = None;
            session
        }

        (Error, ScanEvent::Retry) if session.retry_available => retry(session, policy),

        (_, ScanEvent::Reset) => ScanSession::with_id(session.id),

        (_, _) => session,
    }
}

fn enter(mut session: ScanSession, step: ScanStep, policy: &ScanPolicy) -> ScanSession {
    session.step = step;
    if let Some(stage) = step.stage() {
        session.progress = policy.progress.band(stage).start;
    } else if step == ScanStep::Done {
        session.progress = policy.progress.done;
    }
    session
}

fn fail(
    mut session: ScanSession,
    stage: Stage,
    code: ErrorCode,
    message: Option<String>,
) -> ScanSession {
    session.step = ScanStep::Error;
    session.failed_stage = Some(stage);
    session.error_code = Some(code);
    session.error_message = message;
    session.retry_available = code.retry_available();
    session
}

/// Re-enter the stage that failed. Analysis and search failures go back to
/// whichever stage produced the accepted input.
fn retry(mut session: ScanSession, policy: &ScanPolicy) -> ScanSession {
    let Some(failed) = session.failed_stage else {
        return session;
    };
    let target = match failed {
        Stage::Barcode => ScanStep::ScanningBarcode,
        Stage::Ocr | Stage::ManualCorrection => ScanStep::Ocr,
        Stage::Analysis | Stage::Search => match session.authority {
            Some(ResultAuthority::Barcode) => ScanStep::ScanningBarcode,
            Some(ResultAuthority::Manual) => ScanStep::ManualCorrection,
            Some(ResultAuthority::Ocr) | None => ScanStep::Ocr,
        },
    };

    match target {
        ScanStep::ScanningBarcode => {
            session.barcode_result = None;
            session.ocr_result = None;
            session.manual_text = None;
        }
        ScanStep::Ocr => {
            session.ocr_result = None;
            session.manual_text = None;
        }
        _ => {}
    }
    session.authority = None;
    session.analysis = None;
    session.error_code = None;
    session.error_message = None;
    session.retry_available = false;
    session.failed_stage = None;
    session.was_aborted = false;
    enter(session, target, policy)
}
