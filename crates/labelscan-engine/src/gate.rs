// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Confidence gate — decides whether a stage result is accepted, needs a human,
// or failed, and which stage takes over when one gives up.

use labelscan_core::config::ScanConfig;
use labelscan_core::error::ErrorCode;
use labelscan_core::types::{BarcodeResult, OcrResult, ScanStep, Stage};

/// Default OCR auto-accept threshold.
pub const DEFAULT_OCR_ACCEPT_THRESHOLD: f32 = 0.8;

/// Acceptance thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatePolicy {
    /// OCR results at or above this confidence skip manual correction.
    pub ocr_accept_threshold: f32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            ocr_accept_threshold: DEFAULT_OCR_ACCEPT_THRESHOLD,
        }
    }
}

impl From<&ScanConfig> for GatePolicy {
    fn from(config: &ScanConfig) -> Self {
        Self {
            ocr_accept_threshold: config.ocr.accept_threshold,
        }
    }
}

/// What the gate made of an OCR result.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrVerdict {
    Accept,
    /// Below threshold; the draft goes to the user.
    ManualCorrection { draft: String },
    Fail(ErrorCode),
}

impl GatePolicy {
    /// A barcode is accepted whenever any engine produced one.
    pub fn accepts_barcode(&self, result: &BarcodeResult) -> bool {
        result.ok && !result.code.is_empty()
    }

    pub fn judge_ocr(&self, result: &OcrResult) -> OcrVerdict {
        if !result.ok {
            return OcrVerdict::Fail(result.error_code.unwrap_or(ErrorCode::OcrFailed));
        }
        let text = result.text.trim();
        if text.is_empty() {
            return OcrVerdict::Fail(ErrorCode::OcrFailed);
        }
        if result.confidence >= self.ocr_accept_threshold {
            OcrVerdict::Accept
        } else {
            OcrVerdict::ManualCorrection {
                draft: text.to_string(),
            }
        }
    }

    /// Step that follows an accepted barcode.
    pub fn after_barcode(&self, force_ocr: bool) -> ScanStep {
        if force_ocr {
            ScanStep::Ocr
        } else {
            ScanStep::Analyzing
        }
    }
}

/// The stage that takes over when `failed` gives up, if any.
pub fn fallback_for(failed: Stage) -> Option<Stage> {
    match failed {
        Stage::Barcode => Some(Stage::Ocr),
        Stage::Ocr | Stage::ManualCorrection | Stage::Analysis | Stage::Search => None,
    }
}
