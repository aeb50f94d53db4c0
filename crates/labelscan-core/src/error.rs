// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types and the canonical scan error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Stage;

/// Canonical error codes surfaced on a [`ScanSession`](crate::types::ScanSession).
///
/// These are the only codes a presentation layer ever sees. Each maps to a
/// concrete next action (see [`ErrorCode::next_action`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BarcodeTimeout,
    BarcodeUnsupported,
    OcrTimeout,
    OcrLowConfidence,
    OcrFailed,
    AnalyzeFailed,
    SearchFailed,
    CapacityExceeded,
    Aborted,
}

/// What the caller should do after a stage reported an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Barcode stage gave up; text recognition takes over.
    FallBackToOcr,
    /// Show the editable OCR draft to the user.
    ManualCorrection,
    /// Offer a retry of the failed stage.
    OfferRetry,
    /// The pool is saturated; retry after a short wait.
    RetryLater,
    /// Deliberate cancellation; show nothing.
    Dismiss,
}

impl ErrorCode {
    /// Wire name of the code (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BarcodeTimeout => "barcode_timeout",
            Self::BarcodeUnsupported => "barcode_unsupported",
            Self::OcrTimeout => "ocr_timeout",
            Self::OcrLowConfidence => "ocr_low_confidence",
            Self::OcrFailed => "ocr_failed",
            Self::AnalyzeFailed => "analyze_failed",
            Self::SearchFailed => "search_failed",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Aborted => "aborted",
        }
    }

    pub fn next_action(&self) -> NextAction {
        match self {
            Self::BarcodeTimeout | Self::BarcodeUnsupported => NextAction::FallBackToOcr,
            Self::OcrLowConfidence => NextAction::ManualCorrection,
            Self::OcrTimeout | Self::OcrFailed | Self::AnalyzeFailed | Self::SearchFailed => {
                NextAction::OfferRetry
            }
            Self::CapacityExceeded => NextAction::RetryLater,
            Self::Aborted => NextAction::Dismiss,
        }
    }

    /// Whether a session failing with this code offers an explicit retry.
    pub fn retry_available(&self) -> bool {
        !matches!(self, Self::Aborted)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for all Labelscan operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Control flow --
    #[error("scan aborted")]
    Aborted,

    #[error("{stage} stage timed out after {budget_ms} ms")]
    Timeout { stage: Stage, budget_ms: u64 },

    #[error("recognition pool at capacity ({capacity} workers busy)")]
    CapacityExceeded { capacity: usize },

    // -- Vision errors --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("barcode engine failed: {0}")]
    Engine(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    // -- Collaborators --
    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("search failed: {0}")]
    Search(String),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    /// Canonical code for this error, if it corresponds to a stage failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Aborted => Some(ErrorCode::Aborted),
            Self::Timeout { stage, .. } => Some(match stage {
                Stage::Barcode => ErrorCode::BarcodeTimeout,
                Stage::Ocr | Stage::ManualCorrection => ErrorCode::OcrTimeout,
                Stage::Analysis => ErrorCode::AnalyzeFailed,
                Stage::Search => ErrorCode::SearchFailed,
            }),
            Self::CapacityExceeded { .. } => Some(ErrorCode::CapacityExceeded),
            Self::Image(_) | Self::Recognition(_) => Some(ErrorCode::OcrFailed),
            Self::Engine(_) => None,
            Self::Analysis(_) => Some(ErrorCode::AnalyzeFailed),
            Self::Search(_) => Some(ErrorCode::SearchFailed),
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorCode::OcrLowConfidence).unwrap();
        assert_eq!(json, "\"ocr_low_confidence\"");
        assert_eq!(ErrorCode::CapacityExceeded.as_str(), "capacity_exceeded");
    }

    #[test]
    fn timeouts_map_to_stage_codes() {
        let barcode = ScanError::Timeout { stage: Stage::Barcode, budget_ms: 10 };
        let ocr = ScanError::Timeout { stage: Stage::Ocr, budget_ms: 10 };
        assert_eq!(barcode.code(), Some(ErrorCode::BarcodeTimeout));
        assert_eq!(ocr.code(), Some(ErrorCode::OcrTimeout));
    }

    #[test]
    fn aborts_never_offer_retry() {
        assert!(!ErrorCode::Aborted.retry_available());
        assert_eq!(ErrorCode::Aborted.next_action(), NextAction::Dismiss);
        assert!(ScanError::Aborted.is_aborted());
    }

    #[test]
    fn low_confidence_routes_to_manual_correction() {
        assert_eq!(
            ErrorCode::OcrLowConfidence.next_action(),
            NextAction::ManualCorrection
        );
    }
}
