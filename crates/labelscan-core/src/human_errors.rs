// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable messages for scan error codes.
//
// Every code a session can carry is mapped to plain English with a clear
// suggestion. Severity drives how a presentation layer shows it.

use crate::error::{ErrorCode, ScanError};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Slow device or busy engine; trying again usually works.
    Transient,
    /// The user has to do something (retake the photo, type the text).
    ActionRequired,
    /// Nothing to show; the user cancelled.
    Silent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether a retry button makes sense.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert an [`ErrorCode`] into a [`HumanError`].
pub fn humanize(code: ErrorCode) -> HumanError {
    match code {
        ErrorCode::BarcodeTimeout => HumanError {
            message: "We couldn't read the barcode in time.".into(),
            suggestion: "We'll try reading the label text instead.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::BarcodeUnsupported => HumanError {
            message: "This kind of barcode isn't supported.".into(),
            suggestion: "We'll try reading the label text instead.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::OcrTimeout => HumanError {
            message: "Reading the label took too long.".into(),
            suggestion: "Try again, or take a closer photo of the label.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::OcrLowConfidence => HumanError {
            message: "We're not sure we read the label correctly.".into(),
            suggestion: "Please check the text below and fix anything that looks wrong.".into(),
            retriable: true,
            severity: Severity::ActionRequired,
        },
        ErrorCode::OcrFailed => HumanError {
            message: "We couldn't read any text on the label.".into(),
            suggestion: "Make sure the label is well lit and in focus, then try again.".into(),
            retriable: true,
            severity: Severity::ActionRequired,
        },
        ErrorCode::AnalyzeFailed => HumanError {
            message: "We couldn't work out what this product is.".into(),
            suggestion: "Try again in a moment.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::SearchFailed => HumanError {
            message: "We couldn't find this product.".into(),
            suggestion: "Try again in a moment, or scan the barcode if there is one.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::CapacityExceeded => HumanError {
            message: "The scanner is busy right now.".into(),
            suggestion: "Wait a few seconds and try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
        ErrorCode::Aborted => HumanError {
            message: "Scan cancelled.".into(),
            suggestion: String::new(),
            retriable: false,
            severity: Severity::Silent,
        },
    }
}

/// Humanize an arbitrary [`ScanError`]. Errors without a scan code get a
/// generic message carrying the technical detail.
pub fn humanize_error(err: &ScanError) -> HumanError {
    match err.code() {
        Some(code) => humanize(code),
        None => HumanError {
            message: "Something went wrong.".into(),
            suggestion: format!("Try again. If this keeps happening, report this: {err}"),
            retriable: true,
            severity: Severity::ActionRequired,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_silent_and_not_retriable() {
        let h = humanize(ErrorCode::Aborted);
        assert_eq!(h.severity, Severity::Silent);
        assert!(!h.retriable);
    }

    #[test]
    fn every_code_except_abort_is_retriable() {
        let codes = [
            ErrorCode::BarcodeTimeout,
            ErrorCode::BarcodeUnsupported,
            ErrorCode::OcrTimeout,
            ErrorCode::OcrLowConfidence,
            ErrorCode::OcrFailed,
            ErrorCode::AnalyzeFailed,
            ErrorCode::SearchFailed,
            ErrorCode::CapacityExceeded,
        ];
        for code in codes {
            let h = humanize(code);
            assert!(h.retriable, "{code} should be retriable");
            assert!(!h.message.is_empty());
        }
    }

    #[test]
    fn config_errors_fall_back_to_generic_message() {
        let h = humanize_error(&ScanError::Config("bad".into()));
        assert!(h.suggestion.contains("bad"));
    }
}
