// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Labelscan Smart Scan engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorCode;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the scanned image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    /// Live camera capture.
    Camera,
    /// A file the user uploaded.
    Upload,
}

/// Steps of the scan state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStep {
    Idle,
    ScanningBarcode,
    Ocr,
    ManualCorrection,
    Analyzing,
    Searching,
    Done,
    Error,
}

impl ScanStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ScanningBarcode => "scanning_barcode",
            Self::Ocr => "ocr",
            Self::ManualCorrection => "manual_correction",
            Self::Analyzing => "analyzing",
            Self::Searching => "searching",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// The stage this step belongs to, if it is a working step.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ScanningBarcode => Some(Stage::Barcode),
            Self::Ocr => Some(Stage::Ocr),
            Self::ManualCorrection => Some(Stage::ManualCorrection),
            Self::Analyzing => Some(Stage::Analysis),
            Self::Searching => Some(Stage::Search),
            Self::Idle | Self::Done | Self::Error => None,
        }
    }
}

impl std::fmt::Display for ScanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline stage. Failures and timeouts are attributed to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Barcode,
    Ocr,
    ManualCorrection,
    Analysis,
    Search,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Barcode,
        Stage::Ocr,
        Stage::ManualCorrection,
        Stage::Analysis,
        Stage::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Barcode => "barcode",
            Self::Ocr => "ocr",
            Self::ManualCorrection => "manual_correction",
            Self::Analysis => "analysis",
            Self::Search => "search",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Barcode symbologies the engines understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeFormat {
    #[serde(rename = "EAN13")]
    Ean13,
    #[serde(rename = "EAN8")]
    Ean8,
    #[serde(rename = "UPCA")]
    UpcA,
    #[serde(rename = "QR")]
    Qr,
}

impl BarcodeFormat {
    pub const ALL: [BarcodeFormat; 4] = [
        BarcodeFormat::Ean13,
        BarcodeFormat::Ean8,
        BarcodeFormat::UpcA,
        BarcodeFormat::Qr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ean13 => "EAN13",
            Self::Ean8 => "EAN8",
            Self::UpcA => "UPCA",
            Self::Qr => "QR",
        }
    }

    /// One-dimensional (bar/space) symbologies.
    pub fn is_linear(&self) -> bool {
        !matches!(self, Self::Qr)
    }
}

impl std::fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarcodeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "EAN13" => Ok(Self::Ean13),
            "EAN8" => Ok(Self::Ean8),
            "UPCA" => Ok(Self::UpcA),
            "QR" | "QRCODE" => Ok(Self::Qr),
            other => Err(format!("unknown barcode format: {other}")),
        }
    }
}

/// Which barcode engine(s) the adapter may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStrategy {
    /// Every engine in priority order; first hit wins.
    #[default]
    Auto,
    Linear,
    Rqrr,
    Cascade,
}

impl FromStr for EngineStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "linear" => Ok(Self::Linear),
            "rqrr" => Ok(Self::Rqrr),
            "cascade" => Ok(Self::Cascade),
            other => Err(format!("unknown engine strategy: {other}")),
        }
    }
}

/// Outcome of a barcode decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarcodeResult {
    pub ok: bool,
    pub code: String,
    pub format: BarcodeFormat,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Identifier of the engine that produced the hit.
    pub engine: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl BarcodeResult {
    pub fn hit(
        code: impl Into<String>,
        format: BarcodeFormat,
        confidence: f32,
        engine: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            ok: true,
            code: code.into(),
            format,
            confidence: normalize_confidence(confidence),
            engine: engine.into(),
            duration_ms,
            error_code: None,
        }
    }
}

/// Axis-aligned box in canonical-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One recognized word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Layout hint handed to the recognition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    #[default]
    Auto,
    SingleBlock,
    SingleLine,
    SparseText,
}

/// Outcome of a text recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub ok: bool,
    pub text: String,
    /// Overall confidence in [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub words: Vec<OcrWord>,
    pub duration_ms: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub mode: RecognitionMode,
}

/// Warning attached to a result built from a manual correction.
pub const WARNING_MANUAL_CORRECTION: &str = "manual_correction";

impl OcrResult {
    pub fn failure(code: ErrorCode, duration_ms: u64, mode: RecognitionMode) -> Self {
        Self {
            ok: false,
            text: String::new(),
            confidence: 0.0,
            words: Vec::new(),
            duration_ms,
            warnings: Vec::new(),
            error_code: Some(code),
            mode,
        }
    }

    /// A user-confirmed correction, treated as fully confident.
    pub fn manual(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
            confidence: 1.0,
            words: Vec::new(),
            duration_ms: 0,
            warnings: vec![WARNING_MANUAL_CORRECTION.to_string()],
            error_code: None,
            mode: RecognitionMode::Auto,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Map a backend confidence onto [0, 1]. Values above 1 are taken as a
/// 0-100 scale. NaN maps to 0.
pub fn normalize_confidence(raw: f32) -> f32 {
    if raw.is_nan() {
        return 0.0;
    }
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

/// Which result drove the transition into analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultAuthority {
    Barcode,
    Ocr,
    Manual,
}

/// The single input handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedInput {
    pub text: String,
    pub origin: ResultAuthority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<BarcodeFormat>,
    pub confidence: f32,
}

/// Everything the state machine knows about one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: SessionId,
    pub step: ScanStep,
    /// 0-100, monotonic within a stage.
    pub progress: u8,
    pub source: ScanSource,
    pub force_ocr: bool,
    pub barcode_result: Option<BarcodeResult>,
    pub ocr_result: Option<OcrResult>,
    pub manual_text: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub retry_available: bool,
    pub was_aborted: bool,
    pub failed_stage: Option<Stage>,
    pub authority: Option<ResultAuthority>,
    pub analysis: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    /// A fresh idle session.
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    /// An idle session with a known id.
    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            step: ScanStep::Idle,
            progress: 0,
            source: ScanSource::Upload,
            force_ocr: false,
            barcode_result: None,
            ocr_result: None,
            manual_text: None,
            error_code: None,
            error_message: None,
            retry_available: false,
            was_aborted: false,
            failed_stage: None,
            authority: None,
            analysis: None,
            started_at: None,
        }
    }

    /// The authoritative input for analysis, if one has been accepted.
    pub fn accepted_input(&self) -> Option<AcceptedInput> {
        match self.authority? {
            ResultAuthority::Barcode => self.barcode_result.as_ref().map(|b| AcceptedInput {
                text: b.code.clone(),
                origin: ResultAuthority::Barcode,
                format: Some(b.format),
                confidence: b.confidence,
            }),
            origin @ (ResultAuthority::Ocr | ResultAuthority::Manual) => {
                self.ocr_result.as_ref().map(|o| AcceptedInput {
                    text: o.text.clone(),
                    origin,
                    format: None,
                    confidence: o.confidence,
                })
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step == ScanStep::Done
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_serialize_upper_case() {
        let json = serde_json::to_string(&BarcodeFormat::Ean13).unwrap();
        assert_eq!(json, "\"EAN13\"");
        let back: BarcodeFormat = serde_json::from_str("\"UPCA\"").unwrap();
        assert_eq!(back, BarcodeFormat::UpcA);
        assert_eq!("ean-13".parse::<BarcodeFormat>().unwrap(), BarcodeFormat::Ean13);
    }

    #[test]
    fn confidence_is_normalized() {
        assert_eq!(normalize_confidence(93.0), 0.93);
        assert_eq!(normalize_confidence(0.4), 0.4);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(normalize_confidence(f32::NAN), 0.0);
        assert_eq!(normalize_confidence(250.0), 1.0);
    }

    #[test]
    fn accepted_input_follows_authority() {
        let mut session = ScanSession::new();
        assert!(session.accepted_input().is_none());

        session.barcode_result = Some(BarcodeResult::hit(
            "5901234123457",
            BarcodeFormat::Ean13,
            1.0,
            "linear",
            4,
        ));
        session.ocr_result = Some(OcrResult::manual("Vitamin D3 1000 IU"));

        session.authority = Some(ResultAuthority::Barcode);
        let input = session.accepted_input().unwrap();
        assert_eq!(input.text, "5901234123457");
        assert_eq!(input.format, Some(BarcodeFormat::Ean13));

        session.authority = Some(ResultAuthority::Manual);
        let input = session.accepted_input().unwrap();
        assert_eq!(input.text, "Vitamin D3 1000 IU");
        assert_eq!(input.origin, ResultAuthority::Manual);
    }
}
