// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// labelscan-vision — Image preprocessing, barcode decoding and pooled text
// recognition for the Labelscan engine.

pub mod barcode;
pub mod image;
pub mod ocr;

// Re-export the primary types so callers can use `labelscan_vision::BarcodeAdapter` etc.
pub use barcode::{BarcodeAdapter, DecodeOptions, FrameSource, LiveScanner};
pub use crate::image::{ImageSource, PreprocessedImage, preprocess};
pub use ocr::{RecognizeOptions, TextRecognitionService, WorkerPool};

#[cfg(feature = "ocr")]
pub use ocr::ocrs_backend::OcrsFactory;
