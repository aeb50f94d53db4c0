// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR module — recognizer seams, the worker pool, mode selection and the
// recognition service.
//
// The `ocrs` backend is only available with the `ocr` feature:
//
// ```toml
// labelscan-vision = { path = "crates/labelscan-vision", features = ["ocr"] }
// ```

pub mod backend;
pub mod mode;
#[cfg(feature = "ocr")]
pub mod ocrs_backend;
pub mod pool;
pub mod recognize;

pub use backend::{Clock, ManualClock, RawRecognition, RecognizerFactory, SystemClock, TextRecognizer};
pub use mode::select_mode;
pub use pool::{PoolStats, Worker, WorkerId, WorkerPool};
pub use recognize::{RecognizeOptions, TextRecognitionService};
