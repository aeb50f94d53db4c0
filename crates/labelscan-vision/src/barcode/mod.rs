// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode module — engine capability, the shipped engines, the adapter that
// drives them and the live camera scanner.

pub mod adapter;
pub mod cascade;
pub mod engine;
pub mod linear;
pub mod live;
pub mod qr;

pub use adapter::{AttemptOutcome, BarcodeAdapter, DecodeOptions, DecodeReport, EngineAttempt};
pub use cascade::CascadeEngine;
pub use engine::{BarcodeEngine, EngineError, EngineHit};
pub use linear::LinearEngine;
pub use live::{DetectionCallback, FrameSource, LiveScanOptions, LiveScanner};
pub use qr::RqrrEngine;
