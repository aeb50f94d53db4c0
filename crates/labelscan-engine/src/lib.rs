// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// labelscan-engine — Scan state machine, confidence gate and the controller
// that runs a Smart Scan session end to end.

pub mod collaborators;
pub mod controller;
pub mod gate;
pub mod machine;
pub mod snapshot;

pub use collaborators::{Analyzer, Searcher};
pub use controller::{ScanController, ScanRequest};
pub use gate::{GatePolicy, OcrVerdict};
pub use machine::{ScanEvent, ScanPolicy, StartRequest, reduce};
pub use snapshot::{ScanSnapshot, StageSnapshot, StageStatus};
