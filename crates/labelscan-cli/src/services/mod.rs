// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — configuration lookup, the recognition backend and the
// stand-in collaborators the binary wires into the controller.

pub mod data_dir;
pub mod passthrough;
pub mod recognizer;
