// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stand-in analysis and search for the command line: the accepted input is
// echoed back as the analysis and search always succeeds.

use async_trait::async_trait;
use labelscan_core::error::Result;
use labelscan_core::types::AcceptedInput;
use labelscan_engine::{Analyzer, Searcher};
use tracing::debug;

pub struct PassthroughAnalyzer;

#[async_trait]
impl Analyzer for PassthroughAnalyzer {
    async fn analyze(&self, input: &AcceptedInput) -> Result<serde_json::Value> {
        debug!(origin = ?input.origin, "Pass-through analysis");
        Ok(serde_json::to_value(input)?)
    }
}

pub struct PassthroughSearcher;

#[async_trait]
impl Searcher for PassthroughSearcher {
    async fn search(&self, _analysis: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
