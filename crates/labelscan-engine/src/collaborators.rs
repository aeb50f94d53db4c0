// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seams to the downstream services that consume an accepted scan.

use async_trait::async_trait;
use labelscan_core::error::Result;
use labelscan_core::types::AcceptedInput;

/// Turns the accepted barcode or label text into a structured analysis.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, input: &AcceptedInput) -> Result<serde_json::Value>;
}

/// Looks the analysis up against a product catalogue.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, analysis: &serde_json::Value) -> Result<()>;
}
