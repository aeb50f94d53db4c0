// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Picks the text recognition backend for this build.

use std::sync::Arc;

use labelscan_core::config::OcrConfig;
use labelscan_vision::ocr::RecognizerFactory;

#[cfg(feature = "ocr")]
pub fn factory(config: &OcrConfig) -> Arc<dyn RecognizerFactory> {
    use labelscan_vision::ocr::ocrs_backend::{ModelPaths, OcrsFactory};

    let paths = match &config.model_dir {
        Some(dir) => ModelPaths::from_dir(dir),
        None => ModelPaths::default(),
    };
    Arc::new(OcrsFactory::new(paths))
}

#[cfg(not(feature = "ocr"))]
pub fn factory(_config: &OcrConfig) -> Arc<dyn RecognizerFactory> {
    Arc::new(unavailable::Unavailable)
}

#[cfg(not(feature = "ocr"))]
mod unavailable {
    use std::sync::Arc;

    use async_trait::async_trait;
    use labelscan_core::error::{Result, ScanError};
    use labelscan_vision::ocr::{RecognizerFactory, TextRecognizer};
    use tracing::warn;

    /// Every OCR attempt fails, so scans without a barcode end in `ocr_failed`.
    pub struct Unavailable;

    #[async_trait]
    impl RecognizerFactory for Unavailable {
        async fn create(&self, _language: &str) -> Result<Arc<dyn TextRecognizer>> {
            warn!("Built without the `ocr` feature; text recognition unavailable");
            Err(ScanError::Recognition(
                "text recognition not compiled in (rebuild with --features ocr)".into(),
            ))
        }
    }
}
