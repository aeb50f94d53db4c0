// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration, persisted as JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::types::{BarcodeFormat, EngineStrategy, Stage};

/// Complete engine settings. Every section falls back to its defaults when
/// omitted from the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub barcode: BarcodeConfig,
    pub preprocess: PreprocessConfig,
    pub ocr: OcrConfig,
    pub pool: PoolConfig,
    pub stages: StageBudgets,
    pub progress: ProgressBands,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarcodeConfig {
    pub strategy: EngineStrategy,
    /// Formats the engines are allowed to report.
    pub formats: Vec<BarcodeFormat>,
    /// Budget for a single engine invocation.
    pub engine_timeout_ms: u64,
    /// Budget for the whole barcode stage.
    pub stage_timeout_ms: u64,
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            strategy: EngineStrategy::Auto,
            formats: BarcodeFormat::ALL.to_vec(),
            engine_timeout_ms: 1_500,
            stage_timeout_ms: 5_000,
        }
    }
}

/// Image preprocessing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Longer side is scaled down to this many pixels.
    pub max_side: u32,
    pub grayscale: bool,
    pub denoise: bool,
    /// Denoise only runs on images with at least this many pixels.
    pub denoise_min_pixels: u64,
    /// Fraction of isolated speckle pixels above which denoise runs.
    pub noise_density_threshold: f32,
    pub threshold: bool,
    /// Pixels below `threshold_factor * mean` become black.
    pub threshold_factor: f32,
    /// Threshold only runs on images with at least this many pixels.
    pub threshold_min_pixels: u64,
    pub rotation: bool,
    /// Relative score gain a rotation needs over 0 degrees.
    pub rotation_min_deviation: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_side: 1_500,
            grayscale: true,
            denoise: true,
            denoise_min_pixels: 250_000,
            noise_density_threshold: 0.02,
            threshold: true,
            threshold_factor: 0.9,
            threshold_min_pixels: 40_000,
            rotation: true,
            rotation_min_deviation: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Recognition language (worker pool key).
    pub language: String,
    /// Budget for the recognition call itself.
    pub timeout_ms: u64,
    /// Budget for the whole OCR stage: preprocessing, worker acquisition
    /// (including model loading) and recognition.
    pub stage_timeout_ms: u64,
    /// Auto-accept threshold for recognized text.
    pub accept_threshold: f32,
    /// Directory holding the detection/recognition models. `None` uses
    /// `$XDG_CACHE_HOME/ocrs`.
    pub model_dir: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".into(),
            timeout_ms: 15_000,
            stage_timeout_ms: 30_000,
            accept_threshold: 0.8,
            model_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live recognition workers.
    pub max_workers: usize,
    /// Workers idle for longer than this are terminated by the sweeper.
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Consecutive timeouts after which a worker is terminated instead of reused.
    pub wedge_after: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            idle_timeout_ms: 120_000,
            sweep_interval_ms: 30_000,
            wedge_after: 2,
        }
    }
}

/// Timeout budgets for the collaborator stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageBudgets {
    pub analysis_timeout_ms: u64,
    pub search_timeout_ms: u64,
}

impl Default for StageBudgets {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 20_000,
            search_timeout_ms: 10_000,
        }
    }
}

/// Inclusive progress range reported while a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Clamp a reported value into the band.
    pub fn clamp(&self, value: u8) -> u8 {
        value.clamp(self.start, self.end.max(self.start))
    }
}

/// Progress bands per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressBands {
    pub barcode: ProgressBand,
    pub ocr: ProgressBand,
    pub manual_correction: ProgressBand,
    pub analysis: ProgressBand,
    pub search: ProgressBand,
    pub done: u8,
}

impl ProgressBands {
    pub fn band(&self, stage: Stage) -> ProgressBand {
        match stage {
            Stage::Barcode => self.barcode,
            Stage::Ocr => self.ocr,
            Stage::ManualCorrection => self.manual_correction,
            Stage::Analysis => self.analysis,
            Stage::Search => self.search,
        }
    }
}

impl Default for ProgressBands {
    fn default() -> Self {
        Self {
            barcode: ProgressBand::new(5, 40),
            ocr: ProgressBand::new(45, 75),
            manual_correction: ProgressBand::new(50, 50),
            analysis: ProgressBand::new(80, 89),
            search: ProgressBand::new(90, 99),
            done: 100,
        }
    }
}

impl ScanConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.barcode.formats.is_empty() {
            return Err(ScanError::Config("barcode.formats must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.ocr.accept_threshold) {
            return Err(ScanError::Config(format!(
                "ocr.accept_threshold must be within [0, 1], got {}",
                self.ocr.accept_threshold
            )));
        }
        if self.ocr.stage_timeout_ms == 0 {
            return Err(ScanError::Config("ocr.stage_timeout_ms must be positive".into()));
        }
        if self.pool.max_workers == 0 {
            return Err(ScanError::Config("pool.max_workers must be at least 1".into()));
        }
        if self.preprocess.max_side == 0 {
            return Err(ScanError::Config("preprocess.max_side must be positive".into()));
        }
        Ok(())
    }
}

/// Load a configuration file. Missing keys take their defaults.
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let bytes = std::fs::read(path)?;
    let config: ScanConfig = serde_json::from_slice(&bytes)?;
    config.validate()?;
    Ok(config)
}

/// Persist a configuration as pretty-printed JSON, creating parent directories.
pub fn save_config(config: &ScanConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = ScanConfig::default();
        config.ocr.language = "deu".into();
        config.barcode.strategy = EngineStrategy::Linear;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "ocr": { "timeout_ms": 10 } }"#).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.ocr.timeout_ms, 10);
        assert_eq!(loaded.ocr.accept_threshold, 0.8);
        assert_eq!(loaded.preprocess.max_side, 1_500);
        assert_eq!(loaded.pool.sweep_interval_ms, 30_000);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "ocr": { "accept_threshold": 80 } }"#).unwrap();

        assert!(matches!(load_config(&path), Err(ScanError::Config(_))));
    }

    #[test]
    fn progress_band_clamps() {
        let bands = ProgressBands::default();
        assert_eq!(bands.band(Stage::Barcode).clamp(0), 5);
        assert_eq!(bands.band(Stage::Ocr).clamp(99), 75);
        assert_eq!(bands.band(Stage::Analysis).clamp(85), 85);
    }
}
