// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Configuration directory resolution.

use std::path::{Path, PathBuf};

use labelscan_core::ScanConfig;
use labelscan_core::config::load_config;
use labelscan_core::error::Result;
use tracing::{debug, info};

/// `$XDG_CONFIG_HOME/labelscan`, falling back to `~/.config/labelscan`.
pub fn config_dir() -> PathBuf {
    config_home().join("labelscan")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load `explicit` if given, else the user config if it exists, else defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<ScanConfig> {
    if let Some(path) = explicit {
        info!(path = %path.display(), "Loading configuration");
        return load_config(path);
    }
    let path = config_path();
    if path.exists() {
        info!(path = %path.display(), "Loading configuration");
        load_config(&path)
    } else {
        debug!(path = %path.display(), "No configuration file; using defaults");
        Ok(ScanConfig::default())
    }
}

fn config_home() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config");
    }
    // Last resort
    PathBuf::from("/tmp")
}
