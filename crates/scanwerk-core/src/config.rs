// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ScannerModel;

/// Tunables for one scanner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Status-register polls before a busy device is reported as an I/O error.
    pub poll_retries: u32,
    /// Delay between two status polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Raw lines requested per bulk transfer (before the over-read margin).
    pub lines_per_transfer: usize,
    /// Time the lamp needs to stabilise after switching on, in milliseconds.
    pub lamp_warmup_ms: u64,
    /// Lines of the white reference strip averaged during gain calibration.
    pub calibration_lines: usize,
    /// Return the head home and switch the lamp off when the session closes.
    pub park_on_close: bool,
    /// Skip USB identification and assume this model.
    pub force_model: Option<ScannerModel>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_retries: 1000,
            poll_interval_ms: 1,
            lines_per_transfer: 64,
            lamp_warmup_ms: 1500,
            calibration_lines: 32,
            park_on_close: true,
            force_model: None,
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lamp_warmup(&self) -> Duration {
        Duration::from_millis(self.lamp_warmup_ms)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load a JSON config file, or the defaults when it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "poll_retries": 5, "force_model": "Astra2000U" }"#).unwrap();

        let config = ScannerConfig::load(&path).unwrap();
        assert_eq!(config.poll_retries, 5);
        assert_eq!(config.force_model, Some(ScannerModel::Astra2000U));
        assert_eq!(config.lines_per_transfer, 64);
        assert!(config.park_on_close);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ScannerConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ScannerConfig {
            lamp_warmup_ms: 0,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ScannerConfig::load(&path).unwrap(), config);
    }
}
