// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback for builds without the "usb" feature.
//
// Every entry point returns `PlatformUnavailable`; the real implementation
// lives in the `usb` module.

use scanwerk_core::{Result, ScanError, ScannerModel};

use crate::traits::{Channel, DeviceInfo};

pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    tracing::warn!("list_devices called on a build without USB support");
    Err(ScanError::PlatformUnavailable)
}

pub fn open(name: &str, _force_model: Option<ScannerModel>) -> Result<(Box<dyn Channel>, ScannerModel)> {
    tracing::warn!(name, "open called on a build without USB support");
    Err(ScanError::PlatformUnavailable)
}
