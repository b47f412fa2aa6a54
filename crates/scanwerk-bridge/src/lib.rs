// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — bridge channel abstraction.
//
// Defines the register+bulk `Channel` the driver talks through, and picks the
// backend at build time: libusb when the "usb" feature is enabled, a stub
// that reports `PlatformUnavailable` otherwise.

pub mod traits;

#[cfg(feature = "usb")]
pub mod usb;

#[cfg(not(feature = "usb"))]
pub mod stub;

pub use traits::{Channel, DeviceInfo, Register};

use scanwerk_core::{Result, ScannerModel};

/// List attached scanners this build can drive.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    #[cfg(feature = "usb")]
    {
        usb::list_devices()
    }
    #[cfg(not(feature = "usb"))]
    {
        stub::list_devices()
    }
}

/// Open a channel to the named scanner and identify its model.
///
/// `force_model` skips USB id matching, for clones with unknown product ids.
pub fn open_channel(
    name: &str,
    force_model: Option<ScannerModel>,
) -> Result<(Box<dyn Channel>, ScannerModel)> {
    #[cfg(feature = "usb")]
    {
        usb::open(name, force_model)
    }
    #[cfg(not(feature = "usb"))]
    {
        stub::open(name, force_model)
    }
}
