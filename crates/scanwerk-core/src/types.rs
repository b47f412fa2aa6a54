// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scanner driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Native optical resolution of the CCD and the motor, in dots per inch.
pub const NATIVE_DPI: u16 = 600;

/// Number of pixels in one CCD sensor row at native resolution (8.5 inch).
pub const SENSOR_PIXELS: usize = 5100;

/// Longest scannable span along the motor axis, in native lines (11.7 inch).
pub const MAX_SCAN_LINES: u32 = 7020;

/// Smallest accepted scan span on either axis, in native units.
pub const MIN_SPAN: u32 = 64;

/// Resolutions accepted on both axes.
pub const SUPPORTED_RESOLUTIONS: [u16; 4] = [75, 150, 300, 600];

/// USB vendor id shared by every supported model.
pub const USB_VENDOR_ID: u16 = 0x1606;

/// Unique identifier for an open scanner session (used in log spans).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scanner families speaking the bridged command protocol.
///
/// Both families accept the same logical commands but lay them out
/// differently; the byte layouts live in the driver's model profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerModel {
    /// Astra 1220U.
    Astra1220U,
    /// Astra 2000U and the electrically identical 2100U.
    Astra2000U,
}

impl ScannerModel {
    /// Identify a model from its USB vendor/product pair.
    pub fn from_usb_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        if vendor_id != USB_VENDOR_ID {
            return None;
        }
        match product_id {
            0x0010 => Some(Self::Astra1220U),
            0x0030 | 0x0130 => Some(Self::Astra2000U),
            _ => None,
        }
    }

    /// Human-readable name for logs and the CLI.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Astra1220U => "Astra 1220U",
            Self::Astra2000U => "Astra 2000U/2100U",
        }
    }
}

/// Pixel format of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Gray,
    Color,
}

impl ColorMode {
    /// Sensor rows transferred per raw line.
    pub fn channels(&self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Color => 3,
        }
    }
}

/// Head travel direction relative to the scan area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Motor speed register preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedMode {
    /// Positioning moves.
    Fast,
    /// Moves close to the reference strip.
    Slow,
}

/// Scan axis, used in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X => f.write_str("x"),
            Self::Y => f.write_str("y"),
        }
    }
}

/// One reconstructed output pixel. Gray scans repeat the sample in all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn gray(value: u8) -> Self {
        Self {
            r: value,
            g: value,
            b: value,
        }
    }
}

/// Scan parameters as requested by the calling framework.
///
/// Geometry is in native 1/600 inch units relative to the scan-area origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub color: ColorMode,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub x_res: u16,
    pub y_res: u16,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            color: ColorMode::Color,
            x: 0,
            y: 0,
            width: SENSOR_PIXELS as u32,
            height: MAX_SCAN_LINES,
            x_res: 300,
            y_res: 300,
        }
    }
}

/// Classification of errors for the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Busy device or cancelled scan — trying again on the same session is fine.
    Transient,
    /// The session is unusable — close and reopen the device.
    Reopen,
    /// Bad request or unsupported hardware — retrying cannot help.
    Permanent,
}

/// Outcome of the zero-point search and gain calibration for one scan start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Absolute head tick of the scan-area origin.
    pub zero_point: i32,
    /// Reference-strip columns that showed a usable light→dark edge.
    pub edge_columns: usize,
    /// Gain entries that hit the model's numeric range and were clamped.
    pub clamped_gains: usize,
    pub measured_at: DateTime<Utc>,
}

/// Lines produced so far versus lines requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanProgress {
    pub lines_done: u32,
    pub lines_total: u32,
}

impl ScanProgress {
    pub fn fraction(&self) -> f64 {
        if self.lines_total == 0 {
            0.0
        } else {
            self.lines_done as f64 / self.lines_total as f64
        }
    }
}
