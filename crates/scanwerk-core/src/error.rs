// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

use crate::types::{Axis, ErrorClass};

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Transport --
    #[error("device I/O failed: {0}")]
    Io(String),

    #[error("host file I/O error: {0}")]
    HostIo(#[from] std::io::Error),

    // -- Request validation --
    #[error("invalid scan geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported {axis} resolution: {dpi} dpi")]
    UnsupportedResolution { axis: Axis, dpi: u16 },

    #[error("scan parameters have not been set")]
    NotConfigured,

    #[error("no scan is in progress")]
    NotStarted,

    // -- Session state --
    #[error("session failed earlier and must be reopened")]
    SessionFailed,

    #[error("scan cancelled")]
    Cancelled,

    #[error("buffer allocation of {0} bytes failed")]
    Allocation(usize),

    // -- Device identification --
    #[error("unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnknownModel { vendor_id: u16, product_id: u16 },

    #[error("no scanner found matching {0:?}")]
    DeviceNotFound(String),

    // -- Configuration --
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform --
    #[error("USB access is not available in this build")]
    PlatformUnavailable,
}

impl ScanError {
    /// Classify the error for the caller's recovery decision.
    ///
    /// Transport failures are never retried inside a session: once the
    /// framing is out of step the only way back is a fresh open.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::SessionFailed | Self::Allocation(_) => ErrorClass::Reopen,
            Self::Cancelled | Self::NotStarted => ErrorClass::Transient,
            Self::HostIo(err) => match err.kind() {
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                    ErrorClass::Transient
                }
                _ => ErrorClass::Permanent,
            },
            Self::InvalidGeometry(_)
            | Self::UnsupportedResolution { .. }
            | Self::NotConfigured
            | Self::UnknownModel { .. }
            | Self::DeviceNotFound(_)
            | Self::Serialization(_)
            | Self::PlatformUnavailable => ErrorClass::Permanent,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;
