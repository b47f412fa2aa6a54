// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the command-line front end.
//
// Every technical error is mapped to plain English with a clear suggestion.

use crate::error::ScanError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Busy device, interrupted scan — trying again is fine.
    Transient,
    /// User must do something (plug in, unlock the carriage, reopen).
    ActionRequired,
    /// Cannot be fixed by retrying — bad request or unsupported hardware.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary.
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
    /// Whether running the same command again may succeed.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `ScanError` into a `HumanError`.
pub fn humanize_error(err: &ScanError) -> HumanError {
    match err {
        ScanError::Io(detail) => humanize_device_io(detail),

        ScanError::HostIo(io_err) => {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "Scanwerk can't write the output file.".into(),
                    suggestion: "Check the folder permissions, or choose a different output path.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, your disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        ScanError::InvalidGeometry(detail) => HumanError {
            message: "The scan area doesn't fit on the glass.".into(),
            suggestion: format!("Choose a smaller area or move it inside the scanner bed. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::UnsupportedResolution { axis, dpi } => HumanError {
            message: format!("The scanner can't scan at {dpi} dpi."),
            suggestion: format!("Pick 75, 150, 300 or 600 dpi for the {axis} axis."),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::NotConfigured | ScanError::NotStarted => HumanError {
            message: "The scan wasn't set up before reading.".into(),
            suggestion: "This is a bug in the calling program. Please report it.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::SessionFailed => HumanError {
            message: "The connection to the scanner was lost earlier.".into(),
            suggestion: "Unplug the scanner, plug it back in, and start the scan again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanError::Cancelled => HumanError {
            message: "The scan was cancelled.".into(),
            suggestion: "Start the scan again when you're ready.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        ScanError::Allocation(_) => HumanError {
            message: "The computer ran out of memory for the scan.".into(),
            suggestion: "Try a lower resolution or a smaller scan area.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanError::UnknownModel { .. } => HumanError {
            message: "This scanner model isn't supported.".into(),
            suggestion: "Scanwerk supports the Astra 1220U, 2000U and 2100U.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanError::DeviceNotFound(_) => HumanError {
            message: "No scanner was found.".into(),
            suggestion: "Make sure the scanner is plugged in and switched on.".into(),
            retriable: true,
            severity: Severity::ActionRequired,
        },

        ScanError::Serialization(_) => HumanError {
            message: "The configuration file couldn't be read.".into(),
            suggestion: "Check config.json for typos, or delete it to go back to the defaults.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        ScanError::PlatformUnavailable => HumanError {
            message: "This build can't talk to USB scanners.".into(),
            suggestion: "Rebuild with the \"usb\" feature, or use --simulate to try the driver without hardware.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },
    }
}

/// Parse device transport failure details into human-readable messages.
fn humanize_device_io(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("busy") {
        HumanError {
            message: "The scanner stopped responding.".into(),
            suggestion: "Switch the scanner off and on again, then restart the scan.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("reference strip") {
        HumanError {
            message: "The scanner couldn't find its starting position.".into(),
            suggestion: "Check that the carriage lock is released and the lid is closed, then try again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("short") || lower.contains("truncated") {
        HumanError {
            message: "Image data from the scanner was cut off.".into(),
            suggestion: "Try a different USB port or cable, and avoid USB hubs.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else {
        HumanError {
            message: "Communication with the scanner failed.".into(),
            suggestion: format!("Reconnect the scanner and try again. (Detail: {detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    }
}
