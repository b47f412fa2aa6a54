// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk Driver — framed command transport, per-model command codec, head
// tracking, reference-strip calibration and strip descrambling for bridged
// USB CCD scanners.  This crate sits between the domain types defined in
// `scanwerk-core` and the register+bulk channel from `scanwerk-bridge`.

pub mod calibration;
pub mod codec;
pub mod framer;
pub mod head;
pub mod plan;
pub mod session;
pub mod sim;
pub mod strip;

pub use codec::{Codec, Command, ModelProfile};
pub use framer::{Opcode, Transport};
pub use plan::ScanPlan;
pub use session::{CancelHandle, Session};
pub use sim::SimulatedScanner;
pub use strip::{PixelStatus, StripEngine};

use scanwerk_bridge::Channel;
use scanwerk_core::{Result, ScannerConfig};

/// Open the named device through the bridge and start a session on it.
///
/// `name` is backend-specific ("usb:BUS:ADDR", or "auto" for the first
/// supported scanner).
pub fn open(name: &str, config: ScannerConfig) -> Result<Session<Box<dyn Channel>>> {
    let (channel, model) = scanwerk_bridge::open_channel(name, config.force_model)?;
    Session::open(channel, model, config)
}
