// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sync/escape framed transport over the bridge's register+bulk channel.
//
// Frame: 0x55 0xAA, 3-byte big-endian payload length, opcode (high bit set
// for host→device writes). The header goes out byte by byte through the data
// register; the payload travels through the bulk pipe. Every exchange ends by
// waiting for the device to drop its busy line and reading two status bytes.

use std::time::Duration;

use scanwerk_bridge::{Channel, Register};
use scanwerk_core::{Result, ScanError, ScannerConfig};
use tracing::{debug, trace, warn};

/// Frame synchronisation marker.
pub const SYNC: [u8; 2] = [0x55, 0xAA];

/// Escape prefix inserted before payload bytes that could be misread.
pub const ESCAPE: u8 = 0x1B;

/// Opcode bit marking host→device frames.
pub const WRITE_FLAG: u8 = 0x80;

/// Status register bit set while the device is busy.
pub const STATUS_BUSY: u8 = 0x80;

/// Largest payload the 3-byte length field can declare.
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

/// Bridge mode register values.
pub const MODE_IDLE: u8 = 0x04;
pub const MODE_COMMAND: u8 = 0x0C;

const CONTROL_PROBE: u8 = 0x0E;
const CONTROL_RUN: u8 = 0x06;
const PROBE_BYTE: u8 = 0x40;

/// Command opcodes (without the direction bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Lamp and carriage control block.
    Control,
    /// Motor move block.
    Motor,
    /// Scan window parameters.
    Window,
    /// Device status bytes.
    Status,
    /// Gain/gamma calibration table.
    Calibration,
    /// Test capture parameters.
    Capture,
    /// Pixel data.
    Pixels,
}

impl Opcode {
    pub fn code(&self) -> u8 {
        match self {
            Self::Control => 0x00,
            Self::Motor => 0x01,
            Self::Window => 0x02,
            Self::Status => 0x04,
            Self::Calibration => 0x08,
            Self::Capture => 0x10,
            Self::Pixels => 0x40,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Control),
            0x01 => Some(Self::Motor),
            0x02 => Some(Self::Window),
            0x04 => Some(Self::Status),
            0x08 => Some(Self::Calibration),
            0x10 => Some(Self::Capture),
            0x40 => Some(Self::Pixels),
            _ => None,
        }
    }

    /// Opcode byte as it appears in the frame header.
    pub fn header_byte(&self, write: bool) -> u8 {
        if write {
            self.code() | WRITE_FLAG
        } else {
            self.code()
        }
    }
}

/// Build the 6-byte frame header.
pub fn frame_header(opcode: Opcode, write: bool, len: usize) -> Result<[u8; 6]> {
    if len > MAX_PAYLOAD {
        return Err(ScanError::Io(format!(
            "payload of {len} bytes exceeds the frame length field"
        )));
    }
    Ok([
        SYNC[0],
        SYNC[1],
        (len >> 16) as u8,
        (len >> 8) as u8,
        len as u8,
        opcode.header_byte(write),
    ])
}

/// Append the escaped form of `payload` to `out`.
pub fn escape_into(payload: &[u8], out: &mut Vec<u8>) {
    let mut prev = None;
    for &byte in payload {
        if byte == ESCAPE || (byte == SYNC[1] && prev == Some(SYNC[0])) {
            out.push(ESCAPE);
        }
        out.push(byte);
        prev = Some(byte);
    }
}

pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 16);
    escape_into(payload, &mut out);
    out
}

/// Reverse `escape`. A trailing lone escape byte is dropped.
pub fn unescape(encoded: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut bytes = encoded.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            if let Some(&literal) = bytes.next() {
                out.push(literal);
            }
        } else {
            out.push(byte);
        }
    }
    out
}

/// Status-poll budget.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub retries: u32,
    pub interval: Duration,
}

impl From<&ScannerConfig> for PollConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            retries: config.poll_retries.max(1),
            interval: config.poll_interval(),
        }
    }
}

/// A channel plus the session-owned framing state.
pub struct Transport<C: Channel> {
    channel: C,
    poll: PollConfig,
    /// Scratch space for escaped payloads, reused across frames.
    escape_buf: Vec<u8>,
    last_status: [u8; 2],
    exchanges: u64,
}

impl<C: Channel> Transport<C> {
    pub fn new(channel: C, poll: PollConfig) -> Self {
        Self {
            channel,
            poll,
            escape_buf: Vec::new(),
            last_status: [0; 2],
            exchanges: 0,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Status bytes read at the end of the last exchange.
    pub fn last_status(&self) -> [u8; 2] {
        self.last_status
    }

    /// Completed exchanges since the transport was created.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Wake the bridge and check that its data latch answers.
    pub fn handshake(&mut self) -> Result<()> {
        self.channel.write_register(Register::Mode, MODE_IDLE)?;
        self.channel.write_register(Register::Control, CONTROL_PROBE)?;
        self.channel.write_register(Register::Data, PROBE_BYTE)?;
        let echo = self.channel.read_register(Register::Data)?;
        if echo != PROBE_BYTE {
            return Err(ScanError::Io(format!(
                "bridge handshake failed: wrote {PROBE_BYTE:#04x}, read back {echo:#04x}"
            )));
        }
        self.channel.write_register(Register::Control, CONTROL_RUN)?;
        self.wait_ready()?;
        debug!(channel = %self.channel.describe(), "bridge handshake complete");
        Ok(())
    }

    /// Poll the status register until the busy bit clears.
    pub fn wait_ready(&mut self) -> Result<()> {
        let retries = self.poll.retries.max(1);
        for attempt in 0..retries {
            let status = self.channel.read_register(Register::Status)?;
            if status & STATUS_BUSY == 0 {
                if attempt > 0 {
                    trace!(attempt, "device ready");
                }
                return Ok(());
            }
            if attempt + 1 < retries && !self.poll.interval.is_zero() {
                std::thread::sleep(self.poll.interval);
            }
        }
        warn!(retries, "device never left the busy state");
        Err(ScanError::Io(format!(
            "device still busy after {retries} status polls"
        )))
    }

    /// Send `payload` to the device under `opcode`.
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        self.begin(opcode, true, payload.len())?;
        if !payload.is_empty() {
            let mut escaped = std::mem::take(&mut self.escape_buf);
            escaped.clear();
            escape_into(payload, &mut escaped);
            let result = self
                .channel
                .prepare_bulk_write(escaped.len())
                .and_then(|()| self.channel.bulk_write(&escaped));
            self.escape_buf = escaped;
            result?;
        }
        self.finish()
    }

    /// Read exactly `len` bytes from the device under `opcode`.
    pub fn receive(&mut self, opcode: Opcode, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ScanError::Allocation(len))?;
        data.resize(len, 0);
        self.receive_into(opcode, &mut data)?;
        Ok(data)
    }

    /// Read exactly `buf.len()` bytes from the device under `opcode`.
    pub fn receive_into(&mut self, opcode: Opcode, buf: &mut [u8]) -> Result<()> {
        self.begin(opcode, false, buf.len())?;
        if !buf.is_empty() {
            self.channel.prepare_bulk_read(buf.len())?;
            let got = self.channel.bulk_read(buf)?;
            if got != buf.len() {
                return Err(ScanError::Io(format!(
                    "short bulk read for {opcode:?}: {got} of {} bytes",
                    buf.len()
                )));
            }
        }
        self.finish()
    }

    fn begin(&mut self, opcode: Opcode, write: bool, len: usize) -> Result<()> {
        let header = frame_header(opcode, write, len)?;
        trace!(header = %hex::encode(header), ?opcode, len, "frame out");
        self.channel.write_register(Register::Mode, MODE_COMMAND)?;
        for byte in header {
            self.channel.write_register(Register::Data, byte)?;
        }
        self.wait_ready()
    }

    fn finish(&mut self) -> Result<()> {
        self.wait_ready()?;
        let s0 = self.channel.read_register(Register::Data)?;
        let s1 = self.channel.read_register(Register::Status)?;
        self.last_status = [s0, s1];
        self.channel.write_register(Register::Mode, MODE_IDLE)?;
        self.exchanges += 1;
        trace!(status = %hex::encode(self.last_status), "frame done");
        Ok(())
    }
}
