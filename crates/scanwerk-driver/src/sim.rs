// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Simulated scanner behind the bridge.
//
// Speaks the device side of the framed protocol: parses frame headers from the
// data register, unescapes bulk payloads, records every command and answers
// reads with synthetic images. Used by the test suites and by the CLI's
// `--simulate` flag.

use scanwerk_bridge::{Channel, Register};
use scanwerk_core::{ColorMode, Result, ScanError, ScannerModel};
use tracing::{debug, warn};

use crate::codec::{CaptureParams, Codec, ControlParams, MoveParams, WindowParams};
use crate::framer::{self, MODE_COMMAND, Opcode, STATUS_BUSY, SYNC, WRITE_FLAG};

/// Status register value while idle.
const STATUS_IDLE: u8 = 0x38;

/// Reference strip brightness above and below the edge.
const STRIP_LIGHT: u8 = 200;
const STRIP_DARK: u8 = 30;
/// Brightness of columns without an edge.
const STRIP_FLAT: u8 = 120;
/// Brightness of a dead sensor pixel on the white field.
const DEAD_PIXEL: u8 = 5;

/// Synthetic value of raw scan row `row`, sensor plane `channel`, output
/// column `column`. Distinct enough across rows that a descrambling mistake
/// shows up as a wrong value.
pub fn pixel_value(row: usize, channel: usize, column: usize) -> u8 {
    ((row * 7 + channel * 85 + column) & 0xFF) as u8
}

/// One frame as the device saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFrame {
    pub opcode: Opcode,
    pub write: bool,
    pub declared_len: usize,
    /// Unescaped payload (writes only).
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct OpenFrame {
    opcode: Opcode,
    len: usize,
}

/// In-memory device implementing [`Channel`].
pub struct SimulatedScanner {
    codec: Codec,
    mode: u8,
    control: u8,
    data_latch: u8,
    header: Vec<u8>,
    open_write: Option<OpenFrame>,
    prepared: Option<usize>,
    outgoing: Vec<u8>,
    outgoing_pos: usize,
    frames: Vec<SimFrame>,
    protocol_errors: usize,

    lamp_on: bool,
    window: Option<WindowParams>,
    capture: Option<CaptureParams>,
    served_bytes: usize,

    edge_row: usize,
    flat_columns: usize,
    white_level: u8,
    dead_pixels: Vec<usize>,

    busy_polls: u32,
    busy_forever: bool,
    truncate_next_read: bool,
}

impl SimulatedScanner {
    pub fn new(model: ScannerModel) -> Self {
        Self {
            codec: Codec::new(model),
            mode: framer::MODE_IDLE,
            control: 0,
            data_latch: 0,
            header: Vec::with_capacity(6),
            open_write: None,
            prepared: None,
            outgoing: Vec::new(),
            outgoing_pos: 0,
            frames: Vec::new(),
            protocol_errors: 0,
            lamp_on: false,
            window: None,
            capture: None,
            served_bytes: 0,
            edge_row: 37,
            flat_columns: 10,
            white_level: STRIP_LIGHT,
            dead_pixels: Vec::new(),
            busy_polls: 0,
            busy_forever: false,
            truncate_next_read: false,
        }
    }

    /// Row of the reference raster where the strip turns dark.
    pub fn with_edge_row(mut self, row: usize) -> Self {
        self.edge_row = row;
        self
    }

    /// Leading raster columns that show no edge at all.
    pub fn with_flat_columns(mut self, columns: usize) -> Self {
        self.flat_columns = columns;
        self
    }

    /// Brightness of the white calibration field.
    pub fn with_white_level(mut self, level: u8) -> Self {
        self.white_level = level;
        self
    }

    /// Sensor columns that read almost black on the white field.
    pub fn with_dead_pixels(mut self, columns: Vec<usize>) -> Self {
        self.dead_pixels = columns;
        self
    }

    pub fn model(&self) -> ScannerModel {
        self.codec.profile().model
    }

    pub fn frames(&self) -> &[SimFrame] {
        &self.frames
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    pub fn frames_with(&self, opcode: Opcode) -> impl Iterator<Item = &SimFrame> {
        self.frames.iter().filter(move |f| f.opcode == opcode)
    }

    /// Decoded motor moves, in issue order.
    pub fn moves(&self) -> Vec<MoveParams> {
        self.frames_with(Opcode::Motor)
            .filter_map(|f| self.codec.decode_move(&f.payload))
            .collect()
    }

    /// Decoded control blocks, in issue order.
    pub fn controls(&self) -> Vec<ControlParams> {
        self.frames_with(Opcode::Control)
            .filter_map(|f| self.codec.decode_control(&f.payload))
            .collect()
    }

    pub fn lamp_on(&self) -> bool {
        self.lamp_on
    }

    /// Last scan window uploaded.
    pub fn window(&self) -> Option<WindowParams> {
        self.window
    }

    /// Headers, lengths or bulk sizes the device could not make sense of.
    pub fn protocol_errors(&self) -> usize {
        self.protocol_errors
    }

    /// Report busy on the next `polls` status reads.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn set_busy_forever(&mut self, busy: bool) {
        self.busy_forever = busy;
    }

    /// Deliver one byte less than requested on the next bulk read.
    pub fn truncate_next_read(&mut self) {
        self.truncate_next_read = true;
    }

    fn protocol_error(&mut self, what: &str) {
        warn!(what, "simulated device: protocol error");
        self.protocol_errors += 1;
    }

    fn parse_header(&mut self) {
        let h = std::mem::take(&mut self.header);
        self.data_latch = 0;
        if h[..2] != SYNC {
            self.protocol_error("missing sync");
            return;
        }
        let len = (h[2] as usize) << 16 | (h[3] as usize) << 8 | h[4] as usize;
        let write = h[5] & WRITE_FLAG != 0;
        let Some(opcode) = Opcode::from_code(h[5] & !WRITE_FLAG) else {
            self.protocol_error("unknown opcode");
            return;
        };
        debug!(?opcode, write, len, "simulated device: frame");

        if write {
            if len == 0 {
                self.apply_write(opcode, Vec::new());
            } else {
                self.open_write = Some(OpenFrame { opcode, len });
            }
        } else {
            self.frames.push(SimFrame {
                opcode,
                write: false,
                declared_len: len,
                payload: Vec::new(),
            });
            self.outgoing = self.respond(opcode, len);
            self.outgoing_pos = 0;
        }
    }

    fn apply_write(&mut self, opcode: Opcode, payload: Vec<u8>) {
        match opcode {
            Opcode::Control => {
                if let Some(control) = self.codec.decode_control(&payload) {
                    self.lamp_on = control.lamp_on;
                }
            }
            Opcode::Window => {
                self.window = self.codec.decode_window(&payload);
                self.served_bytes = 0;
            }
            Opcode::Capture => self.capture = self.codec.decode_capture(&payload),
            _ => {}
        }
        self.frames.push(SimFrame {
            opcode,
            write: true,
            declared_len: payload.len(),
            payload,
        });
    }

    fn respond(&mut self, opcode: Opcode, len: usize) -> Vec<u8> {
        if opcode != Opcode::Pixels {
            return vec![0; len];
        }
        if let Some(capture) = self.capture.take() {
            return self.capture_raster(&capture, len);
        }
        match self.window {
            Some(window) => {
                let line_bytes = (window.width as usize * window.color.channels()).max(1);
                let width = (window.width as usize).max(1);
                let start = self.served_bytes;
                self.served_bytes += len;
                (start..start + len)
                    .map(|g| {
                        let within = g % line_bytes;
                        pixel_value(g / line_bytes, within / width, within % width)
                    })
                    .collect()
            }
            None => vec![0; len],
        }
    }

    fn capture_raster(&self, capture: &CaptureParams, len: usize) -> Vec<u8> {
        let width = (capture.width as usize).max(1);
        let channels = capture.color.channels();
        let line_bytes = width * channels;
        (0..len)
            .map(|i| {
                let row = i / line_bytes;
                let column = i % line_bytes % width;
                match capture.color {
                    ColorMode::Gray if column < self.flat_columns => STRIP_FLAT,
                    ColorMode::Gray if row < self.edge_row => STRIP_LIGHT,
                    ColorMode::Gray => STRIP_DARK,
                    ColorMode::Color if self.dead_pixels.contains(&column) => DEAD_PIXEL,
                    ColorMode::Color => self.white_level,
                }
            })
            .collect()
    }
}

impl Channel for SimulatedScanner {
    fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        match register {
            Register::Mode => {
                if value == MODE_COMMAND {
                    self.header.clear();
                }
                self.mode = value;
            }
            Register::Control => self.control = value,
            Register::Data if self.mode == MODE_COMMAND => {
                self.header.push(value);
                if self.header.len() == 6 {
                    self.parse_header();
                }
            }
            Register::Data => self.data_latch = value,
            Register::Status => self.protocol_error("status register is read-only"),
        }
        Ok(())
    }

    fn read_register(&mut self, register: Register) -> Result<u8> {
        Ok(match register {
            Register::Data => self.data_latch,
            Register::Status if self.busy_forever => STATUS_BUSY,
            Register::Status if self.busy_polls > 0 => {
                self.busy_polls -= 1;
                STATUS_BUSY
            }
            Register::Status => STATUS_IDLE,
            Register::Control => self.control,
            Register::Mode => self.mode,
        })
    }

    fn prepare_bulk_write(&mut self, len: usize) -> Result<()> {
        self.prepared = Some(len);
        Ok(())
    }

    fn prepare_bulk_read(&mut self, len: usize) -> Result<()> {
        self.prepared = Some(len);
        Ok(())
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        if self.prepared.take() != Some(data.len()) {
            self.protocol_error("bulk write length not announced");
        }
        let Some(frame) = self.open_write.take() else {
            return Err(ScanError::Io("simulated device: bulk write outside a frame".into()));
        };
        if framer::escape(&framer::unescape(data)) != data {
            self.protocol_error("payload not canonically escaped");
        }
        let payload = framer::unescape(data);
        if payload.len() != frame.len {
            self.protocol_error("payload length differs from header");
        }
        self.apply_write(frame.opcode, payload);
        Ok(())
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.prepared.take() != Some(buf.len()) {
            self.protocol_error("bulk read length not announced");
        }
        let available = self.outgoing.len() - self.outgoing_pos;
        let mut n = buf.len().min(available);
        if self.truncate_next_read {
            self.truncate_next_read = false;
            n = n.saturating_sub(1);
        }
        buf[..n].copy_from_slice(&self.outgoing[self.outgoing_pos..self.outgoing_pos + n]);
        self.outgoing_pos += n;
        Ok(n)
    }

    fn describe(&self) -> String {
        format!("simulated {}", self.model().display_name())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::framer::{PollConfig, Transport};

    fn transport(sim: SimulatedScanner) -> Transport<SimulatedScanner> {
        Transport::new(
            sim,
            PollConfig {
                retries: 5,
                interval: Duration::ZERO,
            },
        )
    }

    #[test]
    fn write_frames_are_unescaped_and_recorded() {
        let mut t = transport(SimulatedScanner::new(ScannerModel::Astra1220U));
        t.send(Opcode::Calibration, &[0x55, 0xAA, 0x1B, 0x07]).unwrap();
        let frame = &t.channel().frames()[0];
        assert_eq!(frame.opcode, Opcode::Calibration);
        assert!(frame.write);
        assert_eq!(frame.payload, vec![0x55, 0xAA, 0x1B, 0x07]);
        assert_eq!(t.channel().protocol_errors(), 0);
    }

    #[test]
    fn handshake_succeeds_against_the_simulator() {
        let mut t = transport(SimulatedScanner::new(ScannerModel::Astra2000U));
        t.handshake().unwrap();
        assert!(t.channel().frames().is_empty());
    }

    #[test]
    fn transient_busy_is_absorbed_by_polling() {
        let mut sim = SimulatedScanner::new(ScannerModel::Astra1220U);
        sim.set_busy_polls(3);
        let mut t = transport(sim);
        assert_eq!(t.receive(Opcode::Status, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn endless_busy_exhausts_the_poll_budget() {
        let mut sim = SimulatedScanner::new(ScannerModel::Astra1220U);
        sim.set_busy_forever(true);
        let mut t = transport(sim);
        let err = t.receive(Opcode::Status, 8).unwrap_err();
        assert!(matches!(err, ScanError::Io(msg) if msg.contains("busy")));
    }

    #[test]
    fn truncated_bulk_read_is_an_error() {
        let mut sim = SimulatedScanner::new(ScannerModel::Astra1220U);
        sim.truncate_next_read();
        let mut t = transport(sim);
        let err = t.receive(Opcode::Status, 8).unwrap_err();
        assert!(matches!(err, ScanError::Io(msg) if msg.contains("short")));
    }

    #[test]
    fn reference_raster_has_edge_and_flat_columns() {
        let sim = SimulatedScanner::new(ScannerModel::Astra1220U)
            .with_edge_row(5)
            .with_flat_columns(2);
        let capture = CaptureParams {
            x_offset: 0,
            width: 4,
            lines: 8,
            color: ColorMode::Gray,
        };
        let raster = sim.capture_raster(&capture, capture.response_len());
        assert_eq!(raster[0], STRIP_FLAT);
        assert_eq!(raster[2], STRIP_LIGHT);
        assert_eq!(raster[4 * 5 + 3], STRIP_DARK);
    }
}
