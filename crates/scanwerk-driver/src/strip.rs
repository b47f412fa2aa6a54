// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Acquisition and descrambling engine.
//
// The three color rows of the CCD sit a few lines apart, so one raw line holds
// red, green and blue samples of three different places on the page. The
// engine keeps a strip of raw lines, large enough for one transfer plus the
// over-read margin, and assembles each output pixel from the rows that saw the
// same place: blue from the line at `base`, green from `base + shift`, red
// from `base + 2·shift`.

use scanwerk_core::{ColorMode, Result, Rgb, ScanError};
use tracing::{debug, trace};

use crate::plan::ScanPlan;

/// Shape of the raw stream and the output it reconstructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    pub color: ColorMode,
    /// Pixels per line (raw and output).
    pub width: usize,
    pub y_divisor: usize,
    pub color_shift: usize,
    pub out_lines: usize,
}

impl StripLayout {
    /// Bytes per raw line: `width` for gray, three planes for color.
    pub fn line_bytes(&self) -> usize {
        self.width * self.color.channels()
    }

    /// Raw lines the device delivers for the whole scan.
    pub fn raw_lines(&self) -> usize {
        self.out_lines * self.y_divisor + self.margin()
    }

    /// Over-read lines retained beyond one transfer.
    pub fn margin(&self) -> usize {
        match self.color {
            ColorMode::Color => 2 * self.color_shift,
            ColorMode::Gray => 0,
        }
    }
}

impl From<&ScanPlan> for StripLayout {
    fn from(plan: &ScanPlan) -> Self {
        Self {
            color: plan.color(),
            width: plan.out_width as usize,
            y_divisor: plan.y_divisor as usize,
            color_shift: plan.color_shift as usize,
            out_lines: plan.out_height as usize,
        }
    }
}

/// Result of asking the engine for the next pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelStatus {
    Pixel(Rgb),
    /// The rows for the next pixel have not arrived; run a transfer.
    NeedData,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing transferred yet.
    AwaitingFill,
    /// Producing pixels from buffered rows.
    Draining,
    /// Buffered rows exhausted; waiting for the next transfer.
    NeedsRefill,
    Done,
}

/// Raw strip buffer plus the output cursor.
pub struct StripEngine {
    layout: StripLayout,
    line_bytes: usize,
    raw_total: usize,
    capacity_lines: usize,
    buf: Vec<u8>,
    /// Raw index of buffer row 0.
    first_row: usize,
    /// Rows currently held; `first_row + filled` is the next raw row expected.
    filled: usize,
    pending: Option<usize>,
    line: usize,
    column: usize,
    state: EngineState,
}

impl StripEngine {
    /// Allocate the strip for `lines_per_transfer` lines plus the margin.
    pub fn new(layout: StripLayout, lines_per_transfer: usize) -> Result<Self> {
        let line_bytes = layout.line_bytes();
        let capacity_lines = lines_per_transfer.max(1) + layout.margin();
        let bytes = capacity_lines
            .checked_mul(line_bytes)
            .ok_or(ScanError::Allocation(usize::MAX))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|_| ScanError::Allocation(bytes))?;
        buf.resize(bytes, 0);
        debug!(capacity_lines, line_bytes, raw_lines = layout.raw_lines(), "strip buffer allocated");

        Ok(Self {
            layout,
            line_bytes,
            raw_total: layout.raw_lines(),
            capacity_lines,
            buf,
            first_row: 0,
            filled: 0,
            pending: None,
            line: 0,
            column: 0,
            state: EngineState::AwaitingFill,
        })
    }

    pub fn layout(&self) -> &StripLayout {
        &self.layout
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Output lines fully produced.
    pub fn lines_done(&self) -> usize {
        self.line
    }

    /// Raw lines received so far.
    pub fn rows_received(&self) -> usize {
        self.first_row + self.filled
    }

    pub fn transfer_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn row(&self, raw: usize) -> &[u8] {
        let start = (raw - self.first_row) * self.line_bytes;
        &self.buf[start..start + self.line_bytes]
    }

    pub fn next_pixel(&mut self) -> PixelStatus {
        if self.state == EngineState::Done {
            return PixelStatus::Done;
        }
        if self.pending.is_some() {
            return PixelStatus::NeedData;
        }
        if self.line == self.layout.out_lines {
            // All output produced; the tail of the raw stream is still drained
            // so the device finishes its transfer.
            if self.rows_received() >= self.raw_total {
                self.state = EngineState::Done;
                debug!(raw_lines = self.raw_total, "strip engine done");
                return PixelStatus::Done;
            }
            self.state = EngineState::NeedsRefill;
            return PixelStatus::NeedData;
        }

        let base = self.line * self.layout.y_divisor;
        let shift = self.layout.color_shift;
        let newest = match self.layout.color {
            ColorMode::Color => base + 2 * shift,
            ColorMode::Gray => base,
        };
        if newest >= self.rows_received() {
            self.state = EngineState::NeedsRefill;
            return PixelStatus::NeedData;
        }

        let x = self.column;
        let w = self.layout.width;
        let pixel = match self.layout.color {
            ColorMode::Gray => Rgb::gray(self.row(base)[x]),
            ColorMode::Color => Rgb {
                r: self.row(base + 2 * shift)[x],
                g: self.row(base + shift)[w + x],
                b: self.row(base)[2 * w + x],
            },
        };

        self.column += 1;
        if self.column == w {
            self.column = 0;
            self.line += 1;
        }
        PixelStatus::Pixel(pixel)
    }

    /// Make room and open the next transfer; returns its length in raw lines.
    pub fn begin_fill(&mut self) -> Result<usize> {
        if self.pending.is_some() {
            return Err(ScanError::Io(
                "strip engine: a transfer is already outstanding".into(),
            ));
        }
        let remaining = self.raw_total.saturating_sub(self.rows_received());
        if remaining == 0 {
            return Err(ScanError::Io("strip engine: no raw lines left to transfer".into()));
        }

        // Rows before the current output line's base are never read again.
        let keep_from = (self.line * self.layout.y_divisor).max(self.first_row);
        let discard = (keep_from - self.first_row).min(self.filled);
        if discard > 0 {
            let keep = self.filled - discard;
            self.buf.copy_within(
                discard * self.line_bytes..self.filled * self.line_bytes,
                0,
            );
            self.first_row += discard;
            self.filled = keep;
        }

        let free = self.capacity_lines - self.filled;
        let lines = free.min(remaining);
        if lines == 0 {
            return Err(ScanError::Io("strip engine: buffer full without a usable line".into()));
        }
        self.pending = Some(lines);
        trace!(lines, first_row = self.first_row, retained = self.filled, "transfer opened");
        Ok(lines)
    }

    /// Buffer space the outstanding transfer must be read into.
    pub fn fill_slot(&mut self) -> &mut [u8] {
        let lines = self.pending.unwrap_or(0);
        let start = self.filled * self.line_bytes;
        &mut self.buf[start..start + lines * self.line_bytes]
    }

    /// Mark the outstanding transfer as landed in `fill_slot`.
    pub fn commit_fill(&mut self) -> Result<()> {
        let lines = self
            .pending
            .take()
            .ok_or_else(|| ScanError::Io("strip engine: no transfer outstanding".into()))?;
        self.filled += lines;
        self.state = EngineState::Draining;
        Ok(())
    }

    /// Copy a transfer's bytes in and commit it.
    pub fn complete_fill(&mut self, bytes: &[u8]) -> Result<()> {
        let expected = self.pending.unwrap_or(0) * self.line_bytes;
        if self.pending.is_none() || bytes.len() != expected {
            return Err(ScanError::Io(format!(
                "strip engine: transfer of {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        self.fill_slot().copy_from_slice(bytes);
        self.commit_fill()
    }
}
