// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zero-point location and gain calibration.
//
// Under the lid, just before the glass, sits a reference strip: white, then a
// sharp edge to black. A small gray capture across that edge tells us where
// the scan area starts; a color capture of the white part gives the per-pixel
// gain that flattens the sensor's response.

use scanwerk_bridge::Channel;
use scanwerk_core::{ColorMode, Result, SENSOR_PIXELS, ScanError, SpeedMode};
use tracing::{debug, info, instrument, warn};

use crate::codec::{CaptureParams, Codec, GainModel};
use crate::framer::Transport;
use crate::head::HeadController;

/// Distance from the home stop to just before the reference edge.
pub const ZERO_SEEK_TICKS: i32 = 196;

/// Reference raster geometry (native pixels / lines).
pub const ZERO_RASTER_COLUMNS: u32 = 300;
pub const ZERO_RASTER_ROWS: u32 = 180;
/// First sensor pixel of the reference raster, mid-sensor.
pub const ZERO_RASTER_X: u32 = 2400;

/// Smallest row-to-row drop accepted as the strip edge.
pub const MIN_EDGE_DROP: u8 = 40;

/// How far before the zero point the white part of the strip lies.
pub const WHITE_STRIP_BACKOFF: i32 = 120;

pub const GAMMA_LEN: usize = 256;

/// Three gain rows, three gamma tables and the `[x_divisor, y_divisor]` trailer.
pub const TABLE_LEN: usize = 3 * SENSOR_PIXELS + 3 * GAMMA_LEN + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChannel {
    Red,
    Green,
    Blue,
}

impl ColorChannel {
    pub const ALL: [ColorChannel; 3] = [Self::Red, Self::Green, Self::Blue];

    /// Plane index within a raw color line.
    pub fn index(&self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }
}

/// The table uploaded to the device before every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTable {
    bytes: Vec<u8>,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let mut table = Self {
            bytes: vec![0; TABLE_LEN],
        };
        let identity: Vec<u8> = (0..GAMMA_LEN).map(|v| v as u8).collect();
        for channel in ColorChannel::ALL {
            table.gamma_mut(channel).copy_from_slice(&identity);
        }
        table.set_divisors(1, 1);
        table
    }
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn gain_range(channel: ColorChannel) -> std::ops::Range<usize> {
        let start = channel.index() * SENSOR_PIXELS;
        start..start + SENSOR_PIXELS
    }

    fn gamma_range(channel: ColorChannel) -> std::ops::Range<usize> {
        let start = 3 * SENSOR_PIXELS + channel.index() * GAMMA_LEN;
        start..start + GAMMA_LEN
    }

    pub fn gains(&self, channel: ColorChannel) -> &[u8] {
        &self.bytes[Self::gain_range(channel)]
    }

    pub fn set_gains(&mut self, channel: ColorChannel, gains: &[u8]) -> Result<()> {
        if gains.len() != SENSOR_PIXELS {
            return Err(ScanError::InvalidGeometry(format!(
                "gain row of {} entries, expected {SENSOR_PIXELS}",
                gains.len()
            )));
        }
        self.bytes[Self::gain_range(channel)].copy_from_slice(gains);
        Ok(())
    }

    pub fn gamma(&self, channel: ColorChannel) -> &[u8] {
        &self.bytes[Self::gamma_range(channel)]
    }

    fn gamma_mut(&mut self, channel: ColorChannel) -> &mut [u8] {
        &mut self.bytes[Self::gamma_range(channel)]
    }

    /// Replace the identity ramp with a measured curve.
    pub fn set_gamma(&mut self, channel: ColorChannel, curve: &[u8; GAMMA_LEN]) {
        self.gamma_mut(channel).copy_from_slice(curve);
    }

    pub fn set_divisors(&mut self, x_divisor: u8, y_divisor: u8) {
        self.bytes[TABLE_LEN - 2] = x_divisor;
        self.bytes[TABLE_LEN - 1] = y_divisor;
    }

    pub fn divisors(&self) -> (u8, u8) {
        (self.bytes[TABLE_LEN - 2], self.bytes[TABLE_LEN - 1])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Where the reference edge sits within the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEstimate {
    /// First dark row, averaged over usable columns.
    pub row: u32,
    /// Columns that contributed.
    pub columns: usize,
}

/// Find the light→dark edge in a row-major gray raster.
///
/// Each column votes with the row where its largest downward step lands;
/// columns whose largest step is under `MIN_EDGE_DROP` abstain.
pub fn locate_edge(raster: &[u8], columns: usize, rows: usize) -> Option<EdgeEstimate> {
    if columns == 0 || raster.len() < columns * rows {
        return None;
    }
    let mut sum = 0usize;
    let mut voters = 0usize;
    for col in 0..columns {
        let mut best_drop = 0u8;
        let mut best_row = 0usize;
        for row in 1..rows {
            let above = raster[(row - 1) * columns + col];
            let here = raster[row * columns + col];
            let drop = above.saturating_sub(here);
            if drop > best_drop {
                best_drop = drop;
                best_row = row;
            }
        }
        if best_drop >= MIN_EDGE_DROP {
            sum += best_row;
            voters += 1;
        }
    }
    (voters > 0).then(|| EdgeEstimate {
        row: ((sum + voters / 2) / voters) as u32,
        columns: voters,
    })
}

/// Gain for one pixel column; the flag is set when the value was clamped.
pub fn compute_gain(model: &GainModel, average: i32) -> (u8, bool) {
    let denominator = average - model.dark_floor;
    let max = model.max as i32;
    if denominator <= 0 {
        return (model.max, true);
    }
    let gain = model.scale * (model.target - average) / denominator;
    if gain < 0 {
        (0, true)
    } else if gain > max {
        (model.max, true)
    } else {
        (gain as u8, false)
    }
}

/// Per-column mean of one plane of a planar color raster.
pub fn column_averages(raster: &[u8], width: usize, lines: usize, channel: ColorChannel) -> Vec<i32> {
    let line_bytes = width * 3;
    let plane = channel.index() * width;
    (0..width)
        .map(|x| {
            let sum: u32 = (0..lines)
                .map(|line| raster[line * line_bytes + plane + x] as u32)
                .sum();
            (sum / lines.max(1) as u32) as i32
        })
        .collect()
}

/// Gains for all three channels; returns the number of clamped entries.
pub fn fill_gains(
    table: &mut CalibrationTable,
    model: &GainModel,
    raster: &[u8],
    lines: usize,
) -> Result<usize> {
    let expected = SENSOR_PIXELS * 3 * lines;
    if lines == 0 || raster.len() != expected {
        return Err(ScanError::Io(format!(
            "white-field capture of {} bytes, expected {expected}",
            raster.len()
        )));
    }
    let mut clamped = 0;
    for channel in ColorChannel::ALL {
        let gains: Vec<u8> = column_averages(raster, SENSOR_PIXELS, lines, channel)
            .into_iter()
            .map(|avg| {
                let (gain, was_clamped) = compute_gain(model, avg);
                clamped += was_clamped as usize;
                gain
            })
            .collect();
        table.set_gains(channel, &gains)?;
    }
    Ok(clamped)
}

/// Run a test capture and read back its pixels.
pub fn capture<C: Channel>(
    transport: &mut Transport<C>,
    codec: &Codec,
    params: &CaptureParams,
) -> Result<Vec<u8>> {
    transport.execute(&codec.capture(params)?)?;
    transport.execute(&codec.read_pixels(params.response_len()))
}

/// Absolute zero point plus the edge it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroPoint {
    pub position: i32,
    pub edge: EdgeEstimate,
}

/// Home the head, creep up to the reference strip and find its edge.
#[instrument(skip_all)]
pub fn locate_zero<C: Channel>(
    transport: &mut Transport<C>,
    codec: &Codec,
    head: &mut HeadController,
) -> Result<ZeroPoint> {
    head.restore(transport, codec, true)?;
    head.move_by(transport, codec, ZERO_SEEK_TICKS, SpeedMode::Slow)?;

    let params = CaptureParams {
        x_offset: ZERO_RASTER_X,
        width: ZERO_RASTER_COLUMNS,
        lines: ZERO_RASTER_ROWS,
        color: ColorMode::Gray,
    };
    let raster = capture(transport, codec, &params)?;
    let edge = locate_edge(
        &raster,
        ZERO_RASTER_COLUMNS as usize,
        ZERO_RASTER_ROWS as usize,
    )
    .ok_or_else(|| ScanError::Io("reference strip not found".into()))?;

    let position = head.position() + edge.row as i32;
    info!(zero = position, edge_row = edge.row, columns = edge.columns, "zero point located");
    Ok(ZeroPoint { position, edge })
}

/// Measure the white strip and fill the gain rows of `table`.
/// Returns the number of clamped gain entries.
#[instrument(skip(transport, codec, head, table))]
pub fn calibrate_gains<C: Channel>(
    transport: &mut Transport<C>,
    codec: &Codec,
    head: &mut HeadController,
    table: &mut CalibrationTable,
    zero: i32,
    lines: usize,
) -> Result<usize> {
    head.move_to(transport, codec, zero - WHITE_STRIP_BACKOFF, SpeedMode::Slow)?;

    let params = CaptureParams {
        x_offset: 0,
        width: SENSOR_PIXELS as u32,
        lines: lines as u32,
        color: ColorMode::Color,
    };
    let raster = capture(transport, codec, &params)?;
    let clamped = fill_gains(table, &codec.profile().gain, &raster, lines)?;
    if clamped > 0 {
        warn!(clamped, "gain values outside the device range were clamped");
    } else {
        debug!("all gain values within range");
    }
    Ok(clamped)
}
