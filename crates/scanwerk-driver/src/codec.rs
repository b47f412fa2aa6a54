// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command codec: logical operations → fixed-layout command buffers.
//
// Both scanner families understand the same operations but place the fields
// at different offsets. The layout of each family is one static
// `ModelProfile`, chosen once when the device is identified; `Codec` is the
// only place that reads it.

use scanwerk_core::{ColorMode, Direction, Result, ScanError, ScannerModel, SpeedMode};

use scanwerk_bridge::Channel;

use crate::framer::{Opcode, Transport};

/// One flag bit inside a command block.
#[derive(Debug, Clone, Copy)]
pub struct BitField {
    pub offset: usize,
    pub mask: u8,
}

impl BitField {
    fn apply(&self, buf: &mut [u8], on: bool) {
        if on {
            buf[self.offset] |= self.mask;
        }
    }

    fn read(&self, buf: &[u8]) -> bool {
        buf[self.offset] & self.mask != 0
    }
}

/// Lamp/carriage control block.
#[derive(Debug)]
pub struct ControlLayout {
    pub len: usize,
    pub lamp: BitField,
    pub restore: BitField,
}

/// Motor move block. The 16-bit distance is split over three bytes that are
/// not adjacent: bits 0–7, bits 8–13, and bits 14–15 in the top two bits.
#[derive(Debug)]
pub struct MotorLayout {
    pub len: usize,
    pub distance_lo: usize,
    pub distance_mid: usize,
    pub distance_hi: usize,
    pub direction: BitField,
    /// Start of the 4-byte speed register preset.
    pub speed: usize,
    pub fast_preset: [u8; 4],
    pub slow_preset: [u8; 4],
}

/// Scan window block. Multi-byte fields are little-endian.
#[derive(Debug)]
pub struct WindowLayout {
    pub len: usize,
    pub x_offset: usize,
    pub width: usize,
    pub x_divisor: usize,
    pub y_skip: usize,
    /// 24-bit raw line count.
    pub lines: usize,
    pub color: BitField,
}

/// Test capture block.
#[derive(Debug)]
pub struct CaptureLayout {
    pub len: usize,
    pub x_offset: usize,
    pub width: usize,
    pub lines: usize,
    pub color: BitField,
}

/// Empirical gain formula constants:
/// `gain = scale · (target − avg) / (avg − dark_floor)`, clamped to `0..=max`.
#[derive(Debug)]
pub struct GainModel {
    pub target: i32,
    pub dark_floor: i32,
    pub scale: i32,
    pub max: u8,
}

/// Everything that differs between scanner families.
#[derive(Debug)]
pub struct ModelProfile {
    pub model: ScannerModel,
    pub control: ControlLayout,
    pub motor: MotorLayout,
    pub window: WindowLayout,
    pub capture: CaptureLayout,
    pub gain: GainModel,
    /// Bytes drained from the status opcode after every motor move.
    pub status_drain_len: usize,
}

static ASTRA_1220U: ModelProfile = ModelProfile {
    model: ScannerModel::Astra1220U,
    control: ControlLayout {
        len: 16,
        lamp: BitField { offset: 2, mask: 0x10 },
        restore: BitField { offset: 0, mask: 0x01 },
    },
    motor: MotorLayout {
        len: 36,
        distance_lo: 8,
        distance_mid: 10,
        distance_hi: 13,
        direction: BitField { offset: 14, mask: 0x20 },
        speed: 20,
        fast_preset: [0x2F, 0x2F, 0x05, 0x00],
        slow_preset: [0x0B, 0x0B, 0x03, 0x00],
    },
    window: WindowLayout {
        len: 24,
        x_offset: 0,
        width: 2,
        x_divisor: 4,
        y_skip: 6,
        lines: 8,
        color: BitField { offset: 12, mask: 0x40 },
    },
    capture: CaptureLayout {
        len: 12,
        x_offset: 0,
        width: 2,
        lines: 4,
        color: BitField { offset: 6, mask: 0x01 },
    },
    gain: GainModel {
        target: 250,
        dark_floor: 8,
        scale: 256,
        max: 255,
    },
    status_drain_len: 8,
};

static ASTRA_2000U: ModelProfile = ModelProfile {
    model: ScannerModel::Astra2000U,
    control: ControlLayout {
        len: 16,
        lamp: BitField { offset: 5, mask: 0x80 },
        restore: BitField { offset: 1, mask: 0x02 },
    },
    motor: MotorLayout {
        len: 36,
        distance_lo: 9,
        distance_mid: 12,
        distance_hi: 15,
        direction: BitField { offset: 17, mask: 0x08 },
        speed: 24,
        fast_preset: [0x1E, 0x1E, 0x04, 0x00],
        slow_preset: [0x09, 0x09, 0x02, 0x00],
    },
    window: WindowLayout {
        len: 24,
        x_offset: 2,
        width: 4,
        x_divisor: 6,
        y_skip: 8,
        lines: 10,
        color: BitField { offset: 14, mask: 0x01 },
    },
    capture: CaptureLayout {
        len: 12,
        x_offset: 2,
        width: 4,
        lines: 6,
        color: BitField { offset: 8, mask: 0x80 },
    },
    gain: GainModel {
        target: 240,
        dark_floor: 4,
        scale: 64,
        max: 127,
    },
    status_drain_len: 8,
};

/// Static layout for a model.
pub fn profile(model: ScannerModel) -> &'static ModelProfile {
    match model {
        ScannerModel::Astra1220U => &ASTRA_1220U,
        ScannerModel::Astra2000U => &ASTRA_2000U,
    }
}

/// A built command: a write carrying a payload, or a read of a known length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Write { opcode: Opcode, payload: Vec<u8> },
    Read { opcode: Opcode, len: usize },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Write { opcode, .. } | Self::Read { opcode, .. } => *opcode,
        }
    }
}

/// Lamp/carriage control fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlParams {
    pub lamp_on: bool,
    pub restore: bool,
}

/// One motor move of at most 0xFFFF ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveParams {
    pub distance: u16,
    pub direction: Direction,
    pub speed: SpeedMode,
}

/// Scan window, in native sensor pixels and head ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// First sensor pixel.
    pub x_offset: u32,
    /// Output pixels per line after horizontal sub-sampling.
    pub width: u32,
    pub x_divisor: u32,
    /// Ticks the head travels before the first captured line.
    pub y_skip: u32,
    /// Raw lines the device will deliver.
    pub lines: u32,
    pub color: ColorMode,
}

/// Reference capture at native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub x_offset: u32,
    pub width: u32,
    pub lines: u32,
    pub color: ColorMode,
}

impl CaptureParams {
    /// Bytes the device returns for this capture.
    pub fn response_len(&self) -> usize {
        self.width as usize * self.lines as usize * self.color.channels()
    }
}

impl<C: Channel> Transport<C> {
    /// Run one built command. Writes return an empty buffer.
    pub fn execute(&mut self, command: &Command) -> Result<Vec<u8>> {
        match command {
            Command::Write { opcode, payload } => {
                self.send(*opcode, payload)?;
                Ok(Vec::new())
            }
            Command::Read { opcode, len } => self.receive(*opcode, *len),
        }
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u32, field: &str) -> Result<()> {
    let value = u16::try_from(value)
        .map_err(|_| ScanError::InvalidGeometry(format!("{field} {value} exceeds 16 bits")))?;
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn put_u24(buf: &mut [u8], offset: usize, value: u32, field: &str) -> Result<()> {
    if value > 0x00FF_FFFF {
        return Err(ScanError::InvalidGeometry(format!("{field} {value} exceeds 24 bits")));
    }
    buf[offset..offset + 3].copy_from_slice(&value.to_le_bytes()[..3]);
    Ok(())
}

fn get_u16(buf: &[u8], offset: usize) -> u32 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]]) as u32
}

fn get_u24(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], 0])
}

fn color_of(flag: bool) -> ColorMode {
    if flag { ColorMode::Color } else { ColorMode::Gray }
}

/// Builds command buffers for one scanner family.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    profile: &'static ModelProfile,
}

impl Codec {
    pub fn new(model: ScannerModel) -> Self {
        Self {
            profile: profile(model),
        }
    }

    pub fn profile(&self) -> &'static ModelProfile {
        self.profile
    }

    pub fn control(&self, params: ControlParams) -> Command {
        let layout = &self.profile.control;
        let mut payload = vec![0u8; layout.len];
        layout.lamp.apply(&mut payload, params.lamp_on);
        layout.restore.apply(&mut payload, params.restore);
        Command::Write {
            opcode: Opcode::Control,
            payload,
        }
    }

    pub fn lamp(&self, on: bool) -> Command {
        self.control(ControlParams {
            lamp_on: on,
            restore: false,
        })
    }

    /// Return the carriage to its home stop.
    pub fn restore_head(&self, lamp_on: bool) -> Command {
        self.control(ControlParams {
            lamp_on,
            restore: true,
        })
    }

    pub fn move_head(&self, params: MoveParams) -> Command {
        let layout = &self.profile.motor;
        let mut payload = vec![0u8; layout.len];
        let d = params.distance;
        payload[layout.distance_lo] = (d & 0xFF) as u8;
        payload[layout.distance_mid] = ((d >> 8) & 0x3F) as u8;
        payload[layout.distance_hi] = (((d >> 14) & 0x03) as u8) << 6;
        layout
            .direction
            .apply(&mut payload, params.direction == Direction::Reverse);
        let preset = match params.speed {
            SpeedMode::Fast => layout.fast_preset,
            SpeedMode::Slow => layout.slow_preset,
        };
        payload[layout.speed..layout.speed + 4].copy_from_slice(&preset);
        Command::Write {
            opcode: Opcode::Motor,
            payload,
        }
    }

    /// Scan window upload (the pixel write that arms acquisition).
    pub fn scan_window(&self, params: &WindowParams) -> Result<Command> {
        let layout = &self.profile.window;
        let mut payload = vec![0u8; layout.len];
        put_u16(&mut payload, layout.x_offset, params.x_offset, "x offset")?;
        put_u16(&mut payload, layout.width, params.width, "width")?;
        payload[layout.x_divisor] = u8::try_from(params.x_divisor)
            .map_err(|_| ScanError::InvalidGeometry(format!("x divisor {}", params.x_divisor)))?;
        put_u16(&mut payload, layout.y_skip, params.y_skip, "y skip")?;
        put_u24(&mut payload, layout.lines, params.lines, "line count")?;
        layout
            .color
            .apply(&mut payload, params.color == ColorMode::Color);
        Ok(Command::Write {
            opcode: Opcode::Window,
            payload,
        })
    }

    /// Reference capture request; the data follows with `read_pixels`.
    pub fn capture(&self, params: &CaptureParams) -> Result<Command> {
        let layout = &self.profile.capture;
        let mut payload = vec![0u8; layout.len];
        put_u16(&mut payload, layout.x_offset, params.x_offset, "x offset")?;
        put_u16(&mut payload, layout.width, params.width, "width")?;
        put_u16(&mut payload, layout.lines, params.lines, "line count")?;
        layout
            .color
            .apply(&mut payload, params.color == ColorMode::Color);
        Ok(Command::Write {
            opcode: Opcode::Capture,
            payload,
        })
    }

    pub fn read_pixels(&self, len: usize) -> Command {
        Command::Read {
            opcode: Opcode::Pixels,
            len,
        }
    }

    pub fn upload_calibration(&self, table: &[u8]) -> Command {
        Command::Write {
            opcode: Opcode::Calibration,
            payload: table.to_vec(),
        }
    }

    /// Fixed-size status read that resynchronises after a motor move.
    pub fn status_drain(&self) -> Command {
        Command::Read {
            opcode: Opcode::Status,
            len: self.profile.status_drain_len,
        }
    }

    // -- Decoding (device side, used by the simulator) -------------------------

    pub fn decode_control(&self, payload: &[u8]) -> Option<ControlParams> {
        let layout = &self.profile.control;
        (payload.len() == layout.len).then(|| ControlParams {
            lamp_on: layout.lamp.read(payload),
            restore: layout.restore.read(payload),
        })
    }

    pub fn decode_move(&self, payload: &[u8]) -> Option<MoveParams> {
        let layout = &self.profile.motor;
        if payload.len() != layout.len {
            return None;
        }
        let distance = payload[layout.distance_lo] as u16
            | ((payload[layout.distance_mid] & 0x3F) as u16) << 8
            | ((payload[layout.distance_hi] >> 6) as u16) << 14;
        let direction = if layout.direction.read(payload) {
            Direction::Reverse
        } else {
            Direction::Forward
        };
        let preset = &payload[layout.speed..layout.speed + 4];
        let speed = if *preset == layout.slow_preset {
            SpeedMode::Slow
        } else {
            SpeedMode::Fast
        };
        Some(MoveParams {
            distance,
            direction,
            speed,
        })
    }

    pub fn decode_window(&self, payload: &[u8]) -> Option<WindowParams> {
        let layout = &self.profile.window;
        (payload.len() == layout.len).then(|| WindowParams {
            x_offset: get_u16(payload, layout.x_offset),
            width: get_u16(payload, layout.width),
            x_divisor: payload[layout.x_divisor] as u32,
            y_skip: get_u16(payload, layout.y_skip),
            lines: get_u24(payload, layout.lines),
            color: color_of(layout.color.read(payload)),
        })
    }

    pub fn decode_capture(&self, payload: &[u8]) -> Option<CaptureParams> {
        let layout = &self.profile.capture;
        (payload.len() == layout.len).then(|| CaptureParams {
            x_offset: get_u16(payload, layout.x_offset),
            width: get_u16(payload, layout.width),
            lines: get_u16(payload, layout.lines),
            color: color_of(layout.color.read(payload)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(cmd: &Command) -> &[u8] {
        match cmd {
            Command::Write { payload, .. } => payload,
            Command::Read { .. } => panic!("expected a write command"),
        }
    }

    #[test]
    fn lamp_bit_differs_per_model() {
        let a = Codec::new(ScannerModel::Astra1220U).lamp(true);
        let b = Codec::new(ScannerModel::Astra2000U).lamp(true);
        assert_eq!(payload(&a)[2], 0x10);
        assert_eq!(payload(&a)[5], 0x00);
        assert_eq!(payload(&b)[5], 0x80);
        assert_eq!(payload(&b)[2], 0x00);

        let off = Codec::new(ScannerModel::Astra1220U).lamp(false);
        assert!(payload(&off).iter().all(|&b| b == 0));
    }

    #[test]
    fn restore_keeps_lamp_state() {
        let codec = Codec::new(ScannerModel::Astra2000U);
        let cmd = codec.restore_head(true);
        assert_eq!(
            codec.decode_control(payload(&cmd)),
            Some(ControlParams {
                lamp_on: true,
                restore: true
            })
        );
    }

    #[test]
    fn move_distance_is_split_over_three_bytes() {
        let codec = Codec::new(ScannerModel::Astra1220U);
        let cmd = codec.move_head(MoveParams {
            distance: 0xC1_23,
            direction: Direction::Reverse,
            speed: SpeedMode::Slow,
        });
        let p = payload(&cmd);
        assert_eq!(p.len(), 36);
        assert_eq!(p[8], 0x23);
        assert_eq!(p[10], 0x01);
        assert_eq!(p[13], 0xC0);
        assert_eq!(p[14], 0x20);
        assert_eq!(&p[20..24], &[0x0B, 0x0B, 0x03, 0x00]);
        // Bytes between the distance fields stay clear.
        assert_eq!(p[9], 0);
        assert_eq!(p[11], 0);
        assert_eq!(p[12], 0);
    }

    #[test]
    fn move_decodes_on_both_models() {
        for model in [ScannerModel::Astra1220U, ScannerModel::Astra2000U] {
            let codec = Codec::new(model);
            for distance in [0u16, 1, 0x3FFF, 0x4000, 0xFFFF] {
                let params = MoveParams {
                    distance,
                    direction: Direction::Forward,
                    speed: SpeedMode::Fast,
                };
                let cmd = codec.move_head(params);
                assert_eq!(codec.decode_move(payload(&cmd)), Some(params));
            }
        }
    }

    #[test]
    fn window_fields_land_at_model_offsets() {
        let params = WindowParams {
            x_offset: 0x0102,
            width: 850,
            x_divisor: 2,
            y_skip: 27,
            lines: 0x01_0203,
            color: ColorMode::Color,
        };
        let codec = Codec::new(ScannerModel::Astra2000U);
        let cmd = codec.scan_window(&params).unwrap();
        let p = payload(&cmd);
        assert_eq!(&p[2..4], &[0x02, 0x01]);
        assert_eq!(p[6], 2);
        assert_eq!(&p[10..13], &[0x03, 0x02, 0x01]);
        assert_eq!(p[14], 0x01);
        assert_eq!(codec.decode_window(p), Some(params));
    }

    #[test]
    fn window_rejects_out_of_range_fields() {
        let codec = Codec::new(ScannerModel::Astra1220U);
        let params = WindowParams {
            x_offset: 0,
            width: 70_000,
            x_divisor: 1,
            y_skip: 0,
            lines: 10,
            color: ColorMode::Gray,
        };
        assert!(matches!(
            codec.scan_window(&params),
            Err(ScanError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn capture_response_len_counts_channels() {
        let params = CaptureParams {
            x_offset: 0,
            width: 100,
            lines: 4,
            color: ColorMode::Color,
        };
        assert_eq!(params.response_len(), 1200);
        let codec = Codec::new(ScannerModel::Astra1220U);
        let cmd = codec.capture(&params).unwrap();
        assert_eq!(cmd.opcode(), Opcode::Capture);
        assert_eq!(codec.decode_capture(payload(&cmd)), Some(params));
    }
}
