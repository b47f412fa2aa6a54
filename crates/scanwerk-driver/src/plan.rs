// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request validation and derived scan geometry.

use scanwerk_core::{
    Axis, ColorMode, MAX_SCAN_LINES, MIN_SPAN, NATIVE_DPI, Result, SENSOR_PIXELS,
    SUPPORTED_RESOLUTIONS, ScanError, ScanRequest,
};

/// Native lines between adjacent color rows on the sensor.
pub const COLOR_ROW_GAP: u32 = 8;

/// A validated request plus everything derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    pub request: ScanRequest,
    pub x_divisor: u32,
    pub y_divisor: u32,
    /// Output pixels per line.
    pub out_width: u32,
    /// Output lines.
    pub out_height: u32,
    /// Raw lines between adjacent color planes of one output line.
    pub color_shift: u32,
}

fn check_resolution(axis: Axis, dpi: u16) -> Result<u32> {
    if SUPPORTED_RESOLUTIONS.contains(&dpi) {
        Ok((NATIVE_DPI / dpi) as u32)
    } else {
        Err(ScanError::UnsupportedResolution { axis, dpi })
    }
}

fn check_span(axis: Axis, start: u32, span: u32, limit: u32) -> Result<()> {
    if span < MIN_SPAN {
        return Err(ScanError::InvalidGeometry(format!(
            "{axis} span {span} is below the minimum of {MIN_SPAN}"
        )));
    }
    match start.checked_add(span) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(ScanError::InvalidGeometry(format!(
            "{axis} range {start}+{span} exceeds the {limit}-unit scan area"
        ))),
    }
}

/// Output samples covering `span` native units from `start`, rounded up so the
/// last partial cell is still scanned unless it would run past `limit`.
fn output_span(start: u32, span: u32, divisor: u32, limit: u32) -> u32 {
    span.div_ceil(divisor).min((limit - start) / divisor)
}

impl ScanPlan {
    /// Validate `request` without touching the device.
    pub fn new(request: ScanRequest) -> Result<Self> {
        let x_divisor = check_resolution(Axis::X, request.x_res)?;
        let y_divisor = check_resolution(Axis::Y, request.y_res)?;
        check_span(Axis::X, request.x, request.width, SENSOR_PIXELS as u32)?;
        check_span(Axis::Y, request.y, request.height, MAX_SCAN_LINES)?;

        let color_shift = match request.color {
            ColorMode::Color if y_divisor > 1 => COLOR_ROW_GAP / y_divisor,
            _ => 0,
        };

        Ok(Self {
            request,
            x_divisor,
            y_divisor,
            out_width: output_span(request.x, request.width, x_divisor, SENSOR_PIXELS as u32),
            out_height: output_span(request.y, request.height, y_divisor, MAX_SCAN_LINES),
            color_shift,
        })
    }

    pub fn color(&self) -> ColorMode {
        self.request.color
    }

    /// Bytes in one raw line as the device sends it (planar for color).
    pub fn raw_line_bytes(&self) -> usize {
        self.out_width as usize * self.request.color.channels()
    }

    /// Raw lines the device must deliver for the whole scan.
    pub fn raw_lines(&self) -> u32 {
        self.out_height * self.y_divisor + 2 * self.color_shift
    }

    /// Bytes in one interleaved output line.
    pub fn output_line_bytes(&self) -> usize {
        self.out_width as usize * self.request.color.channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(color: ColorMode, res: u16) -> ScanRequest {
        ScanRequest {
            color,
            x: 100,
            y: 200,
            width: 1200,
            height: 1600,
            x_res: res,
            y_res: res,
        }
    }

    #[test]
    fn divisors_divide_native_resolution() {
        for &x_res in &SUPPORTED_RESOLUTIONS {
            for &y_res in &SUPPORTED_RESOLUTIONS {
                for color in [ColorMode::Gray, ColorMode::Color] {
                    let plan = ScanPlan::new(ScanRequest {
                        x_res,
                        y_res,
                        ..request(color, 600)
                    })
                    .unwrap();
                    for div in [plan.x_divisor, plan.y_divisor] {
                        assert!(div > 0);
                        assert_eq!(NATIVE_DPI as u32 % div, 0);
                    }
                    assert_eq!(plan.x_divisor * x_res as u32, 600);
                }
            }
        }
    }

    #[test]
    fn native_resolution_has_no_shift() {
        let plan = ScanPlan::new(request(ColorMode::Color, 600)).unwrap();
        assert_eq!((plan.x_divisor, plan.y_divisor), (1, 1));
        assert_eq!(plan.color_shift, 0);
        assert_eq!(plan.raw_lines(), 1600);
    }

    #[test]
    fn half_resolution_halves_output() {
        let plan = ScanPlan::new(request(ColorMode::Gray, 300)).unwrap();
        assert_eq!(plan.y_divisor, 2);
        assert_eq!(plan.out_width, 600);
        assert_eq!(plan.out_height, 800);
        assert_eq!(plan.raw_lines(), 1600);

        let color = ScanPlan::new(request(ColorMode::Color, 300)).unwrap();
        assert_eq!(color.color_shift, 4);
        assert_eq!(color.raw_lines(), 1608);
        assert_eq!(color.raw_line_bytes(), 1800);
    }

    #[test]
    fn partial_cells_are_rounded_up() {
        let plan = ScanPlan::new(ScanRequest {
            height: 97,
            width: 130,
            ..request(ColorMode::Gray, 300)
        })
        .unwrap();
        assert_eq!((plan.out_width, plan.out_height), (65, 49));
        assert_eq!(plan.raw_lines(), 98);
        assert!(plan.raw_lines() >= 97);
    }

    #[test]
    fn rounding_stops_at_the_glass() {
        let bottom = ScanRequest {
            y: MAX_SCAN_LINES - 97,
            height: 97,
            x: SENSOR_PIXELS as u32 - 99,
            width: 99,
            ..request(ColorMode::Gray, 300)
        };
        let plan = ScanPlan::new(bottom).unwrap();
        assert_eq!((plan.out_width, plan.out_height), (49, 48));
        assert!(bottom.y + plan.out_height * plan.y_divisor <= MAX_SCAN_LINES);
        assert!(bottom.x + plan.out_width * plan.x_divisor <= SENSOR_PIXELS as u32);
    }

    #[test]
    fn color_shift_shrinks_with_resolution() {
        let shifts: Vec<u32> = [600, 300, 150, 75]
            .iter()
            .map(|&res| ScanPlan::new(request(ColorMode::Color, res)).unwrap().color_shift)
            .collect();
        assert_eq!(shifts, vec![0, 4, 2, 1]);
    }

    #[test]
    fn unsupported_resolution_names_axis() {
        let err = ScanPlan::new(ScanRequest {
            y_res: 200,
            ..request(ColorMode::Gray, 300)
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ScanError::UnsupportedResolution {
                axis: Axis::Y,
                dpi: 200
            }
        ));
    }

    #[test]
    fn geometry_bounds() {
        let too_small = ScanRequest {
            width: MIN_SPAN - 1,
            ..request(ColorMode::Gray, 300)
        };
        assert!(matches!(ScanPlan::new(too_small), Err(ScanError::InvalidGeometry(_))));

        let edge = ScanRequest {
            x: SENSOR_PIXELS as u32 - 64,
            width: 64,
            ..request(ColorMode::Gray, 300)
        };
        assert!(ScanPlan::new(edge).is_ok());

        let past_edge = ScanRequest { x: edge.x + 1, ..edge };
        assert!(ScanPlan::new(past_edge).is_err());

        let overflow = ScanRequest {
            y: u32::MAX,
            ..request(ColorMode::Gray, 300)
        };
        assert!(ScanPlan::new(overflow).is_err());
    }
}
