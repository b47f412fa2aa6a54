// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end scans against the simulated scanner.

use scanwerk_core::{ColorMode, ScanError, ScanRequest, ScannerConfig, ScannerModel};
use scanwerk_driver::framer::{MAX_PAYLOAD, Opcode};
use scanwerk_driver::sim::{SimulatedScanner, pixel_value};
use scanwerk_driver::Session;

fn config(lines_per_transfer: usize) -> ScannerConfig {
    ScannerConfig {
        poll_retries: 4,
        poll_interval_ms: 0,
        lamp_warmup_ms: 0,
        calibration_lines: 2,
        lines_per_transfer,
        ..ScannerConfig::default()
    }
}

fn open(sim: SimulatedScanner, lines_per_transfer: usize) -> Session<SimulatedScanner> {
    let model = sim.model();
    Session::open(sim, model, config(lines_per_transfer)).unwrap()
}

fn request(color: ColorMode, res: u16) -> ScanRequest {
    ScanRequest {
        color,
        x: 40,
        y: 80,
        width: 128,
        height: 96,
        x_res: res,
        y_res: res,
    }
}

fn read_all(session: &mut Session<SimulatedScanner>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut line = Vec::new();
    while session.read_line(&mut line).unwrap() {
        lines.push(line.clone());
    }
    lines
}

/// Bytes requested through pixel reads after the scan window went out.
fn pixel_bytes_after_window(sim: &SimulatedScanner) -> usize {
    let window_at = sim
        .frames()
        .iter()
        .rposition(|f| f.opcode == Opcode::Window)
        .unwrap();
    sim.frames()[window_at..]
        .iter()
        .filter(|f| f.opcode == Opcode::Pixels && !f.write)
        .map(|f| f.declared_len)
        .sum()
}

#[test]
fn color_scan_at_half_resolution_is_descrambled() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 16);
    s.set_parameters(request(ColorMode::Color, 300)).unwrap();
    s.start().unwrap();

    let lines = read_all(&mut s);
    assert_eq!(lines.len(), 48);
    for (l, line) in lines.iter().enumerate() {
        assert_eq!(line.len(), 64 * 3);
        let base = l * 2;
        for x in 0..64 {
            assert_eq!(line[3 * x], pixel_value(base + 8, 0, x), "red {l},{x}");
            assert_eq!(line[3 * x + 1], pixel_value(base + 4, 1, x), "green {l},{x}");
            assert_eq!(line[3 * x + 2], pixel_value(base, 2, x), "blue {l},{x}");
        }
    }

    // Every raw line, margin included, went through the transport.
    assert_eq!(pixel_bytes_after_window(s.channel()), (96 + 8) * 64 * 3);
    assert_eq!(s.read_next_pixel().unwrap(), None);
    let progress = s.progress();
    assert_eq!((progress.lines_done, progress.lines_total), (48, 48));
    // Lead-in position 292, window skip 21, 104 raw lines.
    assert_eq!(s.head_position(), 292 + 21 + 104);
    assert_eq!(s.channel().protocol_errors(), 0);
}

#[test]
fn native_color_scan_reads_planes_from_one_line() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra2000U), 32);
    s.set_parameters(ScanRequest {
        height: 64,
        width: 64,
        ..request(ColorMode::Color, 600)
    })
    .unwrap();
    s.start().unwrap();

    let lines = read_all(&mut s);
    assert_eq!(lines.len(), 64);
    for (l, line) in lines.iter().enumerate() {
        for x in 0..64 {
            assert_eq!(&line[3 * x..3 * x + 3], &[
                pixel_value(l, 0, x),
                pixel_value(l, 1, x),
                pixel_value(l, 2, x)
            ]);
        }
    }
    assert_eq!(pixel_bytes_after_window(s.channel()), 64 * 64 * 3);
}

#[test]
fn gray_half_resolution_yields_half_the_raw_lines() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 10);
    s.set_parameters(request(ColorMode::Gray, 300)).unwrap();
    s.start().unwrap();

    let raw_lines = s.channel().window().unwrap().lines as usize;
    let lines = read_all(&mut s);
    assert_eq!(raw_lines, 96);
    assert_eq!(lines.len() * 2, raw_lines);
    for (l, line) in lines.iter().enumerate() {
        assert_eq!(line.len(), 64);
        for (x, &v) in line.iter().enumerate() {
            assert_eq!(v, pixel_value(2 * l, 0, x));
        }
    }
    assert_eq!(pixel_bytes_after_window(s.channel()), 96 * 64);
}

#[test]
fn new_parameters_wait_for_the_next_start() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 16);
    s.set_parameters(request(ColorMode::Color, 600)).unwrap();
    s.start().unwrap();

    let mut line = Vec::new();
    assert!(s.read_line(&mut line).unwrap());
    assert_eq!(line.len(), 128 * 3);

    s.set_parameters(ScanRequest {
        width: 256,
        ..request(ColorMode::Gray, 600)
    })
    .unwrap();
    assert!(s.read_line(&mut line).unwrap());
    assert_eq!(line.len(), 128 * 3);
    for x in 0..128 {
        assert_eq!(&line[3 * x..3 * x + 3], &[
            pixel_value(1, 0, x),
            pixel_value(1, 1, x),
            pixel_value(1, 2, x)
        ]);
    }
    let progress = s.progress();
    assert_eq!((progress.lines_done, progress.lines_total), (2, 96));
    assert_eq!(read_all(&mut s).len(), 94);

    // The stored request applies from here on.
    s.start().unwrap();
    let lines = read_all(&mut s);
    assert_eq!(lines.len(), 96);
    assert!(lines.iter().all(|l| l.len() == 256));
}

#[test]
fn oversized_transfer_setting_stays_within_one_frame() {
    let sim = SimulatedScanner::new(ScannerModel::Astra1220U);
    let mut s = Session::open(sim, ScannerModel::Astra1220U, config(1_000_000)).unwrap();
    s.set_parameters(ScanRequest {
        color: ColorMode::Color,
        x: 0,
        y: 0,
        width: 5100,
        height: 7000,
        x_res: 300,
        y_res: 300,
    })
    .unwrap();
    s.start().unwrap();

    assert!(s.read_next_pixel().unwrap().is_some());
    assert!(!s.is_failed());
    let largest = s
        .channel()
        .frames()
        .iter()
        .filter(|f| f.opcode == Opcode::Pixels && !f.write)
        .map(|f| f.declared_len)
        .max()
        .unwrap();
    assert!(largest <= MAX_PAYLOAD);
    assert_eq!(largest % (2550 * 3), 0);
}

#[test]
fn invalid_requests_never_reach_the_device() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 16);
    let frames = s.channel().frames().len();

    let bad_res = s.set_parameters(ScanRequest {
        x_res: 200,
        ..request(ColorMode::Color, 300)
    });
    assert!(matches!(bad_res, Err(ScanError::UnsupportedResolution { dpi: 200, .. })));

    let too_tall = s.set_parameters(ScanRequest {
        y: 7000,
        ..request(ColorMode::Color, 300)
    });
    assert!(matches!(too_tall, Err(ScanError::InvalidGeometry(_))));

    assert!(matches!(s.start(), Err(ScanError::NotConfigured)));
    assert_eq!(s.channel().frames().len(), frames);
    assert!(!s.is_failed());
}

#[test]
fn busy_timeout_poisons_the_session() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 8);
    s.set_parameters(request(ColorMode::Gray, 300)).unwrap();
    s.start().unwrap();
    assert!(s.read_next_pixel().unwrap().is_some());

    s.channel_mut().set_busy_forever(true);
    let err = loop {
        match s.read_next_pixel() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("scan finished despite a hung device"),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, ScanError::Io(ref msg) if msg.contains("busy")));
    assert!(s.is_failed());

    s.channel_mut().set_busy_forever(false);
    assert!(matches!(s.read_next_pixel(), Err(ScanError::SessionFailed)));
    assert!(matches!(s.start(), Err(ScanError::SessionFailed)));
    assert!(matches!(
        s.set_parameters(request(ColorMode::Gray, 300)),
        Err(ScanError::SessionFailed)
    ));

    // A failed session closes without touching the device.
    let frames = s.channel().frames().len();
    let sim = s.close().unwrap();
    assert_eq!(sim.frames().len(), frames);
}

#[test]
fn short_strip_read_poisons_the_session() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra2000U), 8);
    s.set_parameters(request(ColorMode::Color, 150)).unwrap();
    s.start().unwrap();
    s.channel_mut().truncate_next_read();
    let err = s.read_next_pixel().unwrap_err();
    assert!(matches!(err, ScanError::Io(ref msg) if msg.contains("short")));
    assert!(matches!(s.read_next_pixel(), Err(ScanError::SessionFailed)));
}

#[test]
fn cancel_stops_before_the_next_strip() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 4);
    s.set_parameters(request(ColorMode::Gray, 600)).unwrap();
    s.start().unwrap();

    let handle = s.cancel_handle();
    let mut produced = 0;
    for _ in 0..64 * 3 {
        s.read_next_pixel().unwrap().unwrap();
        produced += 1;
    }
    handle.cancel();
    let err = loop {
        match s.read_next_pixel() {
            Ok(Some(_)) => produced += 1,
            Ok(None) => panic!("scan finished despite cancellation"),
            Err(err) => break err,
        }
    };
    assert!(matches!(err, ScanError::Cancelled));
    // At most the strip already in the buffer was drained.
    assert!(produced <= 128 * 4);
    assert!(!s.is_failed());
    assert_eq!(s.head_position(), 0);
    assert!(s.channel().controls().last().unwrap().restore);
    assert!(matches!(s.read_next_pixel(), Err(ScanError::NotStarted)));

    // The session is still usable.
    s.start().unwrap();
    assert_eq!(read_all(&mut s).len(), 96);
}

#[test]
fn dead_pixels_are_clamped_and_reported() {
    let sim = SimulatedScanner::new(ScannerModel::Astra2000U).with_dead_pixels(vec![3, 4, 5100 - 1]);
    let mut s = open(sim, 16);
    s.set_parameters(request(ColorMode::Gray, 150)).unwrap();
    s.start().unwrap();

    let report = s.calibration_report().unwrap().clone();
    assert_eq!(report.zero_point, 196 + 37);
    assert_eq!(report.edge_columns, 290);
    assert_eq!(report.clamped_gains, 3 * 3);
}

#[test]
fn close_parks_head_and_switches_lamp_off() {
    let mut s = open(SimulatedScanner::new(ScannerModel::Astra1220U), 16);
    s.set_parameters(request(ColorMode::Gray, 300)).unwrap();
    s.start().unwrap();
    read_all(&mut s);
    let sim = s.close().unwrap();
    assert!(!sim.lamp_on());
    assert!(sim.controls().iter().rev().any(|c| c.restore && !c.lamp_on));
}

#[cfg(not(feature = "usb"))]
#[test]
fn opening_by_name_needs_usb_support() {
    let err = scanwerk_driver::open("auto", ScannerConfig::default()).err().unwrap();
    assert!(matches!(err, ScanError::PlatformUnavailable));
}
