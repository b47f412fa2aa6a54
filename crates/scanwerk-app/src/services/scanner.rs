// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan service — runs one scan on an open session and streams the
// interleaved output lines to a writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use scanwerk_bridge::Channel;
use scanwerk_core::{Result, ScanRequest, ScannerConfig};
use scanwerk_driver::Session;
use tracing::{debug, info};

use super::data_dir;

/// What a finished scan produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub lines: usize,
    pub bytes_per_line: usize,
    pub zero_point: i32,
    pub clamped_gains: usize,
}

/// Load the config from `path`, or from the data dir when none is given.
/// A missing default file means defaults; nothing is created on disk.
pub fn load_config(path: Option<&Path>) -> Result<ScannerConfig> {
    match path {
        Some(path) => ScannerConfig::load(path),
        None => match data_dir::config_path() {
            Some(path) => {
                debug!(path = %path.display(), "loading config");
                ScannerConfig::load_or_default(path)
            }
            None => {
                debug!("no data directory; using default config");
                Ok(ScannerConfig::default())
            }
        },
    }
}

/// Scan `request` and write every output line to `out`.
pub fn scan_to<C: Channel, W: Write>(
    session: &mut Session<C>,
    request: ScanRequest,
    out: &mut W,
) -> Result<ScanSummary> {
    session.set_parameters(request)?;
    session.start()?;

    let mut line = Vec::new();
    let mut lines = 0;
    let mut bytes_per_line = 0;
    let mut reported = 0;
    while session.read_line(&mut line)? {
        out.write_all(&line)?;
        lines += 1;
        bytes_per_line = line.len();
        let percent = (session.progress().fraction() * 100.0) as u32;
        if percent >= reported + 10 {
            reported = percent - percent % 10;
            info!(percent = reported, "scanning");
        }
    }
    out.flush()?;

    let (zero_point, clamped_gains) = session
        .calibration_report()
        .map_or((0, 0), |r| (r.zero_point, r.clamped_gains));
    Ok(ScanSummary {
        lines,
        bytes_per_line,
        zero_point,
        clamped_gains,
    })
}

/// Scan into a raw sample file at `path`.
pub fn scan_to_file<C: Channel>(
    session: &mut Session<C>,
    request: ScanRequest,
    path: &Path,
) -> Result<ScanSummary> {
    let mut out = BufWriter::new(File::create(path)?);
    let summary = scan_to(session, request, &mut out)?;
    info!(path = %path.display(), lines = summary.lines, "raw samples written");
    Ok(summary)
}
