// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — command-line scanning front end
//
// Entry point. Initialises logging, loads the driver config, opens a scanner
// (or the simulated one) and writes one scan as raw interleaved samples.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use scanwerk_core::human_errors::humanize_error;
use scanwerk_core::{
    ColorMode, MAX_SCAN_LINES, Result, SENSOR_PIXELS, ScanRequest, ScannerModel,
};
use scanwerk_driver::{Session, SimulatedScanner};

use services::scanner::{self, ScanSummary};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    /// Astra 1220U
    Astra1220u,
    /// Astra 2000U / 2100U
    Astra2000u,
}

impl From<ModelArg> for ScannerModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Astra1220u => ScannerModel::Astra1220U,
            ModelArg::Astra2000u => ScannerModel::Astra2000U,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scan from a bridged USB CCD flatbed scanner")]
struct Args {
    /// Output file for raw interleaved samples (RGB or gray, one line after another)
    #[arg(required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Device name ("usb:BUS:ADDR") or "auto"
    #[arg(short, long, default_value = "auto")]
    device: String,

    /// Use the built-in simulated scanner instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Assume this model instead of identifying it by USB id
    #[arg(long, value_enum)]
    model: Option<ModelArg>,

    /// List attached scanners and exit
    #[arg(long)]
    list: bool,

    /// Scan in color (gray otherwise)
    #[arg(long)]
    color: bool,

    /// Resolution in dpi, both axes (75, 150, 300 or 600)
    #[arg(short, long, default_value_t = 300)]
    res: u16,

    /// Left edge in 1/600 inch
    #[arg(long, default_value_t = 0)]
    x: u32,

    /// Top edge in 1/600 inch
    #[arg(long, default_value_t = 0)]
    y: u32,

    /// Width in 1/600 inch (default: to the right edge of the glass)
    #[arg(long)]
    width: Option<u32>,

    /// Height in 1/600 inch (default: to the bottom of the glass)
    #[arg(long)]
    height: Option<u32>,

    /// Config file (default: $XDG_DATA_HOME/scanwerk/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn request(&self) -> ScanRequest {
        ScanRequest {
            color: if self.color {
                ColorMode::Color
            } else {
                ColorMode::Gray
            },
            x: self.x,
            y: self.y,
            width: self
                .width
                .unwrap_or_else(|| (SENSOR_PIXELS as u32).saturating_sub(self.x)),
            height: self
                .height
                .unwrap_or_else(|| MAX_SCAN_LINES.saturating_sub(self.y)),
            x_res: self.res,
            y_res: self.res,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "Scanwerk starting");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let human = humanize_error(&err);
            tracing::error!(error = %err, class = ?err.class(), "scan failed");
            eprintln!("{}\n  {}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if args.list {
        for device in scanwerk_bridge::list_devices()? {
            println!(
                "{}  {:04x}:{:04x}  {}",
                device.name,
                device.vendor_id,
                device.product_id,
                device.model.display_name()
            );
        }
        return Ok(());
    }

    let Some(output) = args.output.as_deref() else {
        return Ok(());
    };
    let mut config = scanner::load_config(args.config.as_deref())?;
    let request = args.request();

    let summary = if args.simulate {
        let model = args.model.map_or(ScannerModel::Astra1220U, ScannerModel::from);
        let mut session = Session::open(SimulatedScanner::new(model), model, config)?;
        let summary = scanner::scan_to_file(&mut session, request, output)?;
        session.close()?;
        summary
    } else {
        if let Some(model) = args.model {
            config.force_model = Some(model.into());
        }
        let mut session = scanwerk_driver::open(&args.device, config)?;
        let summary = scanner::scan_to_file(&mut session, request, output)?;
        session.close()?;
        summary
    };

    report(&summary, output);
    Ok(())
}

fn report(summary: &ScanSummary, output: &std::path::Path) {
    tracing::info!(zero_point = summary.zero_point, "scan finished");
    println!(
        "{} lines of {} bytes written to {}",
        summary.lines,
        summary.bytes_per_line,
        output.display()
    );
    if summary.clamped_gains > 0 {
        println!(
            "note: {} calibration gains were out of range and clamped",
            summary.clamped_gains
        );
    }
}
