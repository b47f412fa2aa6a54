// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan session: one open device, from handshake to close.
//
// A session sequences initialise → locate zero and calibrate → position the
// head → upload calibration and window → stream strips through the engine.
// Any transport failure poisons it; the caller must close and reopen.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use scanwerk_bridge::Channel;
use scanwerk_core::{
    CalibrationReport, ColorMode, ErrorClass, Result, Rgb, ScanError, ScanProgress, ScanRequest,
    ScannerConfig, ScannerModel, SessionId, SpeedMode,
};
use tracing::{debug, error, info, instrument, warn};

use crate::calibration::{self, CalibrationTable, ColorChannel, GAMMA_LEN};
use crate::codec::{Codec, WindowParams};
use crate::framer::{MAX_PAYLOAD, Opcode, PollConfig, Transport};
use crate::head::HeadController;
use crate::plan::ScanPlan;
use crate::strip::{PixelStatus, StripEngine, StripLayout};

/// Ticks between the parked position and the first scanned line, so the
/// motor is at speed when acquisition begins.
pub const LEAD_IN_TICKS: i32 = 24;

/// Cloneable handle that requests cancellation from another thread.
///
/// Cancellation is cooperative: it takes effect before the next strip
/// transfer is issued, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Session<C: Channel> {
    id: SessionId,
    model: ScannerModel,
    config: ScannerConfig,
    transport: Transport<C>,
    codec: Codec,
    head: HeadController,
    calibration: CalibrationTable,
    plan: Option<ScanPlan>,
    engine: Option<StripEngine>,
    report: Option<CalibrationReport>,
    /// Head travel of the running scan, booked once the scan completes.
    scan_travel: u32,
    lamp_on: bool,
    failed: bool,
    cancel: CancelHandle,
}

impl<C: Channel> Session<C> {
    /// Handshake with the bridge, switch the lamp on and let it warm up.
    #[instrument(skip(channel, config))]
    pub fn open(channel: C, model: ScannerModel, config: ScannerConfig) -> Result<Self> {
        let mut transport = Transport::new(channel, PollConfig::from(&config));
        transport.handshake()?;
        let codec = Codec::new(model);
        transport.execute(&codec.lamp(true))?;
        if !config.lamp_warmup().is_zero() {
            debug!(warmup_ms = config.lamp_warmup_ms, "waiting for lamp");
            std::thread::sleep(config.lamp_warmup());
        }

        let id = SessionId::new();
        info!(session = %id, device = %transport.channel().describe(), "session opened");
        Ok(Self {
            id,
            model,
            config,
            transport,
            codec,
            head: HeadController::new(),
            calibration: CalibrationTable::new(),
            plan: None,
            engine: None,
            report: None,
            scan_travel: 0,
            lamp_on: true,
            failed: false,
            cancel: CancelHandle::default(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model(&self) -> ScannerModel {
        self.model
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn plan(&self) -> Option<&ScanPlan> {
        self.plan.as_ref()
    }

    pub fn head_position(&self) -> i32 {
        self.head.position()
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Result of the last zero-point search and gain calibration.
    pub fn calibration_report(&self) -> Option<&CalibrationReport> {
        self.report.as_ref()
    }

    /// Status bytes of the last exchange, for diagnostics.
    pub fn last_status(&self) -> [u8; 2] {
        self.transport.last_status()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn channel(&self) -> &C {
        self.transport.channel()
    }

    pub fn channel_mut(&mut self) -> &mut C {
        self.transport.channel_mut()
    }

    /// Use a measured gamma curve from the next `start` on.
    pub fn set_gamma(&mut self, channel: ColorChannel, curve: &[u8; GAMMA_LEN]) {
        self.calibration.set_gamma(channel, curve);
    }

    fn guard(&self) -> Result<()> {
        if self.failed {
            Err(ScanError::SessionFailed)
        } else {
            Ok(())
        }
    }

    /// Poison the session on failures that leave the device out of step.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.class() == ErrorClass::Reopen && !self.failed {
                error!(session = %self.id, error = %err, "session poisoned");
                self.failed = true;
                self.engine = None;
            }
        }
        result
    }

    /// Validate and store scan parameters; nothing is sent to the device.
    /// They take effect at the next `start`.
    pub fn set_parameters(&mut self, request: ScanRequest) -> Result<()> {
        self.guard()?;
        let plan = ScanPlan::new(request)?;
        debug!(
            out_width = plan.out_width,
            out_height = plan.out_height,
            color_shift = plan.color_shift,
            "scan parameters accepted"
        );
        self.plan = Some(plan);
        Ok(())
    }

    /// Calibrate, position the head and arm acquisition.
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn start(&mut self) -> Result<()> {
        self.guard()?;
        let plan = self.plan.ok_or(ScanError::NotConfigured)?;
        self.cancel.reset();
        let result = self.run_start(&plan);
        self.track(result)
    }

    fn run_start(&mut self, plan: &ScanPlan) -> Result<()> {
        self.engine = None;
        self.scan_travel = 0;
        self.transport.handshake()?;

        let zero = calibration::locate_zero(&mut self.transport, &self.codec, &mut self.head)?;
        let clamped = calibration::calibrate_gains(
            &mut self.transport,
            &self.codec,
            &mut self.head,
            &mut self.calibration,
            zero.position,
            self.config.calibration_lines,
        )?;
        self.calibration
            .set_divisors(plan.x_divisor as u8, plan.y_divisor as u8);

        let origin = zero.position + plan.request.y as i32;
        self.head.move_to(
            &mut self.transport,
            &self.codec,
            origin - LEAD_IN_TICKS,
            SpeedMode::Fast,
        )?;
        let y_skip = u32::try_from(origin - self.head.position()).map_err(|_| {
            ScanError::Io(format!(
                "head overshot the scan origin: at {}, origin {origin}",
                self.head.position()
            ))
        })?;

        let window = WindowParams {
            x_offset: plan.request.x,
            width: plan.out_width,
            x_divisor: plan.x_divisor,
            y_skip,
            lines: plan.raw_lines(),
            color: plan.color(),
        };
        self.transport
            .execute(&self.codec.upload_calibration(self.calibration.as_bytes()))?;
        self.transport.execute(&self.codec.scan_window(&window)?)?;

        let layout = StripLayout::from(plan);
        let per_transfer = transfer_lines(self.config.lines_per_transfer, &layout);
        self.engine = Some(StripEngine::new(layout, per_transfer)?);
        self.scan_travel = y_skip + plan.raw_lines();

        self.report = Some(CalibrationReport {
            zero_point: zero.position,
            edge_columns: zero.edge.columns,
            clamped_gains: clamped,
            measured_at: Utc::now(),
        });
        info!(
            zero = zero.position,
            y_skip,
            raw_lines = plan.raw_lines(),
            "acquisition armed"
        );
        Ok(())
    }

    /// Next reconstructed pixel, or `None` once the scan is complete.
    pub fn read_next_pixel(&mut self) -> Result<Option<Rgb>> {
        self.guard()?;
        let result = self.pull_pixel();
        self.track(result)
    }

    fn pull_pixel(&mut self) -> Result<Option<Rgb>> {
        loop {
            let engine = self.engine.as_mut().ok_or(ScanError::NotStarted)?;
            match engine.next_pixel() {
                PixelStatus::Pixel(pixel) => return Ok(Some(pixel)),
                PixelStatus::Done => {
                    if self.scan_travel > 0 {
                        self.head.account_travel(self.scan_travel);
                        self.scan_travel = 0;
                        info!(session = %self.id, "scan complete");
                    }
                    return Ok(None);
                }
                PixelStatus::NeedData => {
                    if self.cancel.is_cancelled() {
                        return self.abort_scan();
                    }
                    let lines = engine.begin_fill()?;
                    self.transport.receive_into(Opcode::Pixels, engine.fill_slot())?;
                    engine.commit_fill()?;
                    debug!(lines, received = engine.rows_received(), "strip transferred");
                }
            }
        }
    }

    fn abort_scan(&mut self) -> Result<Option<Rgb>> {
        self.engine = None;
        self.scan_travel = 0;
        info!(session = %self.id, "scan cancelled; returning head");
        self.head
            .restore(&mut self.transport, &self.codec, self.lamp_on)?;
        Err(ScanError::Cancelled)
    }

    /// Read one output line of interleaved samples (RGB, or one byte per
    /// pixel for gray) into `buf`. Returns `false` at end of data.
    ///
    /// Line shape follows the running scan, not parameters set since `start`.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        self.guard()?;
        let layout = match &self.engine {
            Some(engine) => *engine.layout(),
            None if self.plan.is_none() => return Err(ScanError::NotConfigured),
            None => return Err(ScanError::NotStarted),
        };
        buf.clear();
        for _ in 0..layout.width {
            let Some(pixel) = self.read_next_pixel()? else {
                return Ok(false);
            };
            match layout.color {
                ColorMode::Color => buf.extend_from_slice(&[pixel.r, pixel.g, pixel.b]),
                ColorMode::Gray => buf.push(pixel.r),
            }
        }
        Ok(true)
    }

    pub fn progress(&self) -> ScanProgress {
        match &self.engine {
            Some(engine) => ScanProgress {
                lines_done: engine.lines_done() as u32,
                lines_total: engine.layout().out_lines as u32,
            },
            None => ScanProgress {
                lines_done: 0,
                lines_total: self.plan.map_or(0, |p| p.out_height),
            },
        }
    }

    /// Request cancellation of the running scan.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Park the head, switch the lamp off and hand back the channel.
    pub fn close(mut self) -> Result<C> {
        if self.failed {
            warn!(session = %self.id, "closing a failed session without parking");
        } else if self.config.park_on_close {
            self.engine = None;
            self.head
                .restore(&mut self.transport, &self.codec, false)?;
            self.transport.execute(&self.codec.lamp(false))?;
            self.lamp_on = false;
        }
        info!(session = %self.id, exchanges = self.transport.exchanges(), "session closed");
        Ok(self.transport.into_channel())
    }
}

/// Raw lines per strip transfer. The first transfer also carries the color
/// margin, and the whole of it must fit one frame.
fn transfer_lines(configured: usize, layout: &StripLayout) -> usize {
    let frame_lines = MAX_PAYLOAD / layout.line_bytes().max(1);
    configured.clamp(1, frame_lines.saturating_sub(layout.margin()).max(1))
}
