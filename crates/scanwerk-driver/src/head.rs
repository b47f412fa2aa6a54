// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Head-position controller.
//
// Tracks the carriage in 1/600 inch ticks. The device moves in whole motor
// steps, so a forward move leaves the head on the next multiple of 4 ticks;
// reverse moves land exactly. The tracked position follows the same rule, and
// the scan window's start skip is computed from it.

use scanwerk_bridge::Channel;
use scanwerk_core::{Direction, Result, SpeedMode};
use tracing::debug;

use crate::codec::{Codec, MoveParams};
use crate::framer::Transport;

/// Largest distance one motor command can carry.
pub const MAX_STEP: u32 = 0xFFFF;

/// Absolute head position bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct HeadController {
    position: i32,
}

impl HeadController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked position in ticks from the home stop.
    pub fn position(&self) -> i32 {
        self.position
    }

    /// Move by a signed distance. Zero is a no-op that sends nothing.
    pub fn move_by<C: Channel>(
        &mut self,
        transport: &mut Transport<C>,
        codec: &Codec,
        distance: i32,
        speed: SpeedMode,
    ) -> Result<()> {
        if distance == 0 {
            return Ok(());
        }
        let direction = if distance > 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        let mut remaining = distance.unsigned_abs();
        while remaining > 0 {
            let step = remaining.min(MAX_STEP);
            transport.execute(&codec.move_head(MoveParams {
                distance: step as u16,
                direction,
                speed,
            }))?;
            transport.execute(&codec.status_drain())?;
            self.position = advance(self.position, step, direction);
            remaining -= step;
        }
        debug!(distance, position = self.position, ?speed, "head moved");
        Ok(())
    }

    /// Move to an absolute tick position.
    pub fn move_to<C: Channel>(
        &mut self,
        transport: &mut Transport<C>,
        codec: &Codec,
        target: i32,
        speed: SpeedMode,
    ) -> Result<()> {
        self.move_by(transport, codec, target - self.position, speed)
    }

    /// Drive the carriage to its home stop.
    pub fn restore<C: Channel>(
        &mut self,
        transport: &mut Transport<C>,
        codec: &Codec,
        lamp_on: bool,
    ) -> Result<()> {
        transport.execute(&codec.restore_head(lamp_on))?;
        self.position = 0;
        transport.execute(&codec.status_drain())?;
        debug!("head restored to home");
        Ok(())
    }

    /// Account for travel the device performed on its own during a scan.
    pub fn account_travel(&mut self, ticks: u32) {
        self.position = self.position.saturating_add_unsigned(ticks);
    }
}

fn advance(position: i32, step: u32, direction: Direction) -> i32 {
    match direction {
        Direction::Forward => (position + step as i32 + 3) & !3,
        Direction::Reverse => position - step as i32,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scanwerk_core::ScannerModel;

    use super::*;
    use crate::framer::{Opcode, PollConfig};
    use crate::sim::SimulatedScanner;

    fn rig() -> (Transport<SimulatedScanner>, Codec) {
        let model = ScannerModel::Astra1220U;
        let transport = Transport::new(
            SimulatedScanner::new(model),
            PollConfig {
                retries: 3,
                interval: Duration::ZERO,
            },
        );
        (transport, Codec::new(model))
    }

    #[test]
    fn zero_move_sends_nothing() {
        let (mut t, codec) = rig();
        let mut head = HeadController::new();
        head.move_by(&mut t, &codec, 0, SpeedMode::Fast).unwrap();
        assert_eq!(head.position(), 0);
        assert!(t.channel().frames().is_empty());
        assert_eq!(t.exchanges(), 0);
    }

    #[test]
    fn forward_moves_round_up_to_multiple_of_four() {
        for start in [0, 1, 2, 3, 113, -7] {
            for distance in [1, 2, 3, 4, 5, 99, 196] {
                let pos = advance(start, distance, Direction::Forward);
                assert_eq!(pos % 4, 0, "start {start} distance {distance}");
                let exact = start + distance as i32;
                assert!(pos >= exact && pos - exact < 4);
            }
        }
    }

    #[test]
    fn reverse_moves_are_exact() {
        let (mut t, codec) = rig();
        let mut head = HeadController::new();
        head.move_by(&mut t, &codec, 9, SpeedMode::Fast).unwrap();
        assert_eq!(head.position(), 12);
        head.move_by(&mut t, &codec, -5, SpeedMode::Slow).unwrap();
        assert_eq!(head.position(), 7);

        let moves = t.channel().moves();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[1].direction, Direction::Reverse);
        assert_eq!(moves[1].distance, 5);
        assert_eq!(moves[1].speed, SpeedMode::Slow);
    }

    #[test]
    fn long_moves_are_split_and_drained() {
        let (mut t, codec) = rig();
        let mut head = HeadController::new();
        head.move_by(&mut t, &codec, 0x1_0005, SpeedMode::Fast).unwrap();

        let distances: Vec<u16> = t.channel().moves().iter().map(|m| m.distance).collect();
        assert_eq!(distances, vec![0xFFFF, 6]);
        let drains = t.channel().frames_with(Opcode::Status).count();
        assert_eq!(drains, 2);
        assert_eq!(head.position() % 4, 0);
        assert!(head.position() >= 0x1_0005);
    }

    #[test]
    fn move_to_and_restore() {
        let (mut t, codec) = rig();
        let mut head = HeadController::new();
        head.move_to(&mut t, &codec, 196, SpeedMode::Slow).unwrap();
        assert_eq!(head.position(), 196);
        head.move_to(&mut t, &codec, 113, SpeedMode::Slow).unwrap();
        assert_eq!(head.position(), 113);

        head.restore(&mut t, &codec, true).unwrap();
        assert_eq!(head.position(), 0);
        let last = *t.channel().controls().last().unwrap();
        assert!(last.restore && last.lamp_on);
    }

    #[test]
    fn scan_travel_is_added_without_rounding() {
        let mut head = HeadController::new();
        head.account_travel(101);
        assert_eq!(head.position(), 101);
    }
}
