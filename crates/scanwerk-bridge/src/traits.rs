// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Downstream channel abstraction.
//
// The scanner sits behind a parallel-port-to-USB bridge. The host sees a
// handful of byte-wide bridge registers plus one bulk pipe in each direction;
// everything the driver says to the scanner is tunnelled through those.

use scanwerk_core::{Result, ScannerModel};

/// Byte-wide registers exposed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Parallel data latch; frame headers are written here byte by byte.
    Data,
    /// Scanner status lines as seen through the bridge.
    Status,
    /// Bridge control lines.
    Control,
    /// Transfer mode selection.
    Mode,
}

impl Register {
    /// Register index used on the wire.
    pub fn address(&self) -> u16 {
        match self {
            Self::Data => 0x00,
            Self::Status => 0x01,
            Self::Control => 0x02,
            Self::Mode => 0x03,
        }
    }
}

/// A byte-oriented register+bulk channel to one scanner.
///
/// Implementations report any failed or truncated operation as
/// `ScanError::Io`; they never retry on their own.
pub trait Channel {
    /// Write one byte to a bridge register.
    fn write_register(&mut self, register: Register, value: u8) -> Result<()>;

    /// Read one byte from a bridge register.
    fn read_register(&mut self, register: Register) -> Result<u8>;

    /// Announce the byte count of the next bulk write.
    fn prepare_bulk_write(&mut self, len: usize) -> Result<()>;

    /// Announce the byte count of the next bulk read.
    fn prepare_bulk_read(&mut self, len: usize) -> Result<()>;

    /// Push bytes through the bulk-out pipe.
    fn bulk_write(&mut self, data: &[u8]) -> Result<()>;

    /// Read from the bulk-in pipe. Returns the number of bytes received,
    /// which may be short; callers decide whether that is fatal.
    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Short description for log events (bus address, "simulated", ...).
    fn describe(&self) -> String;
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        (**self).write_register(register, value)
    }

    fn read_register(&mut self, register: Register) -> Result<u8> {
        (**self).read_register(register)
    }

    fn prepare_bulk_write(&mut self, len: usize) -> Result<()> {
        (**self).prepare_bulk_write(len)
    }

    fn prepare_bulk_read(&mut self, len: usize) -> Result<()> {
        (**self).prepare_bulk_read(len)
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        (**self).bulk_write(data)
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).bulk_read(buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A scanner found on the bus.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Name accepted by `open_channel` (e.g. "usb:003:007").
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: ScannerModel,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers register reads with the address; bulk reads fill with a constant.
    struct Recorder;

    impl Channel for Recorder {
        fn write_register(&mut self, _register: Register, _value: u8) -> Result<()> {
            Ok(())
        }

        fn read_register(&mut self, register: Register) -> Result<u8> {
            Ok(register.address() as u8)
        }

        fn prepare_bulk_write(&mut self, _len: usize) -> Result<()> {
            Ok(())
        }

        fn prepare_bulk_read(&mut self, _len: usize) -> Result<()> {
            Ok(())
        }

        fn bulk_write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
            buf.fill(0x5A);
            Ok(buf.len())
        }

        fn describe(&self) -> String {
            "recorder".into()
        }
    }

    #[test]
    fn register_addresses_are_distinct() {
        let all = [Register::Data, Register::Status, Register::Control, Register::Mode];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.address(), b.address());
            }
        }
    }

    #[test]
    fn boxed_channel_delegates() {
        let mut boxed: Box<dyn Channel> = Box::new(Recorder);
        boxed.write_register(Register::Mode, 0x0C).unwrap();
        assert_eq!(boxed.read_register(Register::Control).unwrap(), 0x02);
        boxed.prepare_bulk_read(4).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(boxed.bulk_read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0x5A; 4]);
        assert_eq!(boxed.describe(), "recorder");
    }
}
