// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// libusb-backed channel (via `rusb`).
//
// Register access goes through vendor control requests on endpoint 0; the
// bridge must be told the length of every bulk transfer before it happens.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext};
use tracing::{debug, info, warn};

use scanwerk_core::{Result, ScanError, ScannerModel};

use crate::traits::{Channel, DeviceInfo, Register};

/// Vendor requests understood by the bridge.
const REQ_READ_BYTE: u8 = 0x00;
const REQ_WRITE_BYTE: u8 = 0x01;
const REQ_PREPARE_BULK_READ: u8 = 0x02;
const REQ_PREPARE_BULK_WRITE: u8 = 0x03;

/// Timeout for control requests.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for bulk transfers; a full strip at 600 dpi color is ~1 MiB.
const BULK_TIMEOUT: Duration = Duration::from_secs(30);

fn usb_err(context: &str, err: rusb::Error) -> ScanError {
    ScanError::Io(format!("{context}: {err}"))
}

fn device_name<T: UsbContext>(device: &Device<T>) -> String {
    format!("usb:{:03}:{:03}", device.bus_number(), device.address())
}

/// Enumerate supported scanners on all buses.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let context = Context::new().map_err(|e| usb_err("libusb init", e))?;
    let devices = context.devices().map_err(|e| usb_err("device list", e))?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if let Some(model) = ScannerModel::from_usb_ids(desc.vendor_id(), desc.product_id()) {
            found.push(DeviceInfo {
                name: device_name(&device),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                model,
            });
        }
    }
    debug!(count = found.len(), "USB scan complete");
    Ok(found)
}

/// Open the scanner called `name` ("usb:BUS:ADDR"), or the first supported
/// scanner when `name` is empty or "auto".
pub fn open(name: &str, force_model: Option<ScannerModel>) -> Result<(Box<dyn Channel>, ScannerModel)> {
    let context = Context::new().map_err(|e| usb_err("libusb init", e))?;
    let devices = context.devices().map_err(|e| usb_err("device list", e))?;
    let wanted = if name.is_empty() || name == "auto" { None } else { Some(name) };

    for device in devices.iter() {
        if wanted.is_some_and(|w| w != device_name(&device)) {
            continue;
        }
        let desc = device
            .device_descriptor()
            .map_err(|e| usb_err("device descriptor", e))?;
        let detected = ScannerModel::from_usb_ids(desc.vendor_id(), desc.product_id());
        let model = match (force_model, detected) {
            (Some(forced), _) => forced,
            (None, Some(model)) => model,
            (None, None) if wanted.is_some() => {
                return Err(ScanError::UnknownModel {
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                });
            }
            (None, None) => continue,
        };

        let channel = UsbChannel::open(&device)?;
        info!(device = %channel.label, model = model.display_name(), "scanner opened");
        return Ok((Box::new(channel), model));
    }

    Err(ScanError::DeviceNotFound(name.to_string()))
}

/// A claimed bridge interface with its two bulk endpoints.
pub struct UsbChannel {
    handle: DeviceHandle<Context>,
    interface: u8,
    bulk_in: u8,
    bulk_out: u8,
    label: String,
}

impl UsbChannel {
    fn open(device: &Device<Context>) -> Result<Self> {
        let config = device
            .active_config_descriptor()
            .map_err(|e| usb_err("config descriptor", e))?;

        let mut endpoints = None;
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                let mut bulk_in = None;
                let mut bulk_out = None;
                for ep in alt.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => bulk_in = Some(ep.address()),
                        Direction::Out => bulk_out = Some(ep.address()),
                    }
                }
                if let (Some(i), Some(o)) = (bulk_in, bulk_out) {
                    endpoints = Some((alt.interface_number(), i, o));
                }
            }
        }
        let (interface, bulk_in, bulk_out) = endpoints
            .ok_or_else(|| ScanError::Io("bridge exposes no bulk endpoint pair".into()))?;

        let mut handle = device.open().map_err(|e| usb_err("open", e))?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(error = %e, "kernel driver auto-detach unsupported");
        }
        handle
            .claim_interface(interface)
            .map_err(|e| usb_err("claim interface", e))?;

        Ok(Self {
            handle,
            interface,
            bulk_in,
            bulk_out,
            label: device_name(device),
        })
    }

    fn vendor_out(&self, request: u8, value: u16, index: u16) -> Result<()> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, index, &[], CONTROL_TIMEOUT)
            .map_err(|e| usb_err("vendor request", e))?;
        Ok(())
    }

    fn prepare_bulk(&self, request: u8, len: usize) -> Result<()> {
        let value = (len & 0xFFFF) as u16;
        let index = ((len >> 16) & 0xFFFF) as u16;
        self.vendor_out(request, value, index)
    }
}

impl Channel for UsbChannel {
    fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        self.vendor_out(REQ_WRITE_BYTE, value as u16, register.address())
    }

    fn read_register(&mut self, register: Register) -> Result<u8> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let mut byte = [0u8; 1];
        let n = self
            .handle
            .read_control(
                request_type,
                REQ_READ_BYTE,
                0,
                register.address(),
                &mut byte,
                CONTROL_TIMEOUT,
            )
            .map_err(|e| usb_err("register read", e))?;
        if n != 1 {
            return Err(ScanError::Io(format!("register {register:?} read returned {n} bytes")));
        }
        Ok(byte[0])
    }

    fn prepare_bulk_write(&mut self, len: usize) -> Result<()> {
        self.prepare_bulk(REQ_PREPARE_BULK_WRITE, len)
    }

    fn prepare_bulk_read(&mut self, len: usize) -> Result<()> {
        self.prepare_bulk(REQ_PREPARE_BULK_READ, len)
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = self
                .handle
                .write_bulk(self.bulk_out, &data[sent..], BULK_TIMEOUT)
                .map_err(|e| usb_err("bulk write", e))?;
            if n == 0 {
                return Err(ScanError::Io(format!(
                    "bulk write stalled at byte {sent} of {}",
                    data.len()
                )));
            }
            sent += n;
        }
        Ok(())
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut received = 0;
        while received < buf.len() {
            match self.handle.read_bulk(self.bulk_in, &mut buf[received..], BULK_TIMEOUT) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(rusb::Error::Timeout) => {
                    warn!(received, wanted = buf.len(), "bulk read timed out");
                    break;
                }
                Err(e) => return Err(usb_err("bulk read", e)),
            }
        }
        Ok(received)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl Drop for UsbChannel {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!(error = %e, "release interface failed");
        }
    }
}
