// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport contract for address/control-framed SPI devices
//!
//! Devices like the WIZnet W5500 expect every transaction to start with a
//! fixed header: a 16-bit address phase followed by an 8-bit control phase,
//! and only then the data phase. This crate describes that shape as the
//! [`SpiTransport`] trait, so a driver can be handed either the stock
//! [`HalSpi`] (any `embedded-hal` blocking SPI bus plus a chip-select pin) or
//! something the board brings along, e.g. a DMA engine or a bus shared with
//! other devices.
//!
//! The transport knows nothing about what the header bits mean; that's the
//! driver's business.

#![cfg_attr(not(test), no_std)]

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

/// Length of the address + control header that precedes every data phase.
pub const HEADER_LEN: usize = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpiError {
    /// Transfer size is 0; the devices we talk to need at least one data byte
    BadTransferSize,

    /// The bus reported a failure while clocking bytes
    TransferFailed,

    /// Could not drive the chip-select line
    ChipSelect,

    /// Bringing the bus up (or down) failed
    InitFailed,
}

impl core::fmt::Display for SpiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SpiError::BadTransferSize => "zero-length SPI transfer",
            SpiError::TransferFailed => "SPI transfer failed",
            SpiError::ChipSelect => "could not drive chip select",
            SpiError::InitFailed => "SPI bus init failed",
        };
        f.write_str(s)
    }
}

/// Address/control-framed transport to a single device.
///
/// `address` is sent most significant byte first, followed by `control`,
/// followed by the data phase. Implementations must perform the whole
/// transaction under one chip-select assertion.
pub trait SpiTransport {
    /// Prepares the bus for use. Called once, before any transfer.
    fn init(&mut self) -> Result<(), SpiError> {
        Ok(())
    }

    /// Releases the bus. Called once, after the last transfer.
    fn deinit(&mut self) -> Result<(), SpiError> {
        Ok(())
    }

    /// Clocks out the header, then clocks `buf.len()` bytes in.
    fn read(
        &mut self,
        address: u16,
        control: u8,
        buf: &mut [u8],
    ) -> Result<(), SpiError>;

    /// Clocks out the header, then `data`.
    fn write(
        &mut self,
        address: u16,
        control: u8,
        data: &[u8],
    ) -> Result<(), SpiError>;
}

impl<T: SpiTransport + ?Sized> SpiTransport for &mut T {
    fn init(&mut self) -> Result<(), SpiError> {
        (**self).init()
    }

    fn deinit(&mut self) -> Result<(), SpiError> {
        (**self).deinit()
    }

    fn read(
        &mut self,
        address: u16,
        control: u8,
        buf: &mut [u8],
    ) -> Result<(), SpiError> {
        (**self).read(address, control, buf)
    }

    fn write(
        &mut self,
        address: u16,
        control: u8,
        data: &[u8],
    ) -> Result<(), SpiError> {
        (**self).write(address, control, data)
    }
}

/// Packs the address and control phases into the on-wire header.
pub fn header(address: u16, control: u8) -> [u8; HEADER_LEN] {
    let [hi, lo] = address.to_be_bytes();
    [hi, lo, control]
}

/// The stock transport: an `embedded-hal` blocking SPI bus plus a GPIO used
/// as chip select, driven by hand so the header and the data phase share one
/// assertion.
pub struct HalSpi<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> HalSpi<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Hands the bus and pin back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Runs `f` with chip select asserted. Chip select is released even if
    /// `f` fails; the first error wins.
    fn selected<F>(&mut self, f: F) -> Result<(), SpiError>
    where
        F: FnOnce(&mut SPI) -> Result<(), SpiError>,
    {
        self.cs.set_low().map_err(|_| SpiError::ChipSelect)?;
        let r = f(&mut self.spi);
        let deselect = self.cs.set_high().map_err(|_| SpiError::ChipSelect);
        r.and(deselect)
    }
}

impl<SPI, CS> SpiTransport for HalSpi<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    fn init(&mut self) -> Result<(), SpiError> {
        // Chip select idles high.
        self.cs.set_high().map_err(|_| SpiError::InitFailed)
    }

    fn deinit(&mut self) -> Result<(), SpiError> {
        self.cs.set_high().map_err(|_| SpiError::InitFailed)
    }

    fn read(
        &mut self,
        address: u16,
        control: u8,
        buf: &mut [u8],
    ) -> Result<(), SpiError> {
        if buf.is_empty() {
            return Err(SpiError::BadTransferSize);
        }
        let hdr = header(address, control);
        self.selected(|spi| {
            Write::write(spi, &hdr).map_err(|_| SpiError::TransferFailed)?;
            buf.fill(0);
            Transfer::transfer(spi, buf)
                .map_err(|_| SpiError::TransferFailed)?;
            Ok(())
        })
    }

    fn write(
        &mut self,
        address: u16,
        control: u8,
        data: &[u8],
    ) -> Result<(), SpiError> {
        if data.is_empty() {
            return Err(SpiError::BadTransferSize);
        }
        let hdr = header(address, control);
        self.selected(|spi| {
            Write::write(spi, &hdr).map_err(|_| SpiError::TransferFailed)?;
            Write::write(spi, data).map_err(|_| SpiError::TransferFailed)
        })
    }
}
