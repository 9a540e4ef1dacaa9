// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access over the shared SPI transport.
//!
//! Every transfer, from any thread, takes the bus lock for exactly one SPI
//! transaction. Nothing here holds the lock across a sleep or a poll loop.

use std::time::{Duration, Instant};

use drv_spi_api::SpiTransport;
use ringbuf::*;

use crate::registers::{control, Access, Address};
use crate::W5500Error;

/// Raw reads a consistent read may spend before giving up on a counter that
/// refuses to hold still.
pub const CONSISTENT_READ_BUDGET: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Read(Address, u16),
    Write(Address, u16),
    Torn { addr: Address, first: u16, second: u16 },
    Unstable(Address),
    LockTimeout,
    SpiError(Address, drv_spi_api::SpiError),
}
ringbuf!(Trace, 32, Trace::None);

/// Takes `lock`, yielding between attempts, or fails with `LockTimeout`
/// once `timeout` has passed.
pub(crate) fn lock_within<U>(
    lock: &spin::Mutex<U>,
    timeout: Duration,
) -> Result<spin::MutexGuard<'_, U>, W5500Error> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(guard) = lock.try_lock() {
            return Ok(guard);
        }
        if Instant::now() >= deadline {
            return Err(W5500Error::LockTimeout);
        }
        std::thread::yield_now();
    }
}

pub(crate) struct Bus<T> {
    spi: spin::Mutex<T>,
    lock_timeout: Duration,
}

impl<T: SpiTransport> Bus<T> {
    pub fn new(spi: T, lock_timeout: Duration) -> Self {
        Self {
            spi: spin::Mutex::new(spi),
            lock_timeout,
        }
    }

    /// Takes the bus lock, giving up after the configured timeout.
    pub fn lock(&self) -> Result<spin::MutexGuard<'_, T>, W5500Error> {
        lock_within(&self.spi, self.lock_timeout).inspect_err(|_| {
            ringbuf_entry!(Trace::LockTimeout);
        })
    }

    /// Reads `buf.len()` bytes starting at `addr`. Empty reads don't touch
    /// the bus.
    pub fn read(
        &self,
        addr: Address,
        buf: &mut [u8],
    ) -> Result<(), W5500Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut spi = self.lock()?;
        spi.read(addr.offset, control(addr.block, Access::Read), buf)
            .map_err(|e| {
                ringbuf_entry!(Trace::SpiError(addr, e));
                W5500Error::from(e)
            })
    }

    /// Writes `data` starting at `addr`. Empty writes don't touch the bus.
    pub fn write(&self, addr: Address, data: &[u8]) -> Result<(), W5500Error> {
        if data.is_empty() {
            return Ok(());
        }
        let mut spi = self.lock()?;
        spi.write(addr.offset, control(addr.block, Access::Write), data)
            .map_err(|e| {
                ringbuf_entry!(Trace::SpiError(addr, e));
                W5500Error::from(e)
            })
    }

    pub fn read_u8(&self, addr: impl Into<Address>) -> Result<u8, W5500Error> {
        let addr = addr.into();
        let mut buf = [0u8];
        self.read(addr, &mut buf)?;
        ringbuf_entry!(Trace::Read(addr, u16::from(buf[0])));
        Ok(buf[0])
    }

    pub fn write_u8(
        &self,
        addr: impl Into<Address>,
        value: u8,
    ) -> Result<(), W5500Error> {
        let addr = addr.into();
        ringbuf_entry!(Trace::Write(addr, u16::from(value)));
        self.write(addr, &[value])
    }

    /// Reads a 16-bit register (big-endian on the wire) in one transaction.
    ///
    /// The chip doesn't latch 16-bit registers, so for the counters it
    /// updates on its own, use [`Bus::read_u16_consistent`].
    pub fn read_u16(
        &self,
        addr: impl Into<Address>,
    ) -> Result<u16, W5500Error> {
        let addr = addr.into();
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        let v = u16::from_be_bytes(buf);
        ringbuf_entry!(Trace::Read(addr, v));
        Ok(v)
    }

    pub fn write_u16(
        &self,
        addr: impl Into<Address>,
        value: u16,
    ) -> Result<(), W5500Error> {
        let addr = addr.into();
        ringbuf_entry!(Trace::Write(addr, value));
        self.write(addr, &value.to_be_bytes())
    }

    /// Reads a 16-bit counter that the chip may update between our reads of
    /// its two halves.
    ///
    /// Keeps reading until two consecutive reads agree, so a value is only
    /// ever returned after it has been observed twice in a row.
    pub fn read_u16_consistent(
        &self,
        addr: impl Into<Address>,
    ) -> Result<u16, W5500Error> {
        let addr = addr.into();
        let mut prev = self.read_u16(addr)?;
        for _ in 1..CONSISTENT_READ_BUDGET {
            let v = self.read_u16(addr)?;
            if v == prev {
                return Ok(v);
            }
            ringbuf_entry!(Trace::Torn {
                addr,
                first: prev,
                second: v
            });
            prev = v;
        }
        ringbuf_entry!(Trace::Unstable(addr));
        Err(W5500Error::UnstableRegister)
    }

    /// Performs a read-modify-write of an 8-bit register.
    ///
    /// The read and the write are separate transactions; callers that need
    /// the pair to be atomic with respect to other threads have to arrange
    /// that themselves.
    pub fn modify_u8<F>(
        &self,
        addr: impl Into<Address>,
        f: F,
    ) -> Result<(), W5500Error>
    where
        F: FnOnce(u8) -> u8,
    {
        let addr = addr.into();
        let v = self.read_u8(addr)?;
        self.write_u8(addr, f(v))
    }
}
