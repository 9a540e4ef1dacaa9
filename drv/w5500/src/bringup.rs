// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chip bringup: soft reset, version check, default register programming.
//!
//! ```text
//!   PoweredOff -> Resetting -> VerifyingIdentity -> Configuring -> Ready
//!                     |               |                  |
//!                     +---------------+------------------+--> Failed
//! ```
//!
//! `Ready` and `Failed` are terminal; running bringup again takes a full
//! deinit/init cycle.

use std::thread;

use drv_spi_api::SpiTransport;
use ringbuf::*;

use crate::bus::Bus;
use crate::command::poll_budget;
use crate::registers::{
    Address, CommonReg, Mode, SocketInterrupt, SocketMode, SocketReg,
    CHIP_VERSION, SOCKET, SOCKET_COUNT, WINDOW_SIZE_KB,
};
use crate::{Config, W5500Error};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringupState {
    PoweredOff,
    Resetting,
    VerifyingIdentity,
    Configuring,
    Ready,
    Failed,
}

impl BringupState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BringupState::Ready | BringupState::Failed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    State(BringupState),
    ResetPending(u8),
    Version(u8),
    Failed(BringupState, W5500Error),
}
ringbuf!(Trace, 16, Trace::None);

pub(crate) struct Bringup<'a, T> {
    bus: &'a Bus<T>,
    config: &'a Config,
    state: BringupState,
}

impl<'a, T: SpiTransport> Bringup<'a, T> {
    pub fn new(bus: &'a Bus<T>, config: &'a Config) -> Self {
        Self {
            bus,
            config,
            state: BringupState::PoweredOff,
        }
    }

    /// Advances by one state. Once a terminal state is reached, further
    /// steps do nothing.
    pub fn step(&mut self) -> Result<BringupState, W5500Error> {
        let next = match self.state {
            BringupState::PoweredOff => Ok(BringupState::Resetting),
            BringupState::Resetting => reset(self.bus, self.config)
                .map(|()| BringupState::VerifyingIdentity),
            BringupState::VerifyingIdentity => verify_id(self.bus, self.config)
                .map(|_| BringupState::Configuring),
            BringupState::Configuring => {
                setup_default(self.bus).map(|()| BringupState::Ready)
            }
            s @ (BringupState::Ready | BringupState::Failed) => Ok(s),
        };
        match next {
            Ok(s) => {
                if s != self.state {
                    ringbuf_entry!(Trace::State(s));
                }
                self.state = s;
                Ok(s)
            }
            Err(e) => {
                ringbuf_entry!(Trace::Failed(self.state, e));
                log::error!("bringup failed in {:?}: {e}", self.state);
                self.state = BringupState::Failed;
                Err(e)
            }
        }
    }

    /// Steps until `Ready` or `Failed`, passing every state entered
    /// (starting with the current one) to `publish`.
    pub fn run(
        &mut self,
        mut publish: impl FnMut(BringupState),
    ) -> Result<(), W5500Error> {
        publish(self.state);
        while !self.state.is_terminal() {
            let r = self.step();
            publish(self.state);
            r?;
        }
        Ok(())
    }
}

/// Sets the self-clearing reset bit in `MR` and waits for it to clear.
pub(crate) fn reset<T: SpiTransport>(
    bus: &Bus<T>,
    config: &Config,
) -> Result<(), W5500Error> {
    bus.write_u8(CommonReg::MR, Mode::RST.bits())?;
    for _ in 0..poll_budget(config.reset_timeout, config.poll_interval) {
        let mr = bus.read_u8(CommonReg::MR)?;
        if !Mode::from_bits_retain(mr).contains(Mode::RST) {
            return Ok(());
        }
        ringbuf_entry!(Trace::ResetPending(mr));
        thread::sleep(config.poll_interval);
    }
    Err(W5500Error::ResetTimeout)
}

/// Waits for `VERSIONR` to report the expected version. Right after reset
/// the chip may read back 0 for a while, so this retries on the same budget
/// as the reset itself.
pub(crate) fn verify_id<T: SpiTransport>(
    bus: &Bus<T>,
    config: &Config,
) -> Result<u8, W5500Error> {
    let mut version = 0;
    for _ in 0..poll_budget(config.reset_timeout, config.poll_interval) {
        version = bus.read_u8(CommonReg::VERSIONR)?;
        ringbuf_entry!(Trace::Version(version));
        if version == CHIP_VERSION {
            log::info!("w5500 version: {version:#04x}");
            return Ok(version);
        }
        thread::sleep(config.poll_interval);
    }
    log::error!(
        "w5500 version mismatch: expected {:#04x}, got {:#04x}",
        CHIP_VERSION,
        version
    );
    Err(W5500Error::VersionMismatch { observed: version })
}

/// Programs the registers we depend on: all buffer memory to the MACRAW
/// socket, ping block, interrupts masked off until `start`, MACRAW with
/// MAC filtering, and RECV / SEND_OK as the socket's interrupt sources.
pub(crate) fn setup_default<T: SpiTransport>(
    bus: &Bus<T>,
) -> Result<(), W5500Error> {
    for n in 0..SOCKET_COUNT {
        let kb = if n == SOCKET { WINDOW_SIZE_KB } else { 0 };
        bus.write_u8(Address::socket(n, SocketReg::RXBUF_SIZE), kb)?;
        bus.write_u8(Address::socket(n, SocketReg::TXBUF_SIZE), kb)?;
    }
    // Ping block on; PPPoE, WOL and force-ARP off.
    bus.write_u8(CommonReg::MR, Mode::PB.bits())?;
    bus.write_u8(CommonReg::IMR, 0)?;
    bus.write_u8(CommonReg::SIMR, 0)?;
    bus.write_u8(
        SocketReg::MR,
        (SocketMode::MACRAW | SocketMode::MFEN).bits(),
    )?;
    bus.write_u8(
        SocketReg::IMR,
        (SocketInterrupt::RECV | SocketInterrupt::SEND_OK).bits(),
    )?;
    // Longest interrupt re-assert interval, to make a missed edge less
    // likely.
    bus.write_u16(CommonReg::INTLEVEL, 0xffff)
}
