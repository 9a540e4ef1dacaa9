// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmit path. Runs on the caller's thread.

use std::thread;

use drv_spi_api::SpiTransport;
use ringbuf::*;

use crate::bus::Bus;
use crate::command;
use crate::phy;
use crate::registers::{Command, SocketInterrupt, SocketReg};
use crate::ring::{self, Window};
use crate::{Config, W5500Error};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Send { len: u16, wr: u16, free: u16 },
    NoRoom { len: u16, free: u16 },
    SendOk(u32),
    PhyNotReady(u32),
    Timeout,
}
ringbuf!(Trace, 16, Trace::None);

/// Copies `frame` into the TX window and waits for the chip to send it.
///
/// Nothing is written to the chip unless the frame fits: the length is
/// checked against `max_frame_len`, then against the free space.
pub(crate) fn transmit<T: SpiTransport>(
    bus: &Bus<T>,
    config: &Config,
    frame: &[u8],
) -> Result<(), W5500Error> {
    if frame.is_empty() {
        return Err(W5500Error::BufferTooSmall);
    }
    if frame.len() > config.max_frame_len {
        return Err(W5500Error::FrameTooLarge {
            len: frame.len(),
            max: config.max_frame_len,
        });
    }
    let len = frame.len() as u16;

    let free = bus.read_u16_consistent(SocketReg::TX_FSR)?;
    if len > free {
        ringbuf_entry!(Trace::NoRoom { len, free });
        log::error!("free size ({free}) < send length ({len})");
        return Err(W5500Error::TxBufferFull {
            len: frame.len(),
            free,
        });
    }

    let wr = bus.read_u16(SocketReg::TX_WR)?;
    ringbuf_entry!(Trace::Send { len, wr, free });
    ring::write(bus, Window::Tx, wr, frame)?;
    bus.write_u16(SocketReg::TX_WR, wr.wrapping_add(len))?;

    command::issue(
        bus,
        Command::Send,
        config.command_timeout,
        config.poll_interval,
    )?;
    wait_send_ok(bus, config)?;
    bus.write_u8(SocketReg::IR, SocketInterrupt::SEND_OK.bits())
}

/// Polls for SEND_OK. Past the first few polls, every poll also checks that
/// the PHY is out of reset with link; a chip that has lost either won't
/// ever finish the send.
fn wait_send_ok<T: SpiTransport>(
    bus: &Bus<T>,
    config: &Config,
) -> Result<(), W5500Error> {
    for poll in 1..=config.tx_poll_limit {
        let ir = SocketInterrupt::from_bits_retain(bus.read_u8(SocketReg::IR)?);
        if ir.contains(SocketInterrupt::SEND_OK) {
            ringbuf_entry!(Trace::SendOk(poll));
            return Ok(());
        }
        if poll > config.tx_health_check_after && !phy::ready(bus)? {
            ringbuf_entry!(Trace::PhyNotReady(poll));
            log::error!("PHY not ready while waiting for send");
            return Err(W5500Error::PhyNotReady);
        }
        thread::sleep(config.tx_poll_interval);
    }
    ringbuf_entry!(Trace::Timeout);
    log::error!("send not complete after {} polls", config.tx_poll_limit);
    Err(W5500Error::TxTimeout)
}
