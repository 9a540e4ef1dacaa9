// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket command sequencing.

use std::time::{Duration, Instant};

use drv_spi_api::SpiTransport;
use num_traits::FromPrimitive;
use ringbuf::*;

use crate::bus::Bus;
use crate::registers::{Command, SocketReg};
use crate::W5500Error;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Issue(Command),
    Pending(Option<Command>),
    Accepted(Command),
    Timeout(Command),
}
ringbuf!(Trace, 16, Trace::None);

/// Number of polls that fit in `timeout` at one poll per `interval`, never
/// less than one.
pub(crate) fn poll_budget(timeout: Duration, interval: Duration) -> u32 {
    let interval = interval.as_micros().max(1);
    let polls = timeout.as_micros() / interval;
    polls.clamp(1, u128::from(u32::MAX)) as u32
}

/// Writes `cmd` to `Sn_CR` and waits for the chip to clear the register,
/// which it does once the command has been accepted.
///
/// The register is polled every `interval` until `timeout` has passed; the
/// last poll lands on the deadline, after which the command is considered
/// lost and `CommandTimeout` is returned.
pub(crate) fn issue<T: SpiTransport>(
    bus: &Bus<T>,
    cmd: Command,
    timeout: Duration,
    interval: Duration,
) -> Result<(), W5500Error> {
    ringbuf_entry!(Trace::Issue(cmd));
    bus.write_u8(SocketReg::CR, cmd as u8)?;

    let deadline = Instant::now() + timeout;
    loop {
        let cr = bus.read_u8(SocketReg::CR)?;
        if cr == 0 {
            ringbuf_entry!(Trace::Accepted(cmd));
            return Ok(());
        }
        ringbuf_entry!(Trace::Pending(Command::from_u8(cr)));
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(interval.min(deadline - now));
    }

    ringbuf_entry!(Trace::Timeout(cmd));
    log::error!("socket command {cmd:?} timed out after {timeout:?}");
    Err(W5500Error::CommandTimeout(cmd))
}
