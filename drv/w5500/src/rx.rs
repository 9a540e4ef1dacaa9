// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Receive pipeline.
//!
//! In MACRAW mode the chip stores each received frame in the RX window as a
//! 2-byte big-endian length, which counts itself, followed by the frame
//! without its CRC:
//!
//! ```text
//!   Sn_RX_RD
//!   |
//!   v
//!   +-------+---------------------+-------+-------------
//!   | len   | frame (len - 2)     | len   | frame ...
//!   +-------+---------------------+-------+-------------
//! ```
//!
//! The worker thread sleeps until woken (see [`crate::notify`]), checks the
//! socket's RECV bit and, if it's set, drains every queued frame up to the
//! mediator.

use std::sync::atomic::Ordering;

use drv_spi_api::SpiTransport;
use ringbuf::*;

use crate::bringup::BringupState;
use crate::bus::lock_within;
use crate::command;
use crate::notify::{Wake, Wakeup};
use crate::registers::{Command, SocketInterrupt, SocketReg};
use crate::ring::{self, Window};
use crate::{RxBuffer, Shared, W5500Error};

/// Length of the per-frame header in the RX window.
pub const HEADER_LEN: u16 = 2;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Spurious(u8),
    Frame { rd: u16, header: u16, rsr: u16 },
    Delivered(u16),
    AllocFailed(u16),
    Oversized(u16),
    Empty,
    DrainFailed(W5500Error),
    Exit,
}
ringbuf!(Trace, 32, Trace::None);

/// The frame at the head of the RX window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Pending {
    /// Bytes received and not yet consumed, as of when we looked.
    pub rsr: u16,
    /// Read pointer; where the header sits.
    pub rd: u16,
    /// Header value: frame length plus the header itself.
    pub header: u16,
}

impl Pending {
    /// Length of the frame behind the header.
    pub fn frame_len(&self) -> usize {
        usize::from(self.header.saturating_sub(HEADER_LEN))
    }

    /// How far the read pointer moves to get past this frame. A corrupt
    /// header shorter than itself still moves us past the header.
    pub fn advance(&self) -> u16 {
        self.header.max(HEADER_LEN)
    }
}

/// The right to take frames off the RX window.
///
/// Looking at the head frame and consuming it are several bus transactions
/// apart; whoever peeks must keep holding this until the frame has been
/// consumed, or two consumers can see the same head frame.
pub(crate) struct Consumer<'a> {
    _guard: spin::MutexGuard<'a, ()>,
}

pub(crate) fn lock<T>(
    shared: &Shared<T>,
) -> Result<Consumer<'_>, W5500Error> {
    lock_within(&shared.rx, shared.config.lock_timeout)
        .map(|_guard| Consumer { _guard })
}

/// Looks at the head of the RX window without consuming anything.
pub(crate) fn peek<T: SpiTransport>(
    shared: &Shared<T>,
    _consumer: &Consumer<'_>,
) -> Result<Option<Pending>, W5500Error> {
    let bus = &shared.bus;
    let rsr = bus.read_u16_consistent(SocketReg::RX_RSR)?;
    if rsr == 0 {
        return Ok(None);
    }
    let rd = bus.read_u16(SocketReg::RX_RD)?;
    let mut header = [0u8; HEADER_LEN as usize];
    ring::read(bus, Window::Rx, rd, &mut header)?;
    let header = u16::from_be_bytes(header);
    ringbuf_entry!(Trace::Frame { rd, header, rsr });
    Ok(Some(Pending { rsr, rd, header }))
}

/// Copies the start of the head frame into `dst` (which may be shorter
/// than the frame, or empty), then hands the whole frame back to the chip.
///
/// Returns whether more data was already queued behind this frame.
pub(crate) fn consume<T: SpiTransport>(
    shared: &Shared<T>,
    _consumer: &Consumer<'_>,
    pending: &Pending,
    dst: &mut [u8],
) -> Result<bool, W5500Error> {
    let bus = &shared.bus;
    let n = dst.len().min(pending.frame_len());
    ring::read(
        bus,
        Window::Rx,
        pending.rd.wrapping_add(HEADER_LEN),
        &mut dst[..n],
    )?;

    let advance = pending.advance();
    bus.write_u16(SocketReg::RX_RD, pending.rd.wrapping_add(advance))?;
    let config = &shared.config;
    command::issue(
        bus,
        Command::Recv,
        config.command_timeout,
        config.poll_interval,
    )?;

    let more = pending.rsr > advance;
    shared.packets_remain.store(more, Ordering::Relaxed);
    Ok(more)
}

/// Pulls the head frame into `buf`, returning its full length; 0 if
/// nothing is queued.
pub(crate) fn receive<T: SpiTransport>(
    shared: &Shared<T>,
    buf: &mut [u8],
) -> Result<usize, W5500Error> {
    let consumer = lock(shared)?;
    match peek(shared, &consumer)? {
        Some(p) => {
            consume(shared, &consumer, &p, buf)?;
            Ok(p.frame_len())
        }
        None => {
            shared.packets_remain.store(false, Ordering::Relaxed);
            Ok(0)
        }
    }
}

/// Skips the head frame without reading it.
pub(crate) fn flush_frame<T: SpiTransport>(
    shared: &Shared<T>,
) -> Result<(), W5500Error> {
    let consumer = lock(shared)?;
    if let Some(p) = peek(shared, &consumer)? {
        consume(shared, &consumer, &p, &mut [])?;
    }
    Ok(())
}

/// Moves one frame from the chip to the mediator, or drops it. Returns
/// whether another frame is queued behind it.
pub(crate) fn drain_one<T: SpiTransport>(
    shared: &Shared<T>,
) -> Result<bool, W5500Error> {
    let consumer = lock(shared)?;
    let Some(p) = peek(shared, &consumer)? else {
        shared.packets_remain.store(false, Ordering::Relaxed);
        return Ok(false);
    };

    let len = p.frame_len();
    let max = shared.config.max_frame_len;
    if len == 0 {
        ringbuf_entry!(Trace::Empty);
        log::warn!("dropping empty frame (header {:#06x})", p.header);
        return consume(shared, &consumer, &p, &mut []);
    }
    if len > max {
        ringbuf_entry!(Trace::Oversized(p.header));
        log::error!("dropping {len} byte frame, longer than {max}");
        return consume(shared, &consumer, &p, &mut []);
    }

    let capacity = match shared.config.rx_buffer {
        RxBuffer::Exact => len,
        RxBuffer::Fixed => max,
    };
    let Some(mut frame) = shared.allocator.alloc(capacity) else {
        ringbuf_entry!(Trace::AllocFailed(p.header));
        log::error!("no memory for {capacity} byte frame, dropping it");
        return consume(shared, &consumer, &p, &mut []);
    };
    frame.resize(len, 0);
    let more = consume(shared, &consumer, &p, &mut frame)?;
    drop(consumer);

    ringbuf_entry!(Trace::Delivered(p.header));
    log::debug!("receive len={len}");
    shared.mediator.stack_input(frame);
    Ok(more)
}

/// Drains until the chip reports nothing more queued.
///
/// There is deliberately no cap on the number of frames per pass.
pub(crate) fn drain<T: SpiTransport>(
    shared: &Shared<T>,
) -> Result<(), W5500Error> {
    while drain_one(shared)? {}
    Ok(())
}

/// One wake's worth of work: nothing at all unless RECV is set.
pub(crate) fn service<T: SpiTransport>(
    shared: &Shared<T>,
) -> Result<(), W5500Error> {
    let bus = &shared.bus;
    let ir = SocketInterrupt::from_bits_retain(bus.read_u8(SocketReg::IR)?);
    if !ir.contains(SocketInterrupt::RECV) {
        ringbuf_entry!(Trace::Spurious(ir.bits()));
        return Ok(());
    }
    bus.write_u8(SocketReg::IR, SocketInterrupt::RECV.bits())?;
    drain(shared)
}

/// Body of the receive worker thread. Runs until `shared.shutdown` is set
/// and a wake is posted.
pub(crate) fn worker<T: SpiTransport>(shared: &Shared<T>, wakeup: &Wakeup) {
    // With no interrupt line, the poll timer wakes us; otherwise wake up
    // now and then regardless, in case an interrupt edge was lost.
    let timeout = match shared.config.poll_period {
        Some(_) => None,
        None => Some(shared.config.irq_recheck),
    };
    loop {
        let wake = wakeup.wait(timeout);
        if wake == Wake::Closed || shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if *shared.state.lock() != BringupState::Ready {
            continue;
        }
        if let Err(e) = service(shared) {
            // The frame stays put and will be seen again next time.
            ringbuf_entry!(Trace::DrainFailed(e));
            log::error!("receive failed: {e}");
        }
    }
    ringbuf_entry!(Trace::Exit);
}
