// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to the socket's TX and RX windows.
//!
//! Each window is a circular 16 KiB region of chip memory. The chip tracks
//! positions with free-running 16-bit pointers; we reduce those modulo the
//! window size and, when an access runs off the end of the window, split it
//! into two transfers:
//!
//! ```text
//!   0                     offset          WINDOW_SIZE
//!   +----------+------------+---------------+
//!   |  second  |            |     first     |
//!   +----------+------------+---------------+
//! ```
//!
//! The two pieces together are byte-for-byte what a single transfer into
//! an unwrapped window would have been.

use core::ops::Range;

use drv_spi_api::SpiTransport;

use crate::bus::Bus;
use crate::registers::{Address, Block, SOCKET, WINDOW_SIZE};
use crate::W5500Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Window {
    Tx,
    Rx,
}

impl Window {
    fn block(self) -> Block {
        match self {
            Window::Tx => Block::TxBuffer(SOCKET),
            Window::Rx => Block::RxBuffer(SOCKET),
        }
    }

    pub const fn size(self) -> usize {
        WINDOW_SIZE
    }
}

/// One contiguous piece of a window access: where in the window it lands,
/// and which part of the caller's buffer it carries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Span {
    pub offset: u16,
    pub data: Range<usize>,
}

/// Splits an access of `len` bytes at `offset` into one span, or two if it
/// crosses the end of a window of `size` bytes.
pub(crate) fn split(
    size: usize,
    offset: u16,
    len: usize,
) -> (Span, Option<Span>) {
    let offset = usize::from(offset) % size;
    if offset + len > size {
        let first_len = size - offset;
        (
            Span {
                offset: offset as u16,
                data: 0..first_len,
            },
            Some(Span {
                offset: 0,
                data: first_len..len,
            }),
        )
    } else {
        (
            Span {
                offset: offset as u16,
                data: 0..len,
            },
            None,
        )
    }
}

fn check_len(window: Window, len: usize) -> Result<(), W5500Error> {
    if len > window.size() {
        return Err(W5500Error::FrameTooLarge {
            len,
            max: window.size(),
        });
    }
    Ok(())
}

/// Copies `data` into `window`, starting at `offset` (reduced modulo the
/// window size).
pub(crate) fn write<T: SpiTransport>(
    bus: &Bus<T>,
    window: Window,
    offset: u16,
    data: &[u8],
) -> Result<(), W5500Error> {
    check_len(window, data.len())?;
    let (first, second) = split(window.size(), offset, data.len());
    for span in core::iter::once(first).chain(second) {
        let addr = Address {
            block: window.block(),
            offset: span.offset,
        };
        bus.write(addr, &data[span.data])?;
    }
    Ok(())
}

/// Fills `buf` from `window`, starting at `offset` (reduced modulo the
/// window size).
pub(crate) fn read<T: SpiTransport>(
    bus: &Bus<T>,
    window: Window,
    offset: u16,
    buf: &mut [u8],
) -> Result<(), W5500Error> {
    check_len(window, buf.len())?;
    let (first, second) = split(window.size(), offset, buf.len());
    for span in core::iter::once(first).chain(second) {
        let addr = Address {
            block: window.block(),
            offset: span.offset,
        };
        bus.read(addr, &mut buf[span.data])?;
    }
    Ok(())
}
