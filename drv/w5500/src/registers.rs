// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! W5500 register map (the subset this driver touches)
//!
//! Every SPI frame carries a 16-bit offset in its address phase and a
//! control byte selecting one of 32 blocks: the common registers, or the
//! registers / TX memory / RX memory of one of eight sockets.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use static_assertions::const_assert;

/// Expected contents of `VERSIONR`.
pub const CHIP_VERSION: u8 = 0x04;

pub const SOCKET_COUNT: u8 = 8;

/// The only socket that can run in MACRAW mode.
pub const SOCKET: u8 = 0;

/// Size of each socket's TX and RX window when socket 0 owns all of the
/// chip's buffer memory.
pub const WINDOW_SIZE: usize = 16 * 1024;

/// Value for `Sn_RXBUF_SIZE` / `Sn_TXBUF_SIZE`, in KiB.
pub const WINDOW_SIZE_KB: u8 = (WINDOW_SIZE / 1024) as u8;

// The pointer registers are free-running 16-bit counters; reducing them
// modulo the window size is only meaningful if the window divides 2^16.
const_assert!(WINDOW_SIZE.is_power_of_two());
const_assert!(WINDOW_SIZE <= 1 << 16);

const BSB_SHIFT: u8 = 3;
const RWB_WRITE: u8 = 1 << 2;
/// Variable data length mode: frame length is delimited by chip select.
const OM_VDM: u8 = 0b00;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Block {
    Common,
    Socket(u8),
    TxBuffer(u8),
    RxBuffer(u8),
}

impl Block {
    /// Block select bits, before shifting into the control byte.
    pub const fn bsb(self) -> u8 {
        match self {
            Block::Common => 0,
            Block::Socket(n) => n * 4 + 1,
            Block::TxBuffer(n) => n * 4 + 2,
            Block::RxBuffer(n) => n * 4 + 3,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

/// Builds the control phase for an access to `block`.
pub const fn control(block: Block, access: Access) -> u8 {
    let rwb = match access {
        Access::Read => 0,
        Access::Write => RWB_WRITE,
    };
    (block.bsb() << BSB_SHIFT) | rwb | OM_VDM
}

/// Common register offsets.
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum CommonReg {
    /// Mode
    MR = 0x0000,
    /// Source hardware address (6 bytes)
    SHAR = 0x0009,
    /// Interrupt low level timer (2 bytes)
    INTLEVEL = 0x0013,
    /// Interrupt
    IR = 0x0015,
    /// Interrupt mask
    IMR = 0x0016,
    /// Socket interrupt mask
    SIMR = 0x0018,
    /// PHY configuration
    PHYCFGR = 0x002E,
    /// Chip version
    VERSIONR = 0x0039,
}

/// Per-socket register offsets.
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum SocketReg {
    MR = 0x0000,
    CR = 0x0001,
    IR = 0x0002,
    SR = 0x0003,
    RXBUF_SIZE = 0x001E,
    TXBUF_SIZE = 0x001F,
    /// TX free size (2 bytes)
    TX_FSR = 0x0020,
    /// TX read pointer (2 bytes)
    TX_RD = 0x0022,
    /// TX write pointer (2 bytes)
    TX_WR = 0x0024,
    /// RX received size (2 bytes)
    RX_RSR = 0x0026,
    /// RX read pointer (2 bytes)
    RX_RD = 0x0028,
    /// RX write pointer (2 bytes)
    RX_WR = 0x002A,
    IMR = 0x002C,
}

/// A fully resolved register (or memory) location.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Address {
    pub block: Block,
    pub offset: u16,
}

impl Address {
    pub const fn socket(n: u8, reg: SocketReg) -> Self {
        Self {
            block: Block::Socket(n),
            offset: reg as u16,
        }
    }
}

impl From<CommonReg> for Address {
    fn from(reg: CommonReg) -> Self {
        Self {
            block: Block::Common,
            offset: reg as u16,
        }
    }
}

/// Socket registers default to the MACRAW socket.
impl From<SocketReg> for Address {
    fn from(reg: SocketReg) -> Self {
        Self::socket(SOCKET, reg)
    }
}

bitflags! {
    /// `MR`
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Mode: u8 {
        /// Software reset; self-clearing.
        const RST = 1 << 7;
        const WOL = 1 << 5;
        /// Ping block
        const PB = 1 << 4;
        const PPPOE = 1 << 3;
        /// Force ARP
        const FARP = 1 << 1;
    }

    /// `Sn_MR`
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SocketMode: u8 {
        /// MAC filter: only accept frames for our address (and broadcast /
        /// multicast, unless blocked).
        const MFEN = 1 << 7;
        const BCASTB = 1 << 6;
        /// Multicast block
        const MMB = 1 << 5;
        const MIP6B = 1 << 4;
        /// Protocol field value for MACRAW.
        const MACRAW = 0x04;
    }

    /// `Sn_IR` and `Sn_IMR`; `Sn_IR` bits are write-one-to-clear.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SocketInterrupt: u8 {
        const CON = 1 << 0;
        const DISCON = 1 << 1;
        const RECV = 1 << 2;
        const TIMEOUT = 1 << 3;
        const SEND_OK = 1 << 4;
    }

    /// `PHYCFGR`
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PhyConfig: u8 {
        /// PHY reset, active low: reads 1 once the PHY is out of reset.
        const RST = 1 << 7;
        /// Configure operating mode from OPMDC rather than the pins.
        const OPMD = 1 << 6;
        const OPMDC = 0b111 << 3;
        /// Full duplex
        const DPX = 1 << 2;
        /// 100 Mbps
        const SPD = 1 << 1;
        /// Link up
        const LNK = 1 << 0;
    }
}

/// `SIMR` bit enabling the MACRAW socket's interrupt.
pub const SIMR_SOCKET: u8 = 1 << SOCKET;

/// `Sn_CR` opcodes. The chip clears `Sn_CR` once it has accepted one.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    Open = 0x01,
    Close = 0x10,
    Send = 0x20,
    Recv = 0x40,
}

/// `Sn_SR` values we care about.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum SocketStatus {
    Closed = 0x00,
    Init = 0x13,
    MacRaw = 0x42,
}
