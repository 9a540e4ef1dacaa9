// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API between Ethernet MAC drivers and the framework that owns them
//!
//! A MAC driver implements [`EthMac`]. The framework (which also owns the PHY
//! state machine and the IP stack glue) implements [`Mediator`] and hands it
//! to the driver; the driver uses it to report lifecycle and link changes and
//! to pass received frames up.

use core::fmt;

/// A 48-bit station address.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Link {
    Up,
    Down,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Speed {
    Mbps10,
    Mbps100,
    Mbps1000,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Duplex {
    Half,
    Full,
}

/// State changes a driver reports to its [`Mediator`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EthState {
    /// The driver is about to bring its hardware up.
    LowLevelInit,
    /// The driver has released (or failed to bring up) its hardware.
    Deinit,
    Link(Link),
    Speed(Speed),
    Duplex(Duplex),
}

/// The framework side of a MAC driver.
///
/// Both calls may arrive from the driver's worker thread as well as from
/// whichever thread called into the driver, hence `Send + Sync`.
pub trait Mediator: Send + Sync {
    fn on_state_changed(&self, state: EthState);

    /// Takes ownership of one received frame, without its CRC.
    fn stack_input(&self, frame: Vec<u8>);
}

/// The driver side: everything the framework may ask of a MAC.
///
/// All calls take `&self`; drivers serialize hardware access internally so
/// that transmit, configuration and the receive worker can run from
/// different threads.
pub trait EthMac {
    type Error;

    fn init(&self) -> Result<(), Self::Error>;
    fn deinit(&self) -> Result<(), Self::Error>;

    fn start(&self) -> Result<(), Self::Error>;
    fn stop(&self) -> Result<(), Self::Error>;

    /// Sends one frame, blocking until the hardware has taken it.
    fn transmit(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Pulls one pending frame into `buf`, returning the frame's full
    /// length. A length of 0 means nothing was pending; a length larger
    /// than `buf.len()` means the frame was truncated.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn set_addr(&self, addr: MacAddress) -> Result<(), Self::Error>;
    fn get_addr(&self) -> MacAddress;

    fn set_link(&self, link: Link) -> Result<(), Self::Error>;
    fn set_speed(&self, speed: Speed) -> Result<(), Self::Error>;
    fn set_duplex(&self, duplex: Duplex) -> Result<(), Self::Error>;

    fn set_promiscuous(&self, enable: bool) -> Result<(), Self::Error>;
    fn set_all_multicast(&self, enable: bool) -> Result<(), Self::Error>;

    fn enable_flow_ctrl(&self, enable: bool) -> Result<(), Self::Error>;
    fn set_peer_pause_ability(&self, ability: bool)
        -> Result<(), Self::Error>;

    fn read_phy_reg(&self, reg: u32) -> Result<u32, Self::Error>;
    fn write_phy_reg(&self, reg: u32, value: u32) -> Result<(), Self::Error>;
}
