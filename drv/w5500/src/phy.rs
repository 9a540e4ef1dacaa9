// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The chip's built-in PHY, which is visible only through `PHYCFGR`.

use std::thread;

use drv_eth_mac_api::{Duplex, Link, Speed};
use drv_spi_api::SpiTransport;

use crate::bus::Bus;
use crate::command::poll_budget;
use crate::registers::{CommonReg, PhyConfig};
use crate::{Config, W5500Error};

/// Link state as decoded from `PHYCFGR`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkStatus {
    pub link: Link,
    pub speed: Speed,
    pub duplex: Duplex,
}

impl From<PhyConfig> for LinkStatus {
    fn from(cfg: PhyConfig) -> Self {
        Self {
            link: if cfg.contains(PhyConfig::LNK) {
                Link::Up
            } else {
                Link::Down
            },
            speed: if cfg.contains(PhyConfig::SPD) {
                Speed::Mbps100
            } else {
                Speed::Mbps10
            },
            duplex: if cfg.contains(PhyConfig::DPX) {
                Duplex::Full
            } else {
                Duplex::Half
            },
        }
    }
}

pub(crate) fn read_config<T: SpiTransport>(
    bus: &Bus<T>,
) -> Result<PhyConfig, W5500Error> {
    Ok(PhyConfig::from_bits_retain(bus.read_u8(CommonReg::PHYCFGR)?))
}

pub(crate) fn status<T: SpiTransport>(
    bus: &Bus<T>,
) -> Result<LinkStatus, W5500Error> {
    read_config(bus).map(LinkStatus::from)
}

/// Out of reset, with link.
pub(crate) fn ready<T: SpiTransport>(bus: &Bus<T>) -> Result<bool, W5500Error> {
    Ok(read_config(bus)?.contains(PhyConfig::RST | PhyConfig::LNK))
}

/// Pulses the (active low) PHY reset and waits for the PHY to come back.
pub(crate) fn reset<T: SpiTransport>(
    bus: &Bus<T>,
    config: &Config,
) -> Result<(), W5500Error> {
    bus.modify_u8(CommonReg::PHYCFGR, |v| v & !PhyConfig::RST.bits())?;
    thread::sleep(config.poll_interval);
    bus.modify_u8(CommonReg::PHYCFGR, |v| v | PhyConfig::RST.bits())?;
    for _ in 0..poll_budget(config.reset_timeout, config.poll_interval) {
        if read_config(bus)?.contains(PhyConfig::RST) {
            return Ok(());
        }
        thread::sleep(config.poll_interval);
    }
    Err(W5500Error::ResetTimeout)
}
