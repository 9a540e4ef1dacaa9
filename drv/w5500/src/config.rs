// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

/// How the receive worker sizes the buffer for each frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxBuffer {
    /// The length announced in the frame header.
    Exact,
    /// Always `Config::max_frame_len`, whatever the frame's length.
    Fixed,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Bound on acquiring the bus lock.
    pub lock_timeout: Duration,
    /// Interval between polls of the mode, version and command registers.
    pub poll_interval: Duration,
    /// Bound on the reset bit self-clearing, and on the version register
    /// reading back correctly afterwards.
    pub reset_timeout: Duration,
    /// Bound on the chip accepting a socket command.
    pub command_timeout: Duration,
    /// `Some` if there's no interrupt line: the worker is woken on this
    /// period while the link is up.
    pub poll_period: Option<Duration>,
    pub rx_buffer: RxBuffer,
    /// Longest frame we'll send or deliver.
    pub max_frame_len: usize,
    /// Transmit-complete polls before we start checking on the PHY.
    pub tx_health_check_after: u32,
    pub tx_poll_limit: u32,
    pub tx_poll_interval: Duration,
    /// In interrupt mode, how long the worker sleeps before looking at the
    /// interrupt status anyway, in case an edge went missing.
    pub irq_recheck: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            reset_timeout: Duration::from_millis(100),
            command_timeout: Duration::from_millis(100),
            poll_period: None,
            rx_buffer: RxBuffer::Exact,
            // 14 header + 4 VLAN tag + 1500 payload + 4 CRC
            max_frame_len: 1522,
            tx_health_check_after: 3,
            tx_poll_limit: 100,
            tx_poll_interval: Duration::from_micros(100),
            irq_recheck: Duration::from_secs(1),
        }
    }
}
