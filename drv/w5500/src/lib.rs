// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the WIZnet W5500 in MACRAW mode.
//!
//! The W5500 is a hardwired TCP/IP chip; here we ignore all of that and run
//! socket 0 as a raw Ethernet MAC, giving it the chip's entire buffer
//! memory: a 16 KiB TX window and a 16 KiB RX window.
//!
//! The chip is reached through an [`SpiTransport`], which every thread
//! shares through one lock (see `bus`). Frames go out synchronously on the
//! caller's thread. Frames come in on a worker thread owned by the
//! [`W5500`] handle, which sleeps until woken:
//!
//! - in interrupt mode (the default), by whatever handles the chip's
//!   interrupt line calling [`Notifier::notify`] on the handle's
//!   [`W5500::irq_notifier`];
//! - in polling mode ([`Config::poll_period`]), by a timer that runs while
//!   the link is up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use drv_eth_mac_api::{
    Duplex, EthMac, EthState, Link, MacAddress, Mediator, Speed,
};
use drv_spi_api::{SpiError, SpiTransport};
use ringbuf::*;

mod bringup;
mod bus;
mod command;
mod config;
mod notify;
mod phy;
mod registers;
mod ring;
mod rx;
#[cfg(test)]
mod sim;
mod tx;

pub use bringup::BringupState;
pub use config::{Config, RxBuffer};
pub use notify::Notifier;
pub use phy::LinkStatus;
pub use registers::{Command, CHIP_VERSION};

use bringup::Bringup;
use bus::Bus;
use notify::PollTimer;
use registers::{CommonReg, SocketMode, SocketReg, SocketStatus, SIMR_SOCKET};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum W5500Error {
    /// Couldn't get the bus lock in time; worth retrying.
    LockTimeout,
    Spi(SpiError),
    /// The chip never cleared `Sn_CR` after this command.
    CommandTimeout(Command),
    /// A reset bit (chip or PHY) never cleared.
    ResetTimeout,
    VersionMismatch { observed: u8 },
    FrameTooLarge { len: usize, max: usize },
    TxBufferFull { len: usize, free: u16 },
    /// SEND_OK never showed up.
    TxTimeout,
    /// The PHY is in reset or has no link.
    PhyNotReady,
    /// A 16-bit counter never read the same twice in a row.
    UnstableRegister,
    /// Bringup hasn't completed.
    NotReady,
    AlreadyInitialized,
    UnsupportedSpeed,
    BadPhyRegister,
    BufferTooSmall,
    NotSupported,
    /// Socket status after opening wasn't MACRAW.
    SocketNotOpen { status: u8 },
    /// Couldn't start a driver thread.
    SpawnFailed,
}

impl From<SpiError> for W5500Error {
    fn from(e: SpiError) -> Self {
        Self::Spi(e)
    }
}

impl core::fmt::Display for W5500Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LockTimeout => write!(f, "timed out waiting for bus lock"),
            Self::Spi(e) => write!(f, "SPI: {e}"),
            Self::CommandTimeout(c) => write!(f, "command {c:?} timed out"),
            Self::ResetTimeout => write!(f, "reset timed out"),
            Self::VersionMismatch { observed } => write!(
                f,
                "chip version {observed:#04x}, expected {CHIP_VERSION:#04x}"
            ),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds {max}")
            }
            Self::TxBufferFull { len, free } => {
                write!(f, "frame of {len} bytes, only {free} free")
            }
            Self::TxTimeout => write!(f, "send did not complete"),
            Self::PhyNotReady => write!(f, "PHY in reset or link down"),
            Self::UnstableRegister => write!(f, "counter would not settle"),
            Self::NotReady => write!(f, "chip not initialized"),
            Self::AlreadyInitialized => write!(f, "chip already initialized"),
            Self::UnsupportedSpeed => write!(f, "unsupported speed"),
            Self::BadPhyRegister => write!(f, "no such PHY register"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::NotSupported => write!(f, "not supported"),
            Self::SocketNotOpen { status } => {
                write!(f, "socket status {status:#04x} after open")
            }
            Self::SpawnFailed => write!(f, "could not spawn thread"),
        }
    }
}

impl std::error::Error for W5500Error {}

/// Source of receive buffers.
pub trait FrameAllocator: Send + Sync {
    /// Returns an empty buffer with room for `capacity` bytes, or `None` if
    /// there's no memory for one.
    fn alloc(&self, capacity: usize) -> Option<Vec<u8>>;
}

/// Allocates from the global heap, failing instead of aborting.
pub struct HeapAllocator;

impl FrameAllocator for HeapAllocator {
    fn alloc(&self, capacity: usize) -> Option<Vec<u8>> {
        let mut v = Vec::new();
        v.try_reserve_exact(capacity).ok()?;
        Some(v)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Init,
    Deinit,
    Start,
    Stop,
    Addr(MacAddress),
    Link(Link),
    Status(LinkStatus),
    Error(W5500Error),
}
ringbuf!(Trace, 32, Trace::None);

/// Everything the worker thread shares with the handle.
pub(crate) struct Shared<T> {
    pub bus: Bus<T>,
    pub config: Config,
    pub mediator: Arc<dyn Mediator>,
    pub allocator: Box<dyn FrameAllocator>,
    pub state: spin::Mutex<BringupState>,
    /// Held by whoever is taking frames off the RX window; see
    /// `rx::Consumer`.
    pub rx: spin::Mutex<()>,
    pub addr: spin::Mutex<MacAddress>,
    pub packets_remain: AtomicBool,
    pub shutdown: AtomicBool,
}

impl<T: SpiTransport> Shared<T> {
    pub fn new(
        spi: T,
        config: Config,
        mediator: Arc<dyn Mediator>,
        allocator: Box<dyn FrameAllocator>,
    ) -> Self {
        Self {
            bus: Bus::new(spi, config.lock_timeout),
            config,
            mediator,
            allocator,
            state: spin::Mutex::new(BringupState::PoweredOff),
            rx: spin::Mutex::new(()),
            addr: spin::Mutex::new(MacAddress::default()),
            packets_remain: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// One W5500.
///
/// Dropping the handle stops the worker thread and releases the transport.
pub struct W5500<T: SpiTransport + Send + 'static> {
    shared: Arc<Shared<T>>,
    notifier: Notifier,
    poll_timer: spin::Mutex<Option<PollTimer>>,
    worker: Option<JoinHandle<()>>,
    link: spin::Mutex<Option<LinkStatus>>,
    speed: spin::Mutex<Speed>,
    duplex: spin::Mutex<Duplex>,
}

impl<T: SpiTransport + Send + 'static> W5500<T> {
    pub fn new(
        spi: T,
        mediator: Arc<dyn Mediator>,
        config: Config,
    ) -> Result<Self, W5500Error> {
        Self::with_allocator(spi, mediator, config, Box::new(HeapAllocator))
    }

    pub fn with_allocator(
        spi: T,
        mediator: Arc<dyn Mediator>,
        config: Config,
        allocator: Box<dyn FrameAllocator>,
    ) -> Result<Self, W5500Error> {
        let shared = Arc::new(Shared::new(spi, config, mediator, allocator));
        let (notifier, wakeup) = notify::channel();
        let worker = thread::Builder::new()
            .name("w5500_rx".into())
            .spawn({
                let shared = shared.clone();
                move || rx::worker(&shared, &wakeup)
            })
            .map_err(|_| W5500Error::SpawnFailed)?;

        Ok(Self {
            shared,
            notifier,
            poll_timer: spin::Mutex::new(None),
            worker: Some(worker),
            link: spin::Mutex::new(None),
            speed: spin::Mutex::new(Speed::Mbps100),
            duplex: spin::Mutex::new(Duplex::Full),
        })
    }

    /// The handle to give to the interrupt handler. `None` in polling mode,
    /// where nothing but the poll timer should be waking the worker.
    pub fn irq_notifier(&self) -> Option<Notifier> {
        match self.shared.config.poll_period {
            Some(_) => None,
            None => Some(self.notifier.clone()),
        }
    }

    pub fn bringup_state(&self) -> BringupState {
        *self.shared.state.lock()
    }

    /// Whether the last frame taken off the chip had more queued behind it.
    pub fn packets_remain(&self) -> bool {
        self.shared.packets_remain.load(Ordering::Relaxed)
    }

    pub fn speed(&self) -> Speed {
        *self.speed.lock()
    }

    pub fn duplex(&self) -> Duplex {
        *self.duplex.lock()
    }

    /// Skips the frame at the head of the RX window, if there is one.
    pub fn flush_frame(&self) -> Result<(), W5500Error> {
        self.check_ready()?;
        rx::flush_frame(&self.shared)
    }

    /// Reads the PHY status and tells the mediator about anything that
    /// changed since last time.
    pub fn check_link(&self) -> Result<LinkStatus, W5500Error> {
        self.check_ready()?;
        let now = phy::status(&self.shared.bus)?;
        let previous = self.link.lock().replace(now);
        // The mediator may call back into us, so no locks from here on.
        if previous != Some(now) {
            ringbuf_entry!(Trace::Status(now));
            let mediator = &self.shared.mediator;
            mediator.on_state_changed(EthState::Speed(now.speed));
            mediator.on_state_changed(EthState::Duplex(now.duplex));
            mediator.on_state_changed(EthState::Link(now.link));
            log::debug!("link {:?}", now);
        }
        Ok(now)
    }

    pub fn phy_reset(&self) -> Result<(), W5500Error> {
        self.check_ready()?;
        phy::reset(&self.shared.bus, &self.shared.config)
    }

    fn check_ready(&self) -> Result<(), W5500Error> {
        if self.bringup_state() != BringupState::Ready {
            return Err(W5500Error::NotReady);
        }
        Ok(())
    }

    fn bring_up(&self) -> Result<(), W5500Error> {
        let shared = &*self.shared;
        shared.bus.lock()?.init()?;

        Bringup::new(&shared.bus, &shared.config)
            .run(|state| *shared.state.lock() = state)?;

        let mut mac = [0u8; 6];
        shared.bus.read(CommonReg::SHAR.into(), &mut mac)?;
        *shared.addr.lock() = MacAddress(mac);
        Ok(())
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.poll_timer.lock().take() {
            timer.stop();
        }
    }

    fn set_socket_mode(
        &self,
        mode: SocketMode,
        set: bool,
    ) -> Result<(), W5500Error> {
        self.check_ready()?;
        self.shared.bus.modify_u8(SocketReg::MR, |v| {
            let mut m = SocketMode::from_bits_retain(v);
            m.set(mode, set);
            m.bits()
        })
    }
}

impl<T: SpiTransport + Send + 'static> EthMac for W5500<T> {
    type Error = W5500Error;

    fn init(&self) -> Result<(), W5500Error> {
        if self.bringup_state() != BringupState::PoweredOff {
            return Err(W5500Error::AlreadyInitialized);
        }
        ringbuf_entry!(Trace::Init);
        self.shared.mediator.on_state_changed(EthState::LowLevelInit);
        if let Err(e) = self.bring_up() {
            ringbuf_entry!(Trace::Error(e));
            log::error!("init failed: {e}");
            *self.shared.state.lock() = BringupState::Failed;
            self.shared.mediator.on_state_changed(EthState::Deinit);
            return Err(e);
        }
        Ok(())
    }

    fn deinit(&self) -> Result<(), W5500Error> {
        ringbuf_entry!(Trace::Deinit);
        self.stop_timer();
        let r = match self.bringup_state() {
            BringupState::Ready => self.stop(),
            _ => Ok(()),
        };
        self.shared.mediator.on_state_changed(EthState::Deinit);
        *self.shared.state.lock() = BringupState::PoweredOff;
        *self.link.lock() = None;
        r
    }

    fn start(&self) -> Result<(), W5500Error> {
        self.check_ready()?;
        ringbuf_entry!(Trace::Start);
        let shared = &*self.shared;
        command::issue(
            &shared.bus,
            Command::Open,
            shared.config.command_timeout,
            shared.config.poll_interval,
        )?;
        let status = shared.bus.read_u8(SocketReg::SR)?;
        if status != SocketStatus::MacRaw as u8 {
            log::error!("socket status {status:#04x} after open");
            return Err(W5500Error::SocketNotOpen { status });
        }
        shared.bus.write_u8(CommonReg::SIMR, SIMR_SOCKET)
    }

    fn stop(&self) -> Result<(), W5500Error> {
        self.check_ready()?;
        ringbuf_entry!(Trace::Stop);
        let shared = &*self.shared;
        shared.bus.write_u8(CommonReg::SIMR, 0)?;
        command::issue(
            &shared.bus,
            Command::Close,
            shared.config.command_timeout,
            shared.config.poll_interval,
        )
    }

    fn transmit(&self, frame: &[u8]) -> Result<(), W5500Error> {
        self.check_ready()?;
        tx::transmit(&self.shared.bus, &self.shared.config, frame)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize, W5500Error> {
        self.check_ready()?;
        rx::receive(&self.shared, buf)
    }

    fn set_addr(&self, addr: MacAddress) -> Result<(), W5500Error> {
        self.check_ready()?;
        self.shared.bus.write(CommonReg::SHAR.into(), &addr.0)?;
        ringbuf_entry!(Trace::Addr(addr));
        *self.shared.addr.lock() = addr;
        Ok(())
    }

    fn get_addr(&self) -> MacAddress {
        *self.shared.addr.lock()
    }

    fn set_link(&self, link: Link) -> Result<(), W5500Error> {
        ringbuf_entry!(Trace::Link(link));
        match link {
            Link::Up => {
                self.start()?;
                if let Some(period) = self.shared.config.poll_period {
                    let mut timer = self.poll_timer.lock();
                    if timer.is_none() {
                        let notifier = self.notifier.clone();
                        *timer = Some(PollTimer::start(period, notifier)?);
                    }
                }
                log::debug!("link is up");
            }
            Link::Down => {
                self.stop_timer();
                self.stop()?;
                log::debug!("link is down");
            }
        }
        Ok(())
    }

    fn set_speed(&self, speed: Speed) -> Result<(), W5500Error> {
        match speed {
            Speed::Mbps10 | Speed::Mbps100 => {
                log::debug!("working in {speed:?}");
                *self.speed.lock() = speed;
                Ok(())
            }
            Speed::Mbps1000 => Err(W5500Error::UnsupportedSpeed),
        }
    }

    fn set_duplex(&self, duplex: Duplex) -> Result<(), W5500Error> {
        log::debug!("working in {duplex:?} duplex");
        *self.duplex.lock() = duplex;
        Ok(())
    }

    fn set_promiscuous(&self, enable: bool) -> Result<(), W5500Error> {
        self.set_socket_mode(SocketMode::MFEN, !enable)
    }

    fn set_all_multicast(&self, enable: bool) -> Result<(), W5500Error> {
        self.set_socket_mode(SocketMode::MMB, !enable)
    }

    fn enable_flow_ctrl(&self, _enable: bool) -> Result<(), W5500Error> {
        Err(W5500Error::NotSupported)
    }

    fn set_peer_pause_ability(
        &self,
        _ability: bool,
    ) -> Result<(), W5500Error> {
        Err(W5500Error::NotSupported)
    }

    fn read_phy_reg(&self, reg: u32) -> Result<u32, W5500Error> {
        if reg != CommonReg::PHYCFGR as u32 {
            return Err(W5500Error::BadPhyRegister);
        }
        self.check_ready()?;
        Ok(u32::from(phy::read_config(&self.shared.bus)?.bits()))
    }

    fn write_phy_reg(&self, reg: u32, value: u32) -> Result<(), W5500Error> {
        if reg != CommonReg::PHYCFGR as u32 {
            return Err(W5500Error::BadPhyRegister);
        }
        let value =
            u8::try_from(value).map_err(|_| W5500Error::BadPhyRegister)?;
        self.check_ready()?;
        self.shared.bus.write_u8(CommonReg::PHYCFGR, value)
    }
}

impl<T: SpiTransport + Send + 'static> Drop for W5500<T> {
    fn drop(&mut self) {
        self.stop_timer();
        self.shared.shutdown.store(true, Ordering::Release);
        self.notifier.notify();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("receive worker panicked");
            }
        }
        match self.shared.bus.lock() {
            Ok(mut spi) => {
                if let Err(e) = spi.deinit() {
                    log::error!("transport deinit failed: {e}");
                }
            }
            Err(e) => log::error!("transport deinit skipped: {e}"),
        }
    }
}
