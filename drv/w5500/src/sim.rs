// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated chip behind the `SpiTransport` contract, for unit tests.
//!
//! Only socket 0 has behavior beyond plain storage: commands, interrupt
//! status, pointers and counters. Everything else is a flat register file.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use drv_eth_mac_api::{EthState, Mediator};
use drv_spi_api::{SpiError, SpiTransport};
use num_traits::FromPrimitive;

use crate::registers::{
    Block, Command, CommonReg, PhyConfig, SocketInterrupt, SocketMode,
    SocketReg, SocketStatus, CHIP_VERSION, WINDOW_SIZE,
};
use crate::{Config, RxBuffer};

const BSB_SHIFT: u8 = 3;
const RWB_WRITE: u8 = 1 << 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Op {
    Read { block: Block, offset: u16, len: usize },
    Write { block: Block, offset: u16, data: Vec<u8> },
}

pub struct ChipState {
    pub common: [u8; 0x40],
    pub sockets: [[u8; 0x30]; 8],
    pub tx_mem: Vec<u8>,
    pub rx_mem: Vec<u8>,

    /// Value of `Sn_TX_FSR` once `scripted_fsr` runs dry.
    pub tx_free: u16,
    /// Values returned by successive raw reads of `Sn_RX_RSR`, ahead of the
    /// register's real contents.
    pub scripted_rsr: VecDeque<u16>,
    pub scripted_fsr: VecDeque<u16>,
    /// `Sn_CR` never self-clears, and commands never execute.
    pub stuck_command: bool,
    /// Reads of `MR` that still see the reset bit after a reset.
    pub reset_polls: u32,
    reset_remaining: u32,
    pub version: u8,
    /// Reads of `VERSIONR` that return 0 before `version` shows up.
    pub version_delay: u32,
    /// Reads of `Sn_IR` after a send before `SEND_OK` shows up;
    /// `u32::MAX` means never.
    pub send_ok_delay: u32,
    send_ok_countdown: Option<u32>,
    /// Link, speed and duplex bits of `PHYCFGR`, visible while the PHY is
    /// out of reset.
    pub phy_status: PhyConfig,
    /// Every access to this block fails.
    pub fail_block: Option<Block>,

    pub inits: u32,
    pub deinits: u32,
    pub log: Vec<Op>,
}

impl ChipState {
    fn new() -> Self {
        let mut s = Self {
            common: [0; 0x40],
            sockets: [[0; 0x30]; 8],
            tx_mem: vec![0; WINDOW_SIZE],
            rx_mem: vec![0; WINDOW_SIZE],
            tx_free: WINDOW_SIZE as u16,
            scripted_rsr: VecDeque::new(),
            scripted_fsr: VecDeque::new(),
            stuck_command: false,
            reset_polls: 2,
            reset_remaining: 0,
            version: CHIP_VERSION,
            version_delay: 0,
            send_ok_delay: 0,
            send_ok_countdown: None,
            phy_status: PhyConfig::LNK | PhyConfig::SPD | PhyConfig::DPX,
            fail_block: None,
            inits: 0,
            deinits: 0,
            log: Vec::new(),
        };
        s.power_on();
        s
    }

    fn power_on(&mut self) {
        self.common = [0; 0x40];
        self.sockets = [[0; 0x30]; 8];
        self.common[CommonReg::PHYCFGR as usize] =
            (PhyConfig::RST | PhyConfig::OPMDC).bits();
        for s in &mut self.sockets {
            s[SocketReg::RXBUF_SIZE as usize] = 2;
            s[SocketReg::TXBUF_SIZE as usize] = 2;
        }
    }

    pub fn socket_u16(&self, reg: SocketReg) -> u16 {
        let o = reg as usize;
        u16::from_be_bytes([self.sockets[0][o], self.sockets[0][o + 1]])
    }

    pub fn set_socket_u16(&mut self, reg: SocketReg, v: u16) {
        let o = reg as usize;
        self.sockets[0][o..o + 2].copy_from_slice(&v.to_be_bytes());
    }

    fn socket_ir(&self) -> SocketInterrupt {
        SocketInterrupt::from_bits_retain(
            self.sockets[0][SocketReg::IR as usize],
        )
    }

    fn set_socket_ir(&mut self, ir: SocketInterrupt) {
        self.sockets[0][SocketReg::IR as usize] = ir.bits();
    }

    /// Queues a received frame the way the chip does: length header, then
    /// payload, at `Sn_RX_WR`.
    pub fn push_frame(&mut self, payload: &[u8]) {
        let header = (payload.len() as u16 + 2).to_be_bytes();
        let mut wr = self.socket_u16(SocketReg::RX_WR);
        for b in header.iter().chain(payload) {
            self.rx_mem[usize::from(wr) % WINDOW_SIZE] = *b;
            wr = wr.wrapping_add(1);
        }
        self.set_socket_u16(SocketReg::RX_WR, wr);
        let rsr = self.socket_u16(SocketReg::RX_RSR);
        self.set_socket_u16(SocketReg::RX_RSR, rsr + payload.len() as u16 + 2);
        let ir = self.socket_ir() | SocketInterrupt::RECV;
        self.set_socket_ir(ir);
    }

    /// Queues a raw header value with no payload behind it.
    pub fn push_header(&mut self, header: u16) {
        let mut wr = self.socket_u16(SocketReg::RX_WR);
        for b in header.to_be_bytes() {
            self.rx_mem[usize::from(wr) % WINDOW_SIZE] = b;
            wr = wr.wrapping_add(1);
        }
        self.set_socket_u16(SocketReg::RX_WR, wr);
        let rsr = self.socket_u16(SocketReg::RX_RSR);
        self.set_socket_u16(SocketReg::RX_RSR, rsr + 2);
        let ir = self.socket_ir() | SocketInterrupt::RECV;
        self.set_socket_ir(ir);
    }

    fn execute(&mut self, cmd: u8) {
        let Some(cmd) = Command::from_u8(cmd) else {
            return;
        };
        let status = match cmd {
            Command::Open => {
                let mode = SocketMode::from_bits_retain(
                    self.sockets[0][SocketReg::MR as usize],
                );
                if mode.contains(SocketMode::MACRAW) {
                    SocketStatus::MacRaw
                } else {
                    SocketStatus::Init
                }
            }
            Command::Close => SocketStatus::Closed,
            Command::Send => {
                let wr = self.socket_u16(SocketReg::TX_WR);
                self.set_socket_u16(SocketReg::TX_RD, wr);
                self.send_ok_countdown = Some(self.send_ok_delay);
                return;
            }
            Command::Recv => {
                let wr = self.socket_u16(SocketReg::RX_WR);
                let rd = self.socket_u16(SocketReg::RX_RD);
                self.set_socket_u16(SocketReg::RX_RSR, wr.wrapping_sub(rd));
                return;
            }
        };
        self.sockets[0][SocketReg::SR as usize] = status as u8;
    }

    fn read(&mut self, block: Block, offset: u16, buf: &mut [u8]) {
        let o = usize::from(offset);
        match block {
            Block::Common => {
                if o == CommonReg::MR as usize {
                    if self.reset_remaining > 0 {
                        self.reset_remaining -= 1;
                    } else {
                        self.common[o] &= !0x80;
                    }
                }
                if o == CommonReg::VERSIONR as usize {
                    self.common[o] = if self.version_delay > 0 {
                        self.version_delay -= 1;
                        0
                    } else {
                        self.version
                    };
                }
                if o == CommonReg::PHYCFGR as usize {
                    let cfg = PhyConfig::from_bits_retain(self.common[o]);
                    let live = PhyConfig::LNK | PhyConfig::SPD | PhyConfig::DPX;
                    let mut v = cfg - live;
                    if cfg.contains(PhyConfig::RST) {
                        v |= self.phy_status;
                    }
                    self.common[o] = v.bits();
                }
                buf.copy_from_slice(&self.common[o..o + buf.len()]);
            }
            Block::Socket(0) => {
                if o == SocketReg::RX_RSR as usize {
                    if let Some(v) = self.scripted_rsr.pop_front() {
                        self.set_socket_u16(SocketReg::RX_RSR, v);
                    }
                }
                if o == SocketReg::TX_FSR as usize {
                    let v =
                        self.scripted_fsr.pop_front().unwrap_or(self.tx_free);
                    self.set_socket_u16(SocketReg::TX_FSR, v);
                }
                if o == SocketReg::IR as usize {
                    match self.send_ok_countdown {
                        Some(0) => {
                            self.send_ok_countdown = None;
                            let ir = self.socket_ir();
                            self.set_socket_ir(ir | SocketInterrupt::SEND_OK);
                        }
                        Some(u32::MAX) | None => (),
                        Some(n) => self.send_ok_countdown = Some(n - 1),
                    }
                }
                buf.copy_from_slice(&self.sockets[0][o..o + buf.len()]);
            }
            Block::Socket(n) => {
                let s = &self.sockets[usize::from(n)];
                buf.copy_from_slice(&s[o..o + buf.len()]);
            }
            Block::TxBuffer(_) => {
                assert!(o + buf.len() <= WINDOW_SIZE, "read past TX window");
                buf.copy_from_slice(&self.tx_mem[o..o + buf.len()]);
            }
            Block::RxBuffer(_) => {
                assert!(o + buf.len() <= WINDOW_SIZE, "read past RX window");
                buf.copy_from_slice(&self.rx_mem[o..o + buf.len()]);
            }
        }
    }

    fn write(&mut self, block: Block, offset: u16, data: &[u8]) {
        let o = usize::from(offset);
        match block {
            Block::Common => {
                if data.len() == 1 && o == CommonReg::IR as usize {
                    self.common[o] &= !data[0];
                    return;
                }
                self.common[o..o + data.len()].copy_from_slice(data);
                if o == CommonReg::MR as usize && data[0] & 0x80 != 0 {
                    let phy = self.common[CommonReg::PHYCFGR as usize];
                    self.power_on();
                    self.common[CommonReg::PHYCFGR as usize] = phy;
                    self.common[o] = data[0];
                    self.reset_remaining = self.reset_polls;
                }
            }
            Block::Socket(0) => {
                if data.len() == 1 && o == SocketReg::IR as usize {
                    let ir = self.socket_ir()
                        - SocketInterrupt::from_bits_retain(data[0]);
                    self.set_socket_ir(ir);
                    return;
                }
                if data.len() == 1 && o == SocketReg::CR as usize {
                    if self.stuck_command {
                        self.sockets[0][o] = data[0];
                    } else {
                        self.execute(data[0]);
                    }
                    return;
                }
                self.sockets[0][o..o + data.len()].copy_from_slice(data);
            }
            Block::Socket(n) => {
                let s = &mut self.sockets[usize::from(n)];
                s[o..o + data.len()].copy_from_slice(data);
            }
            Block::TxBuffer(_) => {
                assert!(o + data.len() <= WINDOW_SIZE, "write past TX window");
                self.tx_mem[o..o + data.len()].copy_from_slice(data);
            }
            Block::RxBuffer(_) => {
                assert!(o + data.len() <= WINDOW_SIZE, "write past RX window");
                self.rx_mem[o..o + data.len()].copy_from_slice(data);
            }
        }
    }
}

fn decode(control: u8) -> (Block, bool) {
    let bsb = control >> BSB_SHIFT;
    let n = bsb / 4;
    let block = match bsb % 4 {
        0 => Block::Common,
        1 => Block::Socket(n),
        2 => Block::TxBuffer(n),
        _ => Block::RxBuffer(n),
    };
    (block, control & RWB_WRITE != 0)
}

#[derive(Clone)]
pub struct SimChip(Arc<spin::Mutex<ChipState>>);

impl SimChip {
    pub fn new() -> Self {
        Self(Arc::new(spin::Mutex::new(ChipState::new())))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ChipState) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn log(&self) -> Vec<Op> {
        self.0.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.0.lock().log.clear();
    }

    pub fn writes_to(&self, block: Block, offset: u16) -> Vec<Vec<u8>> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write { block: b, offset: o, data }
                    if b == block && o == offset =>
                {
                    Some(data)
                }
                _ => None,
            })
            .collect()
    }

    pub fn reads_of(&self, block: Block, offset: u16) -> usize {
        self.log()
            .iter()
            .filter(|op| {
                matches!(op, Op::Read { block: b, offset: o, .. }
                    if *b == block && *o == offset)
            })
            .count()
    }

    /// Opcodes written to socket 0's command register, in order.
    pub fn command_writes(&self) -> Vec<u8> {
        self.writes_to(Block::Socket(0), SocketReg::CR as u16)
            .into_iter()
            .map(|d| d[0])
            .collect()
    }

    pub fn push_frame(&self, payload: &[u8]) {
        self.with(|c| c.push_frame(payload));
    }
}

impl SpiTransport for SimChip {
    fn init(&mut self) -> Result<(), SpiError> {
        self.with(|c| c.inits += 1);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), SpiError> {
        self.with(|c| c.deinits += 1);
        Ok(())
    }

    fn read(
        &mut self,
        address: u16,
        control: u8,
        buf: &mut [u8],
    ) -> Result<(), SpiError> {
        let (block, write) = decode(control);
        assert!(!write, "read with write bit set");
        self.with(|c| {
            if c.fail_block == Some(block) {
                return Err(SpiError::TransferFailed);
            }
            c.log.push(Op::Read {
                block,
                offset: address,
                len: buf.len(),
            });
            c.read(block, address, buf);
            Ok(())
        })
    }

    fn write(
        &mut self,
        address: u16,
        control: u8,
        data: &[u8],
    ) -> Result<(), SpiError> {
        let (block, write) = decode(control);
        assert!(write, "write without write bit set");
        self.with(|c| {
            if c.fail_block == Some(block) {
                return Err(SpiError::TransferFailed);
            }
            c.log.push(Op::Write {
                block,
                offset: address,
                data: data.to_vec(),
            });
            c.write(block, address, data);
            Ok(())
        })
    }
}

/// Timeouts short enough that failure paths finish quickly.
pub fn test_config() -> Config {
    Config {
        lock_timeout: Duration::from_millis(20),
        poll_interval: Duration::from_millis(1),
        reset_timeout: Duration::from_millis(10),
        command_timeout: Duration::from_millis(10),
        poll_period: None,
        rx_buffer: RxBuffer::Exact,
        max_frame_len: 1522,
        tx_health_check_after: 3,
        tx_poll_limit: 100,
        tx_poll_interval: Duration::from_micros(10),
        irq_recheck: Duration::from_millis(50),
    }
}

/// Records state changes and forwards delivered frames to a channel.
pub struct TestMediator {
    states: spin::Mutex<Vec<EthState>>,
    frames: spin::Mutex<mpsc::Sender<Vec<u8>>>,
}

impl TestMediator {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        let m = Self {
            states: spin::Mutex::new(Vec::new()),
            frames: spin::Mutex::new(tx),
        };
        (Arc::new(m), rx)
    }

    pub fn states(&self) -> Vec<EthState> {
        self.states.lock().clone()
    }
}

impl Mediator for TestMediator {
    fn on_state_changed(&self, state: EthState) {
        self.states.lock().push(state);
    }

    fn stack_input(&self, frame: Vec<u8>) {
        // The receiving end may be gone once a test has what it wants.
        let _ = self.frames.lock().send(frame);
    }
}
