// Licensed under the Apache-2.0 license

//! Simulated I2C peripheral for unit tests.
//!
//! [`Sim`] models one controller instance on a bus populated with scripted
//! targets and, optionally, a remote master addressing this node. The model
//! settles instantly: every register access completes whatever bus activity it
//! unblocks before returning. Interrupt tests deliver vectors with [`step`] or
//! [`drive`]; DMA tests move bytes with [`Sim::pump_dma`] or [`drive_dma`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::common::Logger;
use crate::i2c::common::{MemAddrSize, SlaveDirection};
use crate::i2c::error::ErrorFlags;
use crate::i2c::events::{classify, classify_errors};
use crate::i2c::handle::I2cHandle;
use crate::i2c::registers::{cr1, cr2, icr, isr, oar1, oar2, Reg, Status};
use crate::i2c::traits::{
    BusLock, Clock, DmaBuffer, DmaChannel, DmaFault, DmaPort, DmaState, I2cCallbacks, I2cDma,
    I2cRegisters,
};

pub type TestHandle<'b> = I2cHandle<'b, MockRegs, MockClock>;

pub type RecHandle<'b> = I2cHandle<'b, MockRegs, MockClock, MockDma, RecordingCallbacks>;

/// A device on the simulated bus.
#[derive(Clone, Debug)]
pub struct Target {
    address: u16,
    ten_bit: bool,
    data: Vec<u8>,
    nacks: u32,
    silent: bool,
    mem: Option<MemAddrSize>,
    written: Vec<u8>,
    read_pos: usize,
    memory: Vec<u8>,
    pointer: u16,
    addr_bytes: usize,
}

impl Target {
    /// Acknowledges everything, records writes, answers reads with its
    /// scripted data (or the byte index past its end).
    pub fn plain(address: u16) -> Self {
        Self {
            address,
            ten_bit: false,
            data: Vec::new(),
            nacks: 0,
            silent: false,
            mem: None,
            written: Vec::new(),
            read_pos: 0,
            memory: Vec::new(),
            pointer: 0,
            addr_bytes: 0,
        }
    }

    /// EEPROM-like device: the first bytes of a write set the address
    /// pointer, reads and further writes auto-increment it.
    pub fn memory(address: u16, size: MemAddrSize) -> Self {
        Self {
            mem: Some(size),
            memory: vec![0; 0x1_0000],
            ..Self::plain(address)
        }
    }

    /// Acknowledges its address, then stretches the clock forever.
    pub fn unresponsive(address: u16) -> Self {
        Self {
            silent: true,
            ..Self::plain(address)
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    #[must_use]
    pub fn ten_bit(mut self) -> Self {
        self.ten_bit = true;
        self
    }

    /// NACK the first `count` address phases.
    #[must_use]
    pub fn nack_polls(mut self, count: u32) -> Self {
        self.nacks = count;
        self
    }

    fn begin_write(&mut self) {
        self.addr_bytes = 0;
    }

    fn begin_read(&mut self) {
        self.read_pos = 0;
    }

    fn receive(&mut self, byte: u8) {
        match self.mem {
            Some(size) if self.addr_bytes < size.byte_count() => {
                self.pointer = if self.addr_bytes == 0 {
                    u16::from(byte)
                } else {
                    (self.pointer << 8) | u16::from(byte)
                };
                self.addr_bytes += 1;
            }
            Some(_) => {
                self.memory[usize::from(self.pointer)] = byte;
                self.pointer = self.pointer.wrapping_add(1);
            }
            None => self.written.push(byte),
        }
    }

    fn next_read(&mut self) -> u8 {
        if self.mem.is_some() {
            let byte = self.memory[usize::from(self.pointer)];
            self.pointer = self.pointer.wrapping_add(1);
            return byte;
        }
        let byte = self.data.get(self.read_pos).copied().unwrap_or(self.read_pos as u8);
        self.read_pos += 1;
        byte
    }
}

/// Master phase in flight.
struct Phase {
    device: usize,
    read: bool,
    left: u8,
}

/// Transaction of the remote master addressing this node.
struct Remote {
    read: bool,
    data: Vec<u8>,
    len: usize,
    pos: usize,
    awaiting_stop: bool,
}

#[derive(Default)]
struct Channel {
    buffer: Option<DmaBuffer>,
    len: usize,
    moved: usize,
    busy: bool,
}

/// Outcome of one [`Sim::pump_dma`] call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaNote {
    Moved,
    Complete(DmaChannel),
    Aborted(DmaChannel),
}

#[derive(Default)]
struct Bus {
    cr1: u32,
    cr2: u32,
    oar1: u32,
    oar2: u32,
    timingr: u32,
    autocr: u32,
    /// ISR without TXE, which follows `txdr`.
    flags: u32,
    rxdr: u8,
    txdr: Option<u8>,
    time: u32,
    targets: Vec<Target>,
    master: Option<Phase>,
    remote: Option<Remote>,
    remote_received: Vec<u8>,
    dma: [Channel; 2],
    dma_fail_next: bool,
    dma_notes: VecDeque<DmaNote>,
    cr2_writes: usize,
    starts: usize,
    stops: usize,
    stops_requested: usize,
    polls: usize,
    phase_lengths: Vec<u8>,
}

const fn nbytes(cr2_value: u32) -> u8 {
    ((cr2_value & cr2::NBYTES) >> cr2::NBYTES_POS) as u8
}

const fn channel_index(channel: DmaChannel) -> usize {
    match channel {
        DmaChannel::Tx => 0,
        DmaChannel::Rx => 1,
    }
}

impl Bus {
    fn isr(&self) -> u32 {
        let txe = if self.txdr.is_none() { isr::TXE } else { 0 };
        self.flags | txe
    }

    fn read(&mut self, reg: Reg) -> u32 {
        match reg {
            Reg::Cr1 => self.cr1,
            Reg::Cr2 => self.cr2,
            Reg::Oar1 => self.oar1,
            Reg::Oar2 => self.oar2,
            Reg::Timingr => self.timingr,
            Reg::Autocr => self.autocr,
            Reg::Isr => self.isr(),
            Reg::Icr => 0,
            Reg::Rxdr => u32::from(self.read_rxdr()),
            Reg::Txdr => self.txdr.map_or(0, u32::from),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        match reg {
            Reg::Cr1 => self.cr1 = value,
            Reg::Cr2 => self.write_cr2(value),
            Reg::Oar1 => self.oar1 = value,
            Reg::Oar2 => self.oar2 = value,
            Reg::Timingr => self.timingr = value,
            Reg::Autocr => self.autocr = value,
            Reg::Isr => {
                if value & isr::TXE != 0 {
                    self.txdr = None;
                }
            }
            Reg::Icr => self.clear(value),
            Reg::Txdr => self.write_txdr(value as u8),
            Reg::Rxdr => {}
        }
    }

    fn write_cr2(&mut self, value: u32) {
        self.cr2_writes += 1;
        if value & cr2::START != 0 {
            self.cr2 = value & !cr2::START;
            self.start();
            return;
        }
        if value & cr2::STOP != 0 {
            self.cr2 = value & !cr2::STOP;
            self.stops_requested += 1;
            if self.flags & isr::BUSY != 0 {
                self.stop_master();
            }
            return;
        }
        let continues = self.master.is_some()
            && self.flags & (isr::TCR | isr::TC) != 0
            && nbytes(value) > 0;
        self.cr2 = value;
        if continues {
            self.flags &= !(isr::TCR | isr::TC);
            let len = nbytes(value);
            if let Some(phase) = self.master.as_mut() {
                phase.left = len;
            }
            self.phase_lengths.push(len);
            self.advance();
        }
    }

    fn start(&mut self) {
        self.starts += 1;
        self.flags &= !(isr::TCR | isr::TC | isr::TXIS | isr::RXNE);
        self.flags |= isr::BUSY;
        let value = self.cr2;
        let len = nbytes(value);
        let read = value & cr2::RD_WRN != 0;
        if len == 0 && !read {
            self.polls += 1;
        }
        self.phase_lengths.push(len);

        let ten = value & cr2::ADD10 != 0;
        let address = if ten {
            (value & 0x3FF) as u16
        } else {
            ((value >> 1) & 0x7F) as u16
        };
        let found = self
            .targets
            .iter()
            .position(|t| t.address == address && t.ten_bit == ten);
        match found {
            Some(device) if self.targets[device].nacks == 0 => {
                if read {
                    self.targets[device].begin_read();
                } else {
                    self.targets[device].begin_write();
                }
                self.master = Some(Phase { device, read, left: len });
                self.advance();
            }
            Some(device) => {
                self.targets[device].nacks -= 1;
                self.nack();
            }
            None => self.nack(),
        }
    }

    fn nack(&mut self) {
        self.flags |= isr::NACKF;
        self.stop_master();
    }

    /// Run the master phase until it needs software.
    fn advance(&mut self) {
        loop {
            let Some(phase) = self.master.as_mut() else {
                return;
            };
            let device = phase.device;
            if self.targets[device].silent {
                return;
            }
            if phase.left == 0 {
                self.end_phase();
                return;
            }
            if phase.read {
                self.rxdr = self.targets[device].next_read();
                self.flags |= isr::RXNE;
                return;
            }
            match self.txdr.take() {
                Some(byte) => {
                    phase.left -= 1;
                    self.targets[device].receive(byte);
                }
                None => {
                    self.flags |= isr::TXIS;
                    return;
                }
            }
        }
    }

    fn end_phase(&mut self) {
        self.flags &= !isr::TXIS;
        if self.cr2 & cr2::RELOAD != 0 {
            self.flags |= isr::TCR;
        } else if self.cr2 & cr2::AUTOEND != 0 {
            self.stop_master();
        } else {
            self.flags |= isr::TC;
        }
    }

    fn stop_master(&mut self) {
        self.master = None;
        self.stops += 1;
        self.flags |= isr::STOPF;
        self.flags &= !(isr::BUSY | isr::TXIS | isr::TCR | isr::TC);
    }

    fn read_rxdr(&mut self) -> u8 {
        let byte = self.rxdr;
        if self.flags & isr::RXNE == 0 {
            return byte;
        }
        self.flags &= !isr::RXNE;
        if let Some(phase) = self.master.as_mut() {
            if phase.read {
                phase.left = phase.left.saturating_sub(1);
                self.advance();
                return byte;
            }
        }
        if self.remote.as_ref().is_some_and(|r| !r.read) {
            self.remote_feed();
        }
        byte
    }

    fn write_txdr(&mut self, byte: u8) {
        if self.flags & isr::TXIS != 0 {
            self.flags &= !isr::TXIS;
            if let Some(phase) = self.master.as_mut() {
                if !phase.read {
                    phase.left = phase.left.saturating_sub(1);
                    let device = phase.device;
                    self.targets[device].receive(byte);
                    self.advance();
                    return;
                }
            }
            if let Some(remote) = self.remote.as_mut() {
                if remote.read {
                    remote.pos += 1;
                    self.remote_received.push(byte);
                    self.remote_pull();
                    return;
                }
            }
        }
        self.txdr = Some(byte);
    }

    fn clear(&mut self, bits: u32) {
        if bits & icr::ADDRCF != 0 && self.flags & isr::ADDR != 0 {
            self.flags &= !isr::ADDR;
            match self.remote.as_ref().map(|r| r.read) {
                Some(true) => self.remote_pull(),
                Some(false) => self.remote_feed(),
                None => {}
            }
        }
        if bits & icr::NACKCF != 0 {
            self.flags &= !isr::NACKF;
            if self.remote.as_ref().is_some_and(|r| r.awaiting_stop) {
                self.remote_stop();
            }
        }
        if bits & icr::STOPCF != 0 {
            self.flags &= !isr::STOPF;
        }
        if bits & icr::BERRCF != 0 {
            self.flags &= !isr::BERR;
        }
        if bits & icr::ARLOCF != 0 {
            self.flags &= !isr::ARLO;
        }
        if bits & icr::OVRCF != 0 {
            self.flags &= !isr::OVR;
        }
    }

    /// Address code this node answers `address` with, if any.
    fn own_match(&self, address: u16) -> Option<u32> {
        if self.cr1 & cr1::PE == 0 {
            return None;
        }
        let address = u32::from(address);
        if self.oar1 & oar1::OA1EN != 0 {
            if self.oar1 & oar1::OA1MODE != 0 {
                if address == self.oar1 & oar1::OA1 {
                    return Some(0x78 | ((address >> 8) & 0x3));
                }
            } else if address == (self.oar1 >> 1) & 0x7F {
                return Some(address);
            }
        }
        if self.oar2 & oar2::OA2EN != 0 && address <= 0x7F {
            let msk = (self.oar2 & oar2::OA2MSK) >> oar2::OA2MSK_POS;
            let ignore = if msk == 0 { 0 } else { (1u32 << (msk + 1)) - 2 };
            if ((address << 1) ^ (self.oar2 & oar2::OA2)) & 0xFE & !ignore == 0 {
                return Some(address);
            }
        }
        if self.cr1 & cr1::GCEN != 0 && address == 0 {
            return Some(0);
        }
        None
    }

    fn remote_begin(&mut self, address: u16, read: bool, data: Vec<u8>, len: usize) {
        let Some(code) = self.own_match(address) else {
            return;
        };
        self.remote = Some(Remote {
            read,
            data,
            len,
            pos: 0,
            awaiting_stop: false,
        });
        let dir = if read { isr::DIR } else { 0 };
        self.flags &= !(isr::DIR | isr::ADDCODE);
        self.flags |= isr::ADDR | isr::BUSY | dir | (code << isr::ADDCODE_POS);
    }

    /// Remote master writes its next byte, or stops.
    fn remote_feed(&mut self) {
        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        if let Some(&byte) = remote.data.get(remote.pos) {
            remote.pos += 1;
            self.rxdr = byte;
            self.flags |= isr::RXNE;
        } else {
            self.remote_stop();
        }
    }

    /// Remote master reads until it needs a byte that is not there yet. The
    /// last byte is NACKed; the stop follows once software clears NACKF.
    fn remote_pull(&mut self) {
        loop {
            let Some(remote) = self.remote.as_mut() else {
                return;
            };
            if remote.pos >= remote.len {
                remote.awaiting_stop = true;
                self.flags |= isr::NACKF;
                return;
            }
            match self.txdr.take() {
                Some(byte) => {
                    remote.pos += 1;
                    self.remote_received.push(byte);
                }
                None => {
                    self.flags |= isr::TXIS;
                    return;
                }
            }
        }
    }

    fn remote_stop(&mut self) {
        self.remote = None;
        self.flags |= isr::STOPF;
        self.flags &= !(isr::BUSY | isr::TXIS);
    }

    fn target(&self, address: u16) -> Option<&Target> {
        self.targets.iter().find(|t| t.address == address)
    }
}

/// Shared handle on the simulated bus.
#[derive(Clone, Default)]
pub struct Sim {
    bus: Rc<RefCell<Bus>>,
}

impl Sim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register value as software would see it, without read side effects.
    pub fn reg(&self, reg: Reg) -> u32 {
        let bus = self.bus.borrow();
        match reg {
            Reg::Isr => bus.isr(),
            Reg::Rxdr => u32::from(bus.rxdr),
            Reg::Cr1 => bus.cr1,
            Reg::Cr2 => bus.cr2,
            Reg::Oar1 => bus.oar1,
            Reg::Oar2 => bus.oar2,
            Reg::Timingr => bus.timingr,
            Reg::Autocr => bus.autocr,
            Reg::Icr => 0,
            Reg::Txdr => bus.txdr.map_or(0, u32::from),
        }
    }

    /// Force status flags, as a glitch on the bus would.
    pub fn raise(&self, bits: u32) {
        self.bus.borrow_mut().flags |= bits;
    }

    pub fn set_time(&self, ms: u32) {
        self.bus.borrow_mut().time = ms;
    }

    pub fn now(&self) -> u32 {
        self.bus.borrow().time
    }

    pub fn attach(&self, target: Target) {
        self.bus.borrow_mut().targets.push(target);
    }

    /// Data bytes a plain target has received.
    pub fn written(&self, address: u16) -> Vec<u8> {
        self.bus
            .borrow()
            .target(address)
            .map(|t| t.written.clone())
            .unwrap_or_default()
    }

    pub fn memory(&self, address: u16, start: u16, len: usize) -> Vec<u8> {
        let bus = self.bus.borrow();
        let Some(target) = bus.target(address) else {
            return Vec::new();
        };
        let start = usize::from(start);
        target.memory[start..start + len].to_vec()
    }

    pub fn phase_lengths(&self) -> Vec<u8> {
        self.bus.borrow().phase_lengths.clone()
    }

    pub fn starts(&self) -> usize {
        self.bus.borrow().starts
    }

    /// Stop conditions generated by this node as master.
    pub fn stops(&self) -> usize {
        self.bus.borrow().stops
    }

    /// CR2 writes carrying the STOP bit.
    pub fn stops_requested(&self) -> usize {
        self.bus.borrow().stops_requested
    }

    pub fn polls(&self) -> usize {
        self.bus.borrow().polls
    }

    pub fn cr2_writes(&self) -> usize {
        self.bus.borrow().cr2_writes
    }

    pub fn reset_counters(&self) {
        let mut bus = self.bus.borrow_mut();
        bus.cr2_writes = 0;
        bus.starts = 0;
        bus.stops = 0;
        bus.stops_requested = 0;
        bus.polls = 0;
        bus.phase_lengths.clear();
    }

    /// A remote master writes `data` to `address`.
    pub fn remote_write(&self, address: u16, data: &[u8]) {
        self.bus
            .borrow_mut()
            .remote_begin(address, false, data.to_vec(), data.len());
    }

    /// A remote master reads `len` bytes from `address`.
    pub fn remote_read(&self, address: u16, len: usize) {
        self.bus
            .borrow_mut()
            .remote_begin(address, true, Vec::new(), len);
    }

    /// Bytes the remote master has read so far.
    pub fn remote_received(&self) -> Vec<u8> {
        self.bus.borrow().remote_received.clone()
    }

    pub fn fail_next_dma_start(&self) {
        self.bus.borrow_mut().dma_fail_next = true;
    }

    /// Let the DMA controller service one pending request.
    pub fn pump_dma(&self) -> Option<DmaNote> {
        let mut bus = self.bus.borrow_mut();
        if let Some(note) = bus.dma_notes.pop_front() {
            return Some(note);
        }
        let tx = channel_index(DmaChannel::Tx);
        if bus.dma[tx].busy && bus.cr1 & cr1::TXDMAEN != 0 && bus.flags & isr::TXIS != 0 {
            let channel = &mut bus.dma[tx];
            let Some(DmaBuffer::ToPeripheral(ptr)) = channel.buffer else {
                return None;
            };
            // SAFETY: the engine lends `len` bytes at `ptr` for the transfer.
            let byte = unsafe { *ptr.add(channel.moved) };
            channel.moved += 1;
            let done = channel.moved == channel.len;
            channel.busy = !done;
            bus.write_txdr(byte);
            return Some(if done { DmaNote::Complete(DmaChannel::Tx) } else { DmaNote::Moved });
        }
        let rx = channel_index(DmaChannel::Rx);
        if bus.dma[rx].busy && bus.cr1 & cr1::RXDMAEN != 0 && bus.flags & isr::RXNE != 0 {
            let Some(DmaBuffer::FromPeripheral(ptr)) = bus.dma[rx].buffer else {
                return None;
            };
            let byte = bus.read_rxdr();
            let channel = &mut bus.dma[rx];
            // SAFETY: as above, for the receive buffer.
            unsafe { *ptr.add(channel.moved) = byte };
            channel.moved += 1;
            let done = channel.moved == channel.len;
            channel.busy = !done;
            return Some(if done { DmaNote::Complete(DmaChannel::Rx) } else { DmaNote::Moved });
        }
        None
    }
}

pub struct MockRegs(Sim);

impl I2cRegisters for MockRegs {
    fn read(&self, reg: Reg) -> u32 {
        self.0.bus.borrow_mut().read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.0.bus.borrow_mut().write(reg, value);
    }
}

/// Advances one millisecond per reading.
pub struct MockClock(Sim);

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        let mut bus = self.0.bus.borrow_mut();
        let now = bus.time;
        bus.time = now.wrapping_add(1);
        now
    }
}

pub struct MockDma {
    sim: Sim,
}

impl I2cDma for MockDma {
    fn start(
        &mut self,
        channel: DmaChannel,
        buffer: DmaBuffer,
        len: usize,
    ) -> Result<(), DmaFault> {
        let mut bus = self.sim.bus.borrow_mut();
        if bus.dma_fail_next {
            bus.dma_fail_next = false;
            return Err(DmaFault);
        }
        let slot = &mut bus.dma[channel_index(channel)];
        if slot.busy {
            return Err(DmaFault);
        }
        *slot = Channel {
            buffer: Some(buffer),
            len,
            moved: 0,
            busy: true,
        };
        Ok(())
    }

    fn abort(&mut self, channel: DmaChannel) -> Result<(), DmaFault> {
        let mut bus = self.sim.bus.borrow_mut();
        let slot = &mut bus.dma[channel_index(channel)];
        if !slot.busy {
            return Err(DmaFault);
        }
        slot.busy = false;
        bus.dma_notes.push_back(DmaNote::Aborted(channel));
        Ok(())
    }

    fn remaining_bytes(&self, channel: DmaChannel) -> usize {
        let bus = self.sim.bus.borrow();
        let slot = &bus.dma[channel_index(channel)];
        slot.len - slot.moved
    }

    fn state(&self, channel: DmaChannel) -> DmaState {
        if self.sim.bus.borrow().dma[channel_index(channel)].busy {
            DmaState::Busy
        } else {
            DmaState::Idle
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    MasterTx,
    MasterRx,
    MemTx,
    MemRx,
    SlaveTx,
    SlaveRx,
    AddressMatch(SlaveDirection, u16),
    ListenComplete,
    Error(ErrorFlags),
    AbortComplete,
}

#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub log: Vec<Callback>,
}

impl I2cCallbacks for RecordingCallbacks {
    fn master_tx_complete(&mut self) {
        self.log.push(Callback::MasterTx);
    }

    fn master_rx_complete(&mut self) {
        self.log.push(Callback::MasterRx);
    }

    fn mem_tx_complete(&mut self) {
        self.log.push(Callback::MemTx);
    }

    fn mem_rx_complete(&mut self) {
        self.log.push(Callback::MemRx);
    }

    fn slave_tx_complete(&mut self) {
        self.log.push(Callback::SlaveTx);
    }

    fn slave_rx_complete(&mut self) {
        self.log.push(Callback::SlaveRx);
    }

    fn address_match(&mut self, direction: SlaveDirection, address: u16) {
        self.log.push(Callback::AddressMatch(direction, address));
    }

    fn listen_complete(&mut self) {
        self.log.push(Callback::ListenComplete);
    }

    fn error(&mut self, errors: ErrorFlags) {
        self.log.push(Callback::Error(errors));
    }

    fn abort_complete(&mut self) {
        self.log.push(Callback::AbortComplete);
    }
}

pub fn handle<'b>(sim: &Sim) -> TestHandle<'b> {
    I2cHandle::new(MockRegs(sim.clone()), MockClock(sim.clone()))
}

/// Handle with a simulated DMA pair and recorded callbacks.
pub fn recording<'b>(sim: &Sim) -> RecHandle<'b> {
    handle(sim)
        .with_dma(MockDma { sim: sim.clone() })
        .with_callbacks(RecordingCallbacks::default())
}

/// Deliver one interrupt if any source is pending. Returns false once the
/// bus is quiet.
pub fn step<D, C, L, M>(h: &mut I2cHandle<'_, MockRegs, MockClock, D, C, L, M>, sim: &Sim) -> bool
where
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    let status = Status(sim.reg(Reg::Isr) & isr::EVENT_MASK);
    let sources = sim.reg(Reg::Cr1);
    if !classify(status, sources).is_empty() {
        h.on_event_irq();
        true
    } else if !classify_errors(status, sources).is_empty() {
        h.on_error_irq();
        true
    } else {
        false
    }
}

pub fn drive<D, C, L, M>(h: &mut I2cHandle<'_, MockRegs, MockClock, D, C, L, M>, sim: &Sim)
where
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    for _ in 0..10_000 {
        if !step(h, sim) {
            return;
        }
    }
    panic!("interrupt storm");
}

/// Interleave DMA service with interrupt delivery until both are quiet.
pub fn drive_dma<C: I2cCallbacks>(
    h: &mut I2cHandle<'_, MockRegs, MockClock, MockDma, C>,
    sim: &Sim,
) {
    for _ in 0..100_000 {
        match sim.pump_dma() {
            Some(DmaNote::Moved) => {}
            Some(DmaNote::Complete(channel)) => h.on_dma_complete(channel),
            Some(DmaNote::Aborted(channel)) => h.on_dma_abort(channel),
            None => {
                if !step(h, sim) {
                    return;
                }
            }
        }
    }
    panic!("transfer did not settle");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_write_reaches_target() {
        let sim = Sim::new();
        sim.attach(Target::plain(0x50));
        let mut regs = MockRegs(sim.clone());
        regs.write(Reg::Cr1, cr1::PE);
        regs.write(Reg::Cr2, 0xA0 | (2 << cr2::NBYTES_POS) | cr2::AUTOEND | cr2::START);
        assert_ne!(sim.reg(Reg::Isr) & isr::TXIS, 0);
        regs.write(Reg::Txdr, 0x11);
        regs.write(Reg::Txdr, 0x22);
        assert_ne!(sim.reg(Reg::Isr) & isr::STOPF, 0);
        assert_eq!(sim.reg(Reg::Isr) & isr::BUSY, 0);
        assert_eq!(sim.written(0x50), vec![0x11, 0x22]);
    }

    #[test]
    fn test_unknown_address_is_nacked() {
        let sim = Sim::new();
        let mut regs = MockRegs(sim.clone());
        regs.write(Reg::Cr2, 0x20 | (1 << cr2::NBYTES_POS) | cr2::AUTOEND | cr2::START);
        assert_ne!(sim.reg(Reg::Isr) & isr::NACKF, 0);
        assert_ne!(sim.reg(Reg::Isr) & isr::STOPF, 0);
        assert_eq!(sim.stops(), 1);
    }

    #[test]
    fn test_remote_write_needs_matching_address() {
        let sim = Sim::new();
        let mut regs = MockRegs(sim.clone());
        regs.write(Reg::Cr1, cr1::PE);
        regs.write(Reg::Oar1, oar1::OA1EN | (0x3C << 1));
        sim.remote_write(0x3D, &[1]);
        assert_eq!(sim.reg(Reg::Isr) & isr::ADDR, 0);
        sim.remote_write(0x3C, &[1]);
        assert_ne!(sim.reg(Reg::Isr) & isr::ADDR, 0);
        assert_eq!(Status(sim.reg(Reg::Isr)).addr_code(), 0x3C);
    }
}
