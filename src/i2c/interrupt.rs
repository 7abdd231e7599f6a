// Licensed under the Apache-2.0 license

//! Interrupt-driven transfers.
//!
//! A start call arms the transfer and returns; the firmware then forwards the
//! peripheral's event and error vectors to [`I2cHandle::on_event_irq`] and
//! [`I2cHandle::on_error_irq`]. Each event invocation runs the service routine
//! armed by the start call, which moves at most one byte, re-arms the next
//! chunk, or finishes the transfer with exactly one terminal callback.
//!
//! The completion and error routines at the bottom of this file are shared
//! with the DMA strategy.

use crate::common::Logger;
use crate::i2c::common::{
    AddressingMode, EndMode, MemAddrSize, Mode, PreviousRole, SlaveDirection, State, XferOpt,
};
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::events::{classify, classify_errors, Event, ERROR_ORDER, MASTER_ORDER, SLAVE_ORDER};
use crate::i2c::handle::{I2cHandle, Isr, XferBuf};
use crate::i2c::registers::{cr1, cr2, icr, isr, oar1, oar2, IrqGroup, IrqSet, Reg, Status};
use crate::i2c::traits::{BusLock, Clock, DmaChannel, DmaPort, DmaState, I2cCallbacks, I2cRegisters};
use crate::i2c::transfer_config::{phase, sequential_request, StartStop};

impl<'b, R, K, D, C, L, M> I2cHandle<'b, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    /// Start writing `data` to `address`; completion is reported through
    /// `master_tx_complete`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an address outside the addressing mode, `Busy`
    /// if the handle is not idle or the bus is held.
    pub fn master_transmit_it(&mut self, address: u16, data: &'b [u8]) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.start_master_it(dev, XferBuf::Tx(data), data.len(), State::Tx)
    }

    /// Start reading `buffer.len()` bytes from `address`.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_it`](Self::master_transmit_it).
    pub fn master_receive_it(
        &mut self,
        address: u16,
        buffer: &'b mut [u8],
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = buffer.len();
        self.start_master_it(dev, XferBuf::Rx(buffer), len, State::Rx)
    }

    fn start_master_it(
        &mut self,
        dev: u16,
        buf: XferBuf<'b>,
        len: usize,
        state: State,
    ) -> Result<(), I2cError> {
        self.begin(state)?;
        if self.status().is_busy() {
            self.state = State::Idle;
            return Err(I2cError::Busy);
        }
        self.mode = Mode::Master;
        self.load(buf, len, None, Isr::MasterIt);

        let (nbytes, end) = phase(len, EndMode::AutoEnd);
        self.xfer.size = usize::from(nbytes);
        let (request, group) = direction_of(state);
        self.transfer_config(dev, nbytes, end, request);
        self.enable_irq(group);
        Ok(())
    }

    /// Start one frame of a chained write. See
    /// [`master_seq_transmit`](Self::master_seq_transmit) for how `opt`
    /// shapes the frame.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_it`](Self::master_transmit_it).
    pub fn master_seq_transmit_it(
        &mut self,
        address: u16,
        data: &'b [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.start_master_seq_it(dev, XferBuf::Tx(data), data.len(), opt, State::Tx)
    }

    /// Start one frame of a chained read.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_it`](Self::master_transmit_it).
    pub fn master_seq_receive_it(
        &mut self,
        address: u16,
        buffer: &'b mut [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = buffer.len();
        self.start_master_seq_it(dev, XferBuf::Rx(buffer), len, opt, State::Rx)
    }

    fn start_master_seq_it(
        &mut self,
        dev: u16,
        buf: XferBuf<'b>,
        len: usize,
        opt: XferOpt,
        state: State,
    ) -> Result<(), I2cError> {
        self.begin(state)?;
        self.mode = Mode::Master;
        let (start, group) = direction_of(state);
        let (opt, request) = sequential_request(self.previous, role_of(state), opt, start);
        self.load(buf, len, Some(opt), Isr::MasterIt);

        let (nbytes, end) = phase(len, opt.end_mode());
        self.xfer.size = usize::from(nbytes);
        self.transfer_config(dev, nbytes, end, request);
        self.enable_irq(group);
        Ok(())
    }

    /// Start writing `data` into the memory of device `address` at
    /// `mem_address`; completion is reported through `mem_tx_complete`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer or a bad address, `Busy` if the
    /// handle is not idle or the bus is held.
    pub fn mem_write_it(
        &mut self,
        address: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        data: &'b [u8],
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = data.len();
        self.claim_mem(dev, mem_address, mem_size, XferBuf::Tx(data), len, State::Tx, Isr::MemIt)?;
        self.mem_address_phase(mem_size);
        self.enable_irq(IrqGroup::Tx);
        Ok(())
    }

    /// Start reading `buffer.len()` bytes from the memory of device `address`.
    ///
    /// # Errors
    ///
    /// As for [`mem_write_it`](Self::mem_write_it).
    pub fn mem_read_it(
        &mut self,
        address: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        buffer: &'b mut [u8],
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = buffer.len();
        self.claim_mem(
            dev,
            mem_address,
            mem_size,
            XferBuf::Rx(buffer),
            len,
            State::Rx,
            Isr::MemIt,
        )?;
        self.mem_address_phase(mem_size);
        self.enable_irq(IrqGroup::Tx);
        Ok(())
    }

    /// Claim the handle for a memory transfer and prime the first memory
    /// address byte in TXDR.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn claim_mem(
        &mut self,
        dev: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        buf: XferBuf<'b>,
        len: usize,
        state: State,
        routine: Isr,
    ) -> Result<(), I2cError> {
        if len == 0 {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(state)?;
        if self.status().is_busy() {
            self.state = State::Idle;
            return Err(I2cError::Busy);
        }
        self.mode = Mode::MasterMemory;
        self.load(buf, len, None, routine);
        self.xfer.dev = dev;

        let [msb, lsb] = mem_address.to_be_bytes();
        match mem_size {
            MemAddrSize::Bits8 => {
                self.regs.write(Reg::Txdr, u32::from(lsb));
                self.xfer.mem_lsb = None;
            }
            MemAddrSize::Bits16 => {
                self.regs.write(Reg::Txdr, u32::from(msb));
                self.xfer.mem_lsb = Some(lsb);
            }
        }
        Ok(())
    }

    /// Start the write phase carrying the memory address. A write keeps going
    /// in the same direction afterwards; a read restarts.
    pub(crate) fn mem_address_phase(&mut self, mem_size: MemAddrSize) {
        let end = if self.state == State::Rx {
            EndMode::SoftEnd
        } else {
            EndMode::Reload
        };
        self.transfer_config(self.xfer.dev, mem_size as u8, end, StartStop::StartWrite);
    }

    /// Arm a slave transmission of `data` for the next read request.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer, `Busy` if the handle is not
    /// idle.
    pub fn slave_transmit_it(&mut self, data: &'b [u8]) -> Result<(), I2cError> {
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Tx)?;
        self.mode = Mode::Slave;
        self.acknowledge_enable();
        self.load(XferBuf::Tx(data), data.len(), None, Isr::SlaveIt);
        self.xfer.size = self.xfer.count;
        if !self.is_clock_stretching() {
            self.send_byte();
        }
        self.enable_irqs(IrqGroup::Tx, IrqGroup::Listen);
        Ok(())
    }

    /// Arm a slave reception into `buffer` for the next write request.
    ///
    /// # Errors
    ///
    /// As for [`slave_transmit_it`](Self::slave_transmit_it).
    pub fn slave_receive_it(&mut self, buffer: &'b mut [u8]) -> Result<(), I2cError> {
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Rx)?;
        self.mode = Mode::Slave;
        self.acknowledge_enable();
        let len = buffer.len();
        self.load(XferBuf::Rx(buffer), len, None, Isr::SlaveIt);
        self.xfer.size = len;
        self.enable_irqs(IrqGroup::Rx, IrqGroup::Listen);
        Ok(())
    }

    /// Answer the read request that matched while listening with `data`.
    /// Typically called from the `address_match` notification.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer, `Busy` unless a listen session
    /// is open.
    pub fn slave_seq_transmit_it(&mut self, data: &'b [u8], opt: XferOpt) -> Result<(), I2cError> {
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.prepare_slave_seq(State::TxListen, false)?;
        self.state = State::TxListen;
        self.mode = Mode::Slave;
        self.acknowledge_enable();
        self.load(XferBuf::Tx(data), data.len(), Some(opt), Isr::SlaveIt);
        self.xfer.size = self.xfer.count;
        self.release_address(SlaveDirection::Read);
        self.enable_irqs(IrqGroup::Tx, IrqGroup::Listen);
        Ok(())
    }

    /// Accept the write request that matched while listening into `buffer`.
    ///
    /// # Errors
    ///
    /// As for [`slave_seq_transmit_it`](Self::slave_seq_transmit_it).
    pub fn slave_seq_receive_it(
        &mut self,
        buffer: &'b mut [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.prepare_slave_seq(State::RxListen, false)?;
        self.state = State::RxListen;
        self.mode = Mode::Slave;
        self.acknowledge_enable();
        let len = buffer.len();
        self.load(XferBuf::Rx(buffer), len, Some(opt), Isr::SlaveIt);
        self.xfer.size = len;
        self.release_address(SlaveDirection::Write);
        self.enable_irqs(IrqGroup::Rx, IrqGroup::Listen);
        Ok(())
    }

    /// Check that a listen session is open and quiesce the direction that is
    /// about to be replaced by `to`. With `dma`, a request still pending in the
    /// same direction is cancelled as well.
    pub(crate) fn prepare_slave_seq(&mut self, to: State, dma: bool) -> Result<(), I2cError> {
        if !self.state.is_listening() {
            return Err(I2cError::Busy);
        }
        let (own, other, other_state, channel, other_channel) = if to == State::TxListen {
            (IrqSet::TX, IrqSet::RX, State::RxListen, DmaChannel::Tx, DmaChannel::Rx)
        } else {
            (IrqSet::RX, IrqSet::TX, State::TxListen, DmaChannel::Rx, DmaChannel::Tx)
        };
        self.disable_irq(IrqSet::LISTEN.with(own));
        if self.state == other_state {
            self.disable_irq(other);
            self.cancel_dma_request(other_channel);
        } else if dma && self.state == to {
            self.cancel_dma_request(channel);
        }
        Ok(())
    }

    /// Clear a pending address match in `direction` so the master's transfer
    /// proceeds.
    pub(crate) fn release_address(&mut self, direction: SlaveDirection) {
        let status = self.status();
        let read = direction == SlaveDirection::Read;
        if status.is_addr() && status.is_dir() == read {
            self.clear_flags(icr::ADDRCF);
        }
    }

    /// Drop the DMA request of `channel` if armed and abort the channel.
    fn cancel_dma_request(&mut self, channel: DmaChannel) {
        let bit = dma_enable_bit(channel);
        if self.regs.read(Reg::Cr1) & bit != 0 {
            self.regs.clear_bits(Reg::Cr1, bit);
            if self.dma.port_abort(channel).is_err() {
                self.treat_error();
            }
        }
    }

    /// Open a listen session: address matches are reported through
    /// `address_match` until the session ends.
    ///
    /// # Errors
    ///
    /// `Busy` if the handle is not idle.
    pub fn enable_listen_it(&mut self) -> Result<(), I2cError> {
        self.begin(State::Listen)?;
        self.isr = Isr::SlaveIt;
        self.enable_irq(IrqGroup::Listen);
        Ok(())
    }

    /// Close a listen session that has no transfer in progress.
    ///
    /// # Errors
    ///
    /// `Busy` unless the handle is in [`State::Listen`].
    pub fn disable_listen_it(&mut self) -> Result<(), I2cError> {
        self.transition(State::Listen, State::Idle)?;
        self.previous = PreviousRole::None;
        self.mode = Mode::None;
        self.isr = Isr::None;
        self.disable_irq(IrqSet::LISTEN);
        Ok(())
    }

    /// Terminate the master transfer in flight with a stop condition. The
    /// outcome is reported through `abort_complete`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if no master transfer is in progress or the address
    /// does not fit the addressing mode.
    pub fn master_abort_it(&mut self, address: u16) -> Result<(), I2cError> {
        if self.mode != Mode::Master {
            return Err(I2cError::InvalidParameter);
        }
        let dev = self.target(address)?;
        match self.state {
            State::Tx => {
                self.disable_irq(IrqSet::TX);
                self.previous = PreviousRole::MasterTx;
            }
            State::Rx => {
                self.disable_irq(IrqSet::RX);
                self.previous = PreviousRole::MasterRx;
            }
            _ => {}
        }
        self.state = State::Abort;
        self.transfer_config(dev, 1, EndMode::AutoEnd, StartStop::Stop);
        self.enable_irq(IrqGroup::Complete);
        self.logger.debug("i2c: abort requested");
        Ok(())
    }

    /// NACK the next byte received in slave mode, ending the transfer from
    /// this side.
    pub fn slave_abort(&mut self) {
        self.regs.set_bits(Reg::Cr2, cr2::NACK);
    }

    /// Event interrupt entry point.
    pub fn on_event_irq(&mut self) {
        let status = Status(self.regs.read(Reg::Isr) & isr::EVENT_MASK);
        let sources = self.regs.read(Reg::Cr1);
        match self.isr {
            Isr::None => {}
            Isr::MasterIt => self.master_isr_it(status, sources),
            Isr::MemIt => self.mem_isr_it(status, sources),
            Isr::SlaveIt => self.slave_isr_it(status, sources),
            Isr::MasterDma => self.master_isr_dma(status, sources),
            Isr::MemDma => self.mem_isr_dma(status, sources),
            Isr::SlaveDma => self.slave_isr_dma(status, sources),
        }
    }

    /// Error interrupt entry point.
    pub fn on_error_irq(&mut self) {
        let status = Status(self.regs.read(Reg::Isr) & isr::EVENT_MASK);
        let sources = self.regs.read(Reg::Cr1);
        let pending = classify_errors(status, sources);

        let mut found = ErrorFlags::NONE;
        for event in ERROR_ORDER {
            if !pending.contains(event) {
                continue;
            }
            let (flag, clear) = match event {
                Event::BusError => (ErrorFlags::BERR, icr::BERRCF),
                Event::Overrun => (ErrorFlags::OVR, icr::OVRCF),
                _ => (ErrorFlags::ARLO, icr::ARLOCF),
            };
            found |= flag;
            self.clear_flags(clear);
        }
        if !found.is_empty() {
            self.it_error(found);
        }
    }

    fn master_isr_it(&mut self, status: Status, sources: u32) {
        let mut status = status;
        let pending = classify(status, sources);
        match pending.first_of(&MASTER_ORDER) {
            Some(Event::Nack) => self.record_nack(),
            Some(Event::RxReady) => {
                status = status.without(isr::RXNE);
                self.receive_byte();
            }
            Some(Event::TxReady) => self.send_byte(),
            Some(Event::Reload) => {
                if self.xfer.count != 0 && self.xfer.size == 0 {
                    let dev = self.current_target();
                    let last = self.xfer.opt.map_or(EndMode::AutoEnd, XferOpt::end_mode);
                    self.reload(dev, last);
                } else if !self.is_autoend() {
                    self.master_seq_cplt();
                } else {
                    self.it_error(ErrorFlags::SIZE);
                }
            }
            Some(Event::TransferComplete) => self.master_transfer_complete(),
            _ => {}
        }
        if pending.contains(Event::Stop) {
            self.master_cplt(status);
        }
    }

    fn mem_isr_it(&mut self, status: Status, sources: u32) {
        let mut status = status;
        let pending = classify(status, sources);
        match pending.first_of(&MASTER_ORDER) {
            Some(Event::Nack) => self.record_nack(),
            Some(Event::RxReady) => {
                status = status.without(isr::RXNE);
                self.receive_byte();
            }
            Some(Event::TxReady) => match self.xfer.mem_lsb.take() {
                Some(lsb) => self.regs.write(Reg::Txdr, u32::from(lsb)),
                None => self.send_byte(),
            },
            Some(Event::Reload) => {
                if self.xfer.count != 0 && self.xfer.size == 0 {
                    self.reload(self.xfer.dev, EndMode::AutoEnd);
                } else {
                    self.it_error(ErrorFlags::SIZE);
                }
            }
            Some(Event::TransferComplete) => {
                self.disable_irq(IrqSet::TX);
                self.enable_irq(IrqGroup::Rx);
                self.start_data_phase();
            }
            _ => {}
        }
        if pending.contains(Event::Stop) {
            self.master_cplt(status);
        }
    }

    fn slave_isr_it(&mut self, status: Status, sources: u32) {
        let pending = classify(status, sources);
        let opt = self.xfer.opt;
        if pending.contains(Event::Stop) {
            self.slave_cplt(status);
        }
        match pending.first_of(&SLAVE_ORDER) {
            Some(Event::Nack) => {
                if self.xfer.count == 0 {
                    self.slave_end_of_data(status, opt);
                } else {
                    // The master stopped reading before the buffer ran out.
                    self.clear_flags(icr::NACKCF);
                    self.errors |= ErrorFlags::AF;
                    if opt.is_some_and(XferOpt::keeps_bus) {
                        self.it_error(self.errors);
                    }
                }
            }
            Some(Event::RxReady) => {
                if self.xfer.count > 0 {
                    self.receive_byte();
                }
                if self.xfer.count == 0 && opt.is_some() {
                    self.slave_seq_cplt();
                }
            }
            Some(Event::AddressMatch) => self.addr_cplt(),
            Some(Event::TxReady) => {
                if self.xfer.count > 0 {
                    self.send_byte();
                } else if opt.is_some_and(XferOpt::keeps_bus) {
                    self.slave_seq_cplt();
                }
            }
            _ => {}
        }
    }

    /// NACK from the remote master once every byte was delivered: the normal
    /// end of a slave transmission.
    pub(crate) fn slave_end_of_data(&mut self, status: Status, opt: Option<XferOpt>) {
        if self.state == State::Listen && opt.is_some_and(XferOpt::is_last) {
            self.listen_cplt(status);
        } else if self.state == State::TxListen && opt.is_some() {
            self.clear_flags(icr::NACKCF);
            self.flush_txdr();
            self.slave_seq_cplt();
        } else {
            self.clear_flags(icr::NACKCF);
        }
    }

    pub(crate) fn record_nack(&mut self) {
        self.clear_flags(icr::NACKCF);
        self.errors |= ErrorFlags::AF;
        self.flush_txdr();
    }

    pub(crate) fn is_autoend(&self) -> bool {
        self.regs.is_set(Reg::Cr2, cr2::AUTOEND)
    }

    /// Program the next chunk of the phase in flight.
    fn reload(&mut self, dev: u16, last: EndMode) {
        let (nbytes, end) = phase(self.xfer.count, last);
        self.xfer.size = usize::from(nbytes);
        self.transfer_config(dev, nbytes, end, StartStop::NoStartStop);
    }

    /// Restart into the data phase of a memory transfer once the address has
    /// gone out. Returns the byte count of the first data chunk.
    pub(crate) fn start_data_phase(&mut self) -> usize {
        let request = if self.state == State::Rx {
            StartStop::StartRead
        } else {
            StartStop::StartWrite
        };
        let (nbytes, end) = phase(self.xfer.count, EndMode::AutoEnd);
        self.xfer.size = usize::from(nbytes);
        self.transfer_config(self.xfer.dev, nbytes, end, request);
        self.xfer.size
    }

    /// TC with every byte moved: stop a plain transfer, hand a chained frame
    /// back with the bus held.
    pub(crate) fn master_transfer_complete(&mut self) {
        if self.xfer.count != 0 {
            self.it_error(ErrorFlags::SIZE);
        } else if !self.is_autoend() {
            if self.xfer.opt.is_none() {
                self.regs.set_bits(Reg::Cr2, cr2::STOP);
            } else {
                self.master_seq_cplt();
            }
        }
    }

    /// Address match while listening. In 10-bit mode own address 1 matches
    /// twice (header, then full address) and only the second match is
    /// reported.
    pub(crate) fn addr_cplt(&mut self) {
        if !self.state.is_listening() {
            self.clear_flags(icr::ADDRCF);
            return;
        }
        // ADDCODE lies outside the event snapshot.
        let live = self.status();
        let direction = if live.is_dir() {
            SlaveDirection::Read
        } else {
            SlaveDirection::Write
        };
        let code = live.addr_code();
        let own1 = (self.regs.read(Reg::Oar1) & oar1::OA1) as u16;

        if self.addressing_mode() == AddressingMode::TenBit {
            if code & 0x03 == (own1 >> 8) & 0x03 {
                self.addr_events += 1;
                if self.addr_events == 2 {
                    self.addr_events = 0;
                    self.clear_flags(icr::ADDRCF);
                    self.callbacks.address_match(direction, own1);
                }
            } else {
                let own2 = ((self.regs.read(Reg::Oar2) & oar2::OA2) >> 1) as u16;
                self.disable_irq(IrqSet::LISTEN);
                self.callbacks.address_match(direction, own2);
            }
        } else {
            self.disable_irq(IrqSet::LISTEN);
            self.callbacks.address_match(direction, code);
        }
    }

    /// A chained master frame ended with the bus held.
    pub(crate) fn master_seq_cplt(&mut self) {
        self.mode = Mode::None;
        self.isr = Isr::None;
        if self.state == State::Tx {
            self.previous = PreviousRole::MasterTx;
            self.disable_irq(IrqSet::TX);
            self.state = State::Idle;
            self.callbacks.master_tx_complete();
        } else {
            self.previous = PreviousRole::MasterRx;
            self.disable_irq(IrqSet::RX);
            self.state = State::Idle;
            self.callbacks.master_rx_complete();
        }
    }

    /// A chained slave frame ended; the listen session stays open.
    pub(crate) fn slave_seq_cplt(&mut self) {
        let sources = self.regs.read(Reg::Cr1);
        self.mode = Mode::None;
        if sources & cr1::TXDMAEN != 0 {
            self.regs.clear_bits(Reg::Cr1, cr1::TXDMAEN);
        } else if sources & cr1::RXDMAEN != 0 {
            self.regs.clear_bits(Reg::Cr1, cr1::RXDMAEN);
        }
        match self.state {
            State::TxListen => {
                self.previous = PreviousRole::SlaveTx;
                self.disable_irq(IrqSet::TX);
                self.state = State::Listen;
                self.callbacks.slave_tx_complete();
            }
            State::RxListen => {
                self.previous = PreviousRole::SlaveRx;
                self.disable_irq(IrqSet::RX);
                self.state = State::Listen;
                self.callbacks.slave_rx_complete();
            }
            _ => {}
        }
    }

    /// Stop detected at the end of a master transfer.
    pub(crate) fn master_cplt(&mut self, status: Status) {
        self.clear_flags(icr::STOPCF);
        match self.state {
            State::Tx => {
                self.disable_irq(IrqSet::TX);
                self.previous = PreviousRole::MasterTx;
            }
            State::Rx => {
                self.disable_irq(IrqSet::RX);
                self.previous = PreviousRole::MasterRx;
            }
            _ => {}
        }
        self.reset_cr2();
        self.isr = Isr::None;
        self.xfer.opt = None;

        if status.is_nackf() {
            self.clear_flags(icr::NACKCF);
            self.errors |= ErrorFlags::AF;
        }
        if self.state == State::Abort && status.is_rxne() {
            // Discard the byte clocked in while the stop went out.
            let _ = self.regs.read(Reg::Rxdr);
        }
        self.flush_txdr();

        if self.state == State::Abort || !self.errors.is_empty() {
            self.it_error(self.errors);
            return;
        }
        let memory = self.mode == Mode::MasterMemory;
        match self.state {
            State::Tx => {
                self.previous = PreviousRole::None;
                self.state = State::Idle;
                self.mode = Mode::None;
                if memory {
                    self.callbacks.mem_tx_complete();
                } else {
                    self.callbacks.master_tx_complete();
                }
            }
            State::Rx => {
                self.previous = PreviousRole::None;
                self.state = State::Idle;
                self.mode = Mode::None;
                if memory {
                    self.callbacks.mem_rx_complete();
                } else {
                    self.callbacks.master_rx_complete();
                }
            }
            _ => {}
        }
    }

    /// Stop detected at the end of a slave transfer.
    pub(crate) fn slave_cplt(&mut self, status: Status) {
        let sources = self.regs.read(Reg::Cr1);
        let mut status = status;
        self.clear_flags(icr::STOPCF);
        match self.state {
            State::Tx | State::TxListen | State::Listen => {
                self.disable_irq(IrqSet::LISTEN.with(IrqSet::TX));
                self.previous = PreviousRole::SlaveTx;
            }
            State::Rx | State::RxListen => {
                self.disable_irq(IrqSet::LISTEN.with(IrqSet::RX));
                self.previous = PreviousRole::SlaveRx;
            }
            _ => {}
        }
        self.reset_cr2();
        self.flush_txdr();

        if sources & cr1::TXDMAEN != 0 {
            self.regs.clear_bits(Reg::Cr1, cr1::TXDMAEN);
            self.xfer.count = self.dma.port_remaining(DmaChannel::Tx);
        } else if sources & cr1::RXDMAEN != 0 {
            self.regs.clear_bits(Reg::Cr1, cr1::RXDMAEN);
            self.xfer.count = self.dma.port_remaining(DmaChannel::Rx);
        }

        if status.is_rxne() {
            status = status.without(isr::RXNE);
            self.drain_rx();
        }
        if self.xfer.count != 0 {
            self.errors |= ErrorFlags::AF;
        }
        self.mode = Mode::None;
        self.isr = Isr::None;

        if !self.errors.is_empty() {
            self.it_error(self.errors);
            if self.state == State::Listen {
                self.listen_cplt(status);
            }
        } else if self.xfer.opt.is_some() {
            self.slave_seq_cplt();
            self.xfer.opt = None;
            self.previous = PreviousRole::None;
            self.state = State::Idle;
            self.callbacks.listen_complete();
        } else if self.state == State::Rx {
            self.previous = PreviousRole::None;
            self.state = State::Idle;
            self.callbacks.slave_rx_complete();
        } else {
            self.previous = PreviousRole::None;
            self.state = State::Idle;
            self.callbacks.slave_tx_complete();
        }
    }

    /// Read a byte left in RXDR, keeping it if the buffer still has room.
    /// Returns whether it was kept.
    fn drain_rx(&mut self) -> bool {
        if self.xfer.size > 0 {
            self.receive_byte();
            true
        } else {
            let _ = self.regs.read(Reg::Rxdr);
            false
        }
    }

    /// End of a listen session.
    pub(crate) fn listen_cplt(&mut self, status: Status) {
        self.xfer.opt = None;
        self.previous = PreviousRole::None;
        self.isr = Isr::None;
        if status.is_rxne() && self.drain_rx() {
            self.errors |= ErrorFlags::AF;
        }
        self.disable_irq(IrqSet::ALL);
        self.clear_flags(icr::NACKCF);
        self.mode = Mode::None;
        self.state = State::Idle;
        self.callbacks.listen_complete();
    }

    /// Terminate the transfer in flight with `code` accumulated.
    ///
    /// A listen session survives the error. A DMA channel still moving data
    /// is aborted first and the terminal notification is deferred to
    /// [`on_dma_abort`](Self::on_dma_abort).
    pub(crate) fn it_error(&mut self, code: ErrorFlags) {
        let channel = self.live_dma_channel();
        self.mode = Mode::None;
        self.xfer.opt = None;
        self.xfer.count = 0;
        self.errors |= code;
        self.logger.error("i2c: transfer error");

        if self.state.is_listening() {
            self.disable_irq(IrqSet::TX.with(IrqSet::RX));
            self.state = State::Listen;
            self.isr = Isr::SlaveIt;
        } else {
            self.disable_irq(IrqSet::ALL);
            self.flush_txdr();
            if self.state != State::Abort {
                self.state = State::Idle;
            }
            let status = self.status();
            if status.is_stopf() {
                if status.is_nackf() {
                    self.clear_flags(icr::NACKCF);
                    self.errors |= ErrorFlags::AF;
                }
                self.clear_flags(icr::STOPCF);
            }
            self.isr = Isr::None;
        }

        match channel {
            Some(channel) => {
                self.regs.clear_bits(Reg::Cr1, dma_enable_bit(channel));
                if self.dma.port_state(channel) == DmaState::Idle {
                    self.treat_error();
                } else if self.dma.port_abort(channel).is_err() {
                    self.treat_error();
                }
            }
            None => self.treat_error(),
        }
    }

    /// DMA channel owned by the transfer being terminated. An armed request
    /// bit wins; between chunks the bit is clear while the channel is still
    /// armed, so the active routine and direction decide.
    fn live_dma_channel(&self) -> Option<DmaChannel> {
        let sources = self.regs.read(Reg::Cr1);
        if sources & cr1::TXDMAEN != 0 {
            return Some(DmaChannel::Tx);
        }
        if sources & cr1::RXDMAEN != 0 {
            return Some(DmaChannel::Rx);
        }
        let dma_routine = matches!(self.isr, Isr::MasterDma | Isr::MemDma | Isr::SlaveDma);
        match self.state {
            State::Tx | State::TxListen if dma_routine => Some(DmaChannel::Tx),
            State::Rx | State::RxListen if dma_routine => Some(DmaChannel::Rx),
            // Completion paths record the role just before failing over here.
            _ if self.previous.is_tx() => Some(DmaChannel::Tx),
            _ if self.previous.is_rx() => Some(DmaChannel::Rx),
            _ => None,
        }
    }

    /// Deliver the terminal notification of a failed or aborted transfer.
    pub(crate) fn treat_error(&mut self) {
        self.previous = PreviousRole::None;
        if self.state == State::Abort {
            self.state = State::Idle;
            self.logger.debug("i2c: abort complete");
            self.callbacks.abort_complete();
        } else {
            self.callbacks.error(self.errors);
        }
    }
}

/// Start directive and interrupt group of a master transfer in `state`.
pub(crate) const fn direction_of(state: State) -> (StartStop, IrqGroup) {
    if matches!(state, State::Rx) {
        (StartStop::StartRead, IrqGroup::Rx)
    } else {
        (StartStop::StartWrite, IrqGroup::Tx)
    }
}

pub(crate) const fn role_of(state: State) -> PreviousRole {
    if matches!(state, State::Rx) {
        PreviousRole::MasterRx
    } else {
        PreviousRole::MasterTx
    }
}

pub(crate) const fn dma_enable_bit(channel: DmaChannel) -> u32 {
    match channel {
        DmaChannel::Tx => cr1::TXDMAEN,
        DmaChannel::Rx => cr1::RXDMAEN,
    }
}
