// Licensed under the Apache-2.0 license

//! DMA-offloaded transfers.
//!
//! Chunking follows the interrupt strategy, but the bytes of each chunk are
//! moved by the DMA collaborator. A chunk boundary costs two callbacks: the
//! channel's completion (wired to [`I2cHandle::on_dma_complete`]) re-arms the
//! channel for the next chunk, then the reload event reprograms NBYTES and
//! re-enables the peripheral's DMA request. The event and error vectors still
//! have to be forwarded to [`I2cHandle::on_event_irq`] and
//! [`I2cHandle::on_error_irq`] for address, NACK and stop handling.
//!
//! Starting a DMA transfer requires a handle built with
//! [`with_dma`](I2cHandle::with_dma).

use crate::common::Logger;
use crate::i2c::common::{
    EndMode, MemAddrSize, Mode, PreviousRole, SlaveDirection, State, XferOpt, MAX_NBYTE_SIZE,
};
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::events::{classify, Event, MASTER_DMA_ORDER, MEM_DMA_ORDER, SLAVE_DMA_ORDER};
use crate::i2c::handle::{I2cHandle, Isr, XferBuf};
use crate::i2c::interrupt::{direction_of, dma_enable_bit, role_of};
use crate::i2c::registers::{cr1, cr2, icr, IrqGroup, IrqSet, Reg, Status};
use crate::i2c::traits::{
    BusLock, Clock, DmaBuffer, DmaChannel, DmaFault, DmaPort, I2cCallbacks, I2cDma, I2cRegisters,
};
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
    pub(crate) fn master_isr_dma(&mut self, status: Status, sources: u32) {
        let pending = classify(status, sources);
        match pending.first_of(&MASTER_DMA_ORDER) {
            Some(Event::Nack) => self.dma_nack(),
            Some(Event::Reload) => {
                self.regs.clear_bits(Reg::Cr1, cr1::TCIE);
                if self.xfer.count != 0 {
                    let dev = self.current_target();
                    let last = self.xfer.opt.map_or(EndMode::AutoEnd, XferOpt::end_mode);
                    self.dma_reload(dev, last);
                } else if !self.is_autoend() {
                    self.master_seq_cplt();
                } else {
                    self.it_error(ErrorFlags::SIZE);
                }
            }
            Some(Event::TransferComplete) => self.master_transfer_complete(),
            _ => {
                if pending.contains(Event::Stop) {
                    self.master_cplt(status);
                }
            }
        }
    }

    pub(crate) fn mem_isr_dma(&mut self, status: Status, sources: u32) {
        let pending = classify(status, sources);
        match pending.first_of(&MEM_DMA_ORDER) {
            Some(Event::Nack) => self.dma_nack(),
            Some(Event::TxReady) => {
                if let Some(lsb) = self.xfer.mem_lsb.take() {
                    self.regs.write(Reg::Txdr, u32::from(lsb));
                }
            }
            Some(Event::Reload) => {
                self.disable_irq(IrqSet::TX);
                self.enable_irq(IrqGroup::Error);
                if self.xfer.count != 0 {
                    self.dma_reload(self.xfer.dev, EndMode::AutoEnd);
                } else {
                    self.it_error(ErrorFlags::SIZE);
                }
            }
            Some(Event::TransferComplete) => {
                // Memory address sent: restart in the data direction.
                self.disable_irq(IrqSet::TX);
                self.enable_irq(IrqGroup::Error);
                let size = self.start_data_phase();
                self.xfer.count = self.xfer.count.saturating_sub(size);
                self.enable_dma_request();
            }
            _ => {
                if pending.contains(Event::Stop) {
                    self.master_cplt(status);
                }
            }
        }
    }

    pub(crate) fn slave_isr_dma(&mut self, status: Status, sources: u32) {
        let pending = classify(status, sources);
        let opt = self.xfer.opt;
        if pending.contains(Event::Stop) {
            self.slave_cplt(status);
        }
        match pending.first_of(&SLAVE_DMA_ORDER) {
            Some(Event::Nack) => {
                let armed = if sources & cr1::TXDMAEN != 0 {
                    Some(DmaChannel::Tx)
                } else if sources & cr1::RXDMAEN != 0 {
                    Some(DmaChannel::Rx)
                } else {
                    None
                };
                match armed {
                    Some(channel) if self.dma.port_remaining(channel) == 0 => {
                        self.slave_end_of_data(status, opt);
                    }
                    Some(_) => {
                        // The master stopped reading before the buffer ran out.
                        self.clear_flags(icr::NACKCF);
                        self.errors |= ErrorFlags::AF;
                        if opt.is_some_and(XferOpt::keeps_bus) {
                            self.previous = match self.state {
                                State::Tx | State::TxListen => PreviousRole::SlaveTx,
                                State::Rx | State::RxListen => PreviousRole::SlaveRx,
                                _ => self.previous,
                            };
                            self.it_error(self.errors);
                        }
                    }
                    None => self.clear_flags(icr::NACKCF),
                }
            }
            Some(Event::AddressMatch) => self.addr_cplt(),
            _ => {}
        }
    }

    /// NACK during a DMA master phase. The stop is generated by hardware; the
    /// error is reported from the stop event.
    fn dma_nack(&mut self) {
        self.clear_flags(icr::NACKCF);
        self.errors |= ErrorFlags::AF;
        self.enable_irq(IrqGroup::CompleteDma);
        self.flush_txdr();
    }

    /// Program the next chunk after a reload event. The channel was already
    /// re-armed by the previous chunk's completion.
    fn dma_reload(&mut self, dev: u16, last: EndMode) {
        let (nbytes, end) = phase(self.xfer.count, last);
        self.xfer.size = usize::from(nbytes);
        self.transfer_config(dev, nbytes, end, StartStop::NoStartStop);
        self.xfer.count = self.xfer.count.saturating_sub(self.xfer.size);
        self.enable_dma_request();
    }

    fn enable_dma_request(&mut self) {
        let bit = if self.state == State::Rx {
            cr1::RXDMAEN
        } else {
            cr1::TXDMAEN
        };
        self.regs.set_bits(Reg::Cr1, bit);
    }

    /// Arm `channel` for the current chunk of the lent buffer.
    fn start_dma(&mut self, channel: DmaChannel) -> Result<(), DmaFault> {
        let range = self.xfer.pos..self.xfer.pos + self.xfer.size;
        let buffer = match (&mut self.xfer.buf, channel) {
            (XferBuf::Tx(data), DmaChannel::Tx) => {
                DmaBuffer::ToPeripheral(data.get(range).ok_or(DmaFault)?.as_ptr())
            }
            (XferBuf::Rx(buf), DmaChannel::Rx) => {
                DmaBuffer::FromPeripheral(buf.get_mut(range).ok_or(DmaFault)?.as_mut_ptr())
            }
            _ => return Err(DmaFault),
        };
        self.dma.port_start(channel, buffer, self.xfer.size)
    }

    /// Arm the first chunk. On refusal the handle falls back to `fallback`
    /// with the DMA error recorded.
    fn arm_dma(&mut self, channel: DmaChannel, fallback: State) -> Result<(), I2cError> {
        if self.start_dma(channel).is_ok() {
            return Ok(());
        }
        self.errors |= ErrorFlags::DMA;
        self.mode = Mode::None;
        self.isr = if fallback == State::Listen {
            Isr::SlaveIt
        } else {
            Isr::None
        };
        self.state = fallback;
        self.logger.error("i2c: dma start failed");
        Err(I2cError::DmaError)
    }

    /// Channel completion during a master or memory transfer.
    fn master_dma_complete(&mut self, channel: DmaChannel) {
        self.regs.clear_bits(Reg::Cr1, dma_enable_bit(channel));
        if self.xfer.count == 0 {
            self.enable_irq(IrqGroup::CompleteDma);
            return;
        }
        self.xfer.pos += self.xfer.size;
        self.xfer.size = self.xfer.count.min(MAX_NBYTE_SIZE);
        if self.start_dma(channel).is_err() {
            self.it_error(ErrorFlags::DMA);
        } else {
            self.enable_irq(IrqGroup::Reload);
        }
    }

    /// Channel completion during a slave transfer. Without a chained frame
    /// the remote master's stop ends the transfer.
    fn slave_dma_complete(&mut self, channel: DmaChannel) {
        let opt = self.xfer.opt;
        let done = match channel {
            DmaChannel::Tx => opt.is_some_and(XferOpt::keeps_bus),
            DmaChannel::Rx => opt.is_some() && self.dma.port_remaining(DmaChannel::Rx) == 0,
        };
        if done {
            self.regs.clear_bits(Reg::Cr1, dma_enable_bit(channel));
            self.slave_seq_cplt();
        }
    }
}

impl<'b, R, K, D, C, L, M> I2cHandle<'b, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: I2cDma,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    /// Start writing `data` to `address` through the TX channel.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an address outside the addressing mode, `Busy`
    /// if the handle is not idle or the bus is held, `DmaError` if the channel
    /// refused the request.
    pub fn master_transmit_dma(&mut self, address: u16, data: &'b [u8]) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.start_master_dma(dev, XferBuf::Tx(data), data.len(), None, State::Tx)
    }

    /// Start reading `buffer.len()` bytes from `address` through the RX
    /// channel.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_dma`](Self::master_transmit_dma).
    pub fn master_receive_dma(
        &mut self,
        address: u16,
        buffer: &'b mut [u8],
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = buffer.len();
        self.start_master_dma(dev, XferBuf::Rx(buffer), len, None, State::Rx)
    }

    /// One frame of a chained write, moved by DMA.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_dma`](Self::master_transmit_dma).
    pub fn master_seq_transmit_dma(
        &mut self,
        address: u16,
        data: &'b [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.start_master_dma(dev, XferBuf::Tx(data), data.len(), Some(opt), State::Tx)
    }

    /// One frame of a chained read, moved by DMA.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit_dma`](Self::master_transmit_dma).
    pub fn master_seq_receive_dma(
        &mut self,
        address: u16,
        buffer: &'b mut [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = buffer.len();
        self.start_master_dma(dev, XferBuf::Rx(buffer), len, Some(opt), State::Rx)
    }

    fn start_master_dma(
        &mut self,
        dev: u16,
        buf: XferBuf<'b>,
        len: usize,
        opt: Option<XferOpt>,
        state: State,
    ) -> Result<(), I2cError> {
        self.begin(state)?;
        let (start, group) = direction_of(state);
        let (opt, request, last) = match opt {
            Some(opt) => {
                let (opt, request) = sequential_request(self.previous, role_of(state), opt, start);
                (Some(opt), request, opt.end_mode())
            }
            None => {
                if self.status().is_busy() {
                    self.state = State::Idle;
                    return Err(I2cError::Busy);
                }
                (None, start, EndMode::AutoEnd)
            }
        };
        self.mode = Mode::Master;
        self.load(buf, len, opt, Isr::MasterDma);

        let (nbytes, end) = phase(len, last);
        self.xfer.size = usize::from(nbytes);
        if self.xfer.size == 0 {
            // Address-only frame: nothing for the channel to move.
            self.isr = Isr::MasterIt;
            self.transfer_config(dev, 0, EndMode::AutoEnd, start);
            self.enable_irq(group);
            return Ok(());
        }

        let channel = channel_of(state);
        self.arm_dma(channel, State::Idle)?;
        self.transfer_config(dev, nbytes, end, request);
        self.xfer.count -= self.xfer.size;
        self.enable_irq(IrqGroup::Error);
        self.regs.set_bits(Reg::Cr1, dma_enable_bit(channel));
        Ok(())
    }

    /// Write `data` into the memory of device `address` through the TX
    /// channel.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer or a bad address, `Busy` if the
    /// handle is not idle or the bus is held, `DmaError` if the channel
    /// refused the request.
    pub fn mem_write_dma(
        &mut self,
        address: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        data: &'b [u8],
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        let len = data.len();
        self.claim_mem(dev, mem_address, mem_size, XferBuf::Tx(data), len, State::Tx, Isr::MemDma)?;
        self.start_mem_dma(mem_size, DmaChannel::Tx)
    }

    /// Read `buffer.len()` bytes from the memory of device `address` through
    /// the RX channel.
    ///
    /// # Errors
    ///
    /// As for [`mem_write_dma`](Self::mem_write_dma).
    pub fn mem_read_dma(
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
            Isr::MemDma,
        )?;
        self.start_mem_dma(mem_size, DmaChannel::Rx)
    }

    /// The channel is armed before the address phase. Its bytes are counted
    /// once the data phase is programmed.
    fn start_mem_dma(
        &mut self,
        mem_size: MemAddrSize,
        channel: DmaChannel,
    ) -> Result<(), I2cError> {
        self.xfer.size = self.xfer.count.min(MAX_NBYTE_SIZE);
        self.arm_dma(channel, State::Idle)?;
        self.mem_address_phase(mem_size);
        self.enable_irq(IrqGroup::Tx);
        Ok(())
    }

    /// Arm a slave transmission of `data` through the TX channel.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer, `Busy` if the handle is not
    /// idle, `DmaError` if the channel refused the request.
    pub fn slave_transmit_dma(&mut self, data: &'b [u8]) -> Result<(), I2cError> {
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Tx)?;
        self.mode = Mode::Slave;
        self.load(XferBuf::Tx(data), data.len(), None, Isr::SlaveDma);
        self.xfer.size = self.xfer.count;
        if !self.is_clock_stretching() {
            // Without stretching the first byte must already sit in TXDR.
            self.send_byte();
        }
        if self.xfer.count != 0 {
            self.arm_dma(DmaChannel::Tx, State::Idle)?;
        }
        self.acknowledge_enable();
        self.enable_irq(IrqGroup::Listen);
        if self.xfer.count != 0 {
            self.regs.set_bits(Reg::Cr1, cr1::TXDMAEN);
        }
        Ok(())
    }

    /// Arm a slave reception into `buffer` through the RX channel.
    ///
    /// # Errors
    ///
    /// As for [`slave_transmit_dma`](Self::slave_transmit_dma).
    pub fn slave_receive_dma(&mut self, buffer: &'b mut [u8]) -> Result<(), I2cError> {
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Rx)?;
        self.mode = Mode::Slave;
        let len = buffer.len();
        self.load(XferBuf::Rx(buffer), len, None, Isr::SlaveDma);
        self.xfer.size = len;
        self.arm_dma(DmaChannel::Rx, State::Idle)?;
        self.acknowledge_enable();
        self.enable_irq(IrqGroup::Listen);
        self.regs.set_bits(Reg::Cr1, cr1::RXDMAEN);
        Ok(())
    }

    /// Answer the read request that matched while listening, through the TX
    /// channel.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer, `Busy` unless a listen session
    /// is open, `DmaError` if the channel refused the request. The listen
    /// session survives a refused request.
    pub fn slave_seq_transmit_dma(&mut self, data: &'b [u8], opt: XferOpt) -> Result<(), I2cError> {
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.prepare_slave_seq(State::TxListen, true)?;
        self.state = State::TxListen;
        self.start_slave_seq_dma(XferBuf::Tx(data), data.len(), opt, DmaChannel::Tx)
    }

    /// Accept the write request that matched while listening, through the RX
    /// channel.
    ///
    /// # Errors
    ///
    /// As for [`slave_seq_transmit_dma`](Self::slave_seq_transmit_dma).
    pub fn slave_seq_receive_dma(
        &mut self,
        buffer: &'b mut [u8],
        opt: XferOpt,
    ) -> Result<(), I2cError> {
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.prepare_slave_seq(State::RxListen, true)?;
        self.state = State::RxListen;
        let len = buffer.len();
        self.start_slave_seq_dma(XferBuf::Rx(buffer), len, opt, DmaChannel::Rx)
    }

    fn start_slave_seq_dma(
        &mut self,
        buf: XferBuf<'b>,
        len: usize,
        opt: XferOpt,
        channel: DmaChannel,
    ) -> Result<(), I2cError> {
        self.mode = Mode::Slave;
        self.acknowledge_enable();
        self.load(buf, len, Some(opt), Isr::SlaveDma);
        self.xfer.size = len;
        self.arm_dma(channel, State::Listen)?;
        self.xfer.count -= self.xfer.size;
        self.xfer.size = 0;

        let direction = match channel {
            DmaChannel::Tx => SlaveDirection::Read,
            DmaChannel::Rx => SlaveDirection::Write,
        };
        self.release_address(direction);
        self.regs.set_bits(Reg::Cr1, dma_enable_bit(channel));
        self.enable_irq(IrqGroup::Listen);
        Ok(())
    }

    /// The DMA collaborator finished moving the armed chunk on `channel`.
    pub fn on_dma_complete(&mut self, channel: DmaChannel) {
        match self.isr {
            Isr::MasterDma | Isr::MemDma => self.master_dma_complete(channel),
            Isr::SlaveDma => self.slave_dma_complete(channel),
            _ => {}
        }
    }

    /// The DMA collaborator reported a transfer error on `channel`.
    pub fn on_dma_error(&mut self, channel: DmaChannel) {
        self.regs.clear_bits(Reg::Cr1, dma_enable_bit(channel));
        self.regs.set_bits(Reg::Cr2, cr2::NACK);
        self.it_error(ErrorFlags::DMA);
    }

    /// An abort requested by the engine finished on `channel`.
    pub fn on_dma_abort(&mut self, _channel: DmaChannel) {
        self.logger.debug("i2c: dma abort complete");
        self.treat_error();
    }
}

const fn channel_of(state: State) -> DmaChannel {
    if matches!(state, State::Rx) {
        DmaChannel::Rx
    } else {
        DmaChannel::Tx
    }
}
