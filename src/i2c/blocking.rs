// Licensed under the Apache-2.0 license

//! Polling transfers.
//!
//! Each call owns the handle from `Idle` until it returns and busy-waits in
//! the primitives of [`wait`](super::wait). The timeout budget is shared by
//! the whole call, not by each byte.

use crate::common::Logger;
use crate::i2c::common::{
    AddressingMode, EndMode, MemAddrSize, Mode, PreviousRole, State, XferOpt, MAX_DELAY,
    TIMEOUT_BUSY,
};
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::handle::I2cHandle;
use crate::i2c::registers::{icr, isr, Reg};
use crate::i2c::traits::{BusLock, Clock, DmaPort, I2cCallbacks, I2cRegisters};
use crate::i2c::transfer_config::{address_only, phase, sequential_request, StartStop};
use fugit::MillisDurationU32 as MilliSeconds;

impl<R, K, D, C, L, M> I2cHandle<'_, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    /// Write `data` to `address` and generate a stop.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an address outside the addressing mode, `Busy`
    /// if the handle is not idle, `Timeout` if the budget runs out, or the bus
    /// error that ended the transfer.
    pub fn master_transmit(
        &mut self,
        address: u16,
        data: &[u8],
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.begin(State::Tx)?;
        let start = self.clock.now_ms();
        let result = self.master_write_phases(dev, data, timeout, start);
        self.finish_blocking(result)
    }

    fn master_write_phases(
        &mut self,
        dev: u16,
        data: &[u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::BUSY, false, TIMEOUT_BUSY, start)?;
        self.mode = Mode::Master;
        self.errors = ErrorFlags::NONE;

        let (len, end) = phase(data.len(), EndMode::AutoEnd);
        self.transfer_config(dev, len, end, StartStop::StartWrite);
        self.write_bytes(dev, data, usize::from(len), EndMode::AutoEnd, timeout, start)?;

        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.reset_cr2();
        Ok(())
    }

    /// Read `buffer.len()` bytes from `address` and generate a stop.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit`](Self::master_transmit).
    pub fn master_receive(
        &mut self,
        address: u16,
        buffer: &mut [u8],
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.begin(State::Rx)?;
        let start = self.clock.now_ms();
        let result = self.master_read_phases(dev, buffer, timeout, start);
        self.finish_blocking(result)
    }

    fn master_read_phases(
        &mut self,
        dev: u16,
        buffer: &mut [u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::BUSY, false, TIMEOUT_BUSY, start)?;
        self.mode = Mode::Master;
        self.errors = ErrorFlags::NONE;

        let (len, end) = phase(buffer.len(), EndMode::AutoEnd);
        self.transfer_config(dev, len, end, StartStop::StartRead);
        self.read_bytes(dev, buffer, usize::from(len), EndMode::AutoEnd, timeout, start)?;

        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.reset_cr2();
        Ok(())
    }

    /// Send `data` through phases already started for `dev`, reloading every
    /// 255 bytes. The last phase ends with `last`.
    fn write_bytes(
        &mut self,
        dev: u16,
        data: &[u8],
        mut chunk_left: usize,
        last: EndMode,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        for (sent, &byte) in data.iter().enumerate() {
            self.wait_txis(timeout, start)?;
            self.regs.write(Reg::Txdr, u32::from(byte));
            chunk_left = chunk_left.saturating_sub(1);
            let remaining = data.len() - sent - 1;
            if remaining != 0 && chunk_left == 0 {
                self.wait_flag(isr::TCR, true, timeout, start)?;
                let (len, end) = phase(remaining, last);
                chunk_left = usize::from(len);
                self.transfer_config(dev, len, end, StartStop::NoStartStop);
            }
        }
        Ok(())
    }

    /// Receive into `buffer` through phases already started for `dev`.
    fn read_bytes(
        &mut self,
        dev: u16,
        buffer: &mut [u8],
        mut chunk_left: usize,
        last: EndMode,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        let total = buffer.len();
        for (received, slot) in buffer.iter_mut().enumerate() {
            self.wait_rxne(chunk_left, timeout, start)?;
            *slot = self.regs.read(Reg::Rxdr) as u8;
            chunk_left = chunk_left.saturating_sub(1);
            let remaining = total - received - 1;
            if remaining != 0 && chunk_left == 0 {
                self.wait_flag(isr::TCR, true, timeout, start)?;
                let (len, end) = phase(remaining, last);
                chunk_left = usize::from(len);
                self.transfer_config(dev, len, end, StartStop::NoStartStop);
            }
        }
        Ok(())
    }

    /// Write one frame of a chained transfer and wait for it to end.
    ///
    /// Frames in the same direction continue the bus phase without a restart
    /// unless `opt` is one of the `Other` variants. A frame whose option keeps
    /// the bus returns with the bus held.
    ///
    /// # Errors
    ///
    /// As for [`master_transmit`](Self::master_transmit).
    pub fn master_seq_transmit(
        &mut self,
        address: u16,
        data: &[u8],
        opt: XferOpt,
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.begin(State::Tx)?;
        let start = self.clock.now_ms();
        self.mode = Mode::Master;
        self.errors = ErrorFlags::NONE;

        let (opt, request) = sequential_request(
            self.previous,
            PreviousRole::MasterTx,
            opt,
            StartStop::StartWrite,
        );
        let last = opt.end_mode();
        let (len, end) = phase(data.len(), last);
        self.transfer_config(dev, len, end, request);
        let result = self
            .write_bytes(dev, data, usize::from(len), last, timeout, start)
            .and_then(|()| self.end_frame(last, PreviousRole::MasterTx, timeout, start));
        self.finish_blocking(result)
    }

    /// Read one frame of a chained transfer, see
    /// [`master_seq_transmit`](Self::master_seq_transmit).
    ///
    /// # Errors
    ///
    /// As for [`master_transmit`](Self::master_transmit).
    pub fn master_seq_receive(
        &mut self,
        address: u16,
        buffer: &mut [u8],
        opt: XferOpt,
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        self.begin(State::Rx)?;
        let start = self.clock.now_ms();
        self.mode = Mode::Master;
        self.errors = ErrorFlags::NONE;

        let (opt, request) = sequential_request(
            self.previous,
            PreviousRole::MasterRx,
            opt,
            StartStop::StartRead,
        );
        let last = opt.end_mode();
        let (len, end) = phase(buffer.len(), last);
        self.transfer_config(dev, len, end, request);
        let result = self
            .read_bytes(dev, buffer, usize::from(len), last, timeout, start)
            .and_then(|()| self.end_frame(last, PreviousRole::MasterRx, timeout, start));
        self.finish_blocking(result)
    }

    fn end_frame(
        &mut self,
        last: EndMode,
        role: PreviousRole,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        match last {
            EndMode::AutoEnd => {
                self.wait_stopf(timeout, start)?;
                self.clear_flags(icr::STOPCF);
                self.reset_cr2();
                self.previous = PreviousRole::None;
            }
            EndMode::Reload => {
                self.wait_flag(isr::TCR, true, timeout, start)?;
                self.previous = role;
            }
            EndMode::SoftEnd => {
                self.wait_flag(isr::TC, true, timeout, start)?;
                self.previous = role;
            }
        }
        Ok(())
    }

    /// Serve one read request of a remote master with `data`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer, `Busy` if the handle is not
    /// idle, `Timeout`, or the bus error that ended the transfer.
    pub fn slave_transmit(&mut self, data: &[u8], timeout: MilliSeconds) -> Result<(), I2cError> {
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Tx)?;
        let start = self.clock.now_ms();
        self.mode = Mode::Slave;
        self.errors = ErrorFlags::NONE;
        self.acknowledge_enable();
        let result = self.slave_write_phases(data, timeout, start);
        self.acknowledge_disable();
        self.finish_blocking(result)
    }

    fn slave_write_phases(
        &mut self,
        data: &[u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::ADDR, true, timeout, start)?;
        let mut bytes = data.iter();
        if !self.is_clock_stretching() {
            if let Some(&byte) = bytes.next() {
                self.regs.write(Reg::Txdr, u32::from(byte));
            }
        }
        self.clear_flags(icr::ADDRCF);
        if self.addressing_mode() == AddressingMode::TenBit {
            self.wait_flag(isr::ADDR, true, timeout, start)?;
            self.clear_flags(icr::ADDRCF);
        }
        self.wait_flag(isr::DIR, true, timeout, start)?;

        for &byte in bytes {
            self.wait_txis(timeout, start)?;
            self.regs.write(Reg::Txdr, u32::from(byte));
        }

        self.wait_flag(isr::NACKF, true, timeout, start)?;
        self.flush_txdr();
        self.clear_flags(icr::NACKCF);
        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.wait_flag(isr::BUSY, false, timeout, start)
    }

    /// Accept one write request of a remote master into `buffer`.
    ///
    /// # Errors
    ///
    /// As for [`slave_transmit`](Self::slave_transmit).
    pub fn slave_receive(
        &mut self,
        buffer: &mut [u8],
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Rx)?;
        let start = self.clock.now_ms();
        self.mode = Mode::Slave;
        self.errors = ErrorFlags::NONE;
        self.acknowledge_enable();
        let result = self.slave_read_phases(buffer, timeout, start);
        self.acknowledge_disable();
        self.finish_blocking(result)
    }

    fn slave_read_phases(
        &mut self,
        buffer: &mut [u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::ADDR, true, timeout, start)?;
        self.clear_flags(icr::ADDRCF);
        self.wait_flag(isr::DIR, false, timeout, start)?;

        let total = buffer.len();
        for (received, slot) in buffer.iter_mut().enumerate() {
            if let Err(err) = self.wait_rxne(total - received, timeout, start) {
                if self.status().is_rxne() {
                    *slot = self.regs.read(Reg::Rxdr) as u8;
                }
                return Err(err);
            }
            *slot = self.regs.read(Reg::Rxdr) as u8;
        }

        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.wait_flag(isr::BUSY, false, timeout, start)
    }

    /// Write `data` into the memory of device `address` starting at
    /// `mem_address`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty buffer or a bad address, otherwise as
    /// for [`master_transmit`](Self::master_transmit).
    pub fn mem_write(
        &mut self,
        address: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        data: &[u8],
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        if data.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Tx)?;
        let start = self.clock.now_ms();
        let result = self.mem_write_phases(dev, mem_address, mem_size, data, timeout, start);
        self.finish_blocking(result)
    }

    fn mem_write_phases(
        &mut self,
        dev: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        data: &[u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::BUSY, false, TIMEOUT_BUSY, start)?;
        self.mode = Mode::MasterMemory;
        self.errors = ErrorFlags::NONE;

        self.request_memory_address(dev, mem_address, mem_size, EndMode::Reload, timeout, start)?;
        self.wait_flag(isr::TCR, true, timeout, start)?;

        let (len, end) = phase(data.len(), EndMode::AutoEnd);
        self.transfer_config(dev, len, end, StartStop::NoStartStop);
        self.write_bytes(dev, data, usize::from(len), EndMode::AutoEnd, timeout, start)?;

        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.reset_cr2();
        Ok(())
    }

    /// Read `buffer.len()` bytes from the memory of device `address` starting
    /// at `mem_address`.
    ///
    /// # Errors
    ///
    /// As for [`mem_write`](Self::mem_write).
    pub fn mem_read(
        &mut self,
        address: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        buffer: &mut [u8],
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        if buffer.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Rx)?;
        let start = self.clock.now_ms();
        let result = self.mem_read_phases(dev, mem_address, mem_size, buffer, timeout, start);
        self.finish_blocking(result)
    }

    fn mem_read_phases(
        &mut self,
        dev: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        buffer: &mut [u8],
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        self.wait_flag(isr::BUSY, false, TIMEOUT_BUSY, start)?;
        self.mode = Mode::MasterMemory;
        self.errors = ErrorFlags::NONE;

        self.request_memory_address(dev, mem_address, mem_size, EndMode::SoftEnd, timeout, start)?;
        self.wait_flag(isr::TC, true, timeout, start)?;

        let (mut chunk_left, end) = phase(buffer.len(), EndMode::AutoEnd);
        self.transfer_config(dev, chunk_left, end, StartStop::StartRead);
        let total = buffer.len();
        for (received, slot) in buffer.iter_mut().enumerate() {
            self.wait_flag(isr::RXNE, true, timeout, start)?;
            *slot = self.regs.read(Reg::Rxdr) as u8;
            chunk_left = chunk_left.saturating_sub(1);
            let remaining = total - received - 1;
            if remaining != 0 && chunk_left == 0 {
                self.wait_flag(isr::TCR, true, timeout, start)?;
                let (len, end) = phase(remaining, EndMode::AutoEnd);
                chunk_left = len;
                self.transfer_config(dev, len, end, StartStop::NoStartStop);
            }
        }

        self.wait_stopf(timeout, start)?;
        self.clear_flags(icr::STOPCF);
        self.reset_cr2();
        Ok(())
    }

    /// Send the memory address bytes as the first write phase.
    fn request_memory_address(
        &mut self,
        dev: u16,
        mem_address: u16,
        mem_size: MemAddrSize,
        end: EndMode,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        let [msb, lsb] = mem_address.to_be_bytes();
        self.transfer_config(dev, mem_size as u8, end, StartStop::StartWrite);
        self.wait_txis(timeout, start)?;
        if mem_size == MemAddrSize::Bits16 {
            self.regs.write(Reg::Txdr, u32::from(msb));
            self.wait_txis(timeout, start)?;
        }
        self.regs.write(Reg::Txdr, u32::from(lsb));
        Ok(())
    }

    /// Address `address` up to `trials` times with an empty write.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for zero trials or a bad address, `Busy` if the
    /// handle is not idle or the bus stays busy, `Timeout` if no attempt was
    /// acknowledged.
    pub fn is_device_ready(
        &mut self,
        address: u16,
        trials: u32,
        timeout: MilliSeconds,
    ) -> Result<(), I2cError> {
        let dev = self.target(address)?;
        if trials == 0 {
            return Err(I2cError::InvalidParameter);
        }
        self.begin(State::Tx)?;
        self.mode = Mode::Master;
        self.errors = ErrorFlags::NONE;
        let mode = self.addressing_mode();

        for _ in 0..trials {
            let start = self.clock.now_ms();
            while self.status().is_busy() {
                if self.expired(start, timeout) {
                    self.mode = Mode::None;
                    self.state = State::Idle;
                    return Err(I2cError::Busy);
                }
            }

            self.regs.write(Reg::Cr2, address_only(dev, mode));
            loop {
                let status = self.status();
                if status.is_stopf() || status.is_nackf() {
                    break;
                }
                if timeout != MAX_DELAY && self.expired(start, timeout) {
                    self.mode = Mode::None;
                    self.state = State::Idle;
                    return Err(I2cError::Timeout);
                }
            }

            if self.status().is_nackf() {
                self.clear_flags(icr::NACKCF);
                if self.wait_flag(isr::STOPF, true, timeout, start).is_ok() {
                    self.clear_flags(icr::STOPCF);
                }
            } else if self.wait_flag(isr::STOPF, true, timeout, start).is_ok() {
                self.clear_flags(icr::STOPCF);
                self.mode = Mode::None;
                self.state = State::Idle;
                return Ok(());
            }
        }

        self.logger.debug("i2c: device not ready");
        self.mode = Mode::None;
        self.state = State::Idle;
        Err(I2cError::Timeout)
    }

    /// Return a blocking call to `Idle`. A timeout also resets CR2 so the
    /// peripheral is left ready for the next transfer.
    fn finish_blocking(&mut self, result: Result<(), I2cError>) -> Result<(), I2cError> {
        if let Err(err) = result {
            if err == I2cError::Timeout {
                self.reset_cr2();
                self.logger.error("i2c: blocking transfer timed out");
            } else {
                self.logger.error("i2c: blocking transfer failed");
            }
            self.previous = PreviousRole::None;
        }
        self.mode = Mode::None;
        self.state = State::Idle;
        result
    }
}
