// Licensed under the Apache-2.0 license

//! The controller handle: one per peripheral instance.
//!
//! The handle owns its collaborators and the context of the transfer in flight.
//! Transfer entry points live in [`blocking`](super::blocking),
//! [`interrupt`](super::interrupt) and [`dma`](super::dma); this module holds
//! the lifecycle, the runtime configuration and the register helpers they
//! share.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{
    AddressingMode, AmTrigger, AmTriggerPolarity, EndMode, I2cConfig, Mode, OwnAddress2Mask,
    PreviousRole, State, XferOpt,
};
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::registers::{autocr, cr1, cr2, isr, oar1, oar2, IrqGroup, IrqSet, Reg, Status};
use crate::i2c::traits::{
    BusLock, Clock, DmaPort, I2cCallbacks, I2cDma, I2cRegisters, NoCallbacks, NoDma, NoLock,
};
use crate::i2c::transfer_config::{encode, sadd, StartStop};
use fugit::MillisDurationU32 as MilliSeconds;

/// Service routine armed for the next event interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Isr {
    None,
    MasterIt,
    MemIt,
    SlaveIt,
    MasterDma,
    MemDma,
    SlaveDma,
}

/// Buffer borrowed by an interrupt or DMA transfer.
#[derive(Debug)]
pub(crate) enum XferBuf<'b> {
    None,
    Tx(&'b [u8]),
    Rx(&'b mut [u8]),
}

/// Context of the transfer in flight.
#[derive(Debug)]
pub(crate) struct Xfer<'b> {
    pub(crate) buf: XferBuf<'b>,
    /// Cursor into `buf`.
    pub(crate) pos: usize,
    /// Bytes left in the current hardware phase.
    pub(crate) size: usize,
    /// Bytes left in the whole transfer.
    pub(crate) count: usize,
    pub(crate) opt: Option<XferOpt>,
    /// Target address in SADD layout.
    pub(crate) dev: u16,
    /// Low byte of a 16-bit memory address still to be sent.
    pub(crate) mem_lsb: Option<u8>,
}

impl Xfer<'_> {
    const fn idle() -> Self {
        Self {
            buf: XferBuf::None,
            pos: 0,
            size: 0,
            count: 0,
            opt: None,
            dev: 0,
            mem_lsb: None,
        }
    }
}

/// Transaction engine for one I2C instance.
///
/// `'b` is the lifetime of the buffers lent to interrupt and DMA transfers.
/// The collaborators default to "absent": no DMA, no-op callbacks, no logging
/// and no bus lock. Swap them in with the `with_*` builders.
pub struct I2cHandle<'b, R, K, D = NoDma, C = NoCallbacks, L = NoOpLogger, M = NoLock> {
    pub(crate) regs: R,
    pub(crate) clock: K,
    pub(crate) dma: D,
    pub(crate) callbacks: C,
    pub(crate) logger: L,
    pub(crate) lock: M,
    pub(crate) state: State,
    pub(crate) mode: Mode,
    pub(crate) previous: PreviousRole,
    pub(crate) errors: ErrorFlags,
    pub(crate) xfer: Xfer<'b>,
    pub(crate) isr: Isr,
    pub(crate) addr_events: u8,
    pub(crate) user_data: usize,
}

impl<'b, R: I2cRegisters, K: Clock> I2cHandle<'b, R, K> {
    /// Bind a register file and a tick source. The handle starts in
    /// [`State::Init`] and needs [`set_config`](Self::set_config) before use.
    pub fn new(regs: R, clock: K) -> Self {
        Self {
            regs,
            clock,
            dma: NoDma,
            callbacks: NoCallbacks,
            logger: NoOpLogger,
            lock: NoLock,
            state: State::Init,
            mode: Mode::None,
            previous: PreviousRole::None,
            errors: ErrorFlags::NONE,
            xfer: Xfer::idle(),
            isr: Isr::None,
            addr_events: 0,
            user_data: 0,
        }
    }
}

impl<'b, R, K, D, C, L, M> I2cHandle<'b, R, K, D, C, L, M> {
    #[must_use]
    pub fn with_dma<D2: I2cDma>(self, dma: D2) -> I2cHandle<'b, R, K, D2, C, L, M> {
        I2cHandle {
            regs: self.regs,
            clock: self.clock,
            dma,
            callbacks: self.callbacks,
            logger: self.logger,
            lock: self.lock,
            state: self.state,
            mode: self.mode,
            previous: self.previous,
            errors: self.errors,
            xfer: self.xfer,
            isr: self.isr,
            addr_events: self.addr_events,
            user_data: self.user_data,
        }
    }

    #[must_use]
    pub fn with_callbacks<C2: I2cCallbacks>(
        self,
        callbacks: C2,
    ) -> I2cHandle<'b, R, K, D, C2, L, M> {
        I2cHandle {
            regs: self.regs,
            clock: self.clock,
            dma: self.dma,
            callbacks,
            logger: self.logger,
            lock: self.lock,
            state: self.state,
            mode: self.mode,
            previous: self.previous,
            errors: self.errors,
            xfer: self.xfer,
            isr: self.isr,
            addr_events: self.addr_events,
            user_data: self.user_data,
        }
    }

    #[must_use]
    pub fn with_logger<L2: Logger>(self, logger: L2) -> I2cHandle<'b, R, K, D, C, L2, M> {
        I2cHandle {
            regs: self.regs,
            clock: self.clock,
            dma: self.dma,
            callbacks: self.callbacks,
            logger,
            lock: self.lock,
            state: self.state,
            mode: self.mode,
            previous: self.previous,
            errors: self.errors,
            xfer: self.xfer,
            isr: self.isr,
            addr_events: self.addr_events,
            user_data: self.user_data,
        }
    }

    #[must_use]
    pub fn with_bus_lock<M2: BusLock>(self, lock: M2) -> I2cHandle<'b, R, K, D, C, L, M2> {
        I2cHandle {
            regs: self.regs,
            clock: self.clock,
            dma: self.dma,
            callbacks: self.callbacks,
            logger: self.logger,
            lock,
            state: self.state,
            mode: self.mode,
            previous: self.previous,
            errors: self.errors,
            xfer: self.xfer,
            isr: self.isr,
            addr_events: self.addr_events,
            user_data: self.user_data,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Error flags of the last transfer. Cleared when the next one starts.
    pub fn last_errors(&self) -> ErrorFlags {
        self.errors
    }

    /// Opaque word the application attached with
    /// [`set_user_data`](Self::set_user_data), 0 by default.
    pub fn user_data(&self) -> usize {
        self.user_data
    }

    pub fn set_user_data(&mut self, data: usize) {
        self.user_data = data;
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn dma(&self) -> &D {
        &self.dma
    }

    /// Completion status of the interrupt or DMA transfer last started.
    ///
    /// # Errors
    ///
    /// `WouldBlock` while the transfer is in flight, otherwise the error the
    /// transfer ended with.
    pub fn poll_complete(&self) -> nb::Result<(), I2cError> {
        match self.state {
            State::Tx | State::Rx | State::TxListen | State::RxListen | State::Abort => {
                Err(nb::Error::WouldBlock)
            }
            _ => match self.errors.to_error() {
                Some(err) => Err(nb::Error::Other(err)),
                None => Ok(()),
            },
        }
    }
}

impl<'b, R, K, D, C, L, M> I2cHandle<'b, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    /// Program timing and own address 1, then enable the peripheral.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the own address does not fit the addressing mode,
    /// `Busy` if a transfer is in progress.
    pub fn set_config(&mut self, config: &I2cConfig) -> Result<(), I2cError> {
        if config.own_address1 > config.addressing_mode.max_address() {
            return Err(I2cError::InvalidParameter);
        }
        if !matches!(self.state, State::Init | State::Idle) {
            return Err(I2cError::Busy);
        }

        self.regs.clear_bits(Reg::Cr1, cr1::PE);
        self.regs.write(Reg::Timingr, config.timing);
        self.regs.clear_bits(Reg::Oar1, oar1::OA1EN | oar1::OA1MODE);
        let own = match config.addressing_mode {
            AddressingMode::SevenBit => (u32::from(config.own_address1) << 1) & 0xFE,
            AddressingMode::TenBit => (u32::from(config.own_address1) & oar1::OA1) | oar1::OA1MODE,
        };
        self.regs.modify(Reg::Oar1, oar1::OA1 | oar1::OA1MODE, own | oar1::OA1EN);
        self.set_master_addressing(config.addressing_mode);
        self.regs.set_bits(Reg::Cr2, cr2::AUTOEND | cr2::NACK);
        self.regs.set_bits(Reg::Cr1, cr1::PE);

        self.state = State::Idle;
        Ok(())
    }

    /// Read the configuration back from the peripheral.
    pub fn config(&self) -> I2cConfig {
        let addressing_mode = self.addressing_mode();
        let own = self.regs.read(Reg::Oar1);
        let own_address1 = if own & oar1::OA1MODE != 0 {
            (own & oar1::OA1) as u16
        } else {
            ((own & 0xFE) >> 1) as u16
        };
        I2cConfig {
            timing: self.regs.read(Reg::Timingr),
            own_address1,
            addressing_mode,
        }
    }

    /// Disable the peripheral and return to [`State::Reset`].
    pub fn deinit(&mut self) {
        self.regs.clear_bits(Reg::Cr1, cr1::PE);
        self.isr = Isr::None;
        self.mode = Mode::None;
        self.state = State::Reset;
    }

    /// # Errors
    ///
    /// Whatever the bus lock reports, typically `Busy` on timeout.
    pub fn acquire_bus(&mut self, timeout: MilliSeconds) -> Result<(), I2cError> {
        self.lock.acquire(timeout)
    }

    /// # Errors
    ///
    /// Whatever the bus lock reports when it was not held.
    pub fn release_bus(&mut self) -> Result<(), I2cError> {
        self.lock.release()
    }

    pub fn timing(&self) -> u32 {
        self.regs.read(Reg::Timingr)
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn set_timing(&mut self, timing: u32) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.write(Reg::Timingr, timing))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_analog_filter(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Cr1, cr1::ANFOFF))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_analog_filter(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Cr1, cr1::ANFOFF))
    }

    pub fn is_analog_filter_enabled(&self) -> bool {
        !self.regs.is_set(Reg::Cr1, cr1::ANFOFF)
    }

    /// Digital noise filter length in kernel clock periods, 0 disables it.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` above 15, `Busy` unless the handle is idle.
    pub fn set_digital_filter(&mut self, periods: u8) -> Result<(), I2cError> {
        if periods > 15 {
            return Err(I2cError::InvalidParameter);
        }
        self.reconfigure(|regs| {
            regs.modify(Reg::Cr1, cr1::DNF, u32::from(periods) << cr1::DNF_POS);
        })
    }

    pub fn digital_filter(&self) -> u8 {
        ((self.regs.read(Reg::Cr1) & cr1::DNF) >> cr1::DNF_POS) as u8
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_clock_stretching(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Cr1, cr1::NOSTRETCH))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_clock_stretching(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Cr1, cr1::NOSTRETCH))
    }

    pub fn is_clock_stretching_enabled(&self) -> bool {
        !self.regs.is_set(Reg::Cr1, cr1::NOSTRETCH)
    }

    /// Acknowledge the general call address in slave mode.
    ///
    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_general_call(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Cr1, cr1::GCEN))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_general_call(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Cr1, cr1::GCEN))
    }

    pub fn is_general_call_enabled(&self) -> bool {
        self.regs.is_set(Reg::Cr1, cr1::GCEN)
    }

    /// Wake the MCU from stop mode on an address match.
    ///
    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_wakeup(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Cr1, cr1::WUPEN))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_wakeup(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Cr1, cr1::WUPEN))
    }

    pub fn is_wakeup_enabled(&self) -> bool {
        self.regs.is_set(Reg::Cr1, cr1::WUPEN)
    }

    /// Fast-mode plus drive strength for 1 MHz buses.
    ///
    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_fast_mode_plus(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Cr1, cr1::FMP))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_fast_mode_plus(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Cr1, cr1::FMP))
    }

    pub fn is_fast_mode_plus_enabled(&self) -> bool {
        self.regs.is_set(Reg::Cr1, cr1::FMP)
    }

    /// Select the trigger that starts a transfer in autonomous mode. The
    /// trigger stays inactive until [`enable_am_trigger`](Self::enable_am_trigger).
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a source above 15, `Busy` unless the handle is
    /// idle.
    pub fn set_am_trigger(&mut self, trigger: AmTrigger) -> Result<(), I2cError> {
        if trigger.source > 15 {
            return Err(I2cError::InvalidParameter);
        }
        let mut value = u32::from(trigger.source) << autocr::TRIGSEL_POS;
        if trigger.polarity == AmTriggerPolarity::Falling {
            value |= autocr::TRIGPOL;
        }
        self.reconfigure(|regs| {
            regs.modify(Reg::Autocr, autocr::TRIGSEL | autocr::TRIGPOL, value);
        })
    }

    pub fn am_trigger(&self) -> AmTrigger {
        let value = self.regs.read(Reg::Autocr);
        AmTrigger {
            source: ((value & autocr::TRIGSEL) >> autocr::TRIGSEL_POS) as u8,
            polarity: if value & autocr::TRIGPOL != 0 {
                AmTriggerPolarity::Falling
            } else {
                AmTriggerPolarity::Rising
            },
        }
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_am_trigger(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Autocr, autocr::TRIGEN))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_am_trigger(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Autocr, autocr::TRIGEN))
    }

    pub fn is_am_trigger_enabled(&self) -> bool {
        self.regs.is_set(Reg::Autocr, autocr::TRIGEN)
    }

    /// Program the 7-bit own address 2 and its compare mask. The address stays
    /// disabled until [`enable_own_address2`](Self::enable_own_address2).
    ///
    /// # Errors
    ///
    /// `InvalidParameter` above 0x7F, `Busy` unless the handle is idle.
    pub fn set_own_address2(&mut self, address: u8, mask: OwnAddress2Mask) -> Result<(), I2cError> {
        if address > 0x7F {
            return Err(I2cError::InvalidParameter);
        }
        let value = ((u32::from(address) << 1) & oar2::OA2) | ((mask as u32) << oar2::OA2MSK_POS);
        self.reconfigure(|regs| regs.modify(Reg::Oar2, oar2::OA2 | oar2::OA2MSK, value))
    }

    pub fn own_address2(&self) -> (u8, OwnAddress2Mask) {
        let value = self.regs.read(Reg::Oar2);
        let address = ((value & oar2::OA2) >> 1) as u8;
        let mask = OwnAddress2Mask::from_bits((value & oar2::OA2MSK) >> oar2::OA2MSK_POS);
        (address, mask)
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn enable_own_address2(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.set_bits(Reg::Oar2, oar2::OA2EN))
    }

    /// # Errors
    ///
    /// `Busy` unless the handle is idle.
    pub fn disable_own_address2(&mut self) -> Result<(), I2cError> {
        self.reconfigure(|regs| regs.clear_bits(Reg::Oar2, oar2::OA2EN))
    }

    /// Run `change` with the peripheral disabled.
    fn reconfigure(&mut self, change: impl FnOnce(&mut R)) -> Result<(), I2cError> {
        if self.state != State::Idle {
            return Err(I2cError::Busy);
        }
        self.regs.clear_bits(Reg::Cr1, cr1::PE);
        change(&mut self.regs);
        self.regs.set_bits(Reg::Cr1, cr1::PE);
        Ok(())
    }

    /// Atomically move from `Idle` to `to`.
    pub(crate) fn begin(&mut self, to: State) -> Result<(), I2cError> {
        self.transition(State::Idle, to)
    }

    /// Atomically move from `from` to `to`, or fail with `Busy`.
    pub(crate) fn transition(&mut self, from: State, to: State) -> Result<(), I2cError> {
        let state = &mut self.state;
        let moved = critical_section::with(|_| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            self.logger.debug("i2c: handle busy");
            Err(I2cError::Busy)
        }
    }

    pub(crate) fn addressing_mode(&self) -> AddressingMode {
        if self.regs.is_set(Reg::Cr2, cr2::ADD10) {
            AddressingMode::TenBit
        } else {
            AddressingMode::SevenBit
        }
    }

    /// Addressing mode of the transfers this node starts as master.
    pub(crate) fn set_master_addressing(&mut self, mode: AddressingMode) {
        match mode {
            AddressingMode::SevenBit => self.regs.clear_bits(Reg::Cr2, cr2::ADD10),
            AddressingMode::TenBit => self.regs.set_bits(Reg::Cr2, cr2::ADD10),
        }
    }

    /// Check `address` against the addressing mode and return its SADD form.
    pub(crate) fn target(&self, address: u16) -> Result<u16, I2cError> {
        let mode = self.addressing_mode();
        if address > mode.max_address() {
            return Err(I2cError::InvalidParameter);
        }
        Ok(sadd(mode, address))
    }

    /// Target of the phase in flight, read back from CR2.
    pub(crate) fn current_target(&self) -> u16 {
        (self.regs.read(Reg::Cr2) & cr2::SADD) as u16
    }

    pub(crate) fn status(&self) -> Status {
        Status(self.regs.read(Reg::Isr))
    }

    pub(crate) fn clear_flags(&mut self, icr_bits: u32) {
        self.regs.write(Reg::Icr, icr_bits);
    }

    /// Drop a byte primed in TXDR that will never be sent.
    pub(crate) fn flush_txdr(&mut self) {
        if self.status().is_txis() {
            self.regs.write(Reg::Txdr, 0);
        }
        if !self.status().is_txe() {
            self.regs.write(Reg::Isr, isr::TXE);
        }
    }

    pub(crate) fn reset_cr2(&mut self) {
        self.regs.clear_bits(Reg::Cr2, cr2::RESET_MASK);
    }

    pub(crate) fn transfer_config(
        &mut self,
        dev: u16,
        nbytes: u8,
        end: EndMode,
        request: StartStop,
    ) {
        let update = encode(dev, nbytes, end, request);
        self.regs.modify(Reg::Cr2, update.clear, update.set);
    }

    pub(crate) fn enable_irq(&mut self, group: IrqGroup) {
        self.regs.set_bits(Reg::Cr1, group.mask());
    }

    pub(crate) fn enable_irqs(&mut self, first: IrqGroup, second: IrqGroup) {
        self.regs.set_bits(Reg::Cr1, first.mask() | second.mask());
    }

    pub(crate) fn disable_irq(&mut self, set: IrqSet) {
        let mask = set.disable_mask(self.state.is_listening());
        self.regs.clear_bits(Reg::Cr1, mask);
    }

    /// Acknowledge the next received byte in slave mode.
    pub(crate) fn acknowledge_enable(&mut self) {
        self.regs.clear_bits(Reg::Cr2, cr2::NACK);
    }

    /// NACK any further address match until the next slave call.
    pub(crate) fn acknowledge_disable(&mut self) {
        self.regs.set_bits(Reg::Cr2, cr2::NACK);
    }

    pub(crate) fn is_clock_stretching(&self) -> bool {
        !self.regs.is_set(Reg::Cr1, cr1::NOSTRETCH)
    }

    /// Next byte of the lent transmit buffer. Past the end the bus gets 0xFF.
    pub(crate) fn take_tx_byte(&mut self) -> u8 {
        let byte = match &self.xfer.buf {
            XferBuf::Tx(data) => data.get(self.xfer.pos).copied().unwrap_or(0xFF),
            _ => 0xFF,
        };
        self.xfer.pos += 1;
        byte
    }

    /// Store a received byte into the lent receive buffer.
    pub(crate) fn put_rx_byte(&mut self, byte: u8) {
        if let XferBuf::Rx(buf) = &mut self.xfer.buf {
            if let Some(slot) = buf.get_mut(self.xfer.pos) {
                *slot = byte;
            }
        }
        self.xfer.pos += 1;
    }

    /// Write the next buffered byte to TXDR and count it.
    pub(crate) fn send_byte(&mut self) {
        let byte = self.take_tx_byte();
        self.regs.write(Reg::Txdr, u32::from(byte));
        self.xfer.size = self.xfer.size.saturating_sub(1);
        self.xfer.count = self.xfer.count.saturating_sub(1);
    }

    /// Read RXDR into the buffer and count it.
    pub(crate) fn receive_byte(&mut self) {
        let byte = self.regs.read(Reg::Rxdr) as u8;
        self.put_rx_byte(byte);
        self.xfer.size = self.xfer.size.saturating_sub(1);
        self.xfer.count = self.xfer.count.saturating_sub(1);
    }

    /// Reset the transfer context for a new transfer.
    pub(crate) fn load(&mut self, buf: XferBuf<'b>, count: usize, opt: Option<XferOpt>, isr: Isr) {
        self.errors = ErrorFlags::NONE;
        self.xfer = Xfer {
            buf,
            pos: 0,
            size: 0,
            count,
            opt,
            dev: 0,
            mem_lsb: None,
        };
        self.isr = isr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::common::I2cConfigBuilder;
    use crate::i2c::mock::{handle, Sim};

    #[test]
    fn test_new_handle_is_init() {
        let sim = Sim::new();
        let h = handle(&sim);
        assert_eq!(h.state(), State::Init);
        assert_eq!(h.mode(), Mode::None);
        assert!(h.last_errors().is_empty());
    }

    #[test]
    fn test_set_config_round_trip() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        let config = I2cConfigBuilder::new()
            .timing(0x1090_9CEC)
            .own_address1(0x2C5)
            .addressing_mode(AddressingMode::TenBit)
            .build();
        assert_eq!(h.set_config(&config), Ok(()));
        assert_eq!(h.state(), State::Idle);
        assert_eq!(h.config(), config);
        assert!(sim.reg(Reg::Cr1) & cr1::PE != 0);
        assert!(sim.reg(Reg::Cr2) & cr2::NACK != 0);
    }

    #[test]
    fn test_set_config_rejects_wide_address() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        let config = I2cConfigBuilder::new().own_address1(0x80).build();
        assert_eq!(h.set_config(&config), Err(I2cError::InvalidParameter));
        assert_eq!(h.state(), State::Init);
    }

    #[test]
    fn test_runtime_configuration() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        assert_eq!(h.set_timing(0x1234), Err(I2cError::Busy));
        h.set_config(&I2cConfig::default()).unwrap();

        h.set_timing(0x0010_0109).unwrap();
        assert_eq!(h.timing(), 0x0010_0109);

        h.disable_analog_filter().unwrap();
        assert!(!h.is_analog_filter_enabled());
        h.enable_analog_filter().unwrap();
        assert!(h.is_analog_filter_enabled());

        assert_eq!(h.set_digital_filter(16), Err(I2cError::InvalidParameter));
        h.set_digital_filter(9).unwrap();
        assert_eq!(h.digital_filter(), 9);

        h.disable_clock_stretching().unwrap();
        assert!(!h.is_clock_stretching_enabled());
        h.enable_clock_stretching().unwrap();
        assert!(h.is_clock_stretching_enabled());

        h.enable_general_call().unwrap();
        assert!(h.is_general_call_enabled());
        h.enable_wakeup().unwrap();
        assert!(h.is_wakeup_enabled());
        h.disable_wakeup().unwrap();
        assert!(!h.is_wakeup_enabled());

        h.set_own_address2(0x42, OwnAddress2Mask::Mask02).unwrap();
        assert_eq!(h.own_address2(), (0x42, OwnAddress2Mask::Mask02));
        h.enable_own_address2().unwrap();
        assert!(sim.reg(Reg::Oar2) & oar2::OA2EN != 0);
        h.disable_own_address2().unwrap();
        assert!(sim.reg(Reg::Oar2) & oar2::OA2EN == 0);

        assert!(sim.reg(Reg::Cr1) & cr1::PE != 0);
    }

    #[test]
    fn test_fast_mode_plus() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        assert_eq!(h.enable_fast_mode_plus(), Err(I2cError::Busy));
        h.set_config(&I2cConfig::default()).unwrap();
        assert!(!h.is_fast_mode_plus_enabled());

        h.enable_fast_mode_plus().unwrap();
        assert!(h.is_fast_mode_plus_enabled());
        assert!(sim.reg(Reg::Cr1) & cr1::PE != 0);
        h.disable_fast_mode_plus().unwrap();
        assert!(!h.is_fast_mode_plus_enabled());
    }

    #[test]
    fn test_autonomous_trigger() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        h.set_config(&I2cConfig::default()).unwrap();

        let trigger = AmTrigger {
            source: 0xB,
            polarity: AmTriggerPolarity::Falling,
        };
        h.set_am_trigger(trigger).unwrap();
        assert_eq!(h.am_trigger(), trigger);
        assert_eq!(sim.reg(Reg::Autocr), (0xB << autocr::TRIGSEL_POS) | autocr::TRIGPOL);
        assert!(!h.is_am_trigger_enabled());

        h.enable_am_trigger().unwrap();
        assert!(h.is_am_trigger_enabled());
        // Reselecting keeps the enable bit.
        let rising = AmTrigger {
            source: 2,
            polarity: AmTriggerPolarity::Rising,
        };
        h.set_am_trigger(rising).unwrap();
        assert_eq!(h.am_trigger(), rising);
        assert!(h.is_am_trigger_enabled());
        h.disable_am_trigger().unwrap();
        assert!(!h.is_am_trigger_enabled());

        let bad = AmTrigger {
            source: 16,
            polarity: AmTriggerPolarity::Rising,
        };
        assert_eq!(h.set_am_trigger(bad), Err(I2cError::InvalidParameter));
        assert_eq!(h.am_trigger(), rising);
    }

    #[test]
    fn test_user_data_survives_rebuild() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        assert_eq!(h.user_data(), 0);
        h.set_user_data(0x2000_0400);
        let h = h.with_logger(NoOpLogger);
        assert_eq!(h.user_data(), 0x2000_0400);
    }

    #[test]
    fn test_deinit() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        h.set_config(&I2cConfig::default()).unwrap();
        h.deinit();
        assert_eq!(h.state(), State::Reset);
        assert!(sim.reg(Reg::Cr1) & cr1::PE == 0);
    }

    #[test]
    fn test_poll_complete_idle() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        h.set_config(&I2cConfig::default()).unwrap();
        assert_eq!(h.poll_complete(), Ok(()));
        h.state = State::Tx;
        assert_eq!(h.poll_complete(), Err(nb::Error::WouldBlock));
        h.state = State::Idle;
        h.errors = ErrorFlags::ARLO;
        assert_eq!(h.poll_complete(), Err(nb::Error::Other(I2cError::ArbitrationLost)));
    }

    #[test]
    fn test_begin_only_from_idle() {
        let sim = Sim::new();
        let mut h = handle(&sim);
        assert_eq!(h.begin(State::Tx), Err(I2cError::Busy));
        h.set_config(&I2cConfig::default()).unwrap();
        assert_eq!(h.begin(State::Tx), Ok(()));
        assert_eq!(h.begin(State::Rx), Err(I2cError::Busy));
        assert_eq!(h.state(), State::Tx);
    }
}
