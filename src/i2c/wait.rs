// Licensed under the Apache-2.0 license

//! Blocking wait primitives.
//!
//! Every primitive polls one status condition against a deadline of
//! `start + timeout` and checks for bus errors on each pass. A timeout of zero
//! performs a single check, [`MAX_DELAY`] waits forever. Tick arithmetic
//! wraps.

use crate::common::Logger;
use crate::i2c::common::{Mode, MAX_DELAY, TIMEOUT_STOPF};
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::handle::I2cHandle;
use crate::i2c::registers::{cr2, icr, Reg, Status};
use crate::i2c::traits::{BusLock, Clock, DmaPort, I2cCallbacks, I2cRegisters};
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
    pub(crate) fn elapsed_since(&self, start: u32) -> u32 {
        self.clock.now_ms().wrapping_sub(start)
    }

    pub(crate) fn expired(&self, start: u32, timeout: MilliSeconds) -> bool {
        timeout.ticks() == 0 || self.elapsed_since(start) > timeout.ticks()
    }

    /// Error to report for a failed blocking call.
    pub(crate) fn failure(&self) -> I2cError {
        self.errors.to_error().unwrap_or(I2cError::BusError)
    }

    /// Poll until `flag` reads `until`.
    pub(crate) fn wait_flag(
        &mut self,
        flag: u32,
        until: bool,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        let mut status = self.status();
        while (status.0 & flag != 0) != until {
            self.check_errors(status, timeout, start)?;
            if timeout != MAX_DELAY
                && self.expired(start, timeout)
                && (self.status().0 & flag != 0) != until
            {
                return Err(I2cError::Timeout);
            }
            status = self.status();
        }
        Ok(())
    }

    pub(crate) fn wait_txis(&mut self, timeout: MilliSeconds, start: u32) -> Result<(), I2cError> {
        let mut status = self.status();
        while !status.is_txis() {
            self.check_errors(status, timeout, start)?;
            if timeout != MAX_DELAY && self.expired(start, timeout) && !self.status().is_txis() {
                return Err(I2cError::Timeout);
            }
            status = self.status();
        }
        Ok(())
    }

    pub(crate) fn wait_stopf(&mut self, timeout: MilliSeconds, start: u32) -> Result<(), I2cError> {
        let mut status = self.status();
        while !status.is_stopf() {
            self.check_errors(status, timeout, start)?;
            if self.expired(start, timeout) && !self.status().is_stopf() {
                return Err(I2cError::Timeout);
            }
            status = self.status();
        }
        Ok(())
    }

    /// Wait for a received byte. `chunk_left` is the number of bytes the
    /// current phase still expects; a stop with a byte pending is accepted
    /// while it is non-zero.
    pub(crate) fn wait_rxne(
        &mut self,
        chunk_left: usize,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        let mut status = self.status();
        while !status.is_rxne() {
            self.check_errors(status, timeout, start)?;
            let now = self.status();
            if now.is_stopf() {
                if now.is_rxne() && chunk_left > 0 {
                    return Ok(());
                }
                if now.is_nackf() {
                    self.clear_flags(icr::NACKCF);
                    self.errors = ErrorFlags::AF;
                }
                self.clear_flags(icr::STOPCF);
                self.reset_cr2();
                return Err(self.failure());
            }
            if self.expired(start, timeout) && !self.status().is_rxne() {
                return Err(I2cError::Timeout);
            }
            status = self.status();
        }
        Ok(())
    }

    /// Detect NACK, bus error, overrun and arbitration loss in `status`.
    ///
    /// On NACK the stop that follows is awaited and cleared; a master stuck
    /// busy past the deadline is forced to generate one. Any detected error
    /// flushes TXDR, resets CR2 and accumulates into the handle's flags.
    pub(crate) fn check_errors(
        &mut self,
        status: Status,
        timeout: MilliSeconds,
        start: u32,
    ) -> Result<(), I2cError> {
        let mut found = ErrorFlags::NONE;
        let mut failed = false;

        if status.is_nackf() {
            self.clear_flags(icr::NACKCF);
            let mut tick = start;
            let mut stop_seen = true;
            while !self.status().is_stopf() && stop_seen {
                if timeout != MAX_DELAY && self.expired(tick, timeout) {
                    let stopping = self.regs.is_set(Reg::Cr2, cr2::STOP);
                    if self.status().is_busy() && !stopping && self.mode != Mode::Slave {
                        self.regs.set_bits(Reg::Cr2, cr2::STOP);
                        tick = self.clock.now_ms();
                    }
                    while !self.status().is_stopf() {
                        if self.elapsed_since(tick) > TIMEOUT_STOPF.ticks() {
                            stop_seen = false;
                            break;
                        }
                    }
                }
            }
            if stop_seen {
                self.clear_flags(icr::STOPCF);
            }
            found |= ErrorFlags::AF;
            failed = true;
        }

        let status = self.status();
        if status.is_berr() {
            found |= ErrorFlags::BERR;
            self.clear_flags(icr::BERRCF);
            failed = true;
        }
        if status.is_ovr() {
            found |= ErrorFlags::OVR;
            self.clear_flags(icr::OVRCF);
            failed = true;
        }
        if status.is_arlo() {
            found |= ErrorFlags::ARLO;
            self.clear_flags(icr::ARLOCF);
            failed = true;
        }

        if failed {
            self.flush_txdr();
            self.reset_cr2();
            self.errors |= found;
            return Err(self.failure());
        }
        Ok(())
    }
}
