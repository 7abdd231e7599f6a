// Licensed under the Apache-2.0 license

//! `embedded-hal` adapter over the polling transfers.
//!
//! [`I2cController`] owns a handle and a per-call timeout and implements
//! [`embedded_hal::i2c::I2c`] for 7-bit and 10-bit addresses. A transaction is
//! issued as a chain of sequential frames so that adjacent operations of the
//! same kind share one bus phase and a direction change costs one repeated
//! start, as the `embedded-hal` contract requires. The address width follows
//! the trait's address type, whatever the handle was configured with.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::common::{AddressingMode, State, XferOpt};
use crate::i2c::error::I2cError;
use crate::i2c::handle::I2cHandle;
use crate::i2c::traits::{
    BusLock, Clock, DmaPort, I2cCallbacks, I2cRegisters, NoCallbacks, NoDma, NoLock,
};
use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};
use fugit::MillisDurationU32 as MilliSeconds;

/// First and last 7-bit addresses that are not reserved.
const SCAN_RANGE: core::ops::RangeInclusive<u8> = 0x08..=0x77;

pub struct I2cController<'b, R, K, D = NoDma, C = NoCallbacks, L = NoOpLogger, M = NoLock> {
    pub handle: I2cHandle<'b, R, K, D, C, L, M>,
    /// Budget of each frame issued on behalf of a transaction.
    pub timeout: MilliSeconds,
}

impl<'b, R, K, D, C, L, M> I2cController<'b, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    pub fn new(handle: I2cHandle<'b, R, K, D, C, L, M>, timeout: MilliSeconds) -> Self {
        Self { handle, timeout }
    }

    pub fn into_inner(self) -> I2cHandle<'b, R, K, D, C, L, M> {
        self.handle
    }

    /// Address every non-reserved 7-bit address once and collect the ones that
    /// acknowledge.
    pub fn scan(&mut self) -> heapless::Vec<u8, 128> {
        self.with_addressing(AddressingMode::SevenBit, |this| {
            let mut found = heapless::Vec::new();
            for address in SCAN_RANGE {
                if this.handle.is_device_ready(u16::from(address), 1, this.timeout).is_ok() {
                    // Capacity covers the whole address space.
                    let _ = found.push(address);
                }
            }
            found
        })
    }

    /// Run `f` with the master addressing mode switched to `mode`, restoring
    /// the configured one afterwards. A busy handle is left untouched; the
    /// transfer itself then reports `Busy`.
    fn with_addressing<T>(&mut self, mode: AddressingMode, f: impl FnOnce(&mut Self) -> T) -> T {
        let configured = self.handle.addressing_mode();
        let switch = configured != mode && self.handle.state() == State::Idle;
        if switch {
            self.handle.set_master_addressing(mode);
        }
        let result = f(self);
        if switch {
            self.handle.set_master_addressing(configured);
        }
        result
    }

    fn run(
        &mut self,
        address: u16,
        mode: AddressingMode,
        operations: &mut [Operation<'_>],
    ) -> Result<(), I2cError> {
        self.with_addressing(mode, |this| this.run_frames(address, operations))
    }

    fn run_frames(
        &mut self,
        address: u16,
        operations: &mut [Operation<'_>],
    ) -> Result<(), I2cError> {
        let active: usize = operations.iter().filter(|op| !is_empty(op)).count();
        if active == 0 {
            // Nothing to move: address the device with an empty write.
            return self.handle.master_transmit(address, &[], self.timeout);
        }

        let mut issued = 0;
        for index in 0..operations.len() {
            let Some(op) = operations.get(index) else {
                break;
            };
            if is_empty(op) {
                continue;
            }
            let read = is_read(op);
            let next = operations
                .get(index + 1..)
                .and_then(|rest| rest.iter().find(|op| !is_empty(op)))
                .map(is_read);
            let opt = frame_option(issued == 0, read, next);
            issued += 1;

            match operations.get_mut(index) {
                Some(Operation::Write(bytes)) => {
                    self.handle.master_seq_transmit(address, bytes, opt, self.timeout)?;
                }
                Some(Operation::Read(buffer)) => {
                    self.handle.master_seq_receive(address, buffer, opt, self.timeout)?;
                }
                None => break,
            }
        }
        Ok(())
    }
}

fn is_empty(op: &Operation<'_>) -> bool {
    match op {
        Operation::Write(bytes) => bytes.is_empty(),
        Operation::Read(buffer) => buffer.is_empty(),
    }
}

fn is_read(op: &Operation<'_>) -> bool {
    matches!(op, Operation::Read(_))
}

/// Frame option of one operation. `next` is the kind of the following
/// operation, `None` for the last one.
///
/// The first frame always starts; an `Other` option guarantees it even when
/// the previous frame ran in the same direction. A frame followed by one of
/// the same kind ends in reload so the next continues the phase; a direction
/// change ends softly and the next frame restarts.
const fn frame_option(first: bool, read: bool, next: Option<bool>) -> XferOpt {
    match (first, next) {
        (true, None) => XferOpt::OtherAndLastFrame,
        (false, None) => XferOpt::LastFrame,
        (true, Some(next_read)) if next_read == read => XferOpt::FirstAndNextFrame,
        (false, Some(next_read)) if next_read == read => XferOpt::NextFrame,
        (true, Some(_)) => XferOpt::OtherFrame,
        (false, Some(_)) => XferOpt::LastFrameNoStop,
    }
}

impl<R, K, D, C, L, M> embedded_hal::i2c::ErrorType for I2cController<'_, R, K, D, C, L, M> {
    type Error = I2cError;
}

impl<R, K, D, C, L, M> embedded_hal::i2c::I2c<SevenBitAddress>
    for I2cController<'_, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run(u16::from(address), AddressingMode::SevenBit, operations)
    }
}

impl<R, K, D, C, L, M> embedded_hal::i2c::I2c<TenBitAddress> for I2cController<'_, R, K, D, C, L, M>
where
    R: I2cRegisters,
    K: Clock,
    D: DmaPort,
    C: I2cCallbacks,
    L: Logger,
    M: BusLock,
{
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run(address, AddressingMode::TenBit, operations)
    }
}
