// Licensed under the Apache-2.0 license

//! # I2C Collaborator Traits
//!
//! The engine drives the peripheral through a handful of small seams so that
//! the same state machine runs against real registers, a simulator, or a
//! board-specific wrapper.
//!
//! ## Trait Map
//!
//! ```text
//! I2cHandle
//!     ├── I2cRegisters   (register file of one instance)
//!     ├── Clock          (monotonic millisecond tick)
//!     ├── I2cDma         (optional, tx/rx channel pair)
//!     ├── I2cCallbacks   (completion notifications, no-op defaults)
//!     ├── Logger         (crate::common)
//!     └── BusLock        (optional, foreground serialization)
//! ```

use crate::i2c::common::SlaveDirection;
use crate::i2c::error::{ErrorFlags, I2cError};
use crate::i2c::registers::Reg;
use fugit::MillisDurationU32 as MilliSeconds;

/// Access to the register file of one I2C instance.
///
/// Implementations are expected to perform volatile accesses. A read of
/// `Reg::Rxdr` consumes the received byte, a write of `Reg::Txdr` queues one
/// byte, and a write of `Reg::Icr` clears the matching status flags.
pub trait I2cRegisters {
    fn read(&self, reg: Reg) -> u32;

    fn write(&mut self, reg: Reg, value: u32);

    /// Read-modify-write: clear `clear`, then set `set`.
    fn modify(&mut self, reg: Reg, clear: u32, set: u32) {
        let value = self.read(reg);
        self.write(reg, (value & !clear) | set);
    }

    fn set_bits(&mut self, reg: Reg, bits: u32) {
        self.modify(reg, 0, bits);
    }

    fn clear_bits(&mut self, reg: Reg, bits: u32) {
        self.modify(reg, bits, 0);
    }

    /// True when every bit of `bits` is set.
    fn is_set(&self, reg: Reg, bits: u32) -> bool {
        self.read(reg) & bits == bits
    }
}

/// Monotonic millisecond counter. Wrap-around is tolerated.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<F: Fn() -> u32> Clock for F {
    fn now_ms(&self) -> u32 {
        self()
    }
}

/// Which DMA channel of the pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaChannel {
    Tx,
    Rx,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaState {
    Idle,
    Busy,
    Aborting,
    Fault,
}

/// Memory side of a DMA request.
///
/// The pointer stays valid for the whole transfer: the engine only hands out
/// pointers into the buffer it borrows for the lifetime of the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaBuffer {
    /// Memory to TXDR.
    ToPeripheral(*const u8),
    /// RXDR to memory.
    FromPeripheral(*mut u8),
}

/// The DMA collaborator refused or failed a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaFault;

/// DMA channel pair wired to one I2C instance.
///
/// Completions are reported by the firmware calling back into the handle:
/// [`I2cHandle::on_dma_complete`](crate::i2c::I2cHandle::on_dma_complete),
/// [`I2cHandle::on_dma_error`](crate::i2c::I2cHandle::on_dma_error) and
/// [`I2cHandle::on_dma_abort`](crate::i2c::I2cHandle::on_dma_abort).
pub trait I2cDma {
    /// Arm `channel` to move `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DmaFault`] if the channel is busy or misconfigured.
    fn start(&mut self, channel: DmaChannel, buffer: DmaBuffer, len: usize)
        -> Result<(), DmaFault>;

    /// Request an asynchronous abort. Completion is reported through
    /// `on_dma_abort`.
    ///
    /// # Errors
    ///
    /// Returns [`DmaFault`] if no abort could be requested; the caller then
    /// finishes the abort itself.
    fn abort(&mut self, channel: DmaChannel) -> Result<(), DmaFault>;

    /// Bytes the channel still has to move.
    fn remaining_bytes(&self, channel: DmaChannel) -> usize;

    fn state(&self, channel: DmaChannel) -> DmaState;
}

/// Placeholder for handles built without DMA. DMA entry points are not
/// available on such handles.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDma;

/// Internal view of the DMA slot, implemented for [`NoDma`] and for every
/// [`I2cDma`].
#[doc(hidden)]
pub trait DmaPort {
    fn port_start(&mut self, channel: DmaChannel, buffer: DmaBuffer, len: usize)
        -> Result<(), DmaFault>;
    fn port_abort(&mut self, channel: DmaChannel) -> Result<(), DmaFault>;
    fn port_remaining(&self, channel: DmaChannel) -> usize;
    fn port_state(&self, channel: DmaChannel) -> DmaState;
}

impl DmaPort for NoDma {
    fn port_start(&mut self, _: DmaChannel, _: DmaBuffer, _: usize) -> Result<(), DmaFault> {
        Err(DmaFault)
    }

    fn port_abort(&mut self, _: DmaChannel) -> Result<(), DmaFault> {
        Err(DmaFault)
    }

    fn port_remaining(&self, _: DmaChannel) -> usize {
        0
    }

    fn port_state(&self, _: DmaChannel) -> DmaState {
        DmaState::Idle
    }
}

impl<D: I2cDma> DmaPort for D {
    fn port_start(
        &mut self,
        channel: DmaChannel,
        buffer: DmaBuffer,
        len: usize,
    ) -> Result<(), DmaFault> {
        self.start(channel, buffer, len)
    }

    fn port_abort(&mut self, channel: DmaChannel) -> Result<(), DmaFault> {
        self.abort(channel)
    }

    fn port_remaining(&self, channel: DmaChannel) -> usize {
        self.remaining_bytes(channel)
    }

    fn port_state(&self, channel: DmaChannel) -> DmaState {
        self.state(channel)
    }
}

/// Completion notifications. Every method defaults to a no-op, override the
/// ones the application cares about.
///
/// Exactly one terminal notification is delivered per transfer: a completion,
/// [`error`](Self::error), or [`abort_complete`](Self::abort_complete).
pub trait I2cCallbacks {
    fn master_tx_complete(&mut self) {}
    fn master_rx_complete(&mut self) {}
    fn mem_tx_complete(&mut self) {}
    fn mem_rx_complete(&mut self) {}
    fn slave_tx_complete(&mut self) {}
    fn slave_rx_complete(&mut self) {}

    /// A remote master addressed this node while listening.
    fn address_match(&mut self, _direction: SlaveDirection, _address: u16) {}

    fn listen_complete(&mut self) {}

    /// The transfer ended with `errors` accumulated.
    fn error(&mut self, _errors: ErrorFlags) {}

    fn abort_complete(&mut self) {}
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoCallbacks;

impl I2cCallbacks for NoCallbacks {}

/// Serializes foreground access to a shared bus across tasks.
pub trait BusLock {
    /// # Errors
    ///
    /// Returns [`I2cError::Busy`] if the lock could not be taken in time.
    fn acquire(&mut self, timeout: MilliSeconds) -> Result<(), I2cError>;

    /// # Errors
    ///
    /// Returns an error if the lock was not held.
    fn release(&mut self) -> Result<(), I2cError>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoLock;

impl BusLock for NoLock {
    fn acquire(&mut self, _timeout: MilliSeconds) -> Result<(), I2cError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), I2cError> {
        Ok(())
    }
}
