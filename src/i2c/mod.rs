// Licensed under the Apache-2.0 license

//! I2C bus transaction engine.
//!
//! One [`I2cHandle`] drives one peripheral instance through the register
//! seam in [`traits`]. Transfers come in three strategies that share the
//! same transfer context and completion logic:
//!
//! - [`blocking`]: polling calls that return when the transfer is over;
//! - [`interrupt`]: start calls that return at once, finished by the event
//!   and error vectors;
//! - [`dma`]: like `interrupt`, with the data moved by a DMA channel pair.
//!
//! [`i2c_controller`] adapts the polling calls to `embedded-hal`.

pub mod blocking;
pub mod common;
pub mod dma;
pub mod error;
pub mod events;
pub mod handle;
pub mod i2c_controller;
pub mod interrupt;
pub mod registers;
pub mod traits;
pub mod transfer_config;
pub mod wait;

#[cfg(test)]
pub(crate) mod mock;

pub use common::{
    AddressingMode, AmTrigger, AmTriggerPolarity, I2cConfig, I2cConfigBuilder, MemAddrSize, Mode,
    OwnAddress2Mask, PreviousRole, SlaveDirection, State, XferOpt,
};
pub use error::{ErrorFlags, I2cError};
pub use handle::I2cHandle;
pub use i2c_controller::I2cController;
pub use traits::{
    BusLock, Clock, DmaBuffer, DmaChannel, DmaFault, DmaState, I2cCallbacks, I2cDma, I2cRegisters,
    NoCallbacks, NoDma, NoLock,
};
