// Licensed under the Apache-2.0 license

// Keep panic-prone patterns out of production code; tests may use them freely.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), no_std)]

//! Register-level I2C transaction engine for STM32-class peripherals: master
//! and slave transfers, chained frames, memory access and device probing in
//! polling, interrupt and DMA flavours.

pub mod common;
pub mod i2c;
