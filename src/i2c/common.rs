// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C engine.
//!
//! This module provides the configuration builder, the lifecycle enums shared by
//! every execution strategy, and the timeout constants used by the blocking
//! paths.

use fugit::MillisDurationU32 as MilliSeconds;

/// Largest byte count one hardware phase can carry.
pub const MAX_NBYTE_SIZE: usize = 255;

/// Timeout sentinel meaning "wait forever".
pub const MAX_DELAY: MilliSeconds = MilliSeconds::from_ticks(u32::MAX);

/// Default budget for a remote master to address this node.
pub const TIMEOUT_ADDR: MilliSeconds = MilliSeconds::from_ticks(10_000);
/// Budget for the bus to become free before a master transfer starts.
pub const TIMEOUT_BUSY: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_DIR: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_RXNE: MilliSeconds = MilliSeconds::from_ticks(25);
/// Budget for the stop condition that ends an errored transfer.
pub const TIMEOUT_STOPF: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_TC: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_TCR: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_TXIS: MilliSeconds = MilliSeconds::from_ticks(25);
pub const TIMEOUT_FLAG: MilliSeconds = MilliSeconds::from_ticks(25);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressingMode {
    SevenBit,
    TenBit,
}

impl AddressingMode {
    /// Largest address representable in this mode.
    pub const fn max_address(self) -> u16 {
        match self {
            Self::SevenBit => 0x7F,
            Self::TenBit => 0x3FF,
        }
    }
}

/// Width of the internal memory address sent before a memory transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MemAddrSize {
    Bits8 = 1,
    Bits16 = 2,
}

impl MemAddrSize {
    pub const fn byte_count(self) -> usize {
        self as usize
    }
}

/// Lifecycle state of a controller handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Reset,
    Init,
    Idle,
    Tx,
    Rx,
    Listen,
    TxListen,
    RxListen,
    Abort,
}

impl State {
    /// True for every slave address-listen state.
    pub const fn is_listening(self) -> bool {
        matches!(self, Self::Listen | Self::TxListen | Self::RxListen)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    None,
    Master,
    Slave,
    MasterMemory,
}

/// Role of the last transfer, used to decide whether a restart is needed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PreviousRole {
    None,
    MasterTx,
    MasterRx,
    SlaveTx,
    SlaveRx,
}

impl PreviousRole {
    pub const fn is_tx(self) -> bool {
        matches!(self, Self::MasterTx | Self::SlaveTx)
    }

    pub const fn is_rx(self) -> bool {
        matches!(self, Self::MasterRx | Self::SlaveRx)
    }
}

/// How a hardware phase ends once its byte count is exhausted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndMode {
    /// Raise TC and hold the bus for software.
    SoftEnd,
    /// Raise TCR and wait for the next chunk.
    Reload,
    /// Generate STOP automatically.
    AutoEnd,
}

/// Continuation directive of a sequential transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum XferOpt {
    FirstFrame,
    FirstAndNextFrame,
    NextFrame,
    FirstAndLastFrame,
    LastFrame,
    LastFrameNoStop,
    /// First frame with an implicit restart.
    OtherFrame,
    /// First and last frame with an implicit restart.
    OtherAndLastFrame,
}

impl XferOpt {
    pub const fn is_other(self) -> bool {
        matches!(self, Self::OtherFrame | Self::OtherAndLastFrame)
    }

    /// Map the restart-forcing variants to the base form they encode as.
    #[must_use]
    pub const fn canonical(self) -> Self {
        match self {
            Self::OtherFrame => Self::FirstFrame,
            Self::OtherAndLastFrame => Self::FirstAndLastFrame,
            other => other,
        }
    }

    pub const fn end_mode(self) -> EndMode {
        match self.canonical() {
            Self::FirstAndNextFrame | Self::NextFrame => EndMode::Reload,
            Self::FirstAndLastFrame | Self::LastFrame => EndMode::AutoEnd,
            _ => EndMode::SoftEnd,
        }
    }

    /// Frame ends with a stop condition.
    pub const fn is_last(self) -> bool {
        matches!(self.end_mode(), EndMode::AutoEnd)
    }

    /// More frames follow on the same bus transaction.
    pub const fn keeps_bus(self) -> bool {
        !self.is_last()
    }
}

/// Direction requested by the remote master on an address match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveDirection {
    /// The master writes, this node receives.
    Write,
    /// The master reads, this node transmits.
    Read,
}

/// Bits of own address 2 ignored during matching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OwnAddress2Mask {
    NoMask = 0,
    Mask01 = 1,
    Mask02 = 2,
    Mask03 = 3,
    Mask04 = 4,
    Mask05 = 5,
    Mask06 = 6,
    Mask07 = 7,
}

impl OwnAddress2Mask {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x7 {
            1 => Self::Mask01,
            2 => Self::Mask02,
            3 => Self::Mask03,
            4 => Self::Mask04,
            5 => Self::Mask05,
            6 => Self::Mask06,
            7 => Self::Mask07,
            _ => Self::NoMask,
        }
    }
}

/// Edge of the autonomous mode trigger that starts a transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AmTriggerPolarity {
    Rising,
    Falling,
}

/// Autonomous mode trigger selection.
///
/// `source` is the TRIGSEL index; its meaning (DMA channel, EXTI line, timer,
/// comparator, RTC event) depends on the instance's trigger group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AmTrigger {
    pub source: u8,
    pub polarity: AmTriggerPolarity,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    /// Raw TIMINGR value (prescaler, setup, hold, SCL high/low).
    pub timing: u32,
    pub own_address1: u16,
    pub addressing_mode: AddressingMode,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    timing: u32,
    own_address1: u16,
    addressing_mode: AddressingMode,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    /// Standard mode timing for a 16 MHz kernel clock.
    pub const STANDARD_MODE_16MHZ: u32 = 0x0030_3D5B;

    #[must_use]
    pub fn new() -> Self {
        Self {
            timing: Self::STANDARD_MODE_16MHZ,
            own_address1: 0,
            addressing_mode: AddressingMode::SevenBit,
        }
    }
    #[must_use]
    pub fn timing(mut self, timing: u32) -> Self {
        self.timing = timing;
        self
    }
    #[must_use]
    pub fn own_address1(mut self, address: u16) -> Self {
        self.own_address1 = address;
        self
    }
    #[must_use]
    pub fn addressing_mode(mut self, mode: AddressingMode) -> Self {
        self.addressing_mode = mode;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            timing: self.timing,
            own_address1: self.own_address1,
            addressing_mode: self.addressing_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = I2cConfigBuilder::new().build();
        assert_eq!(config.addressing_mode, AddressingMode::SevenBit);
        assert_eq!(config.own_address1, 0);
        assert_eq!(config.timing, I2cConfigBuilder::STANDARD_MODE_16MHZ);
        assert_eq!(config, I2cConfig::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = I2cConfigBuilder::new()
            .timing(0x1090_9CEC)
            .own_address1(0x2A5)
            .addressing_mode(AddressingMode::TenBit)
            .build();
        assert_eq!(config.timing, 0x1090_9CEC);
        assert_eq!(config.own_address1, 0x2A5);
        assert_eq!(config.addressing_mode, AddressingMode::TenBit);
    }

    #[test]
    fn test_other_frames_canonicalize() {
        assert_eq!(XferOpt::OtherFrame.canonical(), XferOpt::FirstFrame);
        assert_eq!(
            XferOpt::OtherAndLastFrame.canonical(),
            XferOpt::FirstAndLastFrame
        );
        assert_eq!(XferOpt::NextFrame.canonical(), XferOpt::NextFrame);
        assert!(XferOpt::OtherFrame.is_other());
        assert!(!XferOpt::LastFrame.is_other());
    }

    #[test]
    fn test_end_modes() {
        assert_eq!(XferOpt::FirstFrame.end_mode(), EndMode::SoftEnd);
        assert_eq!(XferOpt::LastFrameNoStop.end_mode(), EndMode::SoftEnd);
        assert_eq!(XferOpt::FirstAndNextFrame.end_mode(), EndMode::Reload);
        assert_eq!(XferOpt::NextFrame.end_mode(), EndMode::Reload);
        assert_eq!(XferOpt::LastFrame.end_mode(), EndMode::AutoEnd);
        assert_eq!(XferOpt::OtherAndLastFrame.end_mode(), EndMode::AutoEnd);
        assert!(XferOpt::LastFrame.is_last());
        assert!(XferOpt::NextFrame.keeps_bus());
    }

    #[test]
    fn test_listen_states() {
        assert!(State::Listen.is_listening());
        assert!(State::TxListen.is_listening());
        assert!(State::RxListen.is_listening());
        assert!(!State::Idle.is_listening());
        assert!(!State::Abort.is_listening());
    }
}
