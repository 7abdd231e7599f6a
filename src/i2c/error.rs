// Licensed under the Apache-2.0 license

//! Error taxonomy of the I2C engine.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Sticky record of the hardware conditions seen during one transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorFlags(u32);

impl ErrorFlags {
    pub const NONE: Self = Self(0);
    /// Bus error (misplaced start or stop).
    pub const BERR: Self = Self(1 << 0);
    /// Arbitration lost.
    pub const ARLO: Self = Self(1 << 1);
    /// Acknowledge failure.
    pub const AF: Self = Self(1 << 2);
    /// Overrun or underrun.
    pub const OVR: Self = Self(1 << 3);
    /// Reload or complete event with an unexpected remaining count.
    pub const SIZE: Self = Self(1 << 4);
    /// DMA collaborator failure.
    pub const DMA: Self = Self(1 << 5);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Most significant error carried by these flags, if any.
    #[must_use]
    pub const fn to_error(self) -> Option<I2cError> {
        if self.contains(Self::AF) {
            Some(I2cError::NotAcknowledged)
        } else if self.contains(Self::BERR) {
            Some(I2cError::BusError)
        } else if self.contains(Self::ARLO) {
            Some(I2cError::ArbitrationLost)
        } else if self.contains(Self::OVR) {
            Some(I2cError::Overrun)
        } else if self.contains(Self::DMA) {
            Some(I2cError::DmaError)
        } else if self.contains(Self::SIZE) {
            Some(I2cError::TransferSizeMismatch)
        } else {
            None
        }
    }
}

impl core::ops::BitOr for ErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for ErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Errors returned by the I2C engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    /// Rejected before touching the hardware: bad length, address or option.
    InvalidParameter,
    /// The handle is not idle, or the bus is held by someone else.
    Busy,
    /// A blocking call ran out of its time budget.
    Timeout,
    /// The target did not acknowledge its address or a data byte. NACKF does
    /// not record which, so no phase is carried.
    NotAcknowledged,
    /// Misplaced start or stop condition on the bus.
    BusError,
    /// Another master won arbitration.
    ArbitrationLost,
    /// Overrun or underrun in slave mode with clock stretching disabled.
    Overrun,
    /// The DMA collaborator failed to start or reported a transfer error.
    DmaError,
    /// Reload or complete fired with a remaining count that does not match.
    TransferSizeMismatch,
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAcknowledged => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Self::BusError => ErrorKind::Bus,
            Self::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Self::Overrun => ErrorKind::Overrun,
            _ => ErrorKind::Other,
        }
    }
}

impl core::fmt::Display for I2cError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::InvalidParameter => "invalid parameter",
            Self::Busy => "controller busy",
            Self::Timeout => "timeout",
            Self::NotAcknowledged => "not acknowledged",
            Self::BusError => "bus error",
            Self::ArbitrationLost => "arbitration lost",
            Self::Overrun => "overrun",
            Self::DmaError => "dma error",
            Self::TransferSizeMismatch => "transfer size mismatch",
        };
        f.write_str(msg)
    }
}
