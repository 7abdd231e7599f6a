// Licensed under the Apache-2.0 license

//! Register map of the I2C v2 peripheral.
//!
//! Only the names and bit positions live here. Access goes through the
//! [`I2cRegisters`](crate::i2c::traits::I2cRegisters) seam so the engine never
//! touches memory-mapped I/O directly.

use paste::paste;

/// Addressable registers of one I2C instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
    Cr1,
    Cr2,
    Oar1,
    Oar2,
    Timingr,
    Isr,
    Icr,
    Rxdr,
    Txdr,
    /// Autonomous mode control.
    Autocr,
}

pub mod cr1 {
    pub const PE: u32 = 1 << 0;
    pub const TXIE: u32 = 1 << 1;
    pub const RXIE: u32 = 1 << 2;
    pub const ADDRIE: u32 = 1 << 3;
    pub const NACKIE: u32 = 1 << 4;
    pub const STOPIE: u32 = 1 << 5;
    pub const TCIE: u32 = 1 << 6;
    pub const ERRIE: u32 = 1 << 7;
    pub const DNF_POS: u32 = 8;
    pub const DNF: u32 = 0xF << DNF_POS;
    pub const ANFOFF: u32 = 1 << 12;
    pub const TXDMAEN: u32 = 1 << 14;
    pub const RXDMAEN: u32 = 1 << 15;
    pub const NOSTRETCH: u32 = 1 << 17;
    pub const WUPEN: u32 = 1 << 18;
    pub const GCEN: u32 = 1 << 19;
    pub const FMP: u32 = 1 << 24;
}

pub mod cr2 {
    pub const SADD: u32 = 0x3FF;
    pub const RD_WRN: u32 = 1 << 10;
    pub const ADD10: u32 = 1 << 11;
    pub const HEAD10R: u32 = 1 << 12;
    pub const START: u32 = 1 << 13;
    pub const STOP: u32 = 1 << 14;
    pub const NACK: u32 = 1 << 15;
    pub const NBYTES_POS: u32 = 16;
    pub const NBYTES: u32 = 0xFF << NBYTES_POS;
    pub const RELOAD: u32 = 1 << 24;
    pub const AUTOEND: u32 = 1 << 25;

    /// Fields cleared once a master transfer has ended.
    pub const RESET_MASK: u32 = SADD | HEAD10R | NBYTES | RELOAD | RD_WRN;
}

pub mod oar1 {
    pub const OA1: u32 = 0x3FF;
    pub const OA1MODE: u32 = 1 << 10;
    pub const OA1EN: u32 = 1 << 15;
}

pub mod oar2 {
    pub const OA2: u32 = 0xFE;
    pub const OA2MSK_POS: u32 = 8;
    pub const OA2MSK: u32 = 0x7 << OA2MSK_POS;
    pub const OA2EN: u32 = 1 << 15;
}

pub mod autocr {
    pub const TRIGSEL_POS: u32 = 16;
    pub const TRIGSEL: u32 = 0xF << TRIGSEL_POS;
    pub const TRIGPOL: u32 = 1 << 20;
    pub const TRIGEN: u32 = 1 << 21;
}

pub mod isr {
    pub const TXE: u32 = 1 << 0;
    pub const TXIS: u32 = 1 << 1;
    pub const RXNE: u32 = 1 << 2;
    pub const ADDR: u32 = 1 << 3;
    pub const NACKF: u32 = 1 << 4;
    pub const STOPF: u32 = 1 << 5;
    pub const TC: u32 = 1 << 6;
    pub const TCR: u32 = 1 << 7;
    pub const BERR: u32 = 1 << 8;
    pub const ARLO: u32 = 1 << 9;
    pub const OVR: u32 = 1 << 10;
    pub const BUSY: u32 = 1 << 15;
    pub const DIR: u32 = 1 << 16;
    pub const ADDCODE_POS: u32 = 17;
    pub const ADDCODE: u32 = 0x7F << ADDCODE_POS;

    /// Every bit the event dispatcher looks at.
    pub const EVENT_MASK: u32 = 0x0001_FFFF;
}

pub mod icr {
    pub const ADDRCF: u32 = 1 << 3;
    pub const NACKCF: u32 = 1 << 4;
    pub const STOPCF: u32 = 1 << 5;
    pub const BERRCF: u32 = 1 << 8;
    pub const ARLOCF: u32 = 1 << 9;
    pub const OVRCF: u32 = 1 << 10;
}

macro_rules! status_flags {
    ($($name:ident => $bit:path),* $(,)?) => {
        paste! {
            impl Status {
                $(
                    #[inline]
                    pub const fn [<is_ $name>](self) -> bool {
                        self.0 & $bit != 0
                    }
                )*
            }
        }
    };
}

/// Snapshot of the ISR register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Status(pub u32);

status_flags! {
    txe => isr::TXE,
    txis => isr::TXIS,
    rxne => isr::RXNE,
    addr => isr::ADDR,
    nackf => isr::NACKF,
    stopf => isr::STOPF,
    tc => isr::TC,
    tcr => isr::TCR,
    berr => isr::BERR,
    arlo => isr::ARLO,
    ovr => isr::OVR,
    busy => isr::BUSY,
    dir => isr::DIR,
}

impl Status {
    /// Matched address code, already shifted down.
    #[inline]
    pub const fn addr_code(self) -> u16 {
        ((self.0 & isr::ADDCODE) >> isr::ADDCODE_POS) as u16
    }

    #[inline]
    #[must_use]
    pub const fn without(self, bits: u32) -> Self {
        Self(self.0 & !bits)
    }
}

/// Logical interrupt groups the engine reasons about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrqGroup {
    Tx,
    Rx,
    Listen,
    Error,
    Complete,
    CompleteDma,
    Reload,
}

impl IrqGroup {
    /// CR1 enable bits backing this group.
    pub const fn mask(self) -> u32 {
        match self {
            Self::Tx => cr1::ERRIE | cr1::TCIE | cr1::STOPIE | cr1::NACKIE | cr1::TXIE,
            Self::Rx => cr1::ERRIE | cr1::TCIE | cr1::STOPIE | cr1::NACKIE | cr1::RXIE,
            Self::Listen => cr1::ADDRIE | cr1::STOPIE | cr1::NACKIE | cr1::ERRIE,
            Self::Error => cr1::ERRIE | cr1::NACKIE,
            Self::Complete => cr1::STOPIE,
            Self::CompleteDma => cr1::STOPIE | cr1::TCIE,
            Self::Reload => cr1::TCIE,
        }
    }
}

/// Set of groups to disable in one CR1 write.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IrqSet {
    pub tx: bool,
    pub rx: bool,
    pub listen: bool,
}

impl IrqSet {
    pub const TX: Self = Self {
        tx: true,
        rx: false,
        listen: false,
    };
    pub const RX: Self = Self {
        tx: false,
        rx: true,
        listen: false,
    };
    pub const LISTEN: Self = Self {
        tx: false,
        rx: false,
        listen: true,
    };
    pub const ALL: Self = Self {
        tx: true,
        rx: true,
        listen: true,
    };

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self {
            tx: self.tx || other.tx,
            rx: self.rx || other.rx,
            listen: self.listen || other.listen,
        }
    }

    /// CR1 bits to clear. While a listen session is open the stop, NACK and
    /// error sources stay armed unless the listen group itself is disabled.
    pub const fn disable_mask(self, listening: bool) -> u32 {
        let shared = cr1::STOPIE | cr1::NACKIE | cr1::ERRIE;
        let mut bits = 0;
        if self.tx {
            bits |= cr1::TCIE | cr1::TXIE;
            if !listening {
                bits |= shared;
            }
        }
        if self.rx {
            bits |= cr1::TCIE | cr1::RXIE;
            if !listening {
                bits |= shared;
            }
        }
        if self.listen {
            bits |= IrqGroup::Listen.mask();
        }
        bits
    }
}
