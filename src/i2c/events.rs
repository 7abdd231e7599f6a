// Licensed under the Apache-2.0 license

//! Interrupt event classification.
//!
//! A status snapshot is only meaningful through the interrupt sources that are
//! armed at the same moment. [`classify`] masks one against the other and
//! yields the set of pending events; each service routine then walks that set
//! in its own priority order with [`Pending::first_of`]. Nothing here touches
//! the hardware, clearing flags stays with the caller.

use crate::i2c::registers::{cr1, isr, Status};

/// A status flag whose interrupt source is enabled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Event {
    /// NACKF with NACKIE.
    Nack = 1 << 0,
    /// RXNE with RXIE.
    RxReady = 1 << 1,
    /// TXIS with TXIE.
    TxReady = 1 << 2,
    /// TCR with TCIE.
    Reload = 1 << 3,
    /// TC with TCIE.
    TransferComplete = 1 << 4,
    /// STOPF with STOPIE.
    Stop = 1 << 5,
    /// ADDR with ADDRIE.
    AddressMatch = 1 << 6,
    /// BERR with ERRIE.
    BusError = 1 << 7,
    /// OVR with ERRIE.
    Overrun = 1 << 8,
    /// ARLO with ERRIE.
    ArbitrationLost = 1 << 9,
}

/// Event order of the master and memory service routines.
pub const MASTER_ORDER: [Event; 5] = [
    Event::Nack,
    Event::RxReady,
    Event::TxReady,
    Event::Reload,
    Event::TransferComplete,
];

/// Event order of the slave service routine, after the stop check.
pub const SLAVE_ORDER: [Event; 4] = [
    Event::Nack,
    Event::RxReady,
    Event::AddressMatch,
    Event::TxReady,
];

/// Event order of the DMA master routine.
pub const MASTER_DMA_ORDER: [Event; 3] = [Event::Nack, Event::Reload, Event::TransferComplete];

/// Event order of the DMA memory routine.
pub const MEM_DMA_ORDER: [Event; 4] = [
    Event::Nack,
    Event::TxReady,
    Event::Reload,
    Event::TransferComplete,
];

/// Event order of the DMA slave routine, after the stop check.
pub const SLAVE_DMA_ORDER: [Event; 2] = [Event::Nack, Event::AddressMatch];

/// Bus errors in the order the error vector reports them.
pub const ERROR_ORDER: [Event; 3] = [Event::BusError, Event::Overrun, Event::ArbitrationLost];

/// Set of pending events.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pending(u16);

impl Pending {
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, event: Event) -> bool {
        self.0 & event as u16 != 0
    }

    #[must_use]
    pub const fn without(self, event: Event) -> Self {
        Self(self.0 & !(event as u16))
    }

    /// Highest priority pending event according to `order`.
    pub fn first_of(self, order: &[Event]) -> Option<Event> {
        order.iter().copied().find(|event| self.contains(*event))
    }
}

const fn gate(status: u32, flag: u32, sources: u32, enable: u32, event: Event) -> u16 {
    if status & flag != 0 && sources & enable != 0 {
        event as u16
    } else {
        0
    }
}

/// Mask the transfer events of `status` with the enable bits in `sources`.
pub const fn classify(status: Status, sources: u32) -> Pending {
    let s = status.0;
    Pending(
        gate(s, isr::NACKF, sources, cr1::NACKIE, Event::Nack)
            | gate(s, isr::RXNE, sources, cr1::RXIE, Event::RxReady)
            | gate(s, isr::TXIS, sources, cr1::TXIE, Event::TxReady)
            | gate(s, isr::TCR, sources, cr1::TCIE, Event::Reload)
            | gate(s, isr::TC, sources, cr1::TCIE, Event::TransferComplete)
            | gate(s, isr::STOPF, sources, cr1::STOPIE, Event::Stop)
            | gate(s, isr::ADDR, sources, cr1::ADDRIE, Event::AddressMatch),
    )
}

/// Mask the bus error flags of `status` with ERRIE.
pub const fn classify_errors(status: Status, sources: u32) -> Pending {
    let s = status.0;
    Pending(
        gate(s, isr::BERR, sources, cr1::ERRIE, Event::BusError)
            | gate(s, isr::OVR, sources, cr1::ERRIE, Event::Overrun)
            | gate(s, isr::ARLO, sources, cr1::ERRIE, Event::ArbitrationLost),
    )
}
