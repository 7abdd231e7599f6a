// Licensed under the Apache-2.0 license

//! Transfer configuration encoder.
//!
//! Turns (target address, chunk length, end mode, start/stop directive) into the
//! CR2 update that begins, continues or ends a bus phase. The functions here are
//! pure; applying the result is a single read-modify-write of CR2.

use crate::i2c::common::{AddressingMode, EndMode, PreviousRole, XferOpt, MAX_NBYTE_SIZE};
use crate::i2c::registers::cr2;

/// Start/stop directive carried by a CR2 update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StartStop {
    /// Touch only address, count and end mode.
    NoStartStop,
    Stop,
    StartRead,
    StartWrite,
}

impl StartStop {
    const fn bits(self) -> u32 {
        match self {
            Self::NoStartStop => 0,
            Self::Stop => cr2::STOP,
            Self::StartRead => cr2::START | cr2::RD_WRN,
            Self::StartWrite => cr2::START,
        }
    }

    const fn owns_direction(self) -> bool {
        !matches!(self, Self::NoStartStop)
    }
}

impl EndMode {
    pub const fn bits(self) -> u32 {
        match self {
            Self::SoftEnd => 0,
            Self::Reload => cr2::RELOAD,
            Self::AutoEnd => cr2::AUTOEND,
        }
    }
}

/// A CR2 read-modify-write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cr2Update {
    pub clear: u32,
    pub set: u32,
}

/// Target address as it appears in the SADD field.
pub const fn sadd(mode: AddressingMode, address: u16) -> u16 {
    match mode {
        AddressingMode::SevenBit => (address & 0x7F) << 1,
        AddressingMode::TenBit => address & 0x3FF,
    }
}

/// Encode one phase. `sadd` is already in SADD layout, see [`sadd`].
pub const fn encode(sadd: u16, nbytes: u8, mode: EndMode, request: StartStop) -> Cr2Update {
    let mut clear = cr2::SADD | cr2::NBYTES | cr2::RELOAD | cr2::AUTOEND | cr2::START | cr2::STOP;
    if request.owns_direction() {
        clear |= cr2::RD_WRN;
    }
    let set = (sadd as u32 & cr2::SADD)
        | ((nbytes as u32) << cr2::NBYTES_POS)
        | mode.bits()
        | request.bits();
    Cr2Update { clear, set }
}

/// Length of the next chunk and whether more chunks follow it.
pub fn next_chunk(remaining: usize) -> (u8, bool) {
    match u8::try_from(remaining) {
        Ok(len) => (len, false),
        Err(_) => (u8::MAX, true),
    }
}

/// Byte count and end mode of the next phase when `remaining` bytes are left
/// and the transfer finishes with `last`.
pub fn phase(remaining: usize, last: EndMode) -> (u8, EndMode) {
    if remaining > MAX_NBYTE_SIZE {
        (u8::MAX, EndMode::Reload)
    } else {
        (next_chunk(remaining).0, last)
    }
}

/// Start directive of a sequential frame.
///
/// A frame in the same role as the previous one continues the bus phase
/// without a restart unless `opt` forces one; otherwise the option is
/// canonicalized and a start in the frame's direction is requested.
pub fn sequential_request(
    previous: PreviousRole,
    role: PreviousRole,
    opt: XferOpt,
    start: StartStop,
) -> (XferOpt, StartStop) {
    if previous == role && !opt.is_other() {
        (opt, StartStop::NoStartStop)
    } else {
        (opt.canonical(), start)
    }
}

/// CR2 value that addresses `sadd` with an empty write.
pub const fn address_only(sadd: u16, mode: AddressingMode) -> u32 {
    let mut value = (sadd as u32 & cr2::SADD) | cr2::START | cr2::AUTOEND;
    if matches!(mode, AddressingMode::TenBit) {
        value |= cr2::ADD10;
    }
    value
}
