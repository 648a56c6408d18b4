// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI bus signal lines and the phase encoding table.
//!
//! The information-transfer phase is fully determined by three target-driven
//! lines (SCSI-2 § 5.1):
//!
//! ```text
//! MSG  C/D  I/O   phase
//!  0    0    0    DATA OUT
//!  0    0    1    DATA IN
//!  0    1    0    COMMAND
//!  0    1    1    STATUS
//!  1    0    0    reserved
//!  1    0    1    reserved
//!  1    1    0    MESSAGE OUT
//!  1    1    1    MESSAGE IN
//! ```
//!
//! The controller changes phase exclusively through
//! [`BusDriver::enter_phase`](crate::bus::driver::BusDriver::enter_phase), so
//! the asserted lines and the [`Phase`] value can never disagree.

use core::fmt;

bitflags::bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    /// Control signal lines of the SCSI bus.
    ///
    /// BSY/SEL/RST/ATN/ACK are shared arbitration and handshake lines;
    /// MSG/CD/IO encode the information-transfer phase; REQ/ACK pace each
    /// byte. The 8-bit data bus is carried separately by the driver.
    pub struct BusSignals: u16 {
        /// Busy: the bus is in use.
        const BSY = 1 << 0;
        /// Select: an initiator is selecting a target.
        const SEL = 1 << 1;
        /// Attention: the initiator has a message to send.
        const ATN = 1 << 2;
        /// Acknowledge: initiator half of the byte handshake.
        const ACK = 1 << 3;
        /// Reset: unconditional bus reset, overrides every phase.
        const RST = 1 << 4;
        /// Message: target line, part of the phase encoding.
        const MSG = 1 << 5;
        /// Control/Data: target line, part of the phase encoding.
        const CD  = 1 << 6;
        /// Input/Output: target line, transfer direction.
        const IO  = 1 << 7;
        /// Request: target half of the byte handshake.
        const REQ = 1 << 8;
    }
}

impl BusSignals {
    /// The three phase-encoding lines.
    pub const PHASE_MASK: BusSignals = BusSignals::MSG.union(BusSignals::CD).union(BusSignals::IO);
}

/// One stage of the SCSI bus handshake. Exactly one phase is active per
/// controller at any time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    #[default]
    BusFree,
    Selection,
    Command,
    DataIn,
    DataOut,
    Status,
    MessageIn,
    MessageOut,
    /// The two MSG-without-C/D line combinations SCSI-2 leaves reserved.
    Reserved,
}

impl Phase {
    /// The MSG/C-D/I-O lines a target asserts while driving this phase.
    ///
    /// BusFree and Selection release all three; Reserved never occurs as an
    /// output phase and maps to no lines.
    pub const fn signals(self) -> BusSignals {
        match self {
            Phase::BusFree | Phase::Selection | Phase::Reserved => BusSignals::empty(),
            Phase::DataOut => BusSignals::empty(),
            Phase::DataIn => BusSignals::IO,
            Phase::Command => BusSignals::CD,
            Phase::Status => BusSignals::CD.union(BusSignals::IO),
            Phase::MessageOut => BusSignals::MSG.union(BusSignals::CD),
            Phase::MessageIn => BusSignals::MSG
                .union(BusSignals::CD)
                .union(BusSignals::IO),
        }
    }

    /// Decode the sampled signal lines back into a phase.
    pub fn from_signals(signals: BusSignals) -> Phase {
        if !signals.contains(BusSignals::BSY) {
            return if signals.contains(BusSignals::SEL) {
                Phase::Selection
            } else {
                Phase::BusFree
            };
        }

        let msg = signals.contains(BusSignals::MSG);
        let cd = signals.contains(BusSignals::CD);
        let io = signals.contains(BusSignals::IO);
        match (msg, cd, io) {
            (false, false, false) => Phase::DataOut,
            (false, false, true) => Phase::DataIn,
            (false, true, false) => Phase::Command,
            (false, true, true) => Phase::Status,
            (true, true, false) => Phase::MessageOut,
            (true, true, true) => Phase::MessageIn,
            (true, false, _) => Phase::Reserved,
        }
    }

    /// Whether the target sends bytes to the initiator in this phase.
    pub const fn is_target_out(self) -> bool {
        matches!(self, Phase::DataIn | Phase::Status | Phase::MessageIn)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::BusFree => "bus-free",
            Phase::Selection => "selection",
            Phase::Command => "command",
            Phase::DataIn => "data-in",
            Phase::DataOut => "data-out",
            Phase::Status => "status",
            Phase::MessageIn => "message-in",
            Phase::MessageOut => "message-out",
            Phase::Reserved => "reserved",
        })
    }
}
