// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The seam between the phase state machine and the wiring underneath it.
//!
//! [`BusDriver`] is everything a controller needs from a bus: sampling and
//! driving control lines, switching the phase-encoding lines, and moving
//! single bytes with the REQ/ACK handshake hidden behind the trait. Physical
//! GPIO drivers live outside this crate; [`VirtualBus`] is the in-memory
//! implementation, which also plays the minimum initiator-side part of the
//! handshake (releasing SEL once the target answers with BSY, feeding queued
//! command/data bytes, collecting what the target sends back) so a controller
//! can run end to end without hardware.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use anyhow::{Result, bail};

use crate::bus::signals::{BusSignals, Phase};

/// Target-side view of one SCSI bus.
///
/// Byte-level pacing (REQ/ACK timing) is the implementation's concern; every
/// method here is a synchronous, bounded operation.
pub trait BusDriver: Send + Sync {
    /// Sample all control lines at once.
    fn sample(&self) -> BusSignals;

    /// Drive the given control lines high.
    fn assert_signals(&self, signals: BusSignals);

    /// Release the given control lines.
    fn release_signals(&self, signals: BusSignals);

    /// Drive MSG/C-D/I-O to `phase`'s encoding, leaving other lines alone.
    fn enter_phase(&self, phase: Phase);

    /// The data-bus byte latched while SEL is asserted (one bit per id).
    fn selection_ids(&self) -> u8;

    /// Receive one byte from the initiator (Command/Data-Out/Message-Out).
    fn recv_byte(&self) -> Result<u8>;

    /// Send one byte to the initiator (Data-In/Status/Message-In).
    fn send_byte(&self, byte: u8) -> Result<()>;

    /// True while the RST line is asserted.
    fn reset_pending(&self) -> bool {
        self.sample().contains(BusSignals::RST)
    }
}

#[derive(Default)]
struct Shared {
    signals: BusSignals,
    phase: Phase,
    selection_ids: u8,
    /// Bytes the initiator will deliver in Command and Data-Out phases.
    to_target: VecDeque<u8>,
    /// Bytes the initiator will deliver in Message-Out phase.
    msg_out: VecDeque<u8>,
    data_in: Vec<u8>,
    msg_in: Vec<u8>,
    statuses: Vec<u8>,
}

/// In-memory bus with a scripted initiator on the other end.
///
/// Tests (and the demo binary) pre-load the initiator side (selection ids,
/// CDB bytes, parameter data, message bytes), then let a controller run one
/// transaction against it and inspect what came back.
#[derive(Default)]
pub struct VirtualBus {
    shared: Mutex<Shared>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("virtual bus lock poisoned")
    }

    /// Initiator side: start selection of `target_id`.
    ///
    /// Asserts SEL, puts both id bits on the data bus, and raises ATN when the
    /// initiator wants a Message-Out phase before the command.
    pub fn select(&self, initiator_id: u8, target_id: u8, attention: bool) {
        let mut s = self.lock();
        s.selection_ids = (1 << initiator_id) | (1 << target_id);
        s.signals |= BusSignals::SEL;
        if attention {
            s.signals |= BusSignals::ATN;
        }
    }

    /// Initiator side: bytes delivered during the Command phase.
    pub fn queue_command(&self, cdb: &[u8]) {
        self.lock().to_target.extend(cdb.iter().copied());
    }

    /// Initiator side: parameter bytes delivered during Data-Out.
    pub fn queue_data_out(&self, data: &[u8]) {
        self.lock().to_target.extend(data.iter().copied());
    }

    /// Initiator side: message bytes delivered during Message-Out; raises ATN.
    pub fn queue_message_out(&self, messages: &[u8]) {
        let mut s = self.lock();
        s.msg_out.extend(messages.iter().copied());
        s.signals |= BusSignals::ATN;
    }

    pub fn assert_reset(&self) {
        self.lock().signals |= BusSignals::RST;
    }

    pub fn release_reset(&self) {
        self.lock().signals -= BusSignals::RST;
    }

    /// Everything the target streamed during Data-In phases so far.
    pub fn take_data_in(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().data_in)
    }

    /// Message bytes the target sent during Message-In phases.
    pub fn take_messages_in(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().msg_in)
    }

    /// The most recent status byte, if a Status phase ran.
    pub fn last_status(&self) -> Option<u8> {
        self.lock().statuses.last().copied()
    }

    /// Drain every status byte seen so far.
    pub fn take_statuses(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().statuses)
    }

    /// Drop any undelivered initiator bytes (after a reset test).
    pub fn clear_queues(&self) {
        let mut s = self.lock();
        s.to_target.clear();
        s.msg_out.clear();
    }
}

impl BusDriver for VirtualBus {
    fn sample(&self) -> BusSignals {
        self.lock().signals
    }

    fn assert_signals(&self, signals: BusSignals) {
        let mut s = self.lock();
        s.signals |= signals;
        // Initiator half of the selection handshake: once the target answers
        // with BSY, the initiator releases SEL.
        if signals.contains(BusSignals::BSY) && s.signals.contains(BusSignals::SEL) {
            s.signals -= BusSignals::SEL;
        }
    }

    fn release_signals(&self, signals: BusSignals) {
        self.lock().signals -= signals;
    }

    fn enter_phase(&self, phase: Phase) {
        let mut s = self.lock();
        s.phase = phase;
        s.signals -= BusSignals::PHASE_MASK;
        s.signals |= phase.signals();
    }

    fn selection_ids(&self) -> u8 {
        self.lock().selection_ids
    }

    fn recv_byte(&self) -> Result<u8> {
        let mut s = self.lock();
        match s.phase {
            Phase::Command | Phase::DataOut => match s.to_target.pop_front() {
                Some(b) => Ok(b),
                None => bail!("initiator starved the {} phase", s.phase),
            },
            Phase::MessageOut => {
                let Some(b) = s.msg_out.pop_front() else {
                    bail!("initiator starved the message-out phase");
                };
                // The initiator drops ATN along with its last message byte.
                if s.msg_out.is_empty() {
                    s.signals -= BusSignals::ATN;
                }
                Ok(b)
            },
            other => bail!("target cannot receive during the {other} phase"),
        }
    }

    fn send_byte(&self, byte: u8) -> Result<()> {
        let mut s = self.lock();
        match s.phase {
            Phase::DataIn => s.data_in.push(byte),
            Phase::Status => s.statuses.push(byte),
            Phase::MessageIn => s.msg_in.push(byte),
            other => bail!("target cannot send during the {other} phase"),
        }
        Ok(())
    }
}
