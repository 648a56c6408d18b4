// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-target bus controller: owns the phase, walks one transaction from
//! Selection through Bus-Free, and dispatches CDBs to the addressed device.
//!
//! RST is sampled at the top of every loop iteration, ahead of all phase
//! logic; it aborts whatever was in flight and discards any fault raised
//! concurrently. Protocol faults never leave this module as errors; they
//! turn into CHECK CONDITION plus pending sense at the dispatch boundary.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use bytes::{BufMut, BytesMut};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    bus::{
        driver::BusDriver,
        signals::{BusSignals, Phase},
    },
    control_block::{
        cdb::{CDB_BUF_SIZE, Cdb},
        opcode::cdb_length,
    },
    devices::{CommandOutcome, ScsiTarget, TargetDevice, complete_data_out, dispatch_command},
    models::{
        message::{MSG_ABORT, MSG_BUS_DEVICE_RESET, MSG_COMMAND_COMPLETE, identify_lun},
        sense::{FAULT_INVALID_OPCODE, ScsiFault},
        status::ScsiStatus,
    },
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
};

/// Devices attached behind one target id, keyed by LUN. Shared with the
/// target service so attach/detach works independently of controller reset.
pub type DeviceMap = DashMap<u8, Arc<Mutex<TargetDevice>>>;

pub struct ControllerCtx {
    pub bus: Arc<dyn BusDriver>,
    pub target_id: u8,
    pub devices: Arc<DeviceMap>,

    phase: Phase,
    status: ScsiStatus,
    initiator_id: Option<u8>,
    identify_lun: Option<u8>,
    lun: u8,
    cdb: Option<Cdb>,

    data_in: Vec<u8>,
    data_in_offset: usize,
    data_out_expected: usize,

    state: Option<PhaseStates>,
}

impl ControllerCtx {
    pub fn new(bus: Arc<dyn BusDriver>, target_id: u8, devices: Arc<DeviceMap>) -> Self {
        Self {
            bus,
            target_id,
            devices,
            phase: Phase::BusFree,
            status: ScsiStatus::Good,
            initiator_id: None,
            identify_lun: None,
            lun: 0,
            cdb: None,
            data_in: Vec::new(),
            data_in_offset: 0,
            data_out_expected: 0,
            state: Some(PhaseStates::BusFree(BusFree)),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> ScsiStatus {
        self.status
    }

    /// The single path through which the phase ever changes, so the phase
    /// enum and the asserted MSG/C-D/I-O lines cannot disagree.
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.bus.enter_phase(phase);
        // The information-transfer phases are fully encoded on the bus lines;
        // bus-free only releases ours (SEL belongs to the initiator).
        if !matches!(phase, Phase::BusFree | Phase::Selection) {
            debug_assert_eq!(Phase::from_signals(self.bus.sample()), phase);
        }
        debug!(target_id = self.target_id, %phase, "phase");
    }

    fn with_device<T>(&self, f: impl FnOnce(&mut TargetDevice) -> T) -> Option<T> {
        let dev = self.devices.get(&self.lun)?;
        let mut guard = dev.lock().expect("device mutex poisoned");
        Some(f(&mut guard))
    }

    /// Convert a protocol fault into status + pending sense, unless a reset
    /// was concurrently observed, in which case reset handling wins and the
    /// fault is discarded.
    fn record_fault(&mut self, fault: ScsiFault) {
        if self.bus.reset_pending() {
            return;
        }
        debug!(
            target_id = self.target_id,
            lun = self.lun,
            fault = %fault,
            "command fault"
        );
        self.status = fault.status;
        self.with_device(|dev| dev.set_sense(fault));
    }

    fn release_bus(&mut self) {
        self.bus
            .release_signals(BusSignals::BSY | BusSignals::REQ);
        self.set_phase(Phase::BusFree);
    }

    /// Clear per-transaction state and return to bus-free.
    fn end_transaction(&mut self) {
        self.release_bus();
        self.status = ScsiStatus::Good;
        self.cdb = None;
        self.identify_lun = None;
        self.initiator_id = None;
        self.data_in.clear();
        self.data_in_offset = 0;
        self.data_out_expected = 0;
        self.state = Some(PhaseStates::BusFree(BusFree));
    }

    /// RST handling: clears the initiator id, aborts any in-progress phase,
    /// and forces bus-free. Takes priority over all other phase logic.
    pub fn reset(&mut self) {
        debug!(target_id = self.target_id, "bus reset observed");
        self.end_transaction();
    }

    /// Drive transactions until cancelled. RST is re-checked between (and
    /// inside) transactions; bus-level errors abort the transaction, get
    /// logged, and the loop goes on serving.
    pub fn run(&mut self, cancel: &CancellationToken) {
        debug!(target_id = self.target_id, "controller loop started");
        while !cancel.is_cancelled() {
            if self.bus.reset_pending() {
                self.reset();
                // Hold in bus-free until the initiator releases RST.
                while self.bus.reset_pending() && !cancel.is_cancelled() {
                    std::thread::yield_now();
                }
                continue;
            }
            if let Err(e) = self.execute(cancel) {
                warn!(
                    target_id = self.target_id,
                    error = %e,
                    "bus transaction aborted"
                );
            }
        }
        debug!(target_id = self.target_id, "controller loop stopped");
    }
}

#[derive(Debug)]
pub struct BusFree;
#[derive(Debug)]
pub struct Selection;
#[derive(Debug)]
pub struct Command;
#[derive(Debug)]
pub struct DataIn;
#[derive(Debug)]
pub struct DataOut;
#[derive(Debug)]
pub struct Status;
#[derive(Debug)]
pub struct MessageIn;
#[derive(Debug)]
pub struct MessageOut;

#[derive(Debug)]
pub enum PhaseStates {
    BusFree(BusFree),
    Selection(Selection),
    Command(Command),
    DataIn(DataIn),
    DataOut(DataOut),
    Status(Status),
    MessageIn(MessageIn),
    MessageOut(MessageOut),
}

type PhaseStepOut = Transition<PhaseStates, Result<()>>;

impl StateMachine<ControllerCtx, PhaseStepOut> for BusFree {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        let signals = ctx.bus.sample();
        if signals.contains(BusSignals::SEL) && !signals.contains(BusSignals::BSY) {
            let ids = ctx.bus.selection_ids();
            if ids & (1 << ctx.target_id) != 0 && !ctx.devices.is_empty() {
                let others = ids & !(1 << ctx.target_id);
                ctx.initiator_id = (others != 0).then(|| others.trailing_zeros() as u8);
                return Transition::Next(PhaseStates::Selection(Selection), Ok(()));
            }
        }
        Transition::Stay(Ok(()))
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for Selection {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        // Claim the bus; the initiator confirms by releasing SEL.
        ctx.bus.assert_signals(BusSignals::BSY);
        loop {
            let signals = ctx.bus.sample();
            if signals.contains(BusSignals::RST) {
                return Transition::Done(Ok(()));
            }
            if !signals.contains(BusSignals::SEL) {
                break;
            }
            std::hint::spin_loop();
        }

        debug!(
            target_id = ctx.target_id,
            initiator = ?ctx.initiator_id,
            "selected"
        );

        // ATN at the end of selection means the initiator has a message
        // (usually IDENTIFY) to deliver before the command.
        if ctx.bus.sample().contains(BusSignals::ATN) {
            Transition::Next(PhaseStates::MessageOut(MessageOut), Ok(()))
        } else {
            Transition::Next(PhaseStates::Command(Command), Ok(()))
        }
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for Command {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::Command);

        let first = match ctx.bus.recv_byte() {
            Ok(b) => b,
            Err(e) => return Transition::Done(Err(e)),
        };
        let Some(len) = cdb_length(first) else {
            // Reserved or vendor-specific group code.
            ctx.record_fault(FAULT_INVALID_OPCODE);
            return Transition::Next(PhaseStates::Status(Status), Ok(()));
        };

        let mut buf = [0u8; CDB_BUF_SIZE];
        buf[0] = first;
        for slot in buf.iter_mut().take(len).skip(1) {
            match ctx.bus.recv_byte() {
                Ok(b) => *slot = b,
                Err(e) => return Transition::Done(Err(e)),
            }
        }
        let Some(cdb) = Cdb::new(buf) else {
            ctx.record_fault(FAULT_INVALID_OPCODE);
            return Transition::Next(PhaseStates::Status(Status), Ok(()));
        };

        ctx.lun = ctx.identify_lun.unwrap_or_else(|| cdb.lun_bits());
        debug!(
            target_id = ctx.target_id,
            lun = ctx.lun,
            op = format_args!("{:#04x}", cdb.op),
            "dispatch"
        );

        // No device behind the addressed LUN reads as no handler at all.
        let outcome = ctx
            .with_device(|dev| dispatch_command(dev, &cdb))
            .unwrap_or(Err(FAULT_INVALID_OPCODE));
        ctx.cdb = Some(cdb);

        match outcome {
            Ok(CommandOutcome::Status) => Transition::Next(PhaseStates::Status(Status), Ok(())),
            Ok(CommandOutcome::DataIn(data)) => {
                if data.is_empty() {
                    // Zero-length transfers skip the data phase entirely.
                    Transition::Next(PhaseStates::Status(Status), Ok(()))
                } else {
                    ctx.data_in = data;
                    ctx.data_in_offset = 0;
                    Transition::Next(PhaseStates::DataIn(DataIn), Ok(()))
                }
            },
            Ok(CommandOutcome::DataOut(expected)) => {
                if expected == 0 {
                    Transition::Next(PhaseStates::Status(Status), Ok(()))
                } else {
                    ctx.data_out_expected = expected;
                    Transition::Next(PhaseStates::DataOut(DataOut), Ok(()))
                }
            },
            Err(fault) => {
                ctx.record_fault(fault);
                Transition::Next(PhaseStates::Status(Status), Ok(()))
            },
        }
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for DataIn {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::DataIn);
        while ctx.data_in_offset < ctx.data_in.len() {
            if ctx.bus.reset_pending() {
                return Transition::Done(Ok(()));
            }
            let byte = ctx.data_in[ctx.data_in_offset];
            if let Err(e) = ctx.bus.send_byte(byte) {
                return Transition::Done(Err(e));
            }
            ctx.data_in_offset += 1;
        }
        Transition::Next(PhaseStates::Status(Status), Ok(()))
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for DataOut {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::DataOut);
        let mut data = BytesMut::with_capacity(ctx.data_out_expected);
        while data.len() < ctx.data_out_expected {
            if ctx.bus.reset_pending() {
                return Transition::Done(Ok(()));
            }
            match ctx.bus.recv_byte() {
                Ok(b) => data.put_u8(b),
                Err(e) => return Transition::Done(Err(e)),
            }
        }

        let Some(cdb) = ctx.cdb.clone() else {
            return Transition::Done(Err(anyhow!("data-out phase without a command")));
        };
        let result = ctx
            .with_device(|dev| complete_data_out(dev, &cdb, &data))
            .unwrap_or(Err(FAULT_INVALID_OPCODE));
        if let Err(fault) = result {
            ctx.record_fault(fault);
        }
        Transition::Next(PhaseStates::Status(Status), Ok(()))
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for Status {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::Status);
        let status = ctx.status;
        if let Err(e) = ctx.bus.send_byte(status.to_u8()) {
            return Transition::Done(Err(e));
        }
        debug!(target_id = ctx.target_id, ?status, "status sent");
        Transition::Next(PhaseStates::MessageIn(MessageIn), Ok(()))
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for MessageIn {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::MessageIn);
        if let Err(e) = ctx.bus.send_byte(MSG_COMMAND_COMPLETE) {
            return Transition::Done(Err(e));
        }
        Transition::Done(Ok(()))
    }
}

impl StateMachine<ControllerCtx, PhaseStepOut> for MessageOut {
    fn step(&self, ctx: &mut ControllerCtx) -> PhaseStepOut {
        ctx.set_phase(Phase::MessageOut);
        loop {
            let byte = match ctx.bus.recv_byte() {
                Ok(b) => b,
                Err(e) => return Transition::Done(Err(e)),
            };

            if let Some(lun) = identify_lun(byte) {
                ctx.identify_lun = Some(lun);
            } else {
                match byte {
                    MSG_ABORT | MSG_BUS_DEVICE_RESET => return Transition::Done(Ok(())),
                    other => {
                        debug!(
                            target_id = ctx.target_id,
                            message = format_args!("{other:#04x}"),
                            "ignoring message-out byte"
                        );
                    },
                }
            }

            // The initiator keeps ATN up while more message bytes follow.
            if !ctx.bus.sample().contains(BusSignals::ATN) {
                break;
            }
        }
        Transition::Next(PhaseStates::Command(Command), Ok(()))
    }
}

impl StateMachineCtx<()> for ControllerCtx {
    /// One full bus transaction: selection through bus-free.
    fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if self.bus.reset_pending() {
                self.reset();
                return Ok(());
            }

            let state = self
                .state
                .take()
                .context("phase state must be set for ControllerCtx")?;
            let tr = match &state {
                PhaseStates::BusFree(s) => s.step(self),
                PhaseStates::Selection(s) => s.step(self),
                PhaseStates::Command(s) => s.step(self),
                PhaseStates::DataIn(s) => s.step(self),
                PhaseStates::DataOut(s) => s.step(self),
                PhaseStates::Status(s) => s.step(self),
                PhaseStates::MessageIn(s) => s.step(self),
                PhaseStates::MessageOut(s) => s.step(self),
            };

            match tr {
                Transition::Next(next, r) => {
                    if let Err(e) = r {
                        self.end_transaction();
                        return Err(e);
                    }
                    self.state = Some(next);
                },
                Transition::Stay(r) => {
                    self.state = Some(state);
                    if let Err(e) = r {
                        self.end_transaction();
                        return Err(e);
                    }
                    std::thread::yield_now();
                },
                Transition::Done(r) => {
                    self.end_transaction();
                    r?;
                    return Ok(());
                },
            }
        }
    }
}
