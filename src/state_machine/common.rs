// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

/// One phase of a state machine. Steps are synchronous: a bus phase
/// transition never suspends mid-way.
pub trait StateMachine<Ctx, Resp>: Sized {
    fn step(&self, ctx: &mut Ctx) -> Resp;
}

pub trait StateMachineCtx<Out = ()>: Sized {
    fn execute(&mut self, cancel: &CancellationToken) -> Result<Out>;
}
