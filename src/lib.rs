//! This crate provides a target-side (device) emulation of the SCSI protocol.
// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Bus signal lines, phase encoding, and the bus driver seam.
pub mod bus;
/// Handles configuration, command-line parsing, and logging.
pub mod cfg;
/// Command Descriptor Block parsing and SCSI operation codes.
pub mod control_block;
/// Emulated device families and their command handlers.
pub mod devices;
/// MODE SENSE / MODE SELECT page codec and page builders.
pub mod mode_pages;
/// Defines status, message, and sense data structures shared by all devices.
pub mod models;
/// Contains the bus controller phase state machine.
pub mod state_machine;
/// Target service: attach/detach devices and run controller loops.
pub mod target;
/// Provides utility functions used throughout the crate.
pub mod utils;
