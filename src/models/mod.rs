//! This module defines the data structures shared by every emulated device.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Defines the single-byte bus messages (IDENTIFY, COMMAND COMPLETE, ...).
pub mod message;
/// Defines sense keys, protocol faults, and fixed-format sense data.
pub mod sense;
/// Defines the SAM status codes.
pub mod status;
