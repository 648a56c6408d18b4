// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI operation codes this target dispatches on, plus the group-code rule
//! that fixes a CDB's length.
//!
//! ```text
//!  7   6   5   4   3   2   1   0      bit position
//! +-----------+-------------------+
//! |   GROUP   |   COMMAND CODE    |  ← first CDB octet
//! +-----------+-------------------+
//! ```
//!
//! Group 0 commands are 6 bytes, groups 1 and 2 are 10 bytes, group 4 is 16
//! bytes, group 5 is 12 bytes; groups 3, 6, and 7 are reserved or vendor
//! specific and are rejected before dispatch.

/// TEST UNIT READY (group 0, no data).
pub const TEST_UNIT_READY: u8 = 0x00;
/// REQUEST SENSE (group 0, data-in).
pub const REQUEST_SENSE: u8 = 0x03;
/// INQUIRY (group 0, data-in).
pub const INQUIRY: u8 = 0x12;
/// MODE SELECT(6) (group 0, data-out).
pub const MODE_SELECT_6: u8 = 0x15;
/// MODE SENSE(6) (group 0, data-in).
pub const MODE_SENSE_6: u8 = 0x1a;
/// START STOP UNIT (group 0, no data).
pub const START_STOP: u8 = 0x1b;
/// PREVENT/ALLOW MEDIUM REMOVAL (group 0, no data).
pub const ALLOW_MEDIUM_REMOVAL: u8 = 0x1e;
/// READ CAPACITY(10) (group 1, data-in).
pub const READ_CAPACITY_10: u8 = 0x25;
/// SYNCHRONIZE CACHE(10) (group 1, no data).
pub const SYNCHRONIZE_CACHE: u8 = 0x35;
/// MODE SELECT(10) (group 2, data-out).
pub const MODE_SELECT_10: u8 = 0x55;
/// MODE SENSE(10) (group 2, data-in).
pub const MODE_SENSE_10: u8 = 0x5a;

/// Length in bytes of the CDB whose first byte is `opcode`, from its group
/// code. `None` for the reserved and vendor-specific groups.
#[inline]
pub fn cdb_length(opcode: u8) -> Option<usize> {
    match opcode >> 5 {
        0 => Some(6),
        1 | 2 => Some(10),
        4 => Some(16),
        5 => Some(12),
        _ => None,
    }
}
