// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI sense machinery: sense keys, the typed protocol fault raised by
//! command handlers, and fixed-format sense data (SPC-4 § 4.5.3).
//!
//! A [`ScsiFault`] is the only error that crosses the device/codec boundary.
//! It is caught exactly once, at the controller's dispatch boundary, where it
//! becomes CHECK CONDITION status plus pending sense for REQUEST SENSE.

use core::fmt;
use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::models::status::ScsiStatus;

/// Sense data must be ≥ 18 bytes for fixed format.
pub const FIXED_SENSE_LEN: usize = 18;

/// Sense keys (SPC-4 Table 41).
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    #[default]
    NoSense = 0x00,
    RecoveredError = 0x01,
    NotReady = 0x02,
    MediumError = 0x03,
    HardwareError = 0x04,
    IllegalRequest = 0x05,
    UnitAttention = 0x06,
    DataProtect = 0x07,
    BlankCheck = 0x08,
    AbortedCommand = 0x0b,
}

impl SenseKey {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v & 0x0f {
            0x00 => Self::NoSense,
            0x01 => Self::RecoveredError,
            0x02 => Self::NotReady,
            0x03 => Self::MediumError,
            0x04 => Self::HardwareError,
            0x05 => Self::IllegalRequest,
            0x06 => Self::UnitAttention,
            0x07 => Self::DataProtect,
            0x08 => Self::BlankCheck,
            0x0b => Self::AbortedCommand,
            _ => return None,
        })
    }
}

/// Protocol fault carrying `{sense key, ASC, ASCQ}`.
///
/// Raised by device handlers and the mode-page codec, converted to controller
/// status at the single dispatch boundary. Never process-fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{key:?} (asc {asc:#04x}, ascq {ascq:#04x})")]
pub struct ScsiFault {
    pub key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
    /// Status reported alongside the sense; CHECK CONDITION unless a handler
    /// picked something else explicitly.
    pub status: ScsiStatus,
}

impl ScsiFault {
    pub const fn new(key: SenseKey, asc: u8, ascq: u8) -> Self {
        Self {
            key,
            asc,
            ascq,
            status: ScsiStatus::CheckCondition,
        }
    }

    pub const fn with_status(mut self, status: ScsiStatus) -> Self {
        self.status = status;
        self
    }

    /// Human-readable ASC/ASCQ description, "vendor specific" when unlisted.
    pub fn describe(&self) -> &'static str {
        asc_ascq_to_str(self.asc, self.ascq)
    }
}

/// Illegal request / invalid command operation code.
pub const FAULT_INVALID_OPCODE: ScsiFault = ScsiFault::new(SenseKey::IllegalRequest, 0x20, 0x00);
/// Illegal request / invalid field in CDB.
pub const FAULT_INVALID_FIELD_IN_CDB: ScsiFault =
    ScsiFault::new(SenseKey::IllegalRequest, 0x24, 0x00);
/// Illegal request / invalid field in parameter list.
pub const FAULT_INVALID_FIELD_IN_PARAM_LIST: ScsiFault =
    ScsiFault::new(SenseKey::IllegalRequest, 0x26, 0x00);
/// Illegal request / parameter list length error.
pub const FAULT_PARAM_LIST_LENGTH_ERROR: ScsiFault =
    ScsiFault::new(SenseKey::IllegalRequest, 0x1a, 0x00);
/// Illegal request / logical unit not supported.
pub const FAULT_LUN_NOT_SUPPORTED: ScsiFault = ScsiFault::new(SenseKey::IllegalRequest, 0x25, 0x00);
/// Illegal request / saving parameters not supported.
pub const FAULT_SAVING_PARAMS_NOT_SUPPORTED: ScsiFault =
    ScsiFault::new(SenseKey::IllegalRequest, 0x39, 0x00);
/// Unit attention / power on or bus device reset occurred.
pub const FAULT_UNIT_ATTENTION_RESET: ScsiFault =
    ScsiFault::new(SenseKey::UnitAttention, 0x29, 0x00);
/// Not ready / medium not present.
pub const FAULT_MEDIUM_NOT_PRESENT: ScsiFault = ScsiFault::new(SenseKey::NotReady, 0x3a, 0x00);

/// Fixed-format sense-data byte layout (SPC-4 Table 43).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SenseData {
    pub valid: bool,        // bit7 of byte0
    pub response_code: u8,  // low-7 bits of byte0
    pub sense_key: u8,      // low-4 bits of byte2
    pub information: u32,   // bytes 3-6
    pub additional_len: u8, // byte7
    pub asc: u8,            // Additional Sense Code
    pub ascq: u8,           // Additional Sense Code Qualifier
}

impl SenseData {
    /// Current-error fixed format for a caught fault.
    pub fn from_fault(fault: &ScsiFault) -> Self {
        Self {
            valid: false,
            response_code: 0x70,
            sense_key: fault.key as u8,
            information: 0,
            additional_len: (FIXED_SENSE_LEN - 8) as u8,
            asc: fault.asc,
            ascq: fault.ascq,
        }
    }

    /// NO SENSE descriptor returned when nothing is pending.
    pub fn no_sense() -> Self {
        Self {
            response_code: 0x70,
            additional_len: (FIXED_SENSE_LEN - 8) as u8,
            ..Default::default()
        }
    }

    /// Serialize into the 18-byte fixed descriptor.
    pub fn to_bytes(&self) -> [u8; FIXED_SENSE_LEN] {
        let mut buf = [0u8; FIXED_SENSE_LEN];
        buf[0] = self.response_code & 0x7f;
        if self.valid {
            buf[0] |= 0x80;
        }
        buf[2] = self.sense_key & 0x0f;
        buf[3..7].copy_from_slice(&self.information.to_be_bytes());
        buf[7] = self.additional_len;
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }

    /// Parse *fixed-format* sense data; the buffer must be ≥ 18 bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_SENSE_LEN {
            return Err(anyhow!(
                "sense buffer too small: {} < {FIXED_SENSE_LEN}",
                buf.len()
            ));
        }

        let information = u32::from_be_bytes(
            buf[3..7]
                .try_into()
                .context("failed to read Information field (bytes 3‥6)")?,
        );

        Ok(Self {
            valid: buf[0] & 0x80 != 0,
            response_code: buf[0] & 0x7f,
            sense_key: buf[2] & 0x0f,
            information,
            additional_len: buf[7],
            asc: buf[12],
            ascq: buf[13],
        })
    }
}

/// Return the SPC-4 description for a given ASC/ASCQ pair.
///
/// * If the pair is not present in the table, returns `"UNSPECIFIED / vendor
///   specific"`.
#[inline]
pub fn asc_ascq_to_str(asc: u8, ascq: u8) -> &'static str {
    let k = (u16::from(asc) << 8) | u16::from(ascq);
    ASC_ASCQ_MAP
        .get(&k)
        .copied()
        .unwrap_or("UNSPECIFIED / vendor specific")
}

/// The ASC/ASCQ pairs this target can actually produce, plus the handful of
/// neighbours initiators commonly probe for.
const ASC_ASCQ: &[(u16, &str)] = &[
    (0x0000, "No additional sense information"),
    (0x1a00, "Parameter list length error"),
    (0x2000, "Invalid command operation code"),
    (0x2100, "Logical block address out of range"),
    (0x2400, "Invalid field in CDB"),
    (0x2500, "Logical unit not supported"),
    (0x2600, "Invalid field in parameter list"),
    (0x2900, "Power on, reset, or bus device reset occurred"),
    (0x2902, "SCSI bus reset occurred"),
    (0x3900, "Saving parameters not supported"),
    (0x3a00, "Medium not present"),
];

static ASC_ASCQ_MAP: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    let mut m: HashMap<u16, &'static str> = HashMap::with_capacity(ASC_ASCQ.len());
    for (code, desc) in ASC_ASCQ {
        m.insert(*code, desc);
    }
    m
});

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key {:#x}, asc {:#04x}, ascq {:#04x} ({})",
            self.sense_key,
            self.asc,
            self.ascq,
            asc_ascq_to_str(self.asc, self.ascq)
        )
    }
}
