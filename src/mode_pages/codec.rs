// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pure codec for mode-page data: assembles MODE SENSE page sets and parses
//! MODE SELECT parameter lists. No device state lives here.
//!
//! Mode page wire format (SPC-2 § 8.3.3):
//!
//! ```text
//!  7   6   5   4   3   2   1   0      bit position
//! +---+---+-----------------------+
//! | PS| . |     PAGE CODE         |  ← byte 0 (page 0: reserved)
//! +---+---+-----------------------+
//! |      PAGE LENGTH (n − 2)      |  ← byte 1
//! +-------------------------------+
//! |      parameter bytes …        |  ← bytes 2‥n
//! +-------------------------------+
//! ```
//!
//! Page 0 is the vendor page without a page-code field; when present it is
//! always emitted last, after every other page in ascending code order.

use std::collections::HashMap;

use tracing::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    mode_pages::{ALL_PAGES, PageMap},
    models::sense::{
        FAULT_INVALID_FIELD_IN_CDB, FAULT_INVALID_FIELD_IN_PARAM_LIST,
        FAULT_PARAM_LIST_LENGTH_ERROR, ScsiFault,
    },
};

/// Parameters-savable bit in a page's first byte; preserved when the header
/// is patched.
pub const PS_BIT: u8 = 0x80;
/// Mask selecting the page-code field of a page header or CDB byte 2.
pub const PAGE_CODE_MASK: u8 = 0x3f;
/// Page-format bit in MODE SELECT CDB byte 1.
pub const PF_BIT: u8 = 0x10;
/// Save-pages bit in MODE SELECT CDB byte 1.
pub const SP_BIT: u8 = 0x01;

/// MODE SELECT(6) parameter header length.
pub const MODE_SELECT6_HEADER_LEN: usize = 4;
/// MODE SELECT(10) parameter header length.
pub const MODE_SELECT10_HEADER_LEN: usize = 8;

/// Which MODE SELECT variant delivered the parameter list; the two differ in
/// header layout and descriptor-length field width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelect {
    Six,
    Ten,
}

/// The optional 8-byte block descriptor prefixing mode parameter data.
///
/// Historically used to change device geometry; this target only ever
/// accepts a block length equal to the configured one.
#[repr(C)]
#[derive(Debug, Default, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BlockDescriptor {
    pub density: u8,
    pub block_count: [u8; 3],
    reserved: u8,
    pub block_length: [u8; 3],
}

impl BlockDescriptor {
    pub const LEN: usize = 8;

    pub fn new(block_count: u32, block_length: u32) -> Self {
        let count = block_count.min(0x00ff_ffff).to_be_bytes();
        let length = block_length.min(0x00ff_ffff).to_be_bytes();
        Self {
            density: 0,
            block_count: [count[1], count[2], count[3]],
            reserved: 0,
            block_length: [length[1], length[2], length[3]],
        }
    }

    /// The 2-byte big-endian block length legacy initiators write at
    /// descriptor bytes 6‥8.
    #[inline]
    pub fn proposed_block_length(&self) -> u32 {
        u32::from(u16::from_be_bytes([
            self.block_length[1],
            self.block_length[2],
        ]))
    }
}

/// Assemble the page data for one MODE SENSE request.
///
/// `pages` is the set the device synthesized for the requested code (all
/// supported pages for 0x3f). Custom `overrides` are applied first: an empty
/// byte sequence suppresses the page, a non-empty one replaces its bytes
/// outright. Each remaining non-zero page gets its header byte patched to
/// `code | PS` and its length byte to `len − 2`; page 0 goes last with only
/// the length byte patched.
///
/// Fails with illegal request / invalid field in CDB when the result set is
/// empty (unsupported page) or the concatenation exceeds `max_size`; the
/// latter is a hard capacity violation, never silent truncation. Truncating
/// to the allocation length is the caller's job.
pub fn assemble_mode_sense_data(
    requested: u8,
    mut pages: PageMap,
    overrides: &HashMap<u8, Vec<u8>>,
    max_size: usize,
) -> Result<Vec<u8>, ScsiFault> {
    for (&code, body) in overrides {
        if requested != ALL_PAGES && code != (requested & PAGE_CODE_MASK) {
            continue;
        }
        if body.is_empty() {
            pages.remove(&code);
        } else {
            pages.insert(code, body.clone());
        }
    }

    if pages.is_empty() {
        return Err(FAULT_INVALID_FIELD_IN_CDB);
    }

    let mut out = Vec::new();
    let page0 = pages.remove(&0);

    for (code, mut body) in pages {
        if body.len() < 2 {
            body.resize(2, 0);
        }
        body[0] = code | (body[0] & PS_BIT);
        body[1] = (body.len() - 2) as u8;
        out.extend_from_slice(&body);
    }

    // Page 0 has no page-code field, so only its length byte is patched.
    if let Some(mut body) = page0 {
        if body.len() < 2 {
            body.resize(2, 0);
        }
        body[1] = (body.len() - 2) as u8;
        out.extend_from_slice(&body);
    }

    if out.len() > max_size {
        return Err(FAULT_INVALID_FIELD_IN_CDB);
    }

    Ok(out)
}

/// Parse a MODE SELECT parameter list, validating recognized pages and any
/// block-length change request against the configured block size.
///
/// With the PF bit clear the payload is a vendor-specific SCSI-1 format:
/// accepted and ignored for compatibility with historical initiators. An
/// empty payload is equally fine; page data are optional.
pub fn parse_mode_select_data(
    cmd: ModeSelect,
    cdb: &[u8],
    data: &[u8],
    block_size: u32,
) -> Result<(), ScsiFault> {
    if cdb[1] & PF_BIT == 0 {
        return Ok(());
    }
    if data.is_empty() {
        return Ok(());
    }

    let (header_len, descriptor_len) = match cmd {
        ModeSelect::Ten => {
            if data.len() < MODE_SELECT10_HEADER_LEN {
                return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
            }
            let len = usize::from(u16::from_be_bytes([data[6], data[7]]));
            (MODE_SELECT10_HEADER_LEN, len)
        },
        ModeSelect::Six => {
            if data.len() < MODE_SELECT6_HEADER_LEN {
                return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
            }
            (MODE_SELECT6_HEADER_LEN, usize::from(data[3]))
        },
    };

    let pages_start = header_len + descriptor_len;
    if pages_start > data.len() {
        return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
    }

    if descriptor_len >= BlockDescriptor::LEN {
        let desc = BlockDescriptor::ref_from_bytes(
            &data[header_len..header_len + BlockDescriptor::LEN],
        )
        .map_err(|_| FAULT_PARAM_LIST_LENGTH_ERROR)?;
        validate_block_length_change(desc.proposed_block_length(), block_size)?;
    }

    let mut rest = &data[pages_start..];
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
        }
        let code = rest[0] & PAGE_CODE_MASK;
        let declared = usize::from(rest[1]);

        match code {
            // Read-write error recovery: content accepted as-is.
            0x01 => {
                if declared < 10 {
                    return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
                }
            },
            // Verify error recovery: content accepted as-is.
            0x07 => {
                if declared < 6 {
                    return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
                }
            },
            // Format device: carries a proposed sector size at bytes 12‥14.
            0x03 => {
                if declared < 22 {
                    return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
                }
                if rest.len() < 14 {
                    return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
                }
                let proposed = u32::from(u16::from_be_bytes([rest[12], rest[13]]));
                validate_block_length_change(proposed, block_size)?;
            },
            _ => return Err(FAULT_INVALID_FIELD_IN_PARAM_LIST),
        }

        let advance = declared + 2;
        if advance > rest.len() {
            return Err(FAULT_PARAM_LIST_LENGTH_ERROR);
        }
        rest = &rest[advance..];
    }

    Ok(())
}

/// Validate a block-length change request against the configured size.
///
/// Matching the configured value is the only accepted outcome; sector size is
/// fixed at configuration time, not negotiable at runtime, even though some
/// initiators keep trying. A rejected value that at least looks sane (a
/// non-zero power of two) gets a diagnostic before the fault.
pub fn validate_block_length_change(proposed: u32, configured: u32) -> Result<(), ScsiFault> {
    if proposed == configured {
        return Ok(());
    }

    if proposed != 0 && proposed.is_power_of_two() {
        warn!(proposed, configured, "rejecting block-length change request");
    }

    Err(FAULT_INVALID_FIELD_IN_PARAM_LIST)
}
