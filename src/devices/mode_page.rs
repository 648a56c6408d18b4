// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The mode-page capability every device family composes: MODE SENSE builds
//! the parameter header + block descriptor and delegates page assembly to the
//! codec; MODE SELECT validates the CDB and announces the expected data-out
//! length, leaving the payload to the device's `mode_select` override.
//!
//! CDB field layout (SCSI-2):
//!
//! ```text
//! MODE SENSE(6)   [2] = PC(7..6) | PAGE(5..0), [4] = allocation length
//! MODE SENSE(10)  [2] = PC(7..6) | PAGE(5..0), [7..9] = allocation length (be)
//! MODE SELECT     [1] = PF(bit 4) | SP(bit 0)
//! MODE SELECT(6)  [4] = parameter list length
//! MODE SELECT(10) [7..9] = parameter list length (be)
//! ```

use zerocopy::IntoBytes;

use crate::{
    control_block::cdb::Cdb,
    devices::{ScsiTarget, TargetDevice},
    mode_pages::{
        PageMap,
        codec::{
            BlockDescriptor, PAGE_CODE_MASK, SP_BIT, assemble_mode_sense_data,
        },
    },
    models::sense::{FAULT_INVALID_FIELD_IN_CDB, ScsiFault},
};

/// MODE SENSE(6) keeps its total length in a single byte.
pub const MODE_SENSE6_MAX_LEN: usize = 256;
/// MODE SENSE(10) keeps its total length in two bytes.
pub const MODE_SENSE10_MAX_LEN: usize = 65536;

/// Page-control field: changeable-values request.
const PC_CHANGEABLE: u8 = 0b01;
/// Page-control field: saved-values request (not implemented).
const PC_SAVED: u8 = 0b11;

fn collect_pages(dev: &TargetDevice, page: u8, changeable: bool) -> PageMap {
    let mut pages = PageMap::new();
    dev.setup_mode_pages(&mut pages, page, changeable);
    dev.add_vendor_pages(&mut pages, page, changeable);
    pages
}

/// Write-protect flag reported in the device-specific parameter byte.
fn device_specific_parameter(dev: &TargetDevice) -> u8 {
    if dev.identity().read_only { 0x80 } else { 0x00 }
}

fn decode_page_control(cdb: &Cdb) -> Result<bool, ScsiFault> {
    match cdb.buf[2] >> 6 {
        PC_SAVED => Err(FAULT_INVALID_FIELD_IN_CDB),
        pc => Ok(pc == PC_CHANGEABLE),
    }
}

/// MODE SENSE(6): 4-byte parameter header, optional block descriptor, pages.
pub fn mode_sense6(dev: &mut TargetDevice, cdb: &Cdb) -> Result<Vec<u8>, ScsiFault> {
    let page = cdb.buf[2] & PAGE_CODE_MASK;
    let changeable = decode_page_control(cdb)?;
    let alloc = usize::from(cdb.buf[4]);
    let dbd = cdb.buf[1] & 0x08 != 0;

    let mut buf = vec![0u8; 4];
    buf[2] = device_specific_parameter(dev);
    append_block_descriptor(dev, dbd, &mut buf, 3);

    let pages = collect_pages(dev, page, changeable);
    let data =
        assemble_mode_sense_data(page, pages, dev.custom_pages(), MODE_SENSE6_MAX_LEN - buf.len())?;
    buf.extend_from_slice(&data);

    // Mode data length does not count its own byte.
    buf[0] = (buf.len() - 1) as u8;
    buf.truncate(alloc);
    Ok(buf)
}

/// MODE SENSE(10): 8-byte parameter header, otherwise the same shape.
pub fn mode_sense10(dev: &mut TargetDevice, cdb: &Cdb) -> Result<Vec<u8>, ScsiFault> {
    let page = cdb.buf[2] & PAGE_CODE_MASK;
    let changeable = decode_page_control(cdb)?;
    let alloc = usize::from(cdb.be16(7));
    let dbd = cdb.buf[1] & 0x08 != 0;

    let mut buf = vec![0u8; 8];
    buf[3] = device_specific_parameter(dev);
    append_block_descriptor(dev, dbd, &mut buf, 7);

    let pages = collect_pages(dev, page, changeable);
    let data = assemble_mode_sense_data(
        page,
        pages,
        dev.custom_pages(),
        MODE_SENSE10_MAX_LEN - buf.len(),
    )?;
    buf.extend_from_slice(&data);

    // Mode data length does not count its own two bytes.
    let total = (buf.len() - 2) as u16;
    buf[0..2].copy_from_slice(&total.to_be_bytes());
    buf.truncate(alloc);
    Ok(buf)
}

fn append_block_descriptor(dev: &TargetDevice, dbd: bool, buf: &mut Vec<u8>, len_index: usize) {
    if dbd || dev.block_count() == 0 {
        return;
    }
    buf[len_index] = BlockDescriptor::LEN as u8;
    let desc = BlockDescriptor::new(
        dev.block_count().min(u64::from(u32::MAX)) as u32,
        dev.block_size(),
    );
    buf.extend_from_slice(desc.as_bytes());
}

fn check_save_pages(dev: &TargetDevice, cdb: &Cdb) -> Result<(), ScsiFault> {
    if cdb.buf[1] & SP_BIT != 0 && !dev.supports_save_parameters() {
        return Err(FAULT_INVALID_FIELD_IN_CDB);
    }
    Ok(())
}

/// MODE SELECT(6): validate the CDB, return the expected parameter length.
/// Parsing happens in the device override once the bytes have arrived.
pub fn mode_select6(dev: &mut TargetDevice, cdb: &Cdb) -> Result<usize, ScsiFault> {
    check_save_pages(dev, cdb)?;
    Ok(usize::from(cdb.buf[4]))
}

/// MODE SELECT(10): same contract with the wide length field.
pub fn mode_select10(dev: &mut TargetDevice, cdb: &Cdb) -> Result<usize, ScsiFault> {
    check_save_pages(dev, cdb)?;
    Ok(usize::from(cdb.be16(7)))
}
