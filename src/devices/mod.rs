//! This module implements the emulated device families and the shared
//! primary-command dispatch table they plug into.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Fixed block device (hard disk).
pub mod disk;
/// Shared MODE SENSE / MODE SELECT command handlers.
pub mod mode_page;
/// Read-only optical drive, optionally Apple flavored.
pub mod optical;
/// Sequential tape drive.
pub mod tape;

use std::collections::HashMap;

use anyhow::Result;
use enum_dispatch::enum_dispatch;
use zerocopy::{BigEndian, Immutable, IntoBytes, KnownLayout, U32};

use crate::{
    cfg::{config::DeviceConfig, enums::DeviceType},
    control_block::{
        cdb::Cdb,
        opcode::{
            ALLOW_MEDIUM_REMOVAL, INQUIRY, MODE_SELECT_6, MODE_SELECT_10, MODE_SENSE_6,
            MODE_SENSE_10, READ_CAPACITY_10, REQUEST_SENSE, START_STOP, SYNCHRONIZE_CACHE,
            TEST_UNIT_READY,
        },
    },
    devices::{disk::DiskDevice, optical::OpticalDevice, tape::TapeDevice},
    mode_pages::{PageMap, codec::ModeSelect},
    models::sense::{
        FAULT_INVALID_FIELD_IN_CDB, FAULT_INVALID_OPCODE, FAULT_MEDIUM_NOT_PRESENT,
        FIXED_SENSE_LEN, ScsiFault, SenseData,
    },
    utils::pad_ascii,
};

/// Length of the standard INQUIRY response this target reports.
pub const STANDARD_INQUIRY_LEN: usize = 36;

/// What a dispatched command asks the controller to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// No data phase; proceed straight to Status.
    Status,
    /// Stream these bytes to the initiator through a Data-In phase.
    DataIn(Vec<u8>),
    /// Collect this many parameter bytes through a Data-Out phase first.
    DataOut(usize),
}

/// Identity shared by all families, frozen from the property map at attach
/// time.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_type: DeviceType,
    pub scsi_level: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub removable: bool,
    pub read_only: bool,
}

impl DeviceIdentity {
    pub fn from_config(cfg: &DeviceConfig) -> Self {
        let (vendor, product, revision) = cfg.product_fields();
        Self {
            device_type: cfg.device_type,
            scsi_level: cfg.scsi_level,
            vendor,
            product,
            revision,
            removable: cfg.device_type.removable() || cfg.param_bool("Removable"),
            read_only: cfg.read_only.as_bool() || cfg.device_type == DeviceType::Optical,
        }
    }
}

/// Capability surface a device family exposes to the dispatch table and the
/// mode-page layer.
#[enum_dispatch]
pub trait ScsiTarget {
    fn identity(&self) -> &DeviceIdentity;

    /// Configured sector size; fixed for the device's lifetime.
    fn block_size(&self) -> u32;

    /// Medium capacity in blocks; zero when no medium is present.
    fn block_count(&self) -> u64;

    /// Custom mode-page overrides snapshotted from configuration.
    fn custom_pages(&self) -> &HashMap<u8, Vec<u8>>;

    /// Whether the MODE SELECT handlers are registered for this device.
    fn supports_mode_select(&self) -> bool;

    /// Whether the SP (save pages) bit may be honoured.
    fn supports_save_parameters(&self) -> bool;

    /// Populate the pages this family synthesizes for `page` (0x3f = all).
    fn setup_mode_pages(&self, pages: &mut PageMap, page: u8, changeable: bool);

    /// Family-specific vendor pages injected on top of the standard set.
    fn add_vendor_pages(&self, pages: &mut PageMap, page: u8, changeable: bool);

    /// Apply an arrived MODE SELECT parameter list.
    fn mode_select(&mut self, cmd: ModeSelect, cdb: &Cdb, data: &[u8]) -> Result<(), ScsiFault>;

    /// Record sense for the next REQUEST SENSE.
    fn set_sense(&mut self, fault: ScsiFault);

    /// Drain pending sense.
    fn take_sense(&mut self) -> Option<ScsiFault>;
}

/// All device families, dispatched as a tagged union.
#[enum_dispatch(ScsiTarget)]
pub enum TargetDevice {
    Disk(DiskDevice),
    Optical(OpticalDevice),
    Tape(TapeDevice),
}

impl TargetDevice {
    /// Build a device from its property map plus the custom-page snapshot
    /// resolved for its vendor/product key.
    pub fn from_config(cfg: &DeviceConfig, custom_pages: HashMap<u8, Vec<u8>>) -> Result<Self> {
        Ok(match cfg.device_type {
            DeviceType::Disk => DiskDevice::new(cfg, custom_pages)?.into(),
            DeviceType::Optical => OpticalDevice::new(cfg, custom_pages).into(),
            DeviceType::Tape => TapeDevice::new(cfg, custom_pages).into(),
        })
    }
}

/// Default MODE SELECT override. Reaching it means a device advertised MODE
/// SELECT support without overriding the parser, a contract violation
/// surfaced to the initiator as an illegal command.
pub fn mode_select_unsupported() -> Result<(), ScsiFault> {
    Err(FAULT_INVALID_OPCODE)
}

/// The primary dispatch table: one entry per opcode the target implements.
///
/// Absence of an entry (or of MODE SELECT support) reports illegal request /
/// invalid command operation code, never a process error.
pub fn dispatch_command(dev: &mut TargetDevice, cdb: &Cdb) -> Result<CommandOutcome, ScsiFault> {
    match cdb.op {
        TEST_UNIT_READY | START_STOP | ALLOW_MEDIUM_REMOVAL | SYNCHRONIZE_CACHE => {
            Ok(CommandOutcome::Status)
        },
        REQUEST_SENSE => Ok(CommandOutcome::DataIn(request_sense(dev, cdb))),
        INQUIRY => inquiry(dev, cdb).map(CommandOutcome::DataIn),
        READ_CAPACITY_10 => read_capacity10(dev, cdb).map(CommandOutcome::DataIn),
        MODE_SENSE_6 => mode_page::mode_sense6(dev, cdb).map(CommandOutcome::DataIn),
        MODE_SENSE_10 => mode_page::mode_sense10(dev, cdb).map(CommandOutcome::DataIn),
        MODE_SELECT_6 if dev.supports_mode_select() => {
            mode_page::mode_select6(dev, cdb).map(CommandOutcome::DataOut)
        },
        MODE_SELECT_10 if dev.supports_mode_select() => {
            mode_page::mode_select10(dev, cdb).map(CommandOutcome::DataOut)
        },
        _ => Err(FAULT_INVALID_OPCODE),
    }
}

/// Second half of a data-out command, invoked once the parameter bytes have
/// arrived from the initiator.
pub fn complete_data_out(dev: &mut TargetDevice, cdb: &Cdb, data: &[u8]) -> Result<(), ScsiFault> {
    match cdb.op {
        MODE_SELECT_6 => dev.mode_select(ModeSelect::Six, cdb, data),
        MODE_SELECT_10 => dev.mode_select(ModeSelect::Ten, cdb, data),
        _ => Err(FAULT_INVALID_OPCODE),
    }
}

fn request_sense(dev: &mut TargetDevice, cdb: &Cdb) -> Vec<u8> {
    let alloc = usize::from(cdb.buf[4]);
    let data = match dev.take_sense() {
        Some(fault) => SenseData::from_fault(&fault),
        None => SenseData::no_sense(),
    };
    let mut buf = data.to_bytes().to_vec();
    buf.truncate(alloc.min(FIXED_SENSE_LEN));
    buf
}

fn inquiry(dev: &mut TargetDevice, cdb: &Cdb) -> Result<Vec<u8>, ScsiFault> {
    // EVPD pages are not implemented by this target.
    if cdb.buf[1] & 0x01 != 0 {
        return Err(FAULT_INVALID_FIELD_IN_CDB);
    }

    let alloc = usize::from(cdb.be16(3));
    let id = dev.identity();

    let mut buf = vec![0u8; STANDARD_INQUIRY_LEN];
    buf[0] = id.device_type.inquiry_type();
    buf[1] = if id.removable { 0x80 } else { 0x00 };
    buf[2] = id.scsi_level;
    // Response data format 2, as SCSI-2 requires.
    buf[3] = 0x02;
    buf[4] = (STANDARD_INQUIRY_LEN - 5) as u8;
    buf[8..16].copy_from_slice(&pad_ascii::<8>(&id.vendor));
    buf[16..32].copy_from_slice(&pad_ascii::<16>(&id.product));
    buf[32..36].copy_from_slice(&pad_ascii::<4>(&id.revision));

    buf.truncate(alloc);
    Ok(buf)
}

/// READ CAPACITY(10) parameter data.
#[repr(C)]
#[derive(Debug, Default, IntoBytes, Immutable, KnownLayout)]
pub struct ReadCapacity10Data {
    pub last_lba: U32<BigEndian>,
    pub block_len: U32<BigEndian>,
}

fn read_capacity10(dev: &mut TargetDevice, _cdb: &Cdb) -> Result<Vec<u8>, ScsiFault> {
    if dev.block_count() == 0 {
        return Err(FAULT_MEDIUM_NOT_PRESENT);
    }

    let last = dev.block_count().saturating_sub(1).min(u64::from(u32::MAX)) as u32;
    let data = ReadCapacity10Data {
        last_lba: U32::new(last),
        block_len: U32::new(dev.block_size()),
    };
    Ok(data.as_bytes().to_vec())
}
