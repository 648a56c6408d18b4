// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed block device. Synthesizes the classic hard-disk page set and accepts
//! MODE SELECT parameter lists (geometry change requests are validated and
//! rejected by the codec).

use std::collections::HashMap;

use anyhow::{Result, ensure};

use crate::{
    cfg::{config::DeviceConfig, enums::CacheMode},
    control_block::cdb::Cdb,
    devices::{DeviceIdentity, ScsiTarget},
    mode_pages::{
        PageMap,
        codec::{ModeSelect, parse_mode_select_data},
        page_requested,
        pages::{
            PAGE_CACHING, PAGE_DRIVE_GEOMETRY, PAGE_ERROR_RECOVERY, PAGE_FORMAT_DEVICE,
            add_caching_page, add_drive_geometry_page, add_error_recovery_page,
            add_format_device_page,
        },
    },
    models::sense::ScsiFault,
};

pub struct DiskDevice {
    identity: DeviceIdentity,
    block_size: u32,
    block_count: u64,
    write_cache: bool,
    custom_pages: HashMap<u8, Vec<u8>>,
    sense: Option<ScsiFault>,
}

impl DiskDevice {
    pub fn new(cfg: &DeviceConfig, custom_pages: HashMap<u8, Vec<u8>>) -> Result<Self> {
        ensure!(
            cfg.blocks > 0,
            "disk at (id {}, lun {}) needs a non-zero Blocks property",
            cfg.id,
            cfg.lun
        );
        Ok(Self {
            identity: DeviceIdentity::from_config(cfg),
            block_size: cfg.block_size,
            block_count: cfg.blocks,
            write_cache: cfg.caching == CacheMode::WriteBack,
            custom_pages,
            sense: None,
        })
    }
}

impl ScsiTarget for DiskDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn custom_pages(&self) -> &HashMap<u8, Vec<u8>> {
        &self.custom_pages
    }

    fn supports_mode_select(&self) -> bool {
        true
    }

    fn supports_save_parameters(&self) -> bool {
        false
    }

    fn setup_mode_pages(&self, pages: &mut PageMap, page: u8, changeable: bool) {
        if page_requested(page, PAGE_ERROR_RECOVERY) {
            add_error_recovery_page(pages, changeable);
        }
        if page_requested(page, PAGE_FORMAT_DEVICE) {
            add_format_device_page(pages, changeable, self.block_size, self.identity.removable);
        }
        if page_requested(page, PAGE_DRIVE_GEOMETRY) {
            add_drive_geometry_page(pages, changeable, self.block_count);
        }
        if page_requested(page, PAGE_CACHING) {
            add_caching_page(pages, changeable, self.write_cache);
        }
    }

    fn add_vendor_pages(&self, _pages: &mut PageMap, _page: u8, _changeable: bool) {}

    fn mode_select(&mut self, cmd: ModeSelect, cdb: &Cdb, data: &[u8]) -> Result<(), ScsiFault> {
        parse_mode_select_data(cmd, &cdb.buf, data, self.block_size)
    }

    fn set_sense(&mut self, fault: ScsiFault) {
        self.sense = Some(fault);
    }

    fn take_sense(&mut self) -> Option<ScsiFault> {
        self.sense.take()
    }
}
