// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sequential tape drive. Reports no block geometry and keeps the default
//! (unsupported) MODE SELECT override, so the dispatch table never registers
//! the handlers for it.

use std::collections::HashMap;

use crate::{
    cfg::config::DeviceConfig,
    control_block::cdb::Cdb,
    devices::{DeviceIdentity, ScsiTarget, mode_select_unsupported},
    mode_pages::{
        PageMap,
        codec::ModeSelect,
        page_requested,
        pages::{
            PAGE_ERROR_RECOVERY, PAGE_TAPE_DEVICE_CONFIG, add_error_recovery_page,
            add_tape_device_config_page,
        },
    },
    models::sense::ScsiFault,
};

pub struct TapeDevice {
    identity: DeviceIdentity,
    block_size: u32,
    custom_pages: HashMap<u8, Vec<u8>>,
    sense: Option<ScsiFault>,
}

impl TapeDevice {
    pub fn new(cfg: &DeviceConfig, custom_pages: HashMap<u8, Vec<u8>>) -> Self {
        Self {
            identity: DeviceIdentity::from_config(cfg),
            block_size: cfg.block_size,
            custom_pages,
            sense: None,
        }
    }
}

impl ScsiTarget for TapeDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        // Sequential access: no fixed block geometry to report.
        0
    }

    fn custom_pages(&self) -> &HashMap<u8, Vec<u8>> {
        &self.custom_pages
    }

    fn supports_mode_select(&self) -> bool {
        false
    }

    fn supports_save_parameters(&self) -> bool {
        false
    }

    fn setup_mode_pages(&self, pages: &mut PageMap, page: u8, changeable: bool) {
        if page_requested(page, PAGE_ERROR_RECOVERY) {
            add_error_recovery_page(pages, changeable);
        }
        if page_requested(page, PAGE_TAPE_DEVICE_CONFIG) {
            add_tape_device_config_page(pages, changeable);
        }
    }

    fn add_vendor_pages(&self, _pages: &mut PageMap, _page: u8, _changeable: bool) {}

    fn mode_select(&mut self, _cmd: ModeSelect, _cdb: &Cdb, _data: &[u8]) -> Result<(), ScsiFault> {
        mode_select_unsupported()
    }

    fn set_sense(&mut self, fault: ScsiFault) {
        self.sense = Some(fault);
    }

    fn take_sense(&mut self) -> Option<ScsiFault> {
        self.sense.take()
    }
}
