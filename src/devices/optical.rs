// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Read-only optical drive. The `AppleVendor` parameter turns on the vendor
//! page old Macintosh formatting tools insist on seeing.

use std::collections::HashMap;

use crate::{
    cfg::config::DeviceConfig,
    control_block::cdb::Cdb,
    devices::{DeviceIdentity, ScsiTarget},
    mode_pages::{
        PageMap,
        codec::{ModeSelect, parse_mode_select_data},
        page_requested,
        pages::{
            PAGE_APPLE_VENDOR, PAGE_CACHING, PAGE_CD_AUDIO_CONTROL, PAGE_CD_CAPABILITIES,
            PAGE_ERROR_RECOVERY, add_apple_vendor_page, add_caching_page,
            add_cd_audio_control_page, add_cd_capabilities_page, add_error_recovery_page,
        },
    },
    models::sense::ScsiFault,
};

pub struct OpticalDevice {
    identity: DeviceIdentity,
    block_size: u32,
    block_count: u64,
    apple_vendor: bool,
    custom_pages: HashMap<u8, Vec<u8>>,
    sense: Option<ScsiFault>,
}

impl OpticalDevice {
    pub fn new(cfg: &DeviceConfig, custom_pages: HashMap<u8, Vec<u8>>) -> Self {
        Self {
            identity: DeviceIdentity::from_config(cfg),
            block_size: cfg.block_size,
            // Zero blocks models an empty tray.
            block_count: cfg.blocks,
            apple_vendor: cfg.param_bool("AppleVendor"),
            custom_pages,
            sense: None,
        }
    }
}

impl ScsiTarget for OpticalDevice {
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
        if page_requested(page, PAGE_CACHING) {
            add_caching_page(pages, changeable, false);
        }
        if page_requested(page, PAGE_CD_AUDIO_CONTROL) {
            add_cd_audio_control_page(pages, changeable);
        }
        if page_requested(page, PAGE_CD_CAPABILITIES) {
            add_cd_capabilities_page(pages, changeable);
        }
    }

    fn add_vendor_pages(&self, pages: &mut PageMap, page: u8, changeable: bool) {
        if self.apple_vendor && page_requested(page, PAGE_APPLE_VENDOR) {
            add_apple_vendor_page(pages, changeable);
        }
    }

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
