// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, time::Duration};

use anyhow::{Result, bail};
use scsi_target_rs::{
    bus::driver::VirtualBus,
    cfg::{
        config::DeviceConfig,
        enums::{CacheMode, DeviceType, YesNo},
    },
    devices::TargetDevice,
};

pub fn disk_config(id: u8, lun: u8) -> DeviceConfig {
    DeviceConfig {
        id,
        lun,
        device_type: DeviceType::Disk,
        scsi_level: 2,
        block_size: 512,
        blocks: 2048,
        product_spec: "RUSTSCSI:TESTDISK:0100".to_string(),
        caching: CacheMode::WriteThrough,
        read_only: YesNo::No,
        params: HashMap::new(),
    }
}

pub fn disk_device(id: u8, lun: u8) -> TargetDevice {
    TargetDevice::from_config(&disk_config(id, lun), HashMap::new())
        .expect("disk config is valid")
}

/// Poll the virtual bus until the controller loop reports a status byte.
pub async fn wait_for_status(bus: &VirtualBus) -> Result<u8> {
    for _ in 0..500 {
        if let Some(&status) = bus.take_statuses().last() {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("target never answered on the bus")
}
