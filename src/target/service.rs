// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The process-wide target registry behind the management control channel.
//!
//! One controller loop per attached target id, each a synchronous poller on
//! a blocking task. Devices live in a per-controller [`DeviceMap`] shared
//! with the loop, so attach/detach never requires a controller reset; the
//! controller goes away only when its last LUN does.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    bus::driver::BusDriver,
    cfg::config::{Config, DeviceConfig},
    devices::{ScsiTarget, TargetDevice},
    state_machine::controller::{ControllerCtx, DeviceMap},
};

/// One running controller loop plus the device map it serves.
struct ControllerHandle {
    devices: Arc<DeviceMap>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Identity + geometry of one attached device, as reported over the control
/// channel's list operation.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: u8,
    pub lun: u8,
    pub device_type: String,
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub block_size: u32,
    pub blocks: u64,
}

pub struct TargetService {
    bus: Arc<dyn BusDriver>,
    max_targets: u32,
    controllers: DashMap<u8, ControllerHandle>,
}

impl TargetService {
    pub fn new(bus: Arc<dyn BusDriver>, max_targets: u32) -> Self {
        Self {
            bus,
            max_targets,
            controllers: DashMap::new(),
        }
    }

    /// Build a device from its property map (resolving the custom mode-page
    /// snapshot for its vendor/product key) and attach it.
    pub fn attach(&self, cfg: &Config, dev_cfg: &DeviceConfig) -> Result<()> {
        let (vendor, product, _) = dev_cfg.product_fields();
        let custom = cfg.custom_pages_for(&vendor, &product)?;
        let device = TargetDevice::from_config(dev_cfg, custom)?;
        self.attach_device(dev_cfg.id, dev_cfg.lun, device)
    }

    /// Attach an already-built device, creating the controller loop for its
    /// target id when it is the first LUN behind it.
    pub fn attach_device(&self, id: u8, lun: u8, device: TargetDevice) -> Result<()> {
        ensure!(id <= 7, "target id {id} out of range 0-7");
        ensure!(lun <= 7, "lun {lun} out of range 0-7");
        if !self.controllers.contains_key(&id) {
            ensure!(
                (self.controllers.len() as u32) < self.max_targets,
                "MaxTargets ({}) exceeded",
                self.max_targets
            );
        }

        let handle = self
            .controllers
            .entry(id)
            .or_insert_with(|| self.spawn_controller(id));
        ensure!(
            !handle.devices.contains_key(&lun),
            "device already attached at (id {id}, lun {lun})"
        );
        handle.devices.insert(lun, Arc::new(Mutex::new(device)));
        info!(id, lun, "device attached");
        Ok(())
    }

    /// Detach one LUN; the controller loop is cancelled with its last LUN.
    pub fn detach(&self, id: u8, lun: u8) -> Result<()> {
        let empty = {
            let Some(handle) = self.controllers.get(&id) else {
                bail!("no controller for target id {id}");
            };
            handle
                .devices
                .remove(&lun)
                .with_context(|| format!("no device at (id {id}, lun {lun})"))?;
            handle.devices.is_empty()
        };

        if empty && let Some((_, handle)) = self.controllers.remove(&id) {
            handle.cancel.cancel();
        }
        info!(id, lun, "device detached");
        Ok(())
    }

    /// Snapshot of every attached device, sorted by (id, lun).
    pub fn list(&self) -> Vec<DeviceInfo> {
        let mut out = Vec::new();
        for ctrl in self.controllers.iter() {
            let id = *ctrl.key();
            for dev in ctrl.devices.iter() {
                let guard = dev.value().lock().expect("device mutex poisoned");
                let ident = guard.identity();
                out.push(DeviceInfo {
                    id,
                    lun: *dev.key(),
                    device_type: ident.device_type.to_string(),
                    vendor: ident.vendor.clone(),
                    product: ident.product.clone(),
                    revision: ident.revision.clone(),
                    block_size: guard.block_size(),
                    blocks: guard.block_count(),
                });
            }
        }
        out.sort_by_key(|d| (d.id, d.lun));
        out
    }

    /// Cancel every controller loop and wait (bounded) for them to drain.
    pub async fn shutdown(self, timeout: Duration) {
        for entry in self.controllers.iter() {
            entry.cancel.cancel();
        }
        let ids: Vec<u8> = self.controllers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.controllers.remove(&id) {
                let _ = tokio::time::timeout(timeout, handle.task).await;
            }
        }
    }

    fn spawn_controller(&self, id: u8) -> ControllerHandle {
        let devices: Arc<DeviceMap> = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();
        let mut ctx = ControllerCtx::new(self.bus.clone(), id, devices.clone());
        let child = cancel.clone();
        // The controller is a tight synchronous poller; keep it off the
        // async worker threads.
        let task = tokio::task::spawn_blocking(move || ctx.run(&child));
        ControllerHandle {
            devices,
            cancel,
            task,
        }
    }
}
