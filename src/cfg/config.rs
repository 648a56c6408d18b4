// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{CacheMode, DeviceType, YesNo};

/// Smallest sector size a device may be configured with.
pub const MIN_BLOCK_SIZE: u32 = 256;
/// Largest sector size a device may be configured with.
pub const MAX_BLOCK_SIZE: u32 = 4096;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Devices to attach at startup, one entry per (target, lun) address.
    pub targets: Vec<DeviceConfig>,
    /// Implementation/runtime parameters that live outside the SCSI protocol.
    pub runtime: RuntimeConfig,
    /// Custom mode-page overrides keyed by `"VENDOR:PRODUCT"`, then by page
    /// code (decimal string). Bodies are hex strings; an empty body
    /// suppresses the page, a non-empty one replaces its bytes.
    #[serde(default)]
    pub custom_mode_pages: HashMap<String, HashMap<String, String>>,
}

/// The flat property map one device is constructed from.
///
/// Consumed once at attach time; devices never re-read configuration per
/// command. Free-form keys end up in `params`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DeviceConfig {
    #[serde(rename = "Id")]
    /// Target id on the bus (0-7).
    pub id: u8,

    #[serde(default, rename = "Lun")]
    /// Logical unit behind the target id (0-7).
    pub lun: u8,

    #[serde(rename = "Type")]
    /// Device family to emulate.
    pub device_type: DeviceType,

    #[serde(default = "default_scsi_level", rename = "ScsiLevel")]
    /// SCSI level reported through INQUIRY (2 = SCSI-2).
    pub scsi_level: u8,

    #[serde(default = "default_block_size", rename = "BlockSize")]
    /// Configured sector size in bytes; fixed for the device's lifetime.
    pub block_size: u32,

    #[serde(default, rename = "Blocks")]
    /// Medium capacity in blocks.
    pub blocks: u64,

    #[serde(default, rename = "Product")]
    /// `"VENDOR:PRODUCT:REVISION"` identification string; empty fields fall
    /// back to family defaults.
    pub product_spec: String,

    #[serde(default, rename = "Caching")]
    /// Write-cache mode advertised via the caching page.
    pub caching: CacheMode,

    #[serde(default, rename = "ReadOnly")]
    /// Report the medium as write protected.
    pub read_only: YesNo,

    #[serde(flatten)]
    /// Arbitrary device parameters (vendor flags and the like).
    pub params: HashMap<String, String>,
}

fn default_scsi_level() -> u8 {
    2
}

fn default_block_size() -> u32 {
    512
}

impl DeviceConfig {
    /// Split the identification string into (vendor, product, revision),
    /// substituting family defaults for empty fields.
    pub fn product_fields(&self) -> (String, String, String) {
        let mut it = self.product_spec.split(':');
        let vendor = it.next().unwrap_or_default();
        let product = it.next().unwrap_or_default();
        let revision = it.next().unwrap_or_default();

        let vendor = if vendor.is_empty() { "RUSTSCSI" } else { vendor };
        let product = if product.is_empty() {
            match self.device_type {
                DeviceType::Disk => "HARDDISK",
                DeviceType::Optical => "CD-ROM",
                DeviceType::Tape => "TAPEDRIVE",
            }
        } else {
            product
        };
        let revision = if revision.is_empty() { "0100" } else { revision };

        (vendor.to_string(), product.to_string(), revision.to_string())
    }

    /// Read a boolean out of the free-form parameter map.
    pub fn param_bool(&self, key: &str) -> bool {
        self.params
            .get(key)
            .is_some_and(|v| matches!(v.as_str(), "Yes" | "yes" | "true" | "True" | "1"))
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.id <= 7, "target id {} out of range 0-7", self.id);
        ensure!(self.lun <= 7, "lun {} out of range 0-7", self.lun);
        ensure!(
            self.block_size.is_power_of_two()
                && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size),
            "block size {} must be a power of two within {MIN_BLOCK_SIZE}-{MAX_BLOCK_SIZE}",
            self.block_size
        );
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings that do not map to SCSI properties.
pub struct RuntimeConfig {
    #[serde(rename = "MaxTargets")]
    /// Upper bound on simultaneously attached target ids.
    pub max_targets: u32,

    #[serde(rename = "ShutdownTimeout", with = "serde_secs")]
    /// How long to wait for controller loops to wind down.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants across all configured devices.
    pub fn validate_and_normalize(&self) -> Result<()> {
        ensure!(self.runtime.max_targets >= 1, "MaxTargets must be >= 1");

        let mut seen = std::collections::HashSet::new();
        for dev in &self.targets {
            dev.validate()?;
            ensure!(
                seen.insert((dev.id, dev.lun)),
                "duplicate device address (id {}, lun {})",
                dev.id,
                dev.lun
            );
        }

        Ok(())
    }

    /// Resolve the custom mode-page overrides for one device, decoding the
    /// page-code keys and hex bodies. The result is the snapshot handed to
    /// the device at attach time and consulted once per MODE SENSE dispatch.
    pub fn custom_pages_for(&self, vendor: &str, product: &str) -> Result<HashMap<u8, Vec<u8>>> {
        let key = format!("{vendor}:{product}");
        let Some(raw) = self.custom_mode_pages.get(&key) else {
            return Ok(HashMap::new());
        };

        let mut out = HashMap::with_capacity(raw.len());
        for (code, body) in raw {
            let code: u8 = code
                .parse()
                .with_context(|| format!("invalid page code {code:?} for {key}"))?;
            ensure!(code <= 0x3f, "page code {code} out of range 0-63 for {key}");
            let bytes = hex::decode(body)
                .with_context(|| format!("invalid hex body for page {code} of {key}"))?;
            out.insert(code, bytes);
        }
        Ok(out)
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
