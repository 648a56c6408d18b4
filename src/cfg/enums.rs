// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Boolean enumeration with string serialization support
///
/// Represents yes/no values with support for various string representations
/// including "Yes"/"No", "true"/"false", and "1"/"0".
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    #[serde(
        rename = "Yes",
        alias = "yes",
        alias = "YES",
        alias = "true",
        alias = "True",
        alias = "1"
    )]
    Yes,
    #[default]
    #[serde(
        rename = "No",
        alias = "no",
        alias = "NO",
        alias = "false",
        alias = "False",
        alias = "0"
    )]
    No,
}
impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        })
    }
}
impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}
impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

/// Emulated peripheral family
///
/// Selects the device implementation attached at a (target, lun) address:
/// a fixed block device, a read-only optical drive, or a sequential tape
/// drive.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    #[serde(rename = "Disk", alias = "disk", alias = "HD", alias = "hd")]
    Disk,
    #[serde(
        rename = "Optical",
        alias = "optical",
        alias = "CD",
        alias = "cd",
        alias = "CD-ROM"
    )]
    Optical,
    #[serde(rename = "Tape", alias = "tape")]
    Tape,
}
impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceType::Disk => "Disk",
            DeviceType::Optical => "Optical",
            DeviceType::Tape => "Tape",
        })
    }
}

impl DeviceType {
    /// Peripheral device type code reported in INQUIRY byte 0.
    pub fn inquiry_type(self) -> u8 {
        match self {
            DeviceType::Disk => 0x00,
            DeviceType::Tape => 0x01,
            DeviceType::Optical => 0x05,
        }
    }

    /// Whether the medium is removable by default for this family.
    pub fn removable(self) -> bool {
        matches!(self, DeviceType::Optical | DeviceType::Tape)
    }
}

/// Write-cache behaviour advertised through the caching mode page
///
/// WriteThrough reports the cache as disabled; WriteBack sets the WCE bit.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    #[serde(rename = "WriteThrough", alias = "writethrough", alias = "off")]
    WriteThrough,
    #[serde(rename = "WriteBack", alias = "writeback", alias = "on")]
    WriteBack,
}
impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheMode::WriteThrough => "WriteThrough",
            CacheMode::WriteBack => "WriteBack",
        })
    }
}
