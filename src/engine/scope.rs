use std::fmt;
use std::path::PathBuf;

use crate::image::BOOTLOADER_ROLE;
use crate::soc::SocFamily;

/// Partition table role of the device tree.
pub const DTB_PARTITION: &str = "_aml_dtb";

/// Names accepted by `--parts`.
pub const PARTITION_CHOICES: &[&str] = &[
    "all",
    "none",
    "bootloader",
    "dtb",
    "logo",
    "recovery",
    "boot",
    "system",
];

/// Which partitions and bootstrap phases a run touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartScope {
    All,
    /// Bootstrap nothing, write nothing; flags like wipe still apply.
    None,
    Bootloader,
    /// The device tree partition only.
    Dtb,
    /// One named partition; the board must already run u-boot.
    Partition(String),
}

impl PartScope {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "all" => PartScope::All,
            "none" => PartScope::None,
            "bootloader" => PartScope::Bootloader,
            "dtb" => PartScope::Dtb,
            other => PartScope::Partition(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PartScope::All => "all",
            PartScope::None => "none",
            PartScope::Bootloader => "bootloader",
            PartScope::Dtb => "dtb",
            PartScope::Partition(name) => name,
        }
    }

    /// Whether phases 2 to 5 run.
    pub fn includes_bootstrap(&self) -> bool {
        matches!(self, PartScope::All | PartScope::Bootloader)
    }

    /// Whether phase 1 is entered at all. For `none` it only probes.
    pub fn probes_bootloader(&self) -> bool {
        matches!(self, PartScope::All | PartScope::Bootloader | PartScope::None)
    }

    /// Whether a partition table entry is in scope.
    pub fn selects(&self, sub_type: &str) -> bool {
        match self {
            PartScope::All => true,
            PartScope::None => false,
            PartScope::Bootloader => sub_type == BOOTLOADER_ROLE,
            PartScope::Dtb => sub_type == DTB_PARTITION,
            PartScope::Partition(name) => sub_type == name,
        }
    }
}

impl fmt::Display for PartScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session flags, shared by every engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashOptions {
    pub soc: SocFamily,
    pub scope: PartScope,
    pub wipe: bool,
    pub reset: bool,
    /// Erase the bootloader, reset, and stop.
    pub destroy: bool,
    pub efuse_file: Option<PathBuf>,
    /// Whether a destroy run waits for the board to come back.
    pub wait_after_destroy: bool,
}

impl FlashOptions {
    pub fn new(soc: SocFamily, scope: PartScope) -> Self {
        Self {
            soc,
            scope,
            wipe: false,
            reset: false,
            destroy: false,
            efuse_file: None,
            wait_after_destroy: false,
        }
    }
}
