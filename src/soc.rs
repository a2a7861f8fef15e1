//! SoC family strategy table.
//!
//! Everything that differs between families is looked up once, when an
//! engine starts, from [`SocFamily::profile`]. The engine itself branches
//! only on the [`BootFlow`] recorded there.

use std::fmt;
use std::str::FromStr;

use crate::error::FlashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocFamily {
    /// S905/S912
    Gxl,
    /// A113
    Axg,
    /// T962
    Txlx,
    /// S905X2
    G12a,
    /// S805/A111
    M8,
}

/// Names accepted on the command line.
pub const SOC_CHOICES: &[&str] = &["gxl", "axg", "txlx", "g12a", "m8"];

/// How the boot ROM is walked up to a running u-boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFlow {
    /// gxl/axg/txlx: BL2 plus run-parameter blobs; the ROM's USB protocol
    /// revision picks the entry point.
    StagedBl2,
    /// g12a: the tool's `bl2_boot` does the heavy lifting.
    Bl2Boot,
    /// m8: compressed u-boot, decompressed in place and jumped into.
    Compressed,
}

/// Per-family constants and phase variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocProfile {
    pub family: SocFamily,
    /// Fuse register holding the secure-boot bit.
    pub secure_register: u32,
    pub secure_mask: u32,
    pub flow: BootFlow,
    /// Image role carrying the device tree.
    pub dtb_role: &'static str,
    /// Whether the data/cache erase commands apply.
    pub wipes_user_regions: bool,
}

const PROFILES: [SocProfile; 5] = [
    SocProfile {
        family: SocFamily::Gxl,
        secure_register: 0xc810_0228,
        secure_mask: 0x10,
        flow: BootFlow::StagedBl2,
        dtb_role: "_aml_dtb",
        wipes_user_regions: true,
    },
    SocProfile {
        family: SocFamily::Axg,
        secure_register: 0xff80_0228,
        secure_mask: 0x10,
        flow: BootFlow::StagedBl2,
        dtb_role: "_aml_dtb",
        wipes_user_regions: true,
    },
    SocProfile {
        family: SocFamily::Txlx,
        secure_register: 0xff80_0228,
        secure_mask: 0x10,
        flow: BootFlow::StagedBl2,
        dtb_role: "_aml_dtb",
        wipes_user_regions: true,
    },
    SocProfile {
        family: SocFamily::G12a,
        secure_register: 0xff80_0228,
        secure_mask: 0x10,
        flow: BootFlow::Bl2Boot,
        dtb_role: "_aml_dtb",
        wipes_user_regions: true,
    },
    SocProfile {
        family: SocFamily::M8,
        secure_register: 0xd901_8048,
        secure_mask: 0x80,
        flow: BootFlow::Compressed,
        dtb_role: "meson",
        wipes_user_regions: false,
    },
];

impl SocFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocFamily::Gxl => "gxl",
            SocFamily::Axg => "axg",
            SocFamily::Txlx => "txlx",
            SocFamily::G12a => "g12a",
            SocFamily::M8 => "m8",
        }
    }

    pub fn profile(self) -> &'static SocProfile {
        let row = match self {
            SocFamily::Gxl => 0,
            SocFamily::Axg => 1,
            SocFamily::Txlx => 2,
            SocFamily::G12a => 3,
            SocFamily::M8 => 4,
        };
        &PROFILES[row]
    }
}

impl SocProfile {
    pub fn is_secure(&self, register_value: u32) -> bool {
        register_value & self.secure_mask == self.secure_mask
    }
}

impl fmt::Display for SocFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocFamily {
    type Err = FlashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gxl" => Ok(SocFamily::Gxl),
            "axg" => Ok(SocFamily::Axg),
            "txlx" => Ok(SocFamily::Txlx),
            "g12a" => Ok(SocFamily::G12a),
            "m8" => Ok(SocFamily::M8),
            _ => Err(FlashError::UnsupportedSoc(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_has_its_own_profile() {
        for name in SOC_CHOICES {
            let family: SocFamily = name.parse().unwrap();
            assert_eq!(family.profile().family, family);
            assert_eq!(family.to_string(), *name);
        }
    }

    #[test]
    fn unknown_family_is_unsupported() {
        let err = "s922x".parse::<SocFamily>().unwrap_err();
        assert!(matches!(err, FlashError::UnsupportedSoc(ref name) if name == "s922x"));
    }

    #[test]
    fn secure_bit_per_family_group() {
        let gxl = SocFamily::Gxl.profile();
        assert_eq!(gxl.secure_register, 0xc810_0228);
        assert!(gxl.is_secure(0x0000_0010));
        assert!(gxl.is_secure(0xffff_ffff));
        assert!(!gxl.is_secure(0xffff_ffef));

        let g12a = SocFamily::G12a.profile();
        assert_eq!(g12a.secure_register, 0xff80_0228);
        assert!(g12a.is_secure(0x10));

        let m8 = SocFamily::M8.profile();
        assert_eq!(m8.secure_register, 0xd901_8048);
        assert!(m8.is_secure(0x80));
        assert!(!m8.is_secure(0x10));
    }

    #[test]
    fn m8_uses_meson_dtb_and_skips_region_erase() {
        let m8 = SocFamily::M8.profile();
        assert_eq!(m8.dtb_role, "meson");
        assert!(!m8.wipes_user_regions);
        assert_eq!(m8.flow, BootFlow::Compressed);
    }
}
