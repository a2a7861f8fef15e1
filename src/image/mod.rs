//! Image descriptor: the unpacked upgrade image plus the tables that say
//! which file plays which role.
//!
//! Built once at startup and shared read-only by every engine. Loading it is
//! the only failure that is fatal to the whole process; resolving a role is
//! a per-device [`FlashError`].

pub mod config;
pub mod platform;

pub use config::{ImageConfig, ImageItem};
pub use platform::{PlatformConfig, PlatformKey};

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{FlashError, FlashResult};
use crate::executor::{CommandExecutor, PACKER_TOOL};
use crate::soc::{BootFlow, SocProfile};

pub const IMAGE_CONFIG_FILENAME: &str = "image.cfg";
const UNPACK_OK_MARKER: &str = "Image unpack OK!";

/// Helper blobs shipped next to the vendor tools.
pub const DDR_INIT_PARAMS: &str = "usbbl2runpara_ddrinit.bin";
pub const FIP_RUN_PARAMS: &str = "usbbl2runpara_runfipimg.bin";
pub const M8_DECOMPRESS_PARAMS: &str = "decompressPara_4M.dump";

pub const BOOTLOADER_ROLE: &str = "bootloader";
pub const PLATFORM_ROLE: &str = "platform";

#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    root: PathBuf,
    tool_dir: PathBuf,
    config: ImageConfig,
    platform: PlatformConfig,
}

impl ImageDescriptor {
    /// Unpack `image` into a fresh `work_dir` and load its tables.
    pub fn unpack(
        executor: &dyn CommandExecutor,
        image: &Path,
        work_dir: &Path,
        tool_dir: &Path,
    ) -> Result<Self> {
        info!("Unpacking image '{}' ...", image.display());
        recreate_dir(work_dir)?;

        info!(
            "Extract image '{}' to '{}'",
            image.display(),
            work_dir.display()
        );
        let args = vec![
            "-d".to_string(),
            image.display().to_string(),
            work_dir.display().to_string(),
        ];
        let out = executor
            .execute(PACKER_TOOL, &args)
            .with_context(|| format!("running {PACKER_TOOL} on '{}'", image.display()))?;
        if !out.stdout.contains(UNPACK_OK_MARKER) {
            error!("Unpack result:\n{}", out.stdout);
            bail!(
                "can't unpack image '{}': {}",
                image.display(),
                out.stderr.trim()
            );
        }
        info!("Unpack result:\n{}", out.stdout);
        info!("Image '{}' successfully unpacked", image.display());

        Self::load(work_dir, tool_dir)
    }

    /// Load the tables of an already unpacked image.
    pub fn load(root: &Path, tool_dir: &Path) -> Result<Self> {
        let config_path = root.join(IMAGE_CONFIG_FILENAME);
        if !config_path.is_file() {
            bail!("image config '{}' doesn't exist", config_path.display());
        }
        let config = ImageConfig::load(&config_path)?;
        info!("Image config:\n{}", config.summary());

        let Some(platform_item) = config.get(PLATFORM_ROLE) else {
            bail!(
                "can't find platform config in '{}'",
                config_path.display()
            );
        };
        let platform_path = root.join(&platform_item.file);
        if !platform_path.is_file() {
            bail!(
                "platform config '{}' doesn't exist",
                platform_path.display()
            );
        }
        let platform = PlatformConfig::load(&platform_path)?;
        info!("Platform config:\n{}", platform.summary());

        Ok(Self {
            root: root.to_path_buf(),
            tool_dir: tool_dir.to_path_buf(),
            config,
            platform,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    pub fn partitions(&self) -> impl Iterator<Item = &ImageItem> {
        self.config.partitions()
    }

    /// Remove the unpack directory.
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            info!("Cleanup tmp directory: {}", self.root.display());
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("removing unpack directory '{}'", self.root.display()))?;
        }
        Ok(())
    }

    fn role_path(&self, role: &str) -> FlashResult<PathBuf> {
        let item = self
            .config
            .get(role)
            .ok_or_else(|| FlashError::MissingArtifact(format!("image role '{role}'")))?;
        require_file(self.root.join(&item.file))
    }

    fn signed_role_path(&self, role: &str) -> FlashResult<PathBuf> {
        if self.config.get(role).is_none() {
            return Err(FlashError::SecureImageMissing(role.to_string()));
        }
        self.role_path(role)
    }

    pub fn bootloader(&self) -> FlashResult<PathBuf> {
        self.role_path(BOOTLOADER_ROLE)
    }

    pub fn dtb(&self, profile: &SocProfile) -> FlashResult<PathBuf> {
        self.role_path(profile.dtb_role)
    }

    /// First-stage loader, signed when the board is secure.
    pub fn bl2(&self, secure: bool) -> FlashResult<PathBuf> {
        if secure {
            self.signed_role_path("DDR_ENC")
        } else {
            self.role_path("DDR")
        }
    }

    /// Second-stage u-boot; the compressed variant is preferred when present.
    pub fn tpl(&self, secure: bool) -> FlashResult<PathBuf> {
        if secure {
            self.signed_role_path("UBOOT_ENC")
        } else if self.config.get("UBOOT_COMP").is_some() {
            self.role_path("UBOOT_COMP")
        } else {
            self.role_path("UBOOT")
        }
    }

    /// Device tree blob loaded into memory before partitioning.
    pub fn dtb_params(&self, secure: bool) -> FlashResult<PathBuf> {
        if secure {
            self.signed_role_path("meson1_ENC")
        } else {
            self.role_path("meson1")
        }
    }

    pub fn ddr_init_params(&self, flow: BootFlow) -> FlashResult<PathBuf> {
        match flow {
            BootFlow::StagedBl2 => require_file(self.tool_dir.join(DDR_INIT_PARAMS)),
            BootFlow::Bl2Boot | BootFlow::Compressed => Err(FlashError::MissingArtifact(format!(
                "no DDR init parameter blob for {flow:?} boot flow"
            ))),
        }
    }

    pub fn fip_params(&self, flow: BootFlow) -> FlashResult<PathBuf> {
        match flow {
            BootFlow::StagedBl2 => require_file(self.tool_dir.join(FIP_RUN_PARAMS)),
            BootFlow::Compressed => require_file(self.tool_dir.join(M8_DECOMPRESS_PARAMS)),
            BootFlow::Bl2Boot => Err(FlashError::MissingArtifact(format!(
                "no FIP parameter blob for {flow:?} boot flow"
            ))),
        }
    }

    pub fn item_file(&self, item: &ImageItem) -> FlashResult<PathBuf> {
        require_file(self.root.join(&item.file))
    }
}

pub fn require_file(path: PathBuf) -> FlashResult<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(FlashError::MissingArtifact(format!(
            "file '{}' doesn't exist",
            path.display()
        )))
    }
}

fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| {
            format!("removing previous unpack directory '{}'", path.display())
        })?;
    }
    fs::create_dir_all(path)
        .with_context(|| format!("creating unpack directory '{}'", path.display()))
}
