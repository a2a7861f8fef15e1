//! Phases 6 to 9, run against a u-boot that accepts `bulkcmd`.

use tracing::Level;

use super::{path_arg, BootstrapEngine, PartScope, Phase, DTB_PARTITION};
use crate::error::FlashResult;
use crate::image::{require_file, BOOTLOADER_ROLE};

impl BootstrapEngine {
    /// Phase 6. Every command is best effort; not every board has these
    /// regions.
    pub(super) fn data_cache_partitions_wiping(&mut self) {
        if !self.options().wipe {
            return;
        }
        self.enter(Phase::DataCachePartitionsWiping);

        let client = self.client();
        client.bulkcmd("setenv firstboot 1");
        client.bulkcmd("save");
        client.bulkcmd("rpmb_reset");

        if self.profile.wipes_user_regions {
            for region in ["data", "cache"] {
                self.note(Level::INFO, &format!("Wiping {region} partition..."));
                client.bulkcmd(&format!("amlmmc erase {region}"));
                client.bulkcmd(&format!("nand erase.part {region}"));
                self.note(Level::INFO, &format!("Wiping {region} partition - OK!"));
            }
        }

        self.done(Phase::DataCachePartitionsWiping);
    }

    /// Phase 7. Bootloader and device tree were already written in phase 5,
    /// unless the device tree is the only thing asked for.
    pub(super) fn program_all_partitions(&mut self) -> FlashResult<()> {
        self.enter(Phase::ProgramAllPartitions);
        let scope = &self.options().scope;
        let image = self.image();

        for item in image.partitions() {
            if !scope.selects(&item.sub_type) || item.sub_type == BOOTLOADER_ROLE {
                continue;
            }
            let is_dtb = item.sub_type == DTB_PARTITION;
            if is_dtb && *scope != PartScope::Dtb {
                continue;
            }

            let file = if is_dtb {
                image.dtb(self.profile)?
            } else {
                image.item_file(item)?
            };

            self.note(Level::INFO, &format!("Write {} partition...", item.sub_type));
            self.client().run(
                "partition",
                &[&item.sub_type, &path_arg(&file), &item.file_type],
            )?;
            self.note(Level::INFO, &format!("Write {} partition - OK!", item.sub_type));
        }

        self.done(Phase::ProgramAllPartitions);
        Ok(())
    }

    /// Phase 8. Fuse programming stays disabled; only the file is checked.
    pub(super) fn efuse_update(&mut self) -> FlashResult<()> {
        let Some(efuse_file) = self.options().efuse_file.clone() else {
            return Ok(());
        };
        self.enter(Phase::EfuseUpdate);
        self.note_file("Efuse", &efuse_file);

        require_file(efuse_file)?;
        self.note(
            Level::WARN,
            "Efuse programming is disabled, board fuses left untouched",
        );

        self.done(Phase::EfuseUpdate);
        Ok(())
    }

    /// Phase 9.
    pub(super) fn resetting_board(&mut self) -> FlashResult<()> {
        if self.options().scope == PartScope::None || !self.options().reset {
            return Ok(());
        }
        self.enter(Phase::ResettingBoard);

        let mark = self.session.reconnect_mark();
        self.client().bulkcmd("burn_complete 1");
        self.wait_for_reconnect(mark, self.ctx.timing.reset_timeout)?;

        self.done(Phase::ResettingBoard);
        Ok(())
    }
}
