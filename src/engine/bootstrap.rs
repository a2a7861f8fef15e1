//! Phases 1 to 5: from whatever the board runs now to a u-boot that accepts
//! partition writes.

use tracing::Level;

use super::{path_arg, BootstrapEngine, Outcome, Phase, DTB_PARTITION};
use crate::error::FlashResult;
use crate::image::{PlatformKey, BOOTLOADER_ROLE};
use crate::soc::BootFlow;

/// Harmless command; also swallows the bytes lost right after a reset.
const PROBE_COMMAND: &str = "echo 12345";

/// Fixed load address of the compressed m8 u-boot.
const M8_UBOOT_LOAD: &str = "0x00400000";

/// Offset into the m8 parameter area where the decompressor leaves the
/// u-boot entry point.
const M8_JUMP_SLOT: u32 = 0x18;

/// USB protocol revision whose ROM expects execution at `bl2ParaAddr`.
const USB_PROTOCOL_BL2_ENTRY: u8 = 8;

impl BootstrapEngine {
    /// Phase 1. `Some` when the engine stops here.
    pub(super) fn destroy_boot(&mut self) -> FlashResult<Option<Outcome>> {
        let destroy = self.options().destroy;
        if !destroy && !self.options().scope.probes_bootloader() {
            return Ok(None);
        }
        self.enter(Phase::DestroyBoot);

        let client = self.client();
        let reboot = destroy || self.options().scope.includes_bootstrap();
        if client.bulkcmd(PROBE_COMMAND) && reboot {
            self.note(Level::INFO, "Rebooting the board");
            client.bulkcmd("bootloader_is_old");
            client.bulkcmd_checked("erase_bootloader")?;
            if destroy {
                client.bulkcmd("store erase boot");
                client.bulkcmd("amlmmc erase 1");
                client.bulkcmd("nand erase 0 4096");
            }
            let mark = self.session.reconnect_mark();
            client.bulkcmd("reset");

            if !destroy || self.options().wait_after_destroy {
                self.wait_for_reconnect(mark, self.ctx.timing.reconnect_timeout)?;
                self.sleep(self.ctx.timing.destroy_settle);
            }
        }
        self.done(Phase::DestroyBoot);

        Ok(destroy.then_some(Outcome::Destroyed))
    }

    /// Phase 2.
    pub(super) fn check_if_board_is_secure(&mut self) -> FlashResult<()> {
        self.enter(Phase::CheckIfBoardIsSecure);

        let value = self.client().read_register(self.profile.secure_register)?;
        self.secure = self.profile.is_secure(value);
        if self.secure {
            self.note(Level::INFO, "Board is IN secure mode");
        } else {
            self.note(Level::INFO, "Board is NOT IN secure mode");
        }
        Ok(())
    }

    /// Phase 3.
    pub(super) fn initializing_ddr(&mut self) -> FlashResult<()> {
        self.enter(Phase::InitializingDdr);
        let platform = self.image().platform();
        let flow = self.profile.flow;

        match flow {
            BootFlow::StagedBl2 => {
                let bl2 = self.image().bl2(self.secure)?;
                self.note_file("BL2", &bl2);
                let ddr = self.image().ddr_init_params(flow)?;
                self.note_file("DDR", &ddr);

                let client = self.client();
                let bl2_para = platform.require(PlatformKey::Bl2ParaAddr)?;
                client.run("cwr", &[&path_arg(&bl2), platform.require(PlatformKey::DdrLoad)?])?;
                client.run("write", &[&path_arg(&ddr), bl2_para])?;
                client.run("run", &[platform.require(PlatformKey::DdrRun)?])?;

                let protocol = client.identify()?.usb_protocol();
                self.note(Level::INFO, &format!("USB protocol: {protocol}"));
                if protocol == USB_PROTOCOL_BL2_ENTRY {
                    client.run("run", &[bl2_para])?;
                }
                self.usb_protocol = Some(protocol);
            }
            BootFlow::Bl2Boot => {
                let tpl = self.image().tpl(self.secure)?;
                self.note_file("TPL", &tpl);

                let client = self.client();
                let ddr_load = platform.require(PlatformKey::DdrLoad)?;
                client.run("write", &[&path_arg(&tpl), ddr_load, "0x10000"])?;
                client.run("run", &[ddr_load])?;
            }
            BootFlow::Compressed => {
                self.sleep(self.ctx.timing.m8_rom_settle);

                let bl2 = self.image().bl2(self.secure)?;
                self.note_file("BL2", &bl2);

                let client = self.client();
                client.run("cwr", &[&path_arg(&bl2), platform.require(PlatformKey::DdrLoad)?])?;
                client.run("run", &[platform.require(PlatformKey::DdrRun)?])?;
            }
        }

        self.sleep(self.ctx.timing.ddr_settle);
        self.done(Phase::InitializingDdr);
        Ok(())
    }

    /// Phase 4. Ends with the board re-enumerated under u-boot.
    pub(super) fn running_uboot(&mut self) -> FlashResult<()> {
        self.enter(Phase::RunningUboot);
        let platform = self.image().platform();
        let flow = self.profile.flow;
        let mark = self.session.reconnect_mark();

        match flow {
            BootFlow::StagedBl2 => {
                let bl2 = self.image().bl2(self.secure)?;
                self.note_file("BL2", &bl2);
                let tpl = self.image().tpl(self.secure)?;
                self.note_file("TPL", &tpl);
                let fip = self.image().fip_params(flow)?;
                self.note_file("FIP", &fip);

                let client = self.client();
                let bl2_para = platform.require(PlatformKey::Bl2ParaAddr)?;
                client.run("write", &[&path_arg(&bl2), platform.require(PlatformKey::DdrLoad)?])?;
                client.run("write", &[&path_arg(&fip), bl2_para])?;
                client.run("write", &[&path_arg(&tpl), platform.require(PlatformKey::UbootLoad)?])?;

                if self.usb_protocol == Some(USB_PROTOCOL_BL2_ENTRY) {
                    client.run("run", &[bl2_para])?;
                } else {
                    client.run("run", &[platform.require(PlatformKey::UbootRun)?])?;
                }
            }
            BootFlow::Bl2Boot => {
                let tpl = self.image().tpl(self.secure)?;
                self.note_file("TPL", &tpl);
                self.client().run("bl2_boot", &[&path_arg(&tpl)])?;
            }
            BootFlow::Compressed => {
                let fip = self.image().fip_params(flow)?;
                self.note_file("FIP", &fip);
                let tpl = self.image().tpl(self.secure)?;
                self.note_file("TPL", &tpl);

                let client = self.client();
                client.run("write", &[&path_arg(&fip), platform.require(PlatformKey::BinPara)?])?;
                if self.secure {
                    client.run(
                        "write",
                        &[&path_arg(&tpl), platform.require(PlatformKey::UbootEncDown)?],
                    )?;
                    client.run("run", &[platform.require(PlatformKey::UbootEncRun)?])?;
                } else {
                    client.run("write", &[&path_arg(&tpl), M8_UBOOT_LOAD])?;
                    client.run("run", &[platform.require(PlatformKey::UbootDecomp)?])?;
                    self.sleep(self.ctx.timing.m8_decompress);

                    let slot = platform
                        .require_address(PlatformKey::BinPara)?
                        .wrapping_add(M8_JUMP_SLOT);
                    let jump = client.read_register(slot)?;
                    client.run("run", &[&format!("0x{jump:x}")])?;
                }
            }
        }
        self.done(Phase::RunningUboot);

        self.wait_for_reconnect(mark, self.ctx.timing.reconnect_timeout)?;
        self.client().bulkcmd(PROBE_COMMAND);
        Ok(())
    }

    /// Phase 5.
    pub(super) fn prepare_for_loading_partitions(&mut self) -> FlashResult<()> {
        self.enter(Phase::PrepareForLoadingPartitions);
        let wipe = self.options().wipe;

        if self.profile.flow == BootFlow::Compressed {
            self.note(Level::INFO, "Creating partition...");
            let client = self.client();
            if wipe {
                client.bulkcmd("disk_initial 3");
                client.bulkcmd_checked("disk_initial 2")?;
            } else {
                client.bulkcmd_checked("disk_initial 0")?;
            }
            self.note(Level::INFO, "Creating partition - OK!");

            self.write_bootloader()?;

            self.note(Level::INFO, "Writing device tree...");
            let dtb = self.image().dtb(self.profile)?;
            self.note_file("DTB", &dtb);
            self.client()
                .run("mwrite", &[&path_arg(&dtb), "mem", "dtb", "normal"])?;
            self.note(Level::INFO, "Writing device tree - OK!");
        } else {
            let meson = self.image().dtb_params(self.secure)?;
            self.client()
                .run("mwrite", &[&path_arg(&meson), "mem", "dtb", "normal"])?;

            self.note(Level::INFO, "Creating partition...");
            let init = if wipe { "disk_initial 1" } else { "disk_initial 0" };
            self.client().bulkcmd_checked(init)?;
            self.note(Level::INFO, "Creating partition - OK!");

            self.note(Level::INFO, "Writing device tree...");
            let dtb = self.image().dtb(self.profile)?;
            self.note_file("DTB", &dtb);
            self.client()
                .run("partition", &[DTB_PARTITION, &path_arg(&dtb)])?;
            self.note(Level::INFO, "Writing device tree - OK!");

            self.write_bootloader()?;
        }

        let client = self.client();
        client.bulkcmd("setenv upgrade_step 1");
        client.bulkcmd("save");
        if self.profile.flow == BootFlow::Compressed {
            client.bulkcmd("save_setting");
        }

        self.done(Phase::PrepareForLoadingPartitions);
        Ok(())
    }

    fn write_bootloader(&self) -> FlashResult<()> {
        self.note(Level::INFO, "Writing bootloader...");
        let bootloader = self.image().bootloader()?;
        self.note_file("Bootloader", &bootloader);
        self.client()
            .run("partition", &[BOOTLOADER_ROLE, &path_arg(&bootloader)])?;
        self.note(Level::INFO, "Writing bootloader - OK!");
        Ok(())
    }
}
