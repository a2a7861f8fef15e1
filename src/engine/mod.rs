//! Per-board bootstrap state machine.
//!
//! One engine drives one [`DeviceSession`] from boot ROM to flashed board:
//!
//! ```text
//! DestroyBoot ─► CheckIfBoardIsSecure ─► InitializingDDR ─► RunningUboot
//!      │              (phases 2-5 only when the scope includes bootstrap)
//!      │                                                        │
//!      ▼                                                        ▼
//!  [destroy: stop]                                PrepareForLoadingPartitions
//!                                                               │
//!    ResettingBoard ◄─ EfuseUpdate ◄─ ProgramAllPartitions ◄─ DataCachePartitionsWiping
//! ```
//!
//! Phases run strictly in order on the engine's own thread. The first failing
//! assertion ends the engine; nothing is retried or rolled back, and no other
//! board is affected.

mod bootstrap;
mod partitions;
pub mod phase;
pub mod scope;


pub use phase::Phase;
pub use scope::{FlashOptions, PartScope, DTB_PARTITION, PARTITION_CHOICES};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

use crate::config::TimingPolicy;
use crate::device::{Clock, DeviceSession, ReconnectMark, UpdateClient};
use crate::error::FlashResult;
use crate::executor::CommandExecutor;
use crate::image::ImageDescriptor;
use crate::logging::DeviceLog;
use crate::soc::SocProfile;

/// How an engine that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every phase in scope ran.
    Completed,
    /// Destroy mode erased the bootloader and stopped on purpose.
    Destroyed,
}

/// What an engine leaves behind.
#[derive(Debug)]
pub struct EngineExit {
    pub result: FlashResult<Outcome>,
    /// Last phase entered, if any.
    pub phase: Option<Phase>,
}

/// Everything engines share for the whole session.
#[derive(Clone)]
pub struct EngineContext {
    pub image: Arc<ImageDescriptor>,
    pub options: Arc<FlashOptions>,
    pub timing: TimingPolicy,
    pub executor: Arc<dyn CommandExecutor>,
    pub clock: Arc<dyn Clock>,
}

pub struct BootstrapEngine {
    session: Arc<DeviceSession>,
    ctx: EngineContext,
    log: DeviceLog,
    profile: &'static SocProfile,
    secure: bool,
    usb_protocol: Option<u8>,
    phase: Option<Phase>,
}

impl BootstrapEngine {
    pub fn new(session: Arc<DeviceSession>, ctx: EngineContext, log: DeviceLog) -> Self {
        let profile = ctx.options.soc.profile();
        Self {
            session,
            ctx,
            log,
            profile,
            secure: false,
            usb_protocol: None,
            phase: None,
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Drive the board through every phase in scope.
    pub fn run(mut self) -> EngineExit {
        self.note(Level::INFO, "Start burning");
        let result = self.drive();
        match &result {
            Ok(Outcome::Completed) => self.note(Level::INFO, "Burning done!"),
            Ok(Outcome::Destroyed) => self.note(Level::INFO, "Bootloader destroyed, stopping"),
            Err(err) => {
                let at = self.phase.map(|p| p.to_string()).unwrap_or_default();
                self.note(Level::ERROR, &format!("Burning ERROR in {at}: {err}"));
            }
        }
        EngineExit {
            result,
            phase: self.phase,
        }
    }

    fn drive(&mut self) -> FlashResult<Outcome> {
        if let Some(outcome) = self.destroy_boot()? {
            return Ok(outcome);
        }

        if self.ctx.options.scope.includes_bootstrap() {
            self.check_if_board_is_secure()?;
            self.initializing_ddr()?;
            self.running_uboot()?;
            self.prepare_for_loading_partitions()?;
        }

        self.data_cache_partitions_wiping();
        self.program_all_partitions()?;
        self.efuse_update()?;
        self.resetting_board()?;
        Ok(Outcome::Completed)
    }

    fn options(&self) -> &FlashOptions {
        &self.ctx.options
    }

    fn image(&self) -> &ImageDescriptor {
        &self.ctx.image
    }

    fn client(&self) -> UpdateClient<'_> {
        UpdateClient::new(self.ctx.executor.as_ref(), &self.session, &self.log)
    }

    /// Write to the global stream, tagged with the board, and to the board's
    /// own stream.
    fn note(&self, level: Level, message: &str) {
        let who = self.session.describe();
        if level == Level::ERROR {
            error!("{who} {message}");
        } else if level == Level::WARN {
            warn!("{who} {message}");
        } else {
            info!("{who} {message}");
        }
        self.log.record(level, message);
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = Some(phase);
        self.note(Level::INFO, &format!("{}...", phase.title()));
    }

    fn done(&self, phase: Phase) {
        self.note(Level::INFO, &format!("{} - OK!", phase.title()));
    }

    fn note_file(&self, what: &str, path: &Path) {
        self.note(Level::INFO, &format!("{what} file: {}", path.display()));
    }

    fn sleep(&self, duration: Duration) {
        self.ctx.clock.sleep(duration);
    }

    /// Wait for the board to reappear after `since`, taken before the command
    /// that sent it off the bus.
    fn wait_for_reconnect(&self, since: ReconnectMark, timeout: Duration) -> FlashResult<()> {
        self.note(Level::INFO, "Waiting for the board to reconnect...");
        self.session.wait_for_reconnect(
            since,
            self.ctx.clock.as_ref(),
            self.ctx.timing.poll_interval,
            timeout,
        )?;
        self.note(Level::INFO, "Board reconnected");
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
