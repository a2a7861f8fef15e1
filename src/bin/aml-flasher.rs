//! Flash every Amlogic board that shows up on the USB bus.
//!
//! # Usage
//!
//! ```bash
//! # Full flash of S905 boards, reset them when done
//! aml-flasher --img aml_upgrade_package.img --parts all --soc gxl --reset
//!
//! # Rewrite only the boot partition of boards already running u-boot
//! aml-flasher --img aml_upgrade_package.img --parts boot --soc g12a
//! ```
//!
//! Runs until Ctrl+C. Logs land in `<log dir>/log-<stamp>/`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aml_flasher::config::FlasherConfig;
use aml_flasher::device::SystemClock;
use aml_flasher::discovery::{sha256_file, Orchestrator, RunManifest};
use aml_flasher::engine::{EngineContext, FlashOptions, PartScope, PARTITION_CHOICES};
use aml_flasher::executor::{CommandExecutor, ProcessExecutor};
use aml_flasher::image::ImageDescriptor;
use aml_flasher::logging::{init_tracing, now_utc_timestamp, SessionLogLayout};
use aml_flasher::preflight::{
    acquire_host_lock, check_tool_dir, host_lock_path, resolve_tool_dir, REQUIRED_TOOLS,
};
use aml_flasher::soc::{SocFamily, SOC_CHOICES};
use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "aml-flasher")]
#[command(about = "Automated flashing of Amlogic devices")]
struct Args {
    /// Location of aml_upgrade_package.img.
    #[arg(long, value_parser = existing_file)]
    img: PathBuf,

    /// Which partition to burn.
    #[arg(long, value_parser = PossibleValuesParser::new(PARTITION_CHOICES.iter().copied()))]
    parts: String,

    /// SoC family (gxl=S905/S912, axg=A113, txlx=T962, g12a=S905X2, m8=S805/A111).
    #[arg(long, value_parser = PossibleValuesParser::new(SOC_CHOICES.iter().copied()))]
    soc: String,

    /// Wipe the data and cache partitions.
    #[arg(long)]
    wipe: bool,

    /// Reset the board at the end of the burning.
    #[arg(long)]
    reset: bool,

    /// Erase the bootloader and reset the board.
    #[arg(long)]
    destroy: bool,

    /// Efuse file; checked, programming stays disabled.
    #[arg(long, value_parser = existing_file)]
    efuse_file: Option<PathBuf>,

    /// Config file (default: <config dir>/aml-flasher/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log root, overrides [paths] log_dir.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn existing_file(arg: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(arg);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("File {arg} doesn't exist!"))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = FlasherConfig::load(args.config.as_deref())?;
    let log_root = args.log_dir.clone().unwrap_or_else(|| config.log_dir.clone());
    let layout = SessionLogLayout::create(&log_root)?;
    init_tracing(&layout.general_log())?;

    let result = run(&args, &config, &layout);
    if let Err(err) = &result {
        error!("Unexpected exception: {err:#}");
    }
    result
}

fn run(args: &Args, config: &FlasherConfig, layout: &SessionLogLayout) -> Result<()> {
    let started_at_utc = now_utc_timestamp();
    let soc: SocFamily = args.soc.parse()?;
    let scope = PartScope::parse(&args.parts);

    let tool_dir = resolve_tool_dir(config.tool_dir.as_deref())?;
    check_tool_dir(&tool_dir, REQUIRED_TOOLS)?;
    info!("Vendor tools: {}", tool_dir.display());
    let _lock = acquire_host_lock(&host_lock_path(&config.work_dir))?;

    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new(&tool_dir));
    let image_sha256 = sha256_file(&args.img)?;
    let image = Arc::new(
        ImageDescriptor::unpack(executor.as_ref(), &args.img, &config.work_dir, &tool_dir)
            .context("loading upgrade image")?,
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(err) = ctrlc::set_handler(move || {
        warn!("Unexpected program termination: Ctrl+C");
        flag.store(true, Ordering::SeqCst);
    }) {
        error!("failed to set Ctrl-C handler: {}", err);
    }

    let options = FlashOptions {
        soc,
        scope,
        wipe: args.wipe,
        reset: args.reset,
        destroy: args.destroy,
        efuse_file: args.efuse_file.clone(),
        wait_after_destroy: config.destroy_waits_for_reconnect,
    };
    info!(
        "SoC: {}, parts: {}, wipe: {}, reset: {}, destroy: {}",
        options.soc, options.scope, options.wipe, options.reset, options.destroy
    );

    let ctx = EngineContext {
        image: Arc::clone(&image),
        options: Arc::new(options),
        timing: config.timing,
        executor,
        clock: Arc::new(SystemClock),
    };
    let mut orchestrator = Orchestrator::new(ctx, Some(layout.devices_dir()));
    orchestrator.run(&cancel);

    write_manifest(args, layout, &orchestrator, image_sha256, started_at_utc)?;
    image.cleanup()
}

fn write_manifest(
    args: &Args,
    layout: &SessionLogLayout,
    orchestrator: &Orchestrator,
    image_sha256: String,
    started_at_utc: String,
) -> Result<()> {
    let manifest = RunManifest {
        tool_version: env!("CARGO_PKG_VERSION"),
        image: display(&args.img),
        image_sha256,
        soc: args.soc.clone(),
        parts: args.parts.clone(),
        wipe: args.wipe,
        reset: args.reset,
        destroy: args.destroy,
        started_at_utc,
        finished_at_utc: now_utc_timestamp(),
        records: orchestrator.records().to_vec(),
    };
    let path = layout.manifest_path();
    manifest.write(&path)?;
    info!(
        "Run manifest: {} ({} board(s))",
        path.display(),
        manifest.records.len()
    );
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
