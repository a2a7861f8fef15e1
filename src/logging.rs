//! Log streams.
//!
//! Two kinds of output per flashing session:
//!
//! - the global stream, `tracing` events written to stdout and to
//!   `log-<stamp>/General.log`
//! - one device stream per chip id, `log-<stamp>/DevicesLog/chipid_<id>.log`,
//!   holding every vendor tool command and its raw response
//!
//! ```text
//! logs/
//! └── log-2026-10-16_09-30-12/
//!     ├── General.log
//!     ├── run-manifest.json
//!     └── DevicesLog/
//!         ├── chipid_0x1a2b3c.log
//!         └── chipid_0x4d5e6f.log
//! ```

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const GENERAL_LOG_FILENAME: &str = "General.log";
pub const DEVICES_LOG_DIRNAME: &str = "DevicesLog";
pub const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";

/// Per-session log directory.
#[derive(Debug, Clone)]
pub struct SessionLogLayout {
    root: PathBuf,
}

impl SessionLogLayout {
    /// Create `<log_root>/log-<stamp>/DevicesLog`.
    pub fn create(log_root: &Path) -> Result<Self> {
        let root = log_root.join(session_dir_name(OffsetDateTime::now_utc()));
        let layout = Self { root };
        fs::create_dir_all(layout.devices_dir()).with_context(|| {
            format!(
                "creating session log directory '{}'",
                layout.devices_dir().display()
            )
        })?;
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn general_log(&self) -> PathBuf {
        self.root.join(GENERAL_LOG_FILENAME)
    }

    pub fn devices_dir(&self) -> PathBuf {
        self.root.join(DEVICES_LOG_DIRNAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(RUN_MANIFEST_FILENAME)
    }
}

/// Install the global subscriber: stdout plus the general log file.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(general_log: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(general_log)
        .with_context(|| format!("opening general log '{}'", general_log.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}

/// Append-only log stream for one board.
pub struct DeviceLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl DeviceLog {
    /// Open (append) `chipid_<chip_id>.log` under `devices_dir`.
    pub fn open(devices_dir: &Path, chip_id: &str) -> io::Result<Self> {
        let path = devices_dir.join(device_log_filename(chip_id));
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::to_writer(file))
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// Discards everything.
    pub fn sink() -> Self {
        Self::to_writer(io::sink())
    }

    pub fn record(&self, level: Level, message: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        // A full disk must not take the engine down with it.
        let _ = writeln!(
            sink,
            "{} {} {}",
            clock_time(OffsetDateTime::now_utc()),
            level,
            message
        );
        let _ = sink.flush();
    }

    pub fn info(&self, message: &str) {
        self.record(Level::INFO, message);
    }

    pub fn error(&self, message: &str) {
        self.record(Level::ERROR, message);
    }
}

pub fn device_log_filename(chip_id: &str) -> String {
    let safe: String = chip_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("chipid_{safe}.log")
}

/// `log-YYYY-MM-DD_HH-MM-SS`
pub fn session_dir_name(now: OffsetDateTime) -> String {
    format!(
        "log-{:04}-{:02}-{:02}_{:02}-{:02}-{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn utc_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

pub fn now_utc_timestamp() -> String {
    utc_timestamp(OffsetDateTime::now_utc())
}

fn clock_time(now: OffsetDateTime) -> String {
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}
