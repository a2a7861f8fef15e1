//! Flasher configuration.
//!
//! ```toml
//! [tools]
//! dir = "/opt/aml-flash-tool/tools"
//!
//! [timing]            # seconds
//! poll_interval = 1
//! reconnect_timeout = 20
//! reset_timeout = 20
//! destroy_settle = 8
//! ddr_settle = 10
//! m8_rom_settle = 6
//! m8_decompress = 13
//!
//! [paths]
//! log_dir = "logs"
//! work_dir = "/tmp/aml_image_unpack"
//!
//! [destroy]
//! wait_for_reconnect = false
//! ```
//!
//! Every table and key is optional. The file itself is optional too: without
//! `--config`, `<config dir>/aml-flasher/config.toml` is used when it exists
//! and built-in defaults otherwise.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest accepted `timing.poll_interval`.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub const CONFIG_DIRNAME: &str = "aml-flasher";
pub const CONFIG_FILENAME: &str = "config.toml";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_WORK_DIRNAME: &str = "aml_image_unpack";

/// Every wait the orchestrator and the engines perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Bus poll cadence; also the granularity of reconnect waits.
    pub poll_interval: Duration,
    pub reconnect_timeout: Duration,
    /// Bound on the final reconnect after `burn_complete`.
    pub reset_timeout: Duration,
    /// Settle after the destroy-boot reset.
    pub destroy_settle: Duration,
    /// Settle after DDR init, all families.
    pub ddr_settle: Duration,
    /// m8 boot ROM settle before the first write.
    pub m8_rom_settle: Duration,
    /// m8 in-place u-boot decompression.
    pub m8_decompress: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            reconnect_timeout: Duration::from_secs(20),
            reset_timeout: Duration::from_secs(20),
            destroy_settle: Duration::from_secs(8),
            ddr_settle: Duration::from_secs(10),
            m8_rom_settle: Duration::from_secs(6),
            m8_decompress: Duration::from_secs(13),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlasherConfig {
    /// Directory holding the vendor tools, when configured.
    pub tool_dir: Option<PathBuf>,
    pub timing: TimingPolicy,
    pub log_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Whether a destroy run waits for the board to come back before
    /// reporting.
    pub destroy_waits_for_reconnect: bool,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            tool_dir: None,
            timing: TimingPolicy::default(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            work_dir: std::env::temp_dir().join(DEFAULT_WORK_DIRNAME),
            destroy_waits_for_reconnect: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlasherToml {
    tools: Option<ToolsToml>,
    timing: Option<TimingToml>,
    paths: Option<PathsToml>,
    destroy: Option<DestroyToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolsToml {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingToml {
    poll_interval: Option<f64>,
    reconnect_timeout: Option<f64>,
    reset_timeout: Option<f64>,
    destroy_settle: Option<f64>,
    ddr_settle: Option<f64>,
    m8_rom_settle: Option<f64>,
    m8_decompress: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsToml {
    log_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestroyToml {
    wait_for_reconnect: Option<bool>,
}

/// `<config dir>/aml-flasher/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIRNAME).join(CONFIG_FILENAME))
}

impl FlasherConfig {
    /// Load `explicit`, or the default location when it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let parsed: FlasherToml = toml::from_str(text)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        let mut config = Self::default();
        if let Some(tools) = parsed.tools {
            config.tool_dir = tools.dir;
        }
        if let Some(timing) = parsed.timing {
            let t = &mut config.timing;
            apply_seconds(&mut t.poll_interval, timing.poll_interval, "poll_interval", path)?;
            apply_seconds(
                &mut t.reconnect_timeout,
                timing.reconnect_timeout,
                "reconnect_timeout",
                path,
            )?;
            apply_seconds(&mut t.reset_timeout, timing.reset_timeout, "reset_timeout", path)?;
            apply_seconds(&mut t.destroy_settle, timing.destroy_settle, "destroy_settle", path)?;
            apply_seconds(&mut t.ddr_settle, timing.ddr_settle, "ddr_settle", path)?;
            apply_seconds(&mut t.m8_rom_settle, timing.m8_rom_settle, "m8_rom_settle", path)?;
            apply_seconds(&mut t.m8_decompress, timing.m8_decompress, "m8_decompress", path)?;
        }
        if let Some(paths) = parsed.paths {
            if let Some(log_dir) = paths.log_dir {
                config.log_dir = log_dir;
            }
            if let Some(work_dir) = paths.work_dir {
                config.work_dir = work_dir;
            }
        }
        if let Some(destroy) = parsed.destroy {
            config.destroy_waits_for_reconnect = destroy.wait_for_reconnect.unwrap_or(false);
        }

        if config.timing.poll_interval < MIN_POLL_INTERVAL {
            bail!(
                "invalid config '{}': timing.poll_interval must be at least {} ms",
                path.display(),
                MIN_POLL_INTERVAL.as_millis()
            );
        }
        Ok(config)
    }
}

fn apply_seconds(slot: &mut Duration, value: Option<f64>, key: &str, path: &Path) -> Result<()> {
    let Some(secs) = value else {
        return Ok(());
    };
    if !secs.is_finite() || secs < 0.0 {
        bail!(
            "invalid config '{}': timing.{} must be a non-negative number of seconds, got {}",
            path.display(),
            key,
            secs
        );
    }
    *slot = Duration::try_from_secs_f64(secs).with_context(|| {
        format!(
            "invalid config '{}': timing.{} is out of range, got {}",
            path.display(),
            key,
            secs
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(text: &str) -> Result<FlasherConfig> {
        FlasherConfig::parse(text, Path::new("config.toml"))
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse("").unwrap(), FlasherConfig::default());
    }

    #[test]
    fn default_timing_matches_board_behaviour() {
        let timing = TimingPolicy::default();
        assert_eq!(timing.poll_interval, Duration::from_secs(1));
        assert_eq!(timing.reconnect_timeout, Duration::from_secs(20));
        assert_eq!(timing.destroy_settle, Duration::from_secs(8));
        assert_eq!(timing.m8_decompress, Duration::from_secs(13));
    }

    #[test]
    fn partial_tables_override_only_their_keys() {
        let config = parse(
            r#"
[tools]
dir = "/opt/aml/tools"

[timing]
reset_timeout = 10
ddr_settle = 2.5

[destroy]
wait_for_reconnect = true
"#,
        )
        .unwrap();
        assert_eq!(config.tool_dir, Some(PathBuf::from("/opt/aml/tools")));
        assert_eq!(config.timing.reset_timeout, Duration::from_secs(10));
        assert_eq!(config.timing.ddr_settle, Duration::from_millis(2500));
        assert_eq!(config.timing.reconnect_timeout, Duration::from_secs(20));
        assert!(config.destroy_waits_for_reconnect);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse("[timing]\nreconect_timeout = 5\n").unwrap_err();
        assert!(format!("{err:#}").contains("reconect_timeout"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = parse("[timing]\npoll_interval = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn sub_millisecond_poll_interval_is_rejected() {
        let err = parse("[timing]\npoll_interval = 0.0005\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval"));

        let config = parse("[timing]\npoll_interval = 0.001\n").unwrap();
        assert_eq!(config.timing.poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn oversized_duration_is_an_error() {
        let err = parse("[timing]\nreconnect_timeout = 1e30\n").unwrap_err();
        assert!(err.to_string().contains("reconnect_timeout"));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let err = parse("[timing]\nddr_settle = -1\n").unwrap_err();
        assert!(err.to_string().contains("ddr_settle"));
    }

    #[test]
    fn explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        let err = FlasherConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flasher.toml");
        fs::write(&path, "[paths]\nlog_dir = \"/var/log/aml\"\n").unwrap();
        let config = FlasherConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/aml"));
    }
}
