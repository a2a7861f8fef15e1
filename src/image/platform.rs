//! Platform address description (`platform.conf`).
//!
//! ```text
//! Platform:0x0811
//! DDRLoad:0xd9000000
//! DDRRun:0xd9000000
//! UbootLoad:0x200c000
//! UbootRun:0xd9000000
//! bl2ParaAddr:0xd900c000
//! ```
//!
//! Only `<Key>:<token>` lines for the known keys are picked up; the first
//! occurrence of a key wins.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use crate::device::client::parse_hex;
use crate::error::{FlashError, FlashResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformKey {
    Platform,
    BinPara,
    DdrLoad,
    DdrRun,
    DdrSize,
    UbootDown,
    UbootDecomp,
    UbootEncDown,
    UbootEncRun,
    UbootLoad,
    UbootRun,
    Bl2ParaAddr,
}

impl PlatformKey {
    pub const ALL: [PlatformKey; 12] = [
        PlatformKey::Platform,
        PlatformKey::BinPara,
        PlatformKey::DdrLoad,
        PlatformKey::DdrRun,
        PlatformKey::DdrSize,
        PlatformKey::UbootDown,
        PlatformKey::UbootDecomp,
        PlatformKey::UbootEncDown,
        PlatformKey::UbootEncRun,
        PlatformKey::UbootLoad,
        PlatformKey::UbootRun,
        PlatformKey::Bl2ParaAddr,
    ];

    /// Spelling in the file.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKey::Platform => "Platform",
            PlatformKey::BinPara => "BinPara",
            PlatformKey::DdrLoad => "DDRLoad",
            PlatformKey::DdrRun => "DDRRun",
            PlatformKey::DdrSize => "DDRSize",
            PlatformKey::UbootDown => "Uboot_down",
            PlatformKey::UbootDecomp => "Uboot_decomp",
            PlatformKey::UbootEncDown => "Uboot_enc_down",
            PlatformKey::UbootEncRun => "Uboot_enc_run",
            PlatformKey::UbootLoad => "UbootLoad",
            PlatformKey::UbootRun => "UbootRun",
            PlatformKey::Bl2ParaAddr => "bl2ParaAddr",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w+):(\w+)").expect("static regex"))
}

#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    values: HashMap<PlatformKey, String>,
}

impl PlatformConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading platform config '{}'", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for caps in entry_pattern().captures_iter(text) {
            let Some(key) = PlatformKey::from_name(&caps[1]) else {
                continue;
            };
            values.entry(key).or_insert_with(|| caps[2].to_string());
        }
        Self { values }
    }

    pub fn get(&self, key: PlatformKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// An address the current boot flow cannot do without.
    pub fn require(&self, key: PlatformKey) -> FlashResult<&str> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| FlashError::MissingArtifact(format!("platform address '{key}'")))
    }

    pub fn require_address(&self, key: PlatformKey) -> FlashResult<u32> {
        let raw = self.require(key)?;
        parse_hex(raw).ok_or_else(|| {
            FlashError::MissingArtifact(format!("platform address '{key}' is not hex: '{raw}'"))
        })
    }

    pub fn summary(&self) -> String {
        PlatformKey::ALL
            .iter()
            .map(|key| format!("{}:\t{}", key, self.get(*key).unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
