//! `image.cfg` item table.
//!
//! One declaration per line:
//!
//! ```text
//! file="u-boot.bin" main_type="PARTITION" sub_type="bootloader" file_type="normal"
//! ```
//!
//! Items are keyed by `sub_type`. A later duplicate replaces the earlier value
//! but keeps its position, so table order is first-declaration order.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const PARTITION_MAIN_TYPE: &str = "PARTITION";

fn item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"file="([\w.]+)"\s+main_type="(\w+)"\s+sub_type="(\w+)"\s+file_type="(\w+)""#,
        )
        .expect("static regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    pub file: String,
    pub main_type: String,
    pub sub_type: String,
    pub file_type: String,
}

impl ImageItem {
    pub fn is_partition(&self) -> bool {
        self.main_type == PARTITION_MAIN_TYPE
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    items: Vec<ImageItem>,
    by_sub_type: HashMap<String, usize>,
}

impl ImageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading image config '{}'", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let Some(caps) = item_pattern().captures(line) else {
                continue;
            };
            config.insert(ImageItem {
                file: caps[1].to_string(),
                main_type: caps[2].to_string(),
                sub_type: caps[3].to_string(),
                file_type: caps[4].to_string(),
            });
        }
        config
    }

    fn insert(&mut self, item: ImageItem) {
        match self.by_sub_type.get(&item.sub_type) {
            Some(&idx) => self.items[idx] = item,
            None => {
                self.by_sub_type.insert(item.sub_type.clone(), self.items.len());
                self.items.push(item);
            }
        }
    }

    pub fn get(&self, sub_type: &str) -> Option<&ImageItem> {
        self.by_sub_type.get(sub_type).map(|&idx| &self.items[idx])
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    /// Partition entries in table order.
    pub fn partitions(&self) -> impl Iterator<Item = &ImageItem> {
        self.items.iter().filter(|item| item.is_partition())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One line per item, for the general log.
    pub fn summary(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                format!(
                    "{}:\t[file: {};\tmain_type: {};\tfile_type: {}]",
                    item.sub_type, item.file, item.main_type, item.file_type
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
