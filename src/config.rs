// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Board description: which remote cores exist and how to boot them.
//!
//! ```toml
//! [[core]]
//! name = "q6"
//! firmware = "q6_fw.mdt"
//! requires_force_stop = true
//! memory = { phys = 0x4AB00000, reloc = 0x4AB00000, size = 0x100000 }
//! boot = { method = "trusted", peripheral_id = 6, reset_cmd_id = 0x14 }
//! family = { recipe = "recipe-b", mem_banks = 20 }
//!
//! [[core]]
//! name = "q6-pd1"
//! parent = "q6"
//! memory = { phys = 0x4AC00000, reloc = 0x4AC00000, size = 0x80000 }
//! boot = { method = "spawn" }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::BootMethod;
use crate::power::Family;
use crate::remote::MemoryRegion;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_firmware() -> String {
    "firmware.mdt".into()
}

/// Bit positions in the core's outbound signal word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalBits {
    pub stop: u32,
    pub spawn: u32,
}

impl Default for SignalBits {
    fn default() -> Self {
        Self { stop: 0, spawn: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "default_firmware")]
    pub firmware: String,
    pub boot: BootMethod,
    /// Power recipe family; children inherit their parent's power.
    #[serde(default)]
    pub family: Option<Family>,
    pub memory: MemoryRegion,
    #[serde(default)]
    pub requires_force_stop: bool,
    #[serde(default)]
    pub signals: SignalBits,
    #[serde(default = "default_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub spawn_timeout_ms: u64,
}

impl CoreConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: &str| Err(ConfigError::Invalid(format!("{}: {msg}", self.name)));
        match (&self.boot, self.is_child()) {
            (BootMethod::Spawn, false) => return bad("spawn boot requires a parent"),
            (BootMethod::Spawn, true) => {}
            (_, true) => return bad("child cores boot by spawn"),
            (BootMethod::Sequencer { .. }, false) if self.family.is_none() => {
                return bad("sequencer boot requires a recipe family")
            }
            _ => {}
        }
        if self.memory.size == 0 {
            return bad("empty memory region");
        }
        if let Some(family) = &self.family {
            family.validate().map_err(|msg| {
                ConfigError::Invalid(format!("{}: {msg}", self.name))
            })?;
        }
        if self.signals.stop == self.signals.spawn || self.signals.stop > 31 || self.signals.spawn > 31 {
            return bad("signal bits must be distinct and below 32");
        }
        Ok(())
    }
}

/// All cores on a board, parents before children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(rename = "core", default)]
    pub cores: Vec<CoreConfig>,
}

impl BoardConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: BoardConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn core(&self, name: &str) -> Option<&CoreConfig> {
        self.cores.iter().find(|c| c.name == name)
    }

    pub fn children_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a CoreConfig> + 'a {
        self.cores
            .iter()
            .filter(move |c| c.parent.as_deref() == Some(parent))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, core) in self.cores.iter().enumerate() {
            core.validate()?;
            if self.cores[..i].iter().any(|c| c.name == core.name) {
                return Err(ConfigError::Invalid(format!("duplicate core {}", core.name)));
            }
            if let Some(parent) = &core.parent {
                match self.cores[..i].iter().find(|c| &c.name == parent) {
                    Some(p) if p.parent.is_none() => {}
                    Some(_) => {
                        return Err(ConfigError::Invalid(format!(
                            "{}: parent {parent} is itself a child",
                            core.name
                        )))
                    }
                    None => {
                        return Err(ConfigError::Invalid(format!(
                            "{}: parent {parent} must be declared first",
                            core.name
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}
