//! Project configuration, stored as `flux.json` next to the sources.
//!
//! A missing file yields the defaults; an unreadable or malformed file is
//! an error so the caller can warn and fall back. Unspecified fields take
//! their default values, so a config file may set only what it overrides.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::typeck::TypeCheckMode;

pub const CONFIG_FILE: &str = "flux.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FluxConfig {
    pub type_checking: TypeCheckingConfig,
    pub compiler: CompilerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeCheckingConfig {
    pub enabled: bool,
    pub strict: bool,
    pub warn_only: bool,
}

impl Default for TypeCheckingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            warn_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    pub optimization_level: u8,
    /// When set, the CLI dumps a disassembly of every compiled chunk.
    pub debug: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            debug: false,
        }
    }
}

impl FluxConfig {
    /// The type-checker knobs this configuration selects.
    pub fn mode(&self) -> TypeCheckMode {
        TypeCheckMode {
            enabled: self.type_checking.enabled,
            strict: self.type_checking.strict,
            warn_only: self.type_checking.warn_only,
        }
    }
}

/// Load `flux.json` from `dir`. A missing file is not an error.
pub fn load(dir: &Path) -> Result<FluxConfig, Error> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(FluxConfig::default());
    }
    let data = fs::read_to_string(&path)?;
    let config = serde_json::from_str(&data)?;
    Ok(config)
}

/// Write `config` to `dir/flux.json`, pretty-printed.
pub fn save(config: &FluxConfig, dir: &Path) -> Result<(), Error> {
    let path = dir.join(CONFIG_FILE);
    let data = serde_json::to_string_pretty(config)?;
    fs::write(&path, data)?;
    Ok(())
}
