// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Host runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration for a host instance.
///
/// # Example TOML Configuration
///
/// ```toml
/// inline_threshold = 256
/// index_limit = 4294967295
/// log_guest = true
///
/// [wasm]
/// max_fuel = 10000000000
/// max_memory_bytes = 268435456
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Payloads shorter than this many bytes travel inline (`Raw`).
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,

    /// Highest future index the table may hand out before the guest is
    /// considered to be leaking futures.
    #[serde(default = "default_index_limit")]
    pub index_limit: u32,

    /// Forward guest log lines to the host subscriber.
    #[serde(default = "default_log_guest")]
    pub log_guest: bool,

    /// Name of the thread that owns guest entry.
    #[serde(default = "default_queue_thread_name")]
    pub queue_thread_name: String,

    /// WASM engine limits.
    #[serde(default)]
    pub wasm: WasmRuntimeConfig,
}

fn default_inline_threshold() -> usize {
    256
}

fn default_index_limit() -> u32 {
    u32::MAX
}

fn default_log_guest() -> bool {
    true
}

fn default_queue_thread_name() -> String {
    "asyncify-guest".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            inline_threshold: default_inline_threshold(),
            index_limit: default_index_limit(),
            log_guest: default_log_guest(),
            queue_thread_name: default_queue_thread_name(),
            wasm: WasmRuntimeConfig::default(),
        }
    }
}

impl HostConfig {
    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_toml(&text),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inline_threshold == 0 {
            return Err(ConfigError::Invalid(
                "inline_threshold must be at least 1".into(),
            ));
        }
        if self.index_limit == 0 {
            return Err(ConfigError::Invalid("index_limit must be at least 1".into()));
        }
        if self.queue_thread_name.is_empty() {
            return Err(ConfigError::Invalid("queue_thread_name is empty".into()));
        }
        self.wasm.validate()
    }
}

/// Limits applied to the WASM engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasmRuntimeConfig {
    /// Maximum linear memory per guest (default: 256MB)
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: usize,

    /// Fuel (instruction budget) granted per guest entry
    #[serde(default = "default_max_fuel")]
    pub max_fuel: u64,

    /// Debug mode (no fuel limit)
    #[serde(default)]
    pub debug_mode: bool,
}

fn default_max_memory() -> usize {
    256 * 1024 * 1024
}

fn default_max_fuel() -> u64 {
    10_000_000_000
}

impl Default for WasmRuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory(),
            max_fuel: default_max_fuel(),
            debug_mode: false,
        }
    }
}

impl WasmRuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_memory_bytes < 64 * 1024 {
            return Err(ConfigError::Invalid(
                "wasm.max_memory_bytes must cover at least one 64KiB page".into(),
            ));
        }
        if self.max_fuel == 0 && !self.debug_mode {
            return Err(ConfigError::Invalid("wasm.max_fuel must be positive".into()));
        }
        Ok(())
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(String),
}
