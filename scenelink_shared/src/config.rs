//! Configuration system.
//!
//! Loads bridge configuration from JSON strings/files.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Lowest accepted tick rate.
pub const MIN_TICK_HZ: u32 = 1;
/// Highest accepted tick rate.
pub const MAX_TICK_HZ: u32 = 120;
/// Tick rate used when none is configured.
pub const DEFAULT_TICK_HZ: u32 = 30;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Request/reply listen address, e.g. `127.0.0.1:47810`.
    #[serde(default = "default_reqrep_addr")]
    pub reqrep_addr: String,
    /// Publish listen address, e.g. `127.0.0.1:47811`.
    #[serde(default = "default_pub_addr")]
    pub pub_addr: String,
    /// Requested tick rate; see [`BridgeConfig::clamped_tick_hz`].
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Scene description loaded by the standalone server (server only).
    #[serde(default)]
    pub scene_path: Option<String>,
}

fn default_reqrep_addr() -> String {
    "127.0.0.1:47810".to_string()
}

fn default_pub_addr() -> String {
    "127.0.0.1:47811".to_string()
}

fn default_tick_hz() -> u32 {
    DEFAULT_TICK_HZ
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reqrep_addr: default_reqrep_addr(),
            pub_addr: default_pub_addr(),
            tick_hz: default_tick_hz(),
            scene_path: None,
        }
    }
}

impl BridgeConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Tick rate limited to the supported `1..=120` Hz range.
    pub fn clamped_tick_hz(&self) -> u32 {
        self.tick_hz.clamp(MIN_TICK_HZ, MAX_TICK_HZ)
    }
}
