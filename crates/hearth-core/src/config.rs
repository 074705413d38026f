//! Configuration loading
//!
//! Reads JSON configuration from three places, later ones overriding
//! earlier ones:
//! - `~/.hearth/hearth.json` (global)
//! - `<workspace>/hearth.json` or `<workspace>/.hearth.json` (project)
//! - `<workspace>/.mcp.json` (`mcpServers` map, merged into `mcp`)

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hooks::HookConfig;
use crate::paths;

/// Default timeout for provider connect, handshake and health probes
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

const PROJECT_CONFIG_FILES: &[&str] = &["hearth.json", ".hearth.json"];

static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env ref regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mcp: BTreeMap<String, McpProviderConfig>,
    #[serde(default)]
    pub hooks: HookConfig,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Tools (or `tool:action`) that never prompt
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Approve every request without asking
    #[serde(default)]
    pub skip_requests: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<PathBuf>,
    #[serde(default)]
    pub debug: bool,
    /// Completed background tasks older than this are reaped. Unset keeps
    /// them until killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportType {
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for McpTransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpTransportType::Stdio => write!(f, "stdio"),
            McpTransportType::Http => write!(f, "http"),
            McpTransportType::Sse => write!(f, "sse"),
        }
    }
}

/// One configured tool provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpProviderConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<McpTransportType>,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl McpProviderConfig {
    /// Explicit `type`, else stdio when a command is set, else http.
    pub fn transport_type(&self) -> McpTransportType {
        match self.transport {
            Some(t) => t,
            None if self.command.is_empty() && !self.url.is_empty() => McpTransportType::Http,
            None => McpTransportType::Stdio,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
        )
    }

    /// Copy with `${VAR}` references expanded from the environment
    pub fn resolved(&self) -> Self {
        let mut out = self.clone();
        out.url = expand_env(&self.url);
        out.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env(v)))
            .collect();
        out.headers = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), expand_env(v)))
            .collect();
        out
    }
}

/// `.mcp.json` layout
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpJson {
    #[serde(default)]
    mcp_servers: BTreeMap<String, McpProviderConfig>,
}

impl Config {
    /// Load global, project and `.mcp.json` configuration for a workspace.
    pub fn load(working_dir: &Path) -> Result<Self> {
        let mut config = Self::load_global()?;

        for name in PROJECT_CONFIG_FILES {
            if let Some(project) = read_json::<Config>(&working_dir.join(name))? {
                config.merge(project);
            }
        }

        if let Some(mcp_json) = read_json::<McpJson>(&working_dir.join(".mcp.json"))? {
            for (name, provider) in mcp_json.mcp_servers {
                config.mcp.entry(name).or_insert(provider);
            }
        }

        tracing::info!(
            providers = config.mcp.len(),
            hook_events = config.hooks.len(),
            "Loaded configuration for {}",
            working_dir.display()
        );

        Ok(config)
    }

    /// Only `~/.hearth/hearth.json`, or defaults when it does not exist
    pub fn load_global() -> Result<Self> {
        Ok(read_json::<Config>(&paths::global_config_path())?.unwrap_or_default())
    }

    /// Overlay `other` on top of `self`
    pub fn merge(&mut self, other: Config) {
        self.mcp.extend(other.mcp);
        for (event, matchers) in other.hooks {
            self.hooks.entry(event).or_default().extend(matchers);
        }
        for tool in other.permissions.allowed_tools {
            if !self.permissions.allowed_tools.contains(&tool) {
                self.permissions.allowed_tools.push(tool);
            }
        }
        self.permissions.skip_requests |= other.permissions.skip_requests;
        if other.options.data_directory.is_some() {
            self.options.data_directory = other.options.data_directory;
        }
        self.options.debug |= other.options.debug;
        if other.options.background_retention_secs.is_some() {
            self.options.background_retention_secs = other.options.background_retention_secs;
        }
    }

    /// Data directory for a workspace: explicit override, then config, then
    /// `<workspace>/.hearth`. Relative paths resolve against the workspace.
    pub fn data_dir(&self, working_dir: &Path, override_dir: Option<&Path>) -> PathBuf {
        let dir = override_dir
            .map(Path::to_path_buf)
            .or_else(|| self.options.data_directory.clone())
            .unwrap_or_else(|| PathBuf::from(paths::DATA_DIR_NAME));
        if dir.is_absolute() {
            dir
        } else {
            working_dir.join(dir)
        }
    }

    pub fn background_retention(&self) -> Option<Duration> {
        self.options
            .background_retention_secs
            .map(Duration::from_secs)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        tracing::debug!("No config at {:?}", path);
        return Ok(None);
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(value))
}

/// Expand `${VAR}` references. Unset variables expand to the empty string.
pub fn expand_env(s: &str) -> String {
    ENV_REF
        .replace_all(s, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                tracing::warn!("Environment variable {} is not set", &caps[1]);
                String::new()
            })
        })
        .into_owned()
}
