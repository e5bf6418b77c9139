//! Configuration for the cellbook server.
//!
//! One TOML file, every section optional. Each component crate owns its own
//! section type; [`EngineConfig`] only aggregates them.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:2150"
//!
//! [process]
//! typescript = ["npx", "tsx"]
//!
//! [lsp]
//! command = "npx"
//! args = ["tsserver"]
//!
//! [[sessions]]
//! id = "demo"
//! dir = "${HOME}/cellbooks/demo"
//! language = "typescript"
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use cellbook_channel::ChannelConfig;
use cellbook_lsp::LspConfig;
use cellbook_process::ProcessConfig;
use cellbook_types::{Language, SessionId};

/// Overrides the default config location.
pub const CONFIG_ENV: &str = "CELLBOOK_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub process: ProcessConfig,
    pub lsp: LspConfig,
    pub channel: ChannelConfig,
    /// Sessions opened at startup.
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket endpoint listens on.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:2150".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    pub id: SessionId,
    /// Session working directory; cell files live under `<dir>/src`.
    pub dir: PathBuf,
    pub language: Language,
}

impl EngineConfig {
    /// Load from [`config_path`]. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("no home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Parse TOML text, expanding `${VAR}` in every string value.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut table: toml::Table = toml::from_str(content)?;
        for value in table.iter_mut().map(|(_, v)| v) {
            expand_value(value);
        }
        toml::Value::Table(table).try_into()
    }
}

fn expand_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_value),
        toml::Value::Table(table) => table.iter_mut().map(|(_, v)| v).for_each(expand_value),
        _ => {}
    }
}

/// Replace `${NAME}` with the variable's value. Unset variables become
/// empty; an unclosed `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// `$CELLBOOK_CONFIG`, else `~/.cellbook/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".cellbook").join("config.toml"))
}
