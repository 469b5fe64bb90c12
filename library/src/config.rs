//! Configuration management (`<config_dir>/config.toml`)
//!
//! Settings are stored in TOML in the platform-specific config directory.
//! A missing or unreadable file yields defaults; every field is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Runner process settings
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Directory overrides
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Runner process timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// How long a spawned runner has to connect back (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long a runner gets to exit after `stop` before it is killed (default: 2000)
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Per-call timeout, 0 disables (default: 0)
    #[serde(default)]
    pub call_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            call_timeout_ms: 0,
        }
    }
}

impl RunnerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

/// Optional directory overrides; unset entries live under the data dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_dir: Option<PathBuf>,
}

/// Concrete directories after applying overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub cores_dir: PathBuf,
    pub system_dir: PathBuf,
    pub save_dir: PathBuf,
    pub options_dir: PathBuf,
}

impl ResolvedPaths {
    /// Create every directory that does not exist yet
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.cores_dir,
            &self.system_dir,
            &self.save_dir,
            &self.options_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Config {
    /// Resolve `[paths]` against `base` for anything left unset
    pub fn resolve_paths_in(&self, base: &Path) -> ResolvedPaths {
        let pick = |value: &Option<PathBuf>, default: &str| {
            value.clone().unwrap_or_else(|| base.join(default))
        };
        ResolvedPaths {
            cores_dir: pick(&self.paths.cores_dir, "cores"),
            system_dir: pick(&self.paths.system_dir, "system"),
            save_dir: pick(&self.paths.save_dir, "saves"),
            options_dir: pick(&self.paths.options_dir, "core-options"),
        }
    }

    /// Resolve `[paths]` against the platform data directory
    pub fn resolve_paths(&self) -> ResolvedPaths {
        let base = data_dir().unwrap_or_else(|| PathBuf::from(".retrohost"));
        self.resolve_paths_in(&base)
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Retrohost\config`
/// On macOS: `~/Library/Application Support/io.retrohost.Retrohost`
/// On Linux: `~/.config/Retrohost`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.retrohost", "", "Retrohost")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory (cores, saves, options).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.retrohost", "", "Retrohost")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads the configuration from disk, falling back to defaults.
pub fn load() -> Config {
    config_dir()
        .map(|dir| load_from(&dir.join("config.toml")))
        .unwrap_or_default()
}

/// Loads a configuration file, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring unreadable config: {}", e);
            Config::default()
        }
    }
}

/// Saves the configuration to the platform config directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file
/// cannot be written.
pub fn save(config: &Config) -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        save_to(config, &dir.join("config.toml"))?;
    }
    Ok(())
}

/// Saves the configuration to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config).map_err(std::io::Error::other)?;
    std::fs::write(path, content)
}
