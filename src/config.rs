//! Configuration loading and per-context settings persistence.
//!
//! Global options live in `~/.config/rigup/config.yml`; per-context state
//! (tab order, focused service) in `~/.config/rigup/context-settings.yml`,
//! keyed by the absolute context file path. Reads fall back to defaults;
//! writes are best-effort and never surface an error.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yml";
const CONTEXT_SETTINGS_FILE: &str = "context-settings.yml";

/// Global options consumed by the runner and the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// UI refresh tick in milliseconds.
    pub refresh_millis: u64,
    /// Shell used to run every command and healthcheck.
    pub command_executor: String,
    /// Flag that makes the shell take the command as one argument.
    pub command_argument: String,
    /// Rewrite Docker Compose invocations to keep ANSI colors when piped.
    pub force_docker_compose_ansi: bool,
    /// Scrollback byte budget per service.
    pub max_log_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_millis: 6,
            command_executor: default_executor().to_string(),
            command_argument: default_argument().to_string(),
            force_docker_compose_ansi: true,
            max_log_bytes: 10 * 1024 * 1024,
        }
    }
}

#[cfg(unix)]
fn default_executor() -> &'static str {
    "/bin/bash"
}

#[cfg(unix)]
fn default_argument() -> &'static str {
    "-c"
}

#[cfg(windows)]
fn default_executor() -> &'static str {
    "cmd"
}

#[cfg(windows)]
fn default_argument() -> &'static str {
    "/C"
}

impl Config {
    /// Loads the config file, falling back to defaults when it is missing or
    /// unreadable.
    pub fn load() -> Self {
        config_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| serde_yaml::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

/// Saved UI state for one context file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    pub service_order: Vec<String>,
    pub active_service: String,
}

/// Loads the saved settings for `context_path`, or defaults.
pub fn load_context_settings(context_path: &Path) -> ContextSettings {
    read_settings_map()
        .and_then(|mut map| map.remove(&path_key(context_path)))
        .unwrap_or_default()
}

/// Persists the settings for `context_path`. Failures are discarded: the
/// preference is best-effort.
pub fn save_context_settings(context_path: &Path, settings: &ContextSettings) {
    let Some(dir) = config_dir() else {
        return;
    };
    let mut map = read_settings_map().unwrap_or_default();
    map.insert(path_key(context_path), settings.clone());
    let Ok(raw) = serde_yaml::to_string(&map) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let _ = fs::write(dir.join(CONTEXT_SETTINGS_FILE), raw);
}

fn read_settings_map() -> Option<HashMap<String, ContextSettings>> {
    let path = config_dir()?.join(CONTEXT_SETTINGS_FILE);
    let raw = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&raw).ok()
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir).join("rigup"));
    }
    if cfg!(windows) {
        return env::var("APPDATA").ok().map(|d| PathBuf::from(d).join("rigup"));
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".config").join("rigup"))
}
