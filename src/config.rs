use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::{Result, SyncError};
use crate::sync::window::DEFAULT_WINDOW_DAYS;

pub const DEFAULT_LIST_NAME: &str = "Canvas (auto)";
pub const DEFAULT_REDIRECT_PORT: u16 = 3000;
pub const DEFAULT_MAX_PAGES: usize = 50;
/// Placeholder some setups leave in `GOOGLE_REFRESH_TOKEN`; treated as unset.
const UNSET_TOKEN: &str = "UNDEFINED";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "canvas-tasks-sync", "canvas-tasks-sync")
}

fn default_data_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("CANVAS_TASKS_SYNC_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".canvas-tasks-sync")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CANVAS_TASKS_SYNC_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".canvas-tasks-sync.toml")
}

pub fn google_token_path(config: &Config) -> PathBuf {
    config.data.dir.join("google_token.json")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub canvas: CanvasConfig,
    pub google: GoogleConfig,
    pub sync: SyncConfig,
    pub data: DataConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CanvasConfig {
    /// e.g. `https://uk.instructure.com`
    pub base_url: String,
    /// Personal access token or an OAuth access token.
    pub token: String,
    /// Upper bound on to-do feed pages read per run.
    pub max_pages: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub list_name: String,
    pub redirect_port: u16,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            list_name: DEFAULT_LIST_NAME.to_string(),
            redirect_port: DEFAULT_REDIRECT_PORT,
        }
    }
}

impl GoogleConfig {
    pub fn refresh_token(&self) -> Option<&str> {
        let token = self.refresh_token.trim();
        if token.is_empty() || token == UNSET_TOKEN {
            None
        } else {
            Some(token)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub window_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Reads the config file, then lets the process environment override it.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::load_file(path);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn load_file(path: &Path) -> Self {
        let mut config = if let Ok(content) = fs::read_to_string(path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        let changed = config.normalize_paths();
        if changed || !path.exists() {
            if let Err(e) = config.save_to_path(path) {
                warn!(path = %path.display(), error = %e, "could not write config template");
            }
        }

        config
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("CANVAS_BASE") {
            self.canvas.base_url = v;
        }
        if let Some(v) = var("CANVAS_TOKEN") {
            self.canvas.token = v;
        }
        if let Some(v) = var("GOOGLE_CLIENT_ID") {
            self.google.client_id = v;
        }
        if let Some(v) = var("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = v;
        }
        if let Some(v) = var("GOOGLE_REFRESH_TOKEN") {
            self.google.refresh_token = v;
        }
        if let Some(v) = var("GOOGLE_TASKS_LIST_NAME").or_else(|| var("TASKS_LIST_NAME")) {
            self.google.list_name = v;
        }
        if let Some(v) = var("WINDOW_DAYS") {
            self.sync.window_days = parse_window_days(&v);
        }
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).unwrap_or_default();
        fs::write(path, content)
    }

    /// Settings needed before any Google call, including the consent flow.
    pub fn validate_google(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.google.client_id.trim().is_empty() {
            missing.push("GOOGLE_CLIENT_ID".to_string());
        }
        if self.google.client_secret.trim().is_empty() {
            missing.push("GOOGLE_CLIENT_SECRET".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(missing))
        }
    }

    /// Everything a sync run needs. `stored_refresh_token` is a token saved by
    /// an earlier consent flow, used when none is configured.
    pub fn validate_sync(&self, stored_refresh_token: Option<&str>) -> Result<()> {
        let mut missing = Vec::new();
        if self.canvas.base_url.trim().is_empty() {
            missing.push("CANVAS_BASE".to_string());
        }
        if self.canvas.token.trim().is_empty() {
            missing.push("CANVAS_TOKEN".to_string());
        }
        if let Err(SyncError::Config(google)) = self.validate_google() {
            missing.extend(google);
        }
        if self.google.refresh_token().is_none() && stored_refresh_token.is_none() {
            missing.push("GOOGLE_REFRESH_TOKEN".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(missing))
        }
    }

    fn normalize_paths(&mut self) -> bool {
        let mut changed = false;

        if self.data.dir.as_os_str().is_empty() {
            self.data.dir = default_data_dir();
            changed = true;
        }

        if self.data.dir.is_relative() {
            self.data.dir = default_data_dir().join(&self.data.dir);
            changed = true;
        }

        if self.google.list_name.trim().is_empty() {
            self.google.list_name = DEFAULT_LIST_NAME.to_string();
            changed = true;
        }

        changed
    }
}

/// Non-numeric or negative values fall back to the default window.
pub fn parse_window_days(value: &str) -> u32 {
    match value.trim().parse::<u32>() {
        Ok(days) => days,
        Err(_) => {
            warn!(value, "WINDOW_DAYS is not a non-negative integer, using {DEFAULT_WINDOW_DAYS}");
            DEFAULT_WINDOW_DAYS
        }
    }
}
