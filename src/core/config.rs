//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// System-wide module config directory
pub const SYSTEM_MODULE_DIR: &str = "/etc/pkcs11/modules";

/// Environment variable replacing the module directory list
pub const MODULE_DIRS_ENV: &str = "P11_KIT_MODULE_DIRS";

/// p11-kit configuration with layered hierarchy
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Directories searched for module config files, in order
    pub module_dirs: Option<Vec<PathBuf>>,

    /// Also read the per-user module directory
    pub user_modules: Option<bool>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load() -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (resolved in module_dirs())

        // 2. User config (~/.config/p11-kit/config.yaml)
        if let Some(path) = Self::user_config_path() {
            if let Some(user) = Self::read_file(&path) {
                config.merge(user);
            }
        }

        // 3. Environment
        if let Some(dirs) = std::env::var_os(MODULE_DIRS_ENV) {
            config.merge(Self::from_env_value(&dirs));
        }

        config
    }

    /// Path of the per-user config file
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "p11-kit")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Per-user module config directory
    pub fn user_module_dir() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("pkcs11").join("modules"))
    }

    fn read_file(path: &Path) -> Option<Config> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring invalid config: {}", e);
                None
            }
        }
    }

    /// Config layer from a `P11_KIT_MODULE_DIRS`-style path list
    ///
    /// An empty value leaves the directory list alone.
    pub fn from_env_value(value: &OsStr) -> Config {
        let dirs: Vec<PathBuf> = std::env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        Config {
            module_dirs: if dirs.is_empty() { None } else { Some(dirs) },
            user_modules: None,
        }
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.module_dirs.is_some() {
            self.module_dirs = other.module_dirs;
        }
        if other.user_modules.is_some() {
            self.user_modules = other.user_modules;
        }
    }

    /// Directories to read module configs from, lowest precedence first
    ///
    /// An explicit list is used as-is. Otherwise the system directory is
    /// followed by the user directory unless `user-modules` is off.
    pub fn module_dirs(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.module_dirs {
            return dirs.clone();
        }

        let mut dirs = vec![PathBuf::from(SYSTEM_MODULE_DIR)];
        if self.user_modules.unwrap_or(true) {
            dirs.extend(Self::user_module_dir());
        }
        dirs
    }
}
