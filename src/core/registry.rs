//! File-backed module registry
//!
//! Each `*.module` file in the configured directories describes one module:
//! the library it stands for, its priority, whether it is enabled, and the
//! tokens it presents. A file in a later directory replaces a file with the
//! same name in an earlier one.
//!
//! ```yaml
//! module: /usr/lib/pkcs11/libsofthsm2.so
//! priority: 10
//! tokens:
//!   - label: Test Token
//!     manufacturer: Example Corp
//!     model: SoftToken
//!     serial: "0001"
//!     flags: [rng, login-required, token-initialized]
//!     hardware-version: "1.0"
//! ```

use miette::Diagnostic;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::core::config::Config;
use crate::core::module::{LoadError, Module, ModuleBackend};
use crate::core::pkcs11::{space_pad, Rv, SlotId, TokenFlags, TokenInfo, Version};

const MODULE_EXTENSION: &str = "module";

/// Errors reading module config files
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("couldn't read module config {path}")]
    #[diagnostic(code(p11kit::registry::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse module config {path}")]
    #[diagnostic(code(p11kit::registry::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("invalid module config {path}: {message}")]
    #[diagnostic(code(p11kit::registry::invalid))]
    Invalid { path: PathBuf, message: String },
}

/// Contents of one `*.module` file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleDescriptor {
    /// Library the module stands for
    pub module: Option<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub tokens: Vec<TokenDescriptor>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenDescriptor {
    pub label: String,

    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub serial: String,

    #[serde(default)]
    pub flags: Vec<String>,

    pub hardware_version: Option<String>,

    pub firmware_version: Option<String>,

    /// An absent token leaves its slot empty
    #[serde(default = "default_enabled")]
    pub present: bool,
}

impl TokenDescriptor {
    fn to_token_info(&self) -> Result<TokenInfo, String> {
        let mut flags = TokenFlags::empty();
        for name in &self.flags {
            let flag = TokenFlags::from_name(name).ok_or_else(|| format!("unknown token flag '{}'", name))?;
            flags.insert(flag);
        }

        let version = |v: &Option<String>| -> Result<Version, String> {
            v.as_deref().map_or(Ok(Version::default()), str::parse)
        };

        Ok(TokenInfo {
            label: space_pad(&self.label),
            manufacturer_id: space_pad(&self.manufacturer),
            model: space_pad(&self.model),
            serial_number: space_pad(&self.serial),
            flags,
            hardware_version: version(&self.hardware_version)?,
            firmware_version: version(&self.firmware_version)?,
        })
    }
}

/// A module config file found on disk
#[derive(Debug)]
pub struct RegistryEntry {
    /// Module name (file stem)
    pub name: String,
    pub path: PathBuf,
    pub descriptor: Result<ModuleDescriptor, RegistryError>,
}

/// An initialized module from the registry
#[derive(Debug, Clone)]
pub struct RegistryModule {
    name: String,
    library_path: Option<String>,
    priority: i32,
    slots: Vec<Option<TokenInfo>>,
}

impl RegistryModule {
    fn initialize(name: &str, path: &Path, descriptor: &ModuleDescriptor) -> Result<Self, RegistryError> {
        let invalid = |message: String| RegistryError::Invalid {
            path: path.to_path_buf(),
            message,
        };

        if descriptor.module.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("no module path specified".to_string()));
        }

        let slots = descriptor
            .tokens
            .iter()
            .map(|token| {
                if token.present {
                    token.to_token_info().map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(invalid)?;

        Ok(Self {
            name: name.to_string(),
            library_path: descriptor.module.clone(),
            priority: descriptor.priority,
            slots,
        })
    }
}

impl Module for RegistryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn library_path(&self) -> Option<&str> {
        self.library_path.as_deref()
    }

    fn slots(&self) -> Result<Vec<SlotId>, Rv> {
        Ok(self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, token)| token.is_some())
            .map(|(slot, _)| slot as SlotId)
            .collect())
    }

    fn token_info(&self, slot: SlotId) -> Result<TokenInfo, Rv> {
        match self.slots.get(slot as usize) {
            Some(Some(info)) => Ok(info.clone()),
            Some(None) => Err(Rv::TOKEN_NOT_PRESENT),
            None => Err(Rv::SLOT_ID_INVALID),
        }
    }
}

/// Module backend reading `*.module` files
#[derive(Debug, Clone)]
pub struct Registry {
    dirs: Vec<PathBuf>,
}

impl Registry {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.module_dirs())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// All module config files, by name
    ///
    /// Missing directories are skipped. Files that can't be read or parsed
    /// are still returned, carrying their error.
    pub fn discover(&self) -> Vec<RegistryEntry> {
        let mut entries = BTreeMap::new();

        for dir in &self.dirs {
            if !dir.is_dir() {
                continue;
            }

            let walker = WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), "couldn't list module configs: {}", e);
                        continue;
                    }
                };

                let path = entry.path();
                if !path.is_file()
                    || path.extension().map_or(true, |e| e != MODULE_EXTENSION)
                {
                    continue;
                }

                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                entries.insert(
                    name.to_string(),
                    RegistryEntry {
                        name: name.to_string(),
                        path: path.to_path_buf(),
                        descriptor: read_descriptor(path),
                    },
                );
            }
        }

        entries.into_values().collect()
    }
}

/// Render an error with its causes, `outer: inner: ...`
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn read_descriptor(path: &Path) -> Result<ModuleDescriptor, RegistryError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yml::from_str(&contents).map_err(|source| RegistryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl ModuleBackend for Registry {
    type Module = RegistryModule;

    fn load_and_initialize(&self) -> Result<Vec<RegistryModule>, LoadError> {
        let entries = self.discover();
        let mut attempted = 0;
        let mut modules = Vec::new();

        for entry in &entries {
            let descriptor = match &entry.descriptor {
                Ok(descriptor) if !descriptor.enabled => {
                    tracing::debug!(module = %entry.name, "module is disabled");
                    continue;
                }
                Ok(descriptor) => descriptor,
                Err(e) => {
                    attempted += 1;
                    tracing::warn!(module = %entry.name, "{}", error_chain(e));
                    continue;
                }
            };

            attempted += 1;
            match RegistryModule::initialize(&entry.name, &entry.path, descriptor) {
                Ok(module) => modules.push(module),
                Err(e) => tracing::warn!(module = %entry.name, "couldn't initialize module: {}", e),
            }
        }

        if attempted > 0 && modules.is_empty() {
            return Err(LoadError::AllFailed { attempted });
        }

        // Higher priority first; names break ties
        modules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(modules)
    }

    fn finalize_and_release(&self, modules: Vec<RegistryModule>) {
        for module in modules {
            tracing::trace!(module = %module.name, "finalized module");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SOFT_MODULE: &str = r#"
module: /usr/lib/pkcs11/soft.so
priority: 5
tokens:
  - label: Test Token
    manufacturer: Example Corp
    model: SoftToken
    serial: "0001"
    flags: [rng, token-initialized]
    hardware-version: "1.2"
  - label: Removed
    present: false
  - label: Second
    serial: "0002"
"#;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_discover_reads_module_files_only() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "soft.module", SOFT_MODULE);
        write(tmp.path(), "README", "not a module");

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let entries = registry.discover();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "soft");
        assert!(entries[0].descriptor.is_ok());
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let registry = Registry::new(vec![PathBuf::from("/nonexistent/pkcs11/modules")]);
        assert!(registry.discover().is_empty());
        assert_eq!(registry.load_and_initialize().unwrap().len(), 0);
    }

    #[test]
    fn test_later_directory_overrides_by_name() {
        let system = tempdir().unwrap();
        let user = tempdir().unwrap();
        write(system.path(), "soft.module", "module: /system/soft.so\n");
        write(user.path(), "soft.module", "module: /user/soft.so\n");

        let registry = Registry::new(vec![system.path().to_path_buf(), user.path().to_path_buf()]);
        let modules = registry.load_and_initialize().unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].library_path(), Some("/user/soft.so"));
    }

    #[test]
    fn test_tokens_and_empty_slots() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "soft.module", SOFT_MODULE);

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let modules = registry.load_and_initialize().unwrap();
        let soft = &modules[0];

        assert_eq!(soft.slots().unwrap(), vec![0, 2]);
        let info = soft.token_info(0).unwrap();
        assert_eq!(info.label(), "Test Token");
        assert!(info.flags.contains(TokenFlags::RNG));
        assert_eq!(info.hardware_version, Version { major: 1, minor: 2 });
        assert_eq!(soft.token_info(1), Err(Rv::TOKEN_NOT_PRESENT));
        assert_eq!(soft.token_info(7), Err(Rv::SLOT_ID_INVALID));
    }

    #[test]
    fn test_priority_orders_modules() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "alpha.module", "module: /a.so\npriority: 1\n");
        write(tmp.path(), "beta.module", "module: /b.so\npriority: 9\n");
        write(tmp.path(), "gamma.module", "module: /g.so\npriority: 1\n");

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let names: Vec<_> = registry
            .load_and_initialize()
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn test_broken_module_is_left_out() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "good.module", "module: /good.so\n");
        write(tmp.path(), "broken.module", "module: [unterminated\n");
        write(tmp.path(), "nopath.module", "priority: 3\n");

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        let modules = registry.load_and_initialize().unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name(), "good");
    }

    #[test]
    fn test_all_modules_failing() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "a.module", "tokens:\n  - label: x\n    flags: [bogus]\n");
        write(tmp.path(), "b.module", "priority: 1\n");

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        assert_eq!(
            registry.load_and_initialize().unwrap_err(),
            LoadError::AllFailed { attempted: 2 }
        );
    }

    #[test]
    fn test_disabled_modules_are_not_failures() {
        let tmp = tempdir().unwrap();
        write(tmp.path(), "off.module", "module: /off.so\nenabled: false\n");

        let registry = Registry::new(vec![tmp.path().to_path_buf()]);
        assert!(registry.load_and_initialize().unwrap().is_empty());
    }
}
