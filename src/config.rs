//! Tool configuration.
//!
//! A single YAML file supplies the base directory and per-resource
//! defaults; a missing file means every default applies. The parsed
//! [`Settings`] value is threaded explicitly through the stores; there is
//! deliberately no process-wide configuration singleton.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::MoxenError;
use crate::paths::Layout;

pub const DEFAULT_BASE_DIR: &str = "/opt/moxen";
pub const DEFAULT_LIBVIRT_URI: &str = "qemu:///system";
pub const DEFAULT_DISK_SIZE_GB: u32 = 64;
pub const DEFAULT_CPUS: u32 = 4;
pub const DEFAULT_MEMORY_MB: u64 = 8192;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    directories: DirectoriesSection,
    defaults: DefaultsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DirectoriesSection {
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DefaultsSection {
    vm_disk_size: Option<u32>,
    vm_cpus: Option<u32>,
    vm_memory: Option<u64>,
    libvirt_uri: Option<String>,
}

/// Resolved runtime settings: file values merged over built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub default_disk_size_gb: u32,
    pub default_cpus: u32,
    pub default_memory_mb: u64,
    pub libvirt_uri: String,
}

impl Settings {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.base_dir)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            default_disk_size_gb: DEFAULT_DISK_SIZE_GB,
            default_cpus: DEFAULT_CPUS,
            default_memory_mb: DEFAULT_MEMORY_MB,
            libvirt_uri: DEFAULT_LIBVIRT_URI.to_string(),
        }
    }
}

/// Where to look for the config file when `--config` is not given:
/// the per-user XDG location if it exists, otherwise the system-wide one.
pub fn default_config_path() -> PathBuf {
    if let Some(user) = dirs::config_dir().map(|d| d.join("moxen").join("config.yaml")) {
        if user.exists() {
            return user;
        }
    }
    PathBuf::from("/etc/moxen/config.yaml")
}

/// Load settings from `path`, merging over built-in defaults.
///
/// A missing file is not an error: the tool runs entirely on defaults.
/// `connect_override` (the `--connect` flag) wins over the file's
/// `defaults.libvirt_uri`.
pub fn load_settings(
    path: &Path,
    connect_override: Option<&str>,
) -> Result<Settings, MoxenError> {
    let file = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| MoxenError::Io {
            context: format!("reading config file {}", path.display()),
            source,
        })?;
        serde_yaml::from_str::<SettingsFile>(&contents).map_err(|e| MoxenError::InvalidConfig {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        SettingsFile::default()
    };

    let defaults = Settings::default();
    let libvirt_uri = match connect_override {
        Some(uri) => uri.to_string(),
        None => file.defaults.libvirt_uri.unwrap_or(defaults.libvirt_uri),
    };

    Ok(Settings {
        base_dir: file.directories.base_dir.unwrap_or(defaults.base_dir),
        default_disk_size_gb: file.defaults.vm_disk_size.unwrap_or(defaults.default_disk_size_gb),
        default_cpus: file.defaults.vm_cpus.unwrap_or(defaults.default_cpus),
        default_memory_mb: file.defaults.vm_memory.unwrap_or(defaults.default_memory_mb),
        libvirt_uri,
    })
}

/// Create the top-level catalog roots if they are missing, so a fresh
/// base directory is immediately usable.
pub fn ensure_base_layout(layout: &Layout) -> Result<(), MoxenError> {
    for dir in [
        layout.templates_dir(),
        layout.groups_dir(),
        layout.instances_dir(),
        layout.suspended_dir(),
        layout.defaults_dir(),
    ] {
        std::fs::create_dir_all(&dir).map_err(|source| MoxenError::Io {
            context: format!("creating directory {}", dir.display()),
            source,
        })?;
    }
    Ok(())
}
