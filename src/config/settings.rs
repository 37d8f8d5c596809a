use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const SCRIPTS_DIR_VAR: &str = "PERUN_CUSTOM_SCRIPTS_DIR";
pub const SERVICE_VAR: &str = "PERUN_SERVICE";
pub const SETTINGS_FILE: &str = "db_settings.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub snapshot: SnapshotSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Relative paths are resolved against the settings file's directory.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotSettings {
    pub users: PathBuf,
    pub groups: PathBuf,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            users: PathBuf::from("/tmp/users.scim"),
            groups: PathBuf::from("/tmp/groups.scim"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    pub single_transaction: bool,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut settings: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e.message())))?;

        if settings.database.path.is_relative() {
            let dir = path.parent().unwrap_or(Path::new(""));
            settings.database.path = dir.join(&settings.database.path);
        }
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.message().to_string()))
    }

    /// Location of the settings file when none is given explicitly:
    /// `$PERUN_CUSTOM_SCRIPTS_DIR/$PERUN_SERVICE.d/db_settings.toml`.
    pub fn default_path() -> Result<PathBuf> {
        default_path_from(env::var_os(SCRIPTS_DIR_VAR), env::var_os(SERVICE_VAR))
    }
}

fn default_path_from(scripts_dir: Option<OsString>, service: Option<OsString>) -> Result<PathBuf> {
    let missing =
        |var: &str| Error::Config(format!("no settings file given and ${var} is not set"));
    let scripts_dir = scripts_dir.ok_or_else(|| missing(SCRIPTS_DIR_VAR))?;
    let mut service = service.ok_or_else(|| missing(SERVICE_VAR))?;

    service.push(".d");
    Ok(PathBuf::from(scripts_dir).join(service).join(SETTINGS_FILE))
}
