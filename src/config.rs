//! Runtime configuration: built-in defaults, then an optional TOML file, then
//! environment variables. Command-line flags are applied last by the binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Category;
use crate::policy::SessionComposition;

const APP_DIR: &str = "prepdeck";
const DEFAULT_DB_NAME: &str = "prepdeck.db";
const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_CONFIG: &str = "PREPDECK_CONFIG";
pub const ENV_DB: &str = "PREPDECK_DB";
pub const ENV_USER: &str = "PREPDECK_USER";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub user_id: i64,
    pub composition: SessionComposition,
}

/// On-disk shape. Every key is optional.
///
/// ```toml
/// db_path = "/home/me/.local/share/prepdeck.db"
/// user_id = 2
///
/// [composition]
/// algorithmic = 3
/// design_high_level = 1
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    user_id: Option<i64>,
    composition: Option<BTreeMap<String, usize>>,
}

fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: app_dir().join(DEFAULT_DB_NAME),
            user_id: 1,
            composition: SessionComposition::default(),
        }
    }
}

impl Config {
    /// Resolve from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Resolve using `env` to look up variables, so tests needn't touch the
    /// real process environment.
    pub fn load_from<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let (path, explicit) = match env(ENV_CONFIG) {
            Some(p) => (PathBuf::from(p), true),
            None => (app_dir().join(CONFIG_FILE_NAME), false),
        };
        if path.exists() {
            config.merge_file(&path)?;
        } else if explicit {
            return Err(Error::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        if let Some(db) = env(ENV_DB) {
            config.db_path = PathBuf::from(db);
        }
        if let Some(user) = env(ENV_USER) {
            config.user_id = parse_user_id(&user)?;
        }

        debug!(db_path = %config.db_path.display(), user_id = config.user_id, "config resolved");
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if let Some(db_path) = file.db_path {
            self.db_path = db_path;
        }
        if let Some(user_id) = file.user_id {
            self.user_id = user_id;
        }
        if let Some(slots) = file.composition {
            self.composition = parse_composition(&slots)?;
        }
        Ok(())
    }

    /// Make sure the database's parent directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

pub fn parse_user_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid user id '{raw}'")))
}

fn parse_composition(slots: &BTreeMap<String, usize>) -> Result<SessionComposition> {
    let mut parsed = Vec::with_capacity(slots.len());
    for (name, count) in slots {
        let category = Category::from_str(name)
            .ok_or_else(|| Error::Config(format!("unknown category '{name}' in composition")))?;
        parsed.push((category, *count));
    }
    Ok(SessionComposition::new(parsed))
}
