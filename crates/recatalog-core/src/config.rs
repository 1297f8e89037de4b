use config::{Config, ConfigError, Environment, File as ConfigFile};
use directories::UserDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CATALOG_FILE_NAME: &str = "catalog.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// Paths or directories to favor when suggesting which duplicate to keep.
    pub favored_paths: Vec<String>,
    /// Directory holding `catalog.db`. Set from `CATALOG_DB_PATH`.
    pub db_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: vec!["*.db".to_string(), "*.bak".to_string()],
            favored_paths: Vec::new(),
            db_path: None,
        }
    }
}

impl AppConfig {
    /// Catalog file location: `db_path` if configured, else the user's home directory.
    pub fn catalog_path(&self) -> PathBuf {
        let dir = match &self.db_path {
            Some(dir) => PathBuf::from(dir),
            None => UserDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        dir.join(CATALOG_FILE_NAME)
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("CATALOG"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;
        let result_clone = result.clone();

        for res_dir in &result_clone {
            let res_dir_path = Path::new(res_dir);

            if dir_path.starts_with(res_dir_path) {
                should_add = false;
                break;
            }

            if res_dir_path.starts_with(dir_path) {
                result.retain(|x| x != res_dir);
            }
        }

        if should_add {
            result.push(dir);
        }
    }

    result
}
