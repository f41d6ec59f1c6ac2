//! Loads and validates the daemon's TOML configuration file.
//!
//! Two top-level keys: `settings` (model/chunk/batch defaults applied to
//! every folder unless overridden) and `folders` (the list of directories
//! to watch). A missing config file, an empty `folders` list, or a folder
//! path that isn't a directory are all fatal: the daemon should not start
//! half-configured.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt", "md", "rst", "pdf", "docx", "pptx", "xlsx"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no folders configured in config file")]
    NoFolders,
    #[error("folder does not exist or is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("could not resolve home directory to expand '~' in {0}")]
    NoHomeDirectory(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    folders: Vec<RawFolder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSettings {
    model: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    batch_size: Option<usize>,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFolder {
    path: String,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderConfig {
    pub path: PathBuf,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub folders: Vec<FolderConfig>,
    pub settings: Settings,
}

/// Loads configuration from `config_path`. Fatal errors: missing file,
/// unparseable TOML, no folders, or a folder path that isn't a directory.
pub fn load(config_path: &Path) -> Result<Config, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::NotFound(config_path.to_path_buf()));
    }
    let text = std::fs::read_to_string(config_path)
        .map_err(|source| ConfigError::Read { path: config_path.to_path_buf(), source })?;
    let raw: RawConfig = toml::from_str(&text)
        .map_err(|source| ConfigError::Parse { path: config_path.to_path_buf(), source })?;

    let settings = Settings {
        model: raw.settings.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        chunk_size: raw.settings.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        chunk_overlap: raw.settings.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
        batch_size: raw.settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        extensions: raw.settings.extensions.map_or_else(
            || DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            normalize_extensions,
        ),
    };

    if raw.folders.is_empty() {
        return Err(ConfigError::NoFolders);
    }

    let mut folders = Vec::with_capacity(raw.folders.len());
    for entry in raw.folders {
        let expanded = expand_home(&entry.path)?;
        let resolved = expanded
            .canonicalize()
            .unwrap_or(expanded);
        if !resolved.is_dir() {
            return Err(ConfigError::NotADirectory(resolved));
        }
        folders.push(FolderConfig {
            path: resolved,
            extensions: entry
                .extensions
                .map_or_else(|| settings.extensions.clone(), normalize_extensions),
        });
    }

    Ok(Config { folders, settings })
}

/// Normalizes user-supplied extensions (which may be written with or
/// without a leading dot, e.g. `.txt` or `txt`) to the crate-internal,
/// dotless, lower-case form that matches `Path::extension()`.
fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect()
}

/// Expands a leading `~` (or `~/...`) to the user's home directory,
/// mirroring shell tilde-expansion. Paths without a leading `~` are
/// returned unchanged.
fn expand_home(raw_path: &str) -> Result<PathBuf, ConfigError> {
    if let Some(rest) = raw_path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::NoHomeDirectory(raw_path.to_string()))?;
        Ok(home.join(rest))
    } else if raw_path == "~" {
        dirs::home_dir().ok_or_else(|| ConfigError::NoHomeDirectory(raw_path.to_string()))
    } else {
        Ok(PathBuf::from(raw_path))
    }
}
