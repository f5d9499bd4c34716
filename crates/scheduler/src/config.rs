//! Pipeline configuration.
//!
//! Settings can be loaded from a TOML file, from environment variables, or
//! built programmatically. Defaults match a thumbnail grid of 300x400 covers
//! with three renders in flight and room for fifty cached images.

use serde::{Deserialize, Serialize};
use shelf_render::ThumbnailFormat;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_CAPACITY: usize = 50;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_TARGET_WIDTH: u32 = 300;
pub const DEFAULT_TARGET_HEIGHT: u32 = 400;

/// Configuration for a [`ThumbnailScheduler`](crate::ThumbnailScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Maximum number of cached thumbnails
    pub cache_capacity: usize,
    /// Maximum number of renders in flight
    pub max_concurrent: usize,
    /// Bounding box width in pixels
    pub target_width: u32,
    /// Bounding box height in pixels
    pub target_height: u32,
    /// Output encoding
    pub format: ThumbnailFormat,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            target_width: DEFAULT_TARGET_WIDTH,
            target_height: DEFAULT_TARGET_HEIGHT,
            format: ThumbnailFormat::default(),
        }
    }
}

impl ThumbnailConfig {
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.max_concurrent = limit;
        self
    }

    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    pub fn with_format(mut self, format: ThumbnailFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the default config file location for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/shelf/config.toml
    /// - Linux: ~/.config/shelf/config.toml
    /// - Windows: %APPDATA%\shelf\config.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("shelf").join("config.toml")
        } else {
            PathBuf::from("shelf.toml")
        }
    }

    /// Loads configuration from environment variables, starting from defaults.
    ///
    /// Environment variables:
    /// - `SHELF_CACHE_CAPACITY`: cached thumbnails (default: 50)
    /// - `SHELF_MAX_CONCURRENT`: renders in flight (default: 3)
    /// - `SHELF_THUMB_WIDTH` / `SHELF_THUMB_HEIGHT`: bounding box (default: 300x400)
    /// - `SHELF_THUMB_FORMAT`: `png` or `jpeg` (default: jpeg)
    /// - `SHELF_THUMB_QUALITY`: JPEG quality 1-100 (default: 80)
    ///
    /// # Errors
    /// Returns an error if any variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields that have an environment variable set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(capacity) = env_parse("SHELF_CACHE_CAPACITY")? {
            self.cache_capacity = capacity;
        }
        if let Some(limit) = env_parse("SHELF_MAX_CONCURRENT")? {
            self.max_concurrent = limit;
        }
        if let Some(width) = env_parse("SHELF_THUMB_WIDTH")? {
            self.target_width = width;
        }
        if let Some(height) = env_parse("SHELF_THUMB_HEIGHT")? {
            self.target_height = height;
        }
        if let Some(format) = env_parse::<ThumbnailFormat>("SHELF_THUMB_FORMAT")? {
            self.format = format;
        }
        if let Some(quality) = env_parse::<u8>("SHELF_THUMB_QUALITY")? {
            self.format = self.format.with_quality(quality);
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file. Missing keys keep their defaults.
    ///
    /// ```toml
    /// cache_capacity = 50
    /// max_concurrent = 3
    /// target_width = 300
    /// target_height = 400
    ///
    /// [format]
    /// kind = "jpeg"
    /// quality = 80
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: name, value }),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
