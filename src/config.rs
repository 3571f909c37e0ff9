use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DVError;
use crate::stream::{DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE, ParserOptions};
use crate::window::{DEFAULT_OVERSCAN, MAX_OVERSCAN};

pub const APP_NAME: &str = "delview";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DVConfig {
    /// How long the controller waits for a key event, in ms.
    pub event_poll_time: u64,
    pub chunk_size: usize,
    pub batch_size: usize,
    pub overscan: usize,
    pub default_column_width: usize,
    pub min_column_width: usize,
    pub max_column_width: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for DVConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            overscan: DEFAULT_OVERSCAN,
            default_column_width: 20,
            min_column_width: 6,
            max_column_width: 80,
            log_file: None,
        }
    }
}

impl DVConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(content: &str) -> Result<Self, DVError> {
        let config: DVConfig = toml::from_str(content)?;
        config.validate()
    }

    /// Load `path`, or the default location if it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, DVError> {
        let path = match path {
            Some(p) => Some(expand_path(&p.to_string_lossy())?),
            None => default_config_path().filter(|p| p.exists()),
        };
        match path {
            Some(path) => {
                debug!("Reading config from {}", path.display());
                let content = fs::read_to_string(&path).map_err(|e| {
                    DVError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                let mut config = Self::from_toml(&content)?;
                if let Some(log_file) = config.log_file.take() {
                    config.log_file = Some(expand_path(&log_file.to_string_lossy())?);
                }
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject values the viewer cannot work with.
    pub fn validate(self) -> Result<Self, DVError> {
        if self.chunk_size == 0 {
            return Err(DVError::Config("chunk_size must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(DVError::Config("batch_size must be positive".into()));
        }
        if self.overscan > MAX_OVERSCAN {
            return Err(DVError::Config(format!(
                "overscan must be at most {MAX_OVERSCAN}"
            )));
        }
        if self.min_column_width == 0 || self.min_column_width > self.max_column_width {
            return Err(DVError::Config(format!(
                "min_column_width must be between 1 and max_column_width ({})",
                self.max_column_width
            )));
        }
        Ok(self)
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions::default()
            .with_chunk_size(self.chunk_size)
            .with_batch_size(self.batch_size)
    }

    /// Default width for new tables, kept inside the configured bounds.
    pub fn initial_column_width(&self) -> usize {
        self.default_column_width
            .clamp(self.min_column_width, self.max_column_width)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join(CONFIG_FILE))
}

/// Expand `~` and environment variables in a user supplied path.
pub fn expand_path(input: &str) -> Result<PathBuf, DVError> {
    shellexpand::full(input.trim())
        .map(|s| PathBuf::from(s.as_ref()))
        .map_err(|e| DVError::Config(e.to_string()))
}
