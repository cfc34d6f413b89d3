//! # Objective Configuration
//!
//! Settings that select how the multinomial objective is assembled. The
//! configuration is plain data so that it can be stored next to a fitting run
//! in a human-readable TOML file and reloaded verbatim.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Storage backend for the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DesignBackend {
    /// Row-major `ndarray` storage. Suited to design matrices with few zeros.
    #[default]
    Dense,
    /// Compressed sparse column storage. Entries with magnitude at or below
    /// `sparse_drop_tolerance` are not stored.
    Sparse,
}

/// Configuration for building a [`crate::objective::MultinomialObjective`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    pub backend: DesignBackend,
    /// Magnitude threshold used when converting a dense matrix to sparse storage.
    pub sparse_drop_tolerance: f64,
    /// Reject non-finite design entries and weights when the data package is built.
    pub check_finite_inputs: bool,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            backend: DesignBackend::Dense,
            sparse_drop_tolerance: 0.0,
            check_finite_inputs: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("The sparse drop tolerance must be finite and non-negative, got {0}.")]
    InvalidTolerance(f64),
}

impl ObjectiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tol = self.sparse_drop_tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return Err(ConfigError::InvalidTolerance(tol));
        }
        Ok(())
    }

    /// Parses and validates a configuration from TOML text. Missing keys take
    /// their default values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded objective configuration from {}: {:?}", path, config);
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        self.validate()?;
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
