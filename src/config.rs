//! TOML configuration.
//!
//! ```toml
//! [puzzle]
//! rounds = 2
//! start_offset = 0
//! start_range = 0
//! ```
//!
//! Every key is optional.
use crate::errors::Error;
use crate::puzzle::Parameters;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings of a publisher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parameters of the colocation puzzles put in ticket bundles.
    pub puzzle: Parameters,
}

impl Config {
    /// Parse and validate a configuration.
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(s)?;
        config.puzzle.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}
