// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration file.
//!
//! Read from `$MPDB_CONFIG` when set, otherwise from `~/.mpdb.toml`. A missing
//! default file means defaults; a missing file named by `$MPDB_CONFIG` is an
//! error.
//!
//! ```toml
//! repr = "REPR_C"
//! map_display = "all"
//!
//! [logging]
//! file = true
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use mpdb_common::env::MPDB_CONFIG;
use mpdb_engine::{MapDisplay, ReprSetting, Settings};
use serde::{Deserialize, Serialize};

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MpdbConfig {
    /// Representation scheme override
    pub repr: Option<ReprSetting>,
    /// Dict slot filter
    pub map_display: Option<MapDisplay>,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// `[logging]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Write a rolling log file next to the console output
    pub file: bool,
}

impl MpdbConfig {
    /// Get the default config file path (~/.mpdb.toml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("Unable to determine home directory"))?;
        Ok(home.join(".mpdb.toml"))
    }

    /// Load the configuration, returning the path it came from if any.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = env::var_os(MPDB_CONFIG) {
            let path = PathBuf::from(path);
            return Ok((Self::load_from(&path)?, Some(path)));
        }

        match Self::default_path() {
            Ok(path) if path.exists() => Ok((Self::load_from(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }

    /// Load the configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Session settings described by this file.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(repr) = self.repr {
            settings.repr = repr;
        }
        if let Some(map_display) = self.map_display {
            settings.map_display = map_display;
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use mpdb_engine::ObjRepr;

    use super::*;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "repr = \"REPR_C\"\nmap_display = \"all\"\n\n[logging]\nfile = true").unwrap();

        let config = MpdbConfig::load_from(file.path()).unwrap();
        assert_eq!(config.repr, Some(ReprSetting::Fixed(ObjRepr::C)));
        assert!(config.logging.file);

        let settings = config.settings();
        assert_eq!(settings.repr, ReprSetting::Fixed(ObjRepr::C));
        assert_eq!(settings.map_display, MapDisplay::All);
    }

    #[test]
    fn test_empty_file_means_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = MpdbConfig::load_from(file.path()).unwrap();
        assert_eq!(config, MpdbConfig::default());
        assert_eq!(config.settings(), Settings::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "repr = \"REPR_Z\"").unwrap();
        assert!(MpdbConfig::load_from(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "colour = \"blue\"").unwrap();
        assert!(MpdbConfig::load_from(file.path()).is_err());
    }
}
