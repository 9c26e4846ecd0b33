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

//! Session settings.
//!
//! Two parameters can be changed at any time during a session, each
//! individually settable and queryable by name in the style of a debugger's
//! `set`/`show` commands:
//!
//! - `repr`: object representation scheme, `auto` or `REPR_A` .. `REPR_D`
//! - `map_display`: which dict/map slots to print, `filled` or `all`

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ObjRepr;

/// The `repr` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReprSetting {
    /// Detect from `MICROPY_OBJ_REPR`
    #[default]
    Auto,
    /// Use a fixed scheme
    Fixed(ObjRepr),
}

impl fmt::Display for ReprSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(repr) => write!(f, "{repr}"),
        }
    }
}

impl FromStr for ReprSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Fixed)
        }
    }
}

impl TryFrom<String> for ReprSetting {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReprSetting> for String {
    fn from(value: ReprSetting) -> Self {
        value.to_string()
    }
}

/// The `map_display` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapDisplay {
    /// Only slots holding a key
    #[default]
    Filled,
    /// Every allocated slot, including `MP_OBJ_NULL` and `MP_OBJ_SENTINEL` keys
    All,
}

impl fmt::Display for MapDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Filled => "filled",
            Self::All => "all",
        })
    }
}

impl FromStr for MapDisplay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filled" | "filled-only" | "filled_only" => Ok(Self::Filled),
            "all" | "all-slots" => Ok(Self::All),
            other => Err(format!("unknown map display mode {other:?}, expected \"filled\" or \"all\"")),
        }
    }
}

/// Description of one settable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Name used with `set`/`show`
    pub name: &'static str,
    /// One-line help
    pub doc: &'static str,
    /// Accepted values
    pub values: &'static [&'static str],
}

/// All parameters known to [`Settings`].
pub const PARAMETERS: &[ParameterInfo] = &[
    ParameterInfo {
        name: "repr",
        doc: "Object representation scheme of the inspected build",
        values: &["auto", "REPR_A", "REPR_B", "REPR_C", "REPR_D"],
    },
    ParameterInfo {
        name: "map_display",
        doc: "Which slots of dicts and maps to print",
        values: &["filled", "all"],
    },
];

/// Error from [`Settings::set`] and [`Settings::show`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingError {
    /// No parameter with this name
    #[error("unknown parameter \"{0}\"")]
    UnknownParameter(String),
    /// Value rejected by the parameter
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Current values of all parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Representation scheme override
    pub repr: ReprSetting,
    /// Map slot filter
    pub map_display: MapDisplay,
}

impl Settings {
    fn canonical(name: &str) -> Option<&'static ParameterInfo> {
        let normalized = name.trim().replace('-', "_");
        PARAMETERS.iter().find(|p| p.name == normalized)
    }

    /// Change a parameter by name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), SettingError> {
        let info = Self::canonical(name).ok_or_else(|| SettingError::UnknownParameter(name.to_string()))?;
        let invalid = |reason: String| SettingError::InvalidValue { name: info.name, reason };
        match info.name {
            "repr" => self.repr = value.parse().map_err(invalid)?,
            _ => self.map_display = value.parse().map_err(invalid)?,
        }
        Ok(())
    }

    /// Current value of a parameter by name.
    pub fn show(&self, name: &str) -> Result<String, SettingError> {
        let info = Self::canonical(name).ok_or_else(|| SettingError::UnknownParameter(name.to_string()))?;
        Ok(match info.name {
            "repr" => self.repr.to_string(),
            _ => self.map_display.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_show() {
        let mut settings = Settings::default();
        assert_eq!(settings.show("repr").unwrap(), "auto");
        assert_eq!(settings.show("map-display").unwrap(), "filled");

        settings.set("repr", "REPR_C").unwrap();
        settings.set("map_display", "all").unwrap();
        assert_eq!(settings.repr, ReprSetting::Fixed(ObjRepr::C));
        assert_eq!(settings.show("repr").unwrap(), "REPR_C");
        assert_eq!(settings.map_display, MapDisplay::All);

        settings.set("repr", "auto").unwrap();
        assert_eq!(settings.repr, ReprSetting::Auto);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut settings = Settings::default();
        assert!(matches!(settings.set("colour", "red"), Err(SettingError::UnknownParameter(_))));
        assert!(matches!(
            settings.set("repr", "REPR_Z"),
            Err(SettingError::InvalidValue { name: "repr", .. })
        ));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_serde_shape() {
        let settings: Settings =
            serde_json::from_str(r#"{"repr": "REPR_D", "map_display": "all"}"#).unwrap();
        assert_eq!(settings.repr, ReprSetting::Fixed(ObjRepr::D));
        assert_eq!(settings.map_display, MapDisplay::All);

        let partial: Settings = serde_json::from_str(r#"{"repr": "auto"}"#).unwrap();
        assert_eq!(partial, Settings::default());
        assert!(serde_json::from_str::<Settings>(r#"{"repr": "REPR_Q"}"#).is_err());
    }
}
