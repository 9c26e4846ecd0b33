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

//! Environment variable name constants for MPDB configuration.
//!
//! - [`MPDB_CONFIG`] - Path of the TOML configuration file
//! - [`MPDB_SNAPSHOT`] - Default snapshot file for the CLI
//! - [`MPDB_REPR`] - Representation scheme override

/// Path of the configuration file.
///
/// When not set, the CLI reads `~/.mpdb.toml` if it exists.
///
/// ```bash
/// MPDB_CONFIG=./board.toml mpdb --snapshot core.json state
/// ```
pub const MPDB_CONFIG: &str = "MPDB_CONFIG";

/// Snapshot file used when `--snapshot` is not given on the command line.
pub const MPDB_SNAPSHOT: &str = "MPDB_SNAPSHOT";

/// Representation scheme override (`auto`, `REPR_A` .. `REPR_D`).
///
/// Takes precedence over the configuration file but not over `--repr`.
pub const MPDB_REPR: &str = "MPDB_REPR";
