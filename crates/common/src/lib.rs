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

// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! MPDB Common - Shared functionality for MPDB components
//!
//! This crate provides shared utilities used by both the mpdb binary
//! and the engine crate: logging setup, the lazy name-resolution cache and
//! environment variable names.

/// Lazy name-to-handle cache with eviction of failed resolutions
pub mod cache;
/// Environment variable names read by MPDB components
pub mod env;
/// Logging setup and utilities for consistent logging across MPDB components
pub mod logging;

pub use cache::*;
pub use logging::*;
