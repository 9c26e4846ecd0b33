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

//! Error types shared across the engine.

use thiserror::Error;

/// Failures reported by a [`crate::Target`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Memory at the address could not be read
    #[error("cannot access memory at {address:#x} ({len} bytes)")]
    UnreadableMemory {
        /// Start of the failed read
        address: u64,
        /// Requested length
        len: usize,
    },
    /// No global symbol with this name
    #[error("no symbol \"{0}\" in current context")]
    MissingSymbol(String),
    /// No build-time constant with this name
    #[error("no constant \"{0}\"")]
    MissingConstant(String),
    /// No struct layout with this name
    #[error("no struct type named {0}")]
    MissingType(String),
    /// The struct layout exists but lacks the field
    #[error("type {type_name} has no field \"{field}\"")]
    MissingField {
        /// Struct type searched
        type_name: String,
        /// Field name requested
        field: String,
    },
    /// The frame has no local with this name
    #[error("no local \"{0}\" in the selected frame")]
    MissingLocal(String),
    /// No frames available (process not running)
    #[error("no stack")]
    NoStack,
    /// The host cannot do this (e.g. calling functions on a core dump)
    #[error("{0} is not supported by this target")]
    Unsupported(&'static str),
    /// Anything else the host reports
    #[error("{0}")]
    Other(String),
}

impl TargetError {
    /// Whether this error means the item simply does not exist in this build.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            Self::MissingSymbol(_)
                | Self::MissingConstant(_)
                | Self::MissingType(_)
                | Self::MissingField { .. }
                | Self::MissingLocal(_)
        )
    }
}

/// Malformed encodings found while decoding bytecode structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A variable-length integer ran past the end of the buffer
    #[error("truncated variable-length integer at offset {0}")]
    TruncatedVarint(usize),
    /// A variable-length integer has more continuation bytes than any valid value
    #[error("overlong variable-length integer at offset {0}")]
    OverlongVarint(usize),
    /// A two-byte line-table entry lost its second byte
    #[error("truncated line-table entry at offset {0}")]
    TruncatedLineEntry(usize),
    /// A line-table entry cannot encode the requested deltas
    #[error("line-table entry out of range: line delta {line_delta}, bytecode delta {bytecode_delta}")]
    LineEntryOutOfRange {
        /// Requested line delta
        line_delta: u32,
        /// Requested bytecode delta
        bytecode_delta: u32,
    },
    /// An instruction's operand ran past the end of the buffer
    #[error("truncated operand for opcode {opcode:#04x} at offset {offset}")]
    TruncatedOperand {
        /// Opcode byte
        opcode: u8,
        /// Offset of the opcode
        offset: usize,
    },
}

/// Errors from inspection operations that combine target access with decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    /// Host access failed
    #[error(transparent)]
    Target(#[from] TargetError),
    /// Encoding was malformed
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Expression could not be parsed or evaluated
    #[error(transparent)]
    Expr(#[from] crate::expr::ExprError),
    /// The value is not of the kind the operation needs
    #[error("{0}")]
    Unexpected(String),
}

/// Shorthand for engine results.
pub type InspectResult<T> = Result<T, InspectError>;
