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

//! Host collaborator interface.
//!
//! The engine never touches a process directly. Everything it knows about the
//! inspected MicroPython image comes through [`Target`]: raw memory reads,
//! symbol and constant lookup, struct layout metadata, native stack frames and
//! (optionally) calling into the inferior.
//!
//! [`SnapshotTarget`] is the in-tree implementation, backed by a JSON dump of
//! the interesting parts of a process.

mod layouts;
mod snapshot;

pub use layouts::standard_layout;
pub use snapshot::{
    FrameSnapshot, MemorySegment, SnapshotBuilder, SnapshotFile, SnapshotTarget, Word,
};

use std::collections::BTreeMap;

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::TargetError;

/// Byte order of the inspected process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl Endian {
    /// Assemble an unsigned integer of `bytes.len()` bytes (at most 8).
    pub fn read_uint(self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self {
            Self::Little => bytes.iter().rev().take(8).fold(0, fold),
            Self::Big => bytes.iter().take(8).fold(0, fold),
        }
    }

    /// Encode the low `len` bytes of `value`.
    pub fn write_uint(self, value: u64, len: usize) -> Vec<u8> {
        let mut out: Vec<u8> = (0..len).map(|i| (value >> (8 * i)) as u8).collect();
        if self == Self::Big {
            out.reverse();
        }
        out
    }
}

/// A resolved global symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Load address
    #[serde(with = "snapshot::hex_u64")]
    pub address: u64,
    /// Size in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Name of the struct type stored at the symbol, when known
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// What a struct field holds, as far as pointer-chasing is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Pointer-sized, pointer-typed (object references, `void *`, `mp_obj_t`)
    Pointer,
    /// Plain data
    Scalar,
    /// Fixed-size array; `len == 0` marks a trailing flexible array
    Array {
        /// Element kind
        element: Box<FieldKind>,
        /// Element size in bytes
        element_size: u64,
        /// Number of elements
        len: u64,
    },
    /// Embedded struct
    Struct {
        /// Struct type name, resolvable through [`Target::struct_layout`]
        type_name: String,
    },
}

impl FieldKind {
    /// An array of pointers.
    pub fn pointer_array(word_size: usize, len: u64) -> Self {
        Self::Array { element: Box::new(Self::Pointer), element_size: word_size as u64, len }
    }

    /// An embedded struct.
    pub fn structure(type_name: impl Into<String>) -> Self {
        Self::Struct { type_name: type_name.into() }
    }
}

/// Bit range of a bitfield member inside its storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRange {
    /// Bit offset from the least significant bit of the storage unit
    pub shift: u32,
    /// Width in bits
    pub width: u32,
}

/// One field of a struct layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Byte offset from the start of the struct
    pub offset: u64,
    /// Storage size in bytes
    pub size: u64,
    /// What the field holds
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Bitfield position, when the field is a bitfield
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<BitRange>,
}

impl FieldLayout {
    /// A pointer-sized pointer field.
    pub fn pointer(name: &str, offset: u64, word_size: usize) -> Self {
        Self { name: name.to_string(), offset, size: word_size as u64, kind: FieldKind::Pointer, bits: None }
    }

    /// A scalar field of `size` bytes.
    pub fn scalar(name: &str, offset: u64, size: u64) -> Self {
        Self { name: name.to_string(), offset, size, kind: FieldKind::Scalar, bits: None }
    }

    /// An embedded struct field.
    pub fn structure(name: &str, offset: u64, size: u64, type_name: &str) -> Self {
        Self { name: name.to_string(), offset, size, kind: FieldKind::structure(type_name), bits: None }
    }

    /// A field of arbitrary kind.
    pub fn new(name: &str, offset: u64, size: u64, kind: FieldKind) -> Self {
        Self { name: name.to_string(), offset, size, kind, bits: None }
    }

    /// Mark the field as a bitfield.
    pub fn with_bits(mut self, shift: u32, width: u32) -> Self {
        self.bits = Some(BitRange { shift, width });
        self
    }

    /// Whether the field holds a single pointer.
    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, FieldKind::Pointer)
    }
}

/// Layout of a struct type in the inspected build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    /// Type name
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// Fields in declaration order
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    /// Find a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One native stack frame as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeFrame {
    /// Frame level, 0 is innermost
    pub level: usize,
    /// Native function name, when symbolized
    pub function: Option<String>,
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
    /// Register values (name, value); only meaningful for the innermost frame
    pub registers: Vec<(String, u64)>,
    /// Local variables holding a word-sized value
    pub locals: BTreeMap<String, u64>,
}

impl NativeFrame {
    /// Whether the frame belongs to the named native function.
    pub fn is_function(&self, name: &str) -> bool {
        self.function.as_deref() == Some(name)
    }

    /// Value of a local variable.
    pub fn local(&self, name: &str) -> Result<u64, TargetError> {
        self.locals.get(name).copied().ok_or_else(|| TargetError::MissingLocal(name.to_string()))
    }

    /// Value of a register.
    pub fn register(&self, name: &str) -> Option<u64> {
        self.registers.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Access to the inspected process.
///
/// Methods take `&self`; implementations that need to mutate (e.g. a live
/// connection) use interior mutability.
#[auto_impl(&, Box, Rc)]
pub trait Target {
    /// Pointer width in bytes (4 or 8).
    fn word_size(&self) -> usize;

    /// Byte order of the process.
    fn endian(&self) -> Endian {
        Endian::Little
    }

    /// Read `len` bytes at `address`.
    fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError>;

    /// Resolve a global symbol.
    fn lookup_symbol(&self, name: &str) -> Result<Symbol, TargetError>;

    /// Resolve a build-time constant (a preprocessor macro value).
    fn lookup_constant(&self, name: &str) -> Result<i64, TargetError>;

    /// Fetch the layout of a struct type.
    fn struct_layout(&self, type_name: &str) -> Result<StructLayout, TargetError>;

    /// Native frames, innermost first.
    fn frames(&self) -> Result<Vec<NativeFrame>, TargetError>;

    /// Call a function in the inferior and return what it printed.
    fn call_function(&self, _address: u64, _args: &[u64]) -> Result<String, TargetError> {
        Err(TargetError::Unsupported("calling inferior functions"))
    }

    /// Ask the host to resume execution once the current stop is handled.
    fn request_continue(&self) -> Result<(), TargetError> {
        Err(TargetError::Unsupported("resuming execution"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_roundtrip() {
        let bytes = Endian::Little.write_uint(0x1234_5678, 4);
        assert_eq!(bytes, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(Endian::Little.read_uint(&bytes), 0x1234_5678);

        let bytes = Endian::Big.write_uint(0xbeef, 2);
        assert_eq!(bytes, vec![0xbe, 0xef]);
        assert_eq!(Endian::Big.read_uint(&bytes), 0xbeef);
    }

    #[test]
    fn test_field_kind_json_shape() {
        let field = FieldLayout::new("qstrs", 24, 0, FieldKind::pointer_array(4, 0));
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["kind"], "array");
        assert_eq!(json["element"]["kind"], "pointer");

        let back: FieldLayout = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }
}
