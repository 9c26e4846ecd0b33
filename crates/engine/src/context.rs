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

//! Inspection session.
//!
//! [`InspectContext`] is created once per attached process and handed to every
//! decoder. It owns the target, the user settings, the resolved
//! representation scheme and every lazily resolved handle (symbols, constants,
//! struct layouts, type descriptors). Dropping it forgets all of them.

use std::rc::Rc;

use mpdb_common::{LazyCache, WarnOnce};
use tracing::{debug, warn};

use crate::{
    settings::{ReprSetting, SettingError, Settings},
    target::{Endian, FieldKind, FieldLayout, StructLayout, Symbol, Target},
    types::TypeRegistry,
    ObjRepr, TaggedValue, TargetError,
};

/// Longest C string read from the target.
pub const MAX_C_STRING: usize = 4096;

const C_STRING_CHUNK: usize = 32;

/// Name of the global holding all interpreter state.
pub const STATE_SYMBOL: &str = "mp_state_ctx";

/// Struct type of [`STATE_SYMBOL`].
pub const STATE_TYPE: &str = "mp_state_ctx_t";

/// A field located in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Address of the field's storage
    pub address: u64,
    /// The field's layout
    pub layout: FieldLayout,
}

/// Session-scoped state shared by all decoders.
#[derive(Debug)]
pub struct InspectContext<T> {
    target: T,
    settings: Settings,
    repr: ObjRepr,
    symbols: LazyCache<Symbol>,
    constants: LazyCache<i64>,
    layouts: LazyCache<Rc<StructLayout>>,
    types: TypeRegistry,
    warnings: WarnOnce,
}

impl<T: Target> InspectContext<T> {
    /// Attach to a target with default settings.
    pub fn new(target: T) -> Self {
        Self::with_settings(target, Settings::default())
    }

    /// Attach to a target with the given settings.
    pub fn with_settings(target: T, settings: Settings) -> Self {
        let mut ctx = Self {
            target,
            settings,
            repr: ObjRepr::default(),
            symbols: LazyCache::new("symbol"),
            constants: LazyCache::quiet("constant"),
            layouts: LazyCache::new("type"),
            types: TypeRegistry::new(),
            warnings: WarnOnce::new(),
        };
        ctx.repr = ctx.resolve_repr();
        ctx
    }

    /// The host collaborator.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace all settings at once.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.repr = self.resolve_repr();
    }

    /// Change one parameter by name.
    pub fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), SettingError> {
        self.settings.set(name, value)?;
        self.repr = self.resolve_repr();
        Ok(())
    }

    /// Read one parameter by name.
    pub fn show_parameter(&self, name: &str) -> Result<String, SettingError> {
        let shown = self.settings.show(name)?;
        if name.trim() == "repr" && self.settings.repr == ReprSetting::Auto {
            return Ok(format!("{shown} ({})", self.repr));
        }
        Ok(shown)
    }

    /// The representation scheme in effect.
    pub fn repr(&self) -> ObjRepr {
        self.repr
    }

    fn resolve_repr(&self) -> ObjRepr {
        match self.settings.repr {
            ReprSetting::Fixed(repr) => repr,
            ReprSetting::Auto => match ObjRepr::detect(|name| self.constant(name)) {
                Some(repr) => {
                    debug!(%repr, "Detected object representation");
                    repr
                }
                None => {
                    warn!(
                        "Unable to detect the object representation from MICROPY_OBJ_REPR, assuming {}",
                        ObjRepr::default()
                    );
                    ObjRepr::default()
                }
            },
        }
    }

    /// Pointer width in bytes.
    pub fn word_size(&self) -> usize {
        self.target.word_size()
    }

    /// Byte order.
    pub fn endian(&self) -> Endian {
        self.target.endian()
    }

    /// Classify a raw word under the active scheme.
    pub fn classify(&self, word: u64) -> TaggedValue {
        self.repr.classify(word, self.word_size())
    }

    /// Type descriptor registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Warn about `key` once per session.
    pub fn warn_once(&self, key: &str, message: impl std::fmt::Display) {
        self.warnings.warn(key, message);
    }

    // ----- symbols and metadata -----

    /// Resolve a global symbol (cached).
    pub fn symbol(&self, name: &str) -> Result<Symbol, TargetError> {
        self.symbols.try_get(name, |n| self.target.lookup_symbol(n))
    }

    /// Address of a global symbol, if it exists.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbol(name).ok().map(|s| s.address)
    }

    /// Resolve a build constant (cached).
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name, |n| self.target.lookup_constant(n))
    }

    /// Layout of a struct type (cached).
    pub fn layout(&self, type_name: &str) -> Result<Rc<StructLayout>, TargetError> {
        self.layouts.try_get(type_name, |n| self.target.struct_layout(n).map(Rc::new))
    }

    /// Layout of one field.
    pub fn field(&self, type_name: &str, field: &str) -> Result<FieldLayout, TargetError> {
        self.layout(type_name)?.field(field).cloned().ok_or_else(|| TargetError::MissingField {
            type_name: type_name.to_string(),
            field: field.to_string(),
        })
    }

    /// Locate `path` (dot-separated, e.g. `vm.last_pool`) inside a struct at `base`.
    pub fn field_ref(&self, base: u64, type_name: &str, path: &str) -> Result<FieldRef, TargetError> {
        let mut address = base;
        let mut current_type = type_name.to_string();
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let layout = self.field(&current_type, part)?;
            address += layout.offset;
            if parts.peek().is_none() {
                return Ok(FieldRef { address, layout });
            }
            match &layout.kind {
                FieldKind::Struct { type_name } => current_type = type_name.clone(),
                _ => {
                    return Err(TargetError::MissingField {
                        type_name: layout.name.clone(),
                        field: parts.collect::<Vec<_>>().join("."),
                    })
                }
            }
        }
        Err(TargetError::MissingField { type_name: type_name.to_string(), field: path.to_string() })
    }

    /// Address of the global interpreter state.
    pub fn state_address(&self) -> Result<u64, TargetError> {
        self.symbol(STATE_SYMBOL).map(|s| s.address)
    }

    /// Locate a field of the global interpreter state, e.g. `mem.area`.
    pub fn state_field(&self, path: &str) -> Result<FieldRef, TargetError> {
        self.field_ref(self.state_address()?, STATE_TYPE, path)
    }

    // ----- memory -----

    /// Read raw bytes.
    pub fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError> {
        self.target.read_memory(address, len)
    }

    /// Read an unsigned integer of `size` bytes.
    pub fn read_uint(&self, address: u64, size: usize) -> Result<u64, TargetError> {
        let bytes = self.read_bytes(address, size)?;
        Ok(self.endian().read_uint(&bytes))
    }

    /// Read one pointer-sized word.
    pub fn read_word(&self, address: u64) -> Result<u64, TargetError> {
        self.read_uint(address, self.word_size())
    }

    /// Read `count` consecutive words.
    pub fn read_words(&self, address: u64, count: usize) -> Result<Vec<u64>, TargetError> {
        let word_size = self.word_size();
        let bytes = self.read_bytes(address, count * word_size)?;
        Ok(bytes.chunks_exact(word_size).map(|chunk| self.endian().read_uint(chunk)).collect())
    }

    /// Read the value stored in a located field, applying bitfield extraction.
    pub fn read_field_ref(&self, field: &FieldRef) -> Result<u64, TargetError> {
        let size = (field.layout.size as usize).clamp(1, 8);
        let raw = self.read_uint(field.address, size)?;
        Ok(match field.layout.bits {
            Some(bits) if bits.width < 64 => (raw >> bits.shift) & ((1u64 << bits.width) - 1),
            Some(bits) => raw >> bits.shift,
            None => raw,
        })
    }

    /// Read a scalar or pointer field of the struct at `base`.
    pub fn read_field(&self, base: u64, type_name: &str, path: &str) -> Result<u64, TargetError> {
        let field = self.field_ref(base, type_name, path)?;
        self.read_field_ref(&field)
    }

    /// Read a scalar or pointer field of the global interpreter state.
    pub fn read_state_field(&self, path: &str) -> Result<u64, TargetError> {
        let field = self.state_field(path)?;
        self.read_field_ref(&field)
    }

    /// Read a NUL-terminated string, bounded by [`MAX_C_STRING`].
    ///
    /// Reads in small chunks so a string near the end of mapped memory still
    /// decodes. Invalid UTF-8 is replaced.
    pub fn read_c_string(&self, address: u64) -> Result<String, TargetError> {
        let mut out = Vec::new();
        let mut cursor = address;
        while out.len() < MAX_C_STRING {
            let chunk = match self.read_bytes(cursor, C_STRING_CHUNK) {
                Ok(chunk) => chunk,
                // Near the end of a mapping: fall back to single bytes.
                Err(_) => match self.read_bytes(cursor, 1) {
                    Ok(byte) => byte,
                    Err(err) if out.is_empty() => return Err(err),
                    Err(_) => break,
                },
            };
            if let Some(nul) = chunk.iter().position(|b| *b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            cursor += chunk.len() as u64;
            out.extend_from_slice(&chunk);
        }
        out.truncate(MAX_C_STRING);
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SnapshotBuilder;

    #[test]
    fn test_auto_detection_and_override() {
        let target = SnapshotBuilder::new(8).constant("MICROPY_OBJ_REPR", 3).build();
        let mut ctx = InspectContext::new(target);
        assert_eq!(ctx.repr(), ObjRepr::D);
        assert_eq!(ctx.show_parameter("repr").unwrap(), "auto (REPR_D)");

        ctx.set_parameter("repr", "REPR_B").unwrap();
        assert_eq!(ctx.repr(), ObjRepr::B);
        assert_eq!(ctx.show_parameter("repr").unwrap(), "REPR_B");
    }

    #[test]
    fn test_detection_failure_falls_back() {
        let ctx = InspectContext::new(SnapshotBuilder::new(4).build());
        assert_eq!(ctx.repr(), ObjRepr::A);
    }

    #[test]
    fn test_nested_field_paths_and_bitfields() {
        let base = 0x2000_0000;
        let target = SnapshotBuilder::new(4)
            .symbol(STATE_SYMBOL, base)
            // vm.last_pool sits right after the 7-word thread state
            .word(base + 7 * 4, 0x1234_5670)
            .build();
        let ctx = InspectContext::new(target);

        assert_eq!(ctx.read_state_field("vm.last_pool").unwrap(), 0x1234_5670);
        assert!(matches!(ctx.state_field("vm.bogus"), Err(TargetError::MissingField { .. })));

        let pool = 0x3000_0000;
        let target = SnapshotBuilder::new(4).word(pool + 4, 0x8000_0000 | 77).build();
        let ctx = InspectContext::new(target);
        assert_eq!(ctx.read_field(pool, "qstr_pool_t", "total_prev_len").unwrap(), 77);
        assert_eq!(ctx.read_field(pool, "qstr_pool_t", "is_sorted").unwrap(), 1);
    }

    #[test]
    fn test_c_string_at_end_of_mapping() {
        let target = SnapshotBuilder::new(4).c_string(0x100, "hello").build();
        let ctx = InspectContext::new(target);
        assert_eq!(ctx.read_c_string(0x100).unwrap(), "hello");
        assert_eq!(ctx.read_c_string(0x102).unwrap(), "llo");
        assert!(ctx.read_c_string(0x900).is_err());
    }
}
