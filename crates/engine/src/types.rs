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

//! Type descriptors.
//!
//! Every heap object starts with `mp_obj_base_t { const mp_obj_type_t *type }`.
//! Builtin types are global `mp_type_<name>` objects, so the cheapest way to
//! name a type is to compare against their addresses; anything else (user
//! classes, types compiled out of this build) falls back to the type's own
//! `name` qstr.

use mpdb_common::LazyCache;

use crate::{InspectContext, Target, TargetError};

/// Struct type of a type object.
pub const TYPE_TYPE: &str = "mp_obj_type_t";

/// Builtin type objects probed by name, without the `mp_type_` prefix.
pub const KNOWN_TYPES: &[&str] = &[
    "type",
    "object",
    "NoneType",
    "bool",
    "int",
    "str",
    "bytes",
    "bytearray",
    "memoryview",
    "float",
    "complex",
    "tuple",
    "list",
    "map",
    "enumerate",
    "filter",
    "deque",
    "dict",
    "ordereddict",
    "range",
    "set",
    "frozenset",
    "slice",
    "zip",
    "array",
    "super",
    "gen_wrap",
    "native_gen_wrap",
    "gen_instance",
    "fun_builtin_0",
    "fun_builtin_1",
    "fun_builtin_2",
    "fun_builtin_3",
    "fun_builtin_var",
    "fun_bc",
    "fun_native",
    "fun_viper",
    "fun_asm",
    "code",
    "module",
    "staticmethod",
    "classmethod",
    "bound_meth",
    "property",
    "stringio",
    "bytesio",
    "ringio",
    "reversed",
    "polymorph_iter",
    "polymorph_iter_with_finaliser",
    "BaseException",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "EOFError",
    "Exception",
    "GeneratorExit",
    "ImportError",
    "IndentationError",
    "IndexError",
    "KeyboardInterrupt",
    "KeyError",
    "LookupError",
    "MemoryError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "RuntimeError",
    "StopAsyncIteration",
    "StopIteration",
    "SyntaxError",
    "SystemExit",
    "TypeError",
    "UnicodeError",
    "ValueError",
    "ViperTypeError",
    "ZeroDivisionError",
    "usb_device_builtin_default",
    "usb_device_builtin_none",
    "bluetooth_uuid",
    "bluetooth_ble",
    "framebuf",
    "poll",
    "vfs_fat_fileio",
    "vfs_fat_textio",
    "vfs_posix_fileio",
    "vfs_posix_textio",
    "vfs_posix",
    "vfs_rom_fileio",
    "vfs_rom_textio",
    "vfs_rom",
    "stest_fileio",
    "stest_textio2",
    "socket",
    "jsproxy_gen",
    "jsproxy",
    "undefined",
    "iobase",
    "bufwriter",
    "thread_lock",
    "array_it",
    "attrtuple",
    "closure",
    "dict_view_it",
    "dict_view",
    "it",
    "range_it",
    "singleton",
    "frame",
    "checked_fun",
];

/// Lazily resolved addresses of the builtin type objects.
///
/// Most builds lack a good share of [`KNOWN_TYPES`], so misses are logged
/// quietly and retried on the next lookup.
#[derive(Debug)]
pub struct TypeRegistry {
    addresses: LazyCache<u64>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { addresses: LazyCache::quiet("type object") }
    }

    /// Forget every resolved address.
    pub fn clear(&self) {
        self.addresses.clear();
    }
}

impl<T: Target> InspectContext<T> {
    /// Address of `mp_type_<name>`, if the build has it.
    pub fn type_address(&self, name: &str) -> Option<u64> {
        self.types()
            .addresses
            .get(name, |n| self.target().lookup_symbol(&format!("mp_type_{n}")).map(|s| s.address))
    }

    /// The `type` pointer of the object at `obj`.
    pub fn object_type(&self, obj: u64) -> Result<u64, TargetError> {
        self.read_field(obj, "mp_obj_base_t", "type")
    }

    /// Whether `type_ptr` is the builtin `mp_type_<name>`.
    pub fn is_type(&self, type_ptr: u64, name: &str) -> bool {
        type_ptr != 0 && self.type_address(name) == Some(type_ptr)
    }

    /// Name of `type_ptr` if it is one of the builtin types. Unlike
    /// [`Self::type_name`] this never reads through the pointer.
    pub fn known_type_name(&self, type_ptr: u64) -> Option<&'static str> {
        if type_ptr == 0 {
            return None;
        }
        KNOWN_TYPES.iter().copied().find(|name| self.type_address(name) == Some(type_ptr))
    }

    /// Human name of a type object.
    pub fn type_name(&self, type_ptr: u64) -> Option<String> {
        if let Some(name) = self.known_type_name(type_ptr) {
            return Some(name.to_string());
        }
        if type_ptr == 0 {
            return None;
        }
        let qstr = self.read_field(type_ptr, TYPE_TYPE, "name").ok()?;
        self.qstr(qstr)
    }

    /// Name of the type of the object at `obj`.
    pub fn object_type_name(&self, obj: u64) -> Option<String> {
        self.object_type(obj).ok().and_then(|type_ptr| self.type_name(type_ptr))
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::target::SnapshotBuilder;

    #[test]
    fn test_known_types_are_unique() {
        assert_eq!(KNOWN_TYPES.iter().duplicates().count(), 0);
    }

    #[test]
    fn test_builtin_type_by_address() {
        let target = SnapshotBuilder::new(4)
            .symbol("mp_type_list", 0x1000)
            .symbol("mp_type_dict", 0x1040)
            .word(0x2000, 0x1040)
            .build();
        let ctx = InspectContext::new(target);

        assert_eq!(ctx.type_address("list"), Some(0x1000));
        assert_eq!(ctx.type_address("float"), None);
        assert_eq!(ctx.object_type_name(0x2000).as_deref(), Some("dict"));
        assert!(ctx.is_type(0x1040, "dict"));
        assert!(!ctx.is_type(0, "dict"));
        assert_eq!(ctx.type_name(0), None);
    }
}
