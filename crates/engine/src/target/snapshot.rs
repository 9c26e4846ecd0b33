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

//! JSON snapshot of a MicroPython process.
//!
//! A snapshot holds exactly what the engine asks a host for: memory segments,
//! symbols, build constants, struct layouts, native frames and canned output
//! for inferior calls. Addresses may be written as JSON numbers or as `"0x…"`
//! strings; memory payloads are hex strings.

use std::{
    cell::Cell,
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{standard_layout, Endian, NativeFrame, StructLayout, Symbol, Target};
use crate::TargetError;

/// Serde adapter for addresses: numbers or `0x` strings in, `0x` strings out.
pub(crate) mod hex_u64 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub(crate) fn parse(text: &str) -> Option<u64> {
        let text = text.trim();
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(digits) => u64::from_str_radix(&digits.replace('_', ""), 16).ok(),
            None => text.replace('_', "").parse().ok(),
        }
    }

    pub(crate) fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{value:#x}"))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(text) => {
                parse(&text).ok_or_else(|| D::Error::custom(format!("invalid address {text:?}")))
            }
        }
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        let compact: String = text.split_whitespace().collect();
        hex::decode(compact.trim_start_matches("0x")).map_err(D::Error::custom)
    }
}

/// A word-sized value in a snapshot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Word(#[serde(with = "hex_u64")] pub u64);

/// One contiguous run of captured memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySegment {
    /// Start address
    #[serde(with = "hex_u64")]
    pub address: u64,
    /// Captured bytes
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

impl MemorySegment {
    fn end(&self) -> u64 {
        self.address + self.bytes.len() as u64
    }
}

/// One native frame in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    /// Native function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Program counter
    #[serde(with = "hex_u64")]
    pub pc: u64,
    /// Stack pointer
    #[serde(with = "hex_u64")]
    pub sp: u64,
    /// Registers by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registers: BTreeMap<String, Word>,
    /// Word-sized locals by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub locals: BTreeMap<String, Word>,
}

/// On-disk snapshot format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Pointer width in bytes
    pub word_size: usize,
    /// Byte order
    #[serde(default)]
    pub endian: Endian,
    /// Global symbols
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    /// Build-time constants
    #[serde(default)]
    pub constants: BTreeMap<String, i64>,
    /// Struct layouts overriding the built-in ones
    #[serde(default)]
    pub layouts: Vec<StructLayout>,
    /// Captured memory
    #[serde(default)]
    pub memory: Vec<MemorySegment>,
    /// Native frames, innermost first
    #[serde(default)]
    pub frames: Vec<FrameSnapshot>,
    /// Output of inferior functions by name, replayed by `call_function`
    #[serde(default)]
    pub calls: BTreeMap<String, String>,
}

/// A [`Target`] backed by a [`SnapshotFile`].
#[derive(Debug)]
pub struct SnapshotTarget {
    word_size: usize,
    endian: Endian,
    symbols: HashMap<String, Symbol>,
    constants: BTreeMap<String, i64>,
    layouts: HashMap<String, StructLayout>,
    memory: Vec<MemorySegment>,
    frames: Vec<NativeFrame>,
    calls: BTreeMap<String, String>,
    continues: Cell<usize>,
}

impl SnapshotTarget {
    /// Index a snapshot for lookups.
    pub fn new(file: SnapshotFile) -> Self {
        let mut memory = file.memory;
        memory.sort_by_key(|segment| segment.address);

        let frames = file
            .frames
            .into_iter()
            .enumerate()
            .map(|(level, frame)| NativeFrame {
                level,
                function: frame.function,
                pc: frame.pc,
                sp: frame.sp,
                registers: frame.registers.into_iter().map(|(name, Word(v))| (name, v)).collect(),
                locals: frame.locals.into_iter().map(|(name, Word(v))| (name, v)).collect(),
            })
            .collect();

        Self {
            word_size: file.word_size,
            endian: file.endian,
            symbols: file.symbols.into_iter().map(|s| (s.name.clone(), s)).collect(),
            constants: file.constants,
            layouts: file.layouts.into_iter().map(|l| (l.name.clone(), l)).collect(),
            memory,
            frames,
            calls: file.calls,
            continues: Cell::new(0),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read snapshot file: {}", path.display()))?;
        let file: SnapshotFile = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse snapshot file: {}", path.display()))?;
        debug!(
            path = %path.display(),
            segments = file.memory.len(),
            symbols = file.symbols.len(),
            "Loaded snapshot"
        );
        Ok(Self::new(file))
    }

    /// How many times a continue was requested.
    pub fn continue_requests(&self) -> usize {
        self.continues.get()
    }

    fn segment_at(&self, address: u64) -> Option<&MemorySegment> {
        let idx = self.memory.partition_point(|segment| segment.address <= address);
        let segment = self.memory.get(idx.checked_sub(1)?)?;
        (address < segment.end()).then_some(segment)
    }
}

impl Target for SnapshotTarget {
    fn word_size(&self) -> usize {
        self.word_size
    }

    fn endian(&self) -> Endian {
        self.endian
    }

    fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, TargetError> {
        let fault = || TargetError::UnreadableMemory { address, len };
        let end = address.checked_add(len as u64).ok_or_else(fault)?;

        let mut out = Vec::with_capacity(len);
        let mut cursor = address;
        while cursor < end {
            let segment = self.segment_at(cursor).ok_or_else(fault)?;
            let start = (cursor - segment.address) as usize;
            let stop = (end.min(segment.end()) - segment.address) as usize;
            out.extend_from_slice(&segment.bytes[start..stop]);
            cursor = segment.address + stop as u64;
        }
        trace!(address = %format!("{address:#x}"), len, "read memory");
        Ok(out)
    }

    fn lookup_symbol(&self, name: &str) -> Result<Symbol, TargetError> {
        self.symbols.get(name).cloned().ok_or_else(|| TargetError::MissingSymbol(name.to_string()))
    }

    fn lookup_constant(&self, name: &str) -> Result<i64, TargetError> {
        self.constants.get(name).copied().ok_or_else(|| TargetError::MissingConstant(name.to_string()))
    }

    fn struct_layout(&self, type_name: &str) -> Result<StructLayout, TargetError> {
        self.layouts
            .get(type_name)
            .cloned()
            .or_else(|| standard_layout(type_name, self.word_size))
            .ok_or_else(|| TargetError::MissingType(type_name.to_string()))
    }

    fn frames(&self) -> Result<Vec<NativeFrame>, TargetError> {
        if self.frames.is_empty() {
            return Err(TargetError::NoStack);
        }
        Ok(self.frames.clone())
    }

    fn call_function(&self, address: u64, _args: &[u64]) -> Result<String, TargetError> {
        let name = self
            .symbols
            .values()
            .find(|symbol| symbol.address == address)
            .map(|symbol| symbol.name.as_str())
            .ok_or(TargetError::Unsupported("calling unknown functions"))?;
        self.calls
            .get(name)
            .cloned()
            .ok_or(TargetError::Unsupported("calling inferior functions"))
    }

    fn request_continue(&self) -> Result<(), TargetError> {
        self.continues.set(self.continues.get() + 1);
        Ok(())
    }
}

/// Programmatic construction of snapshots.
///
/// Memory is collected byte by byte and coalesced into segments on
/// [`SnapshotBuilder::into_file`], so writes may overlap and come in any order.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    word_size: usize,
    endian: Endian,
    symbols: Vec<Symbol>,
    constants: BTreeMap<String, i64>,
    layouts: Vec<StructLayout>,
    bytes: BTreeMap<u64, u8>,
    frames: Vec<FrameSnapshot>,
    calls: BTreeMap<String, String>,
}

impl SnapshotBuilder {
    /// Start an empty little-endian image.
    pub fn new(word_size: usize) -> Self {
        Self {
            word_size,
            endian: Endian::Little,
            symbols: Vec::new(),
            constants: BTreeMap::new(),
            layouts: Vec::new(),
            bytes: BTreeMap::new(),
            frames: Vec::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Pointer width of the image.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Set the byte order.
    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Add an untyped symbol.
    pub fn symbol(mut self, name: &str, address: u64) -> Self {
        self.symbols.push(Symbol { name: name.to_string(), address, size: None, type_name: None });
        self
    }

    /// Add a symbol holding a struct.
    pub fn typed_symbol(mut self, name: &str, address: u64, type_name: &str) -> Self {
        self.symbols.push(Symbol {
            name: name.to_string(),
            address,
            size: None,
            type_name: Some(type_name.to_string()),
        });
        self
    }

    /// Add a build constant.
    pub fn constant(mut self, name: &str, value: i64) -> Self {
        self.constants.insert(name.to_string(), value);
        self
    }

    /// Override a struct layout.
    pub fn layout(mut self, layout: StructLayout) -> Self {
        self.layouts.push(layout);
        self
    }

    /// Write raw bytes.
    pub fn bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        self.put_bytes(address, bytes);
        self
    }

    /// Write a pointer-sized word.
    pub fn word(mut self, address: u64, value: u64) -> Self {
        self.put_word(address, value);
        self
    }

    /// Write consecutive words.
    pub fn words(mut self, address: u64, values: &[u64]) -> Self {
        for (i, value) in values.iter().enumerate() {
            self.put_word(address + (i * self.word_size) as u64, *value);
        }
        self
    }

    /// Write a NUL-terminated string.
    pub fn c_string(mut self, address: u64, text: &str) -> Self {
        self.put_bytes(address, text.as_bytes());
        self.put_bytes(address + text.len() as u64, &[0]);
        self
    }

    /// Write raw bytes in place.
    pub fn put_bytes(&mut self, address: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.bytes.insert(address + i as u64, *b);
        }
    }

    /// Write a little- or big-endian unsigned integer of `len` bytes in place.
    pub fn put_uint(&mut self, address: u64, value: u64, len: usize) {
        let encoded = self.endian.write_uint(value, len);
        self.put_bytes(address, &encoded);
    }

    /// Write a pointer-sized word in place.
    pub fn put_word(&mut self, address: u64, value: u64) {
        self.put_uint(address, value, self.word_size);
    }

    /// Add a native frame (innermost first).
    pub fn frame(mut self, frame: FrameSnapshot) -> Self {
        self.frames.push(frame);
        self
    }

    /// Canned output for an inferior function call.
    pub fn call_output(mut self, function: &str, output: &str) -> Self {
        self.calls.insert(function.to_string(), output.to_string());
        self
    }

    /// Produce the serializable snapshot.
    pub fn into_file(self) -> SnapshotFile {
        let mut memory: Vec<MemorySegment> = Vec::new();
        for (address, byte) in self.bytes {
            match memory.last_mut() {
                Some(segment) if segment.end() == address => segment.bytes.push(byte),
                _ => memory.push(MemorySegment { address, bytes: vec![byte] }),
            }
        }

        SnapshotFile {
            word_size: self.word_size,
            endian: self.endian,
            symbols: self.symbols,
            constants: self.constants,
            layouts: self.layouts,
            memory,
            frames: self.frames,
            calls: self.calls,
        }
    }

    /// Produce a ready-to-use target.
    pub fn build(self) -> SnapshotTarget {
        SnapshotTarget::new(self.into_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_span_adjacent_segments() {
        let target = SnapshotBuilder::new(4)
            .bytes(0x1000, &[1, 2, 3, 4])
            .bytes(0x1004, &[5, 6])
            .bytes(0x2000, &[9])
            .build();

        assert_eq!(target.read_memory(0x1002, 4).unwrap(), vec![3, 4, 5, 6]);
        assert!(matches!(
            target.read_memory(0x1004, 3),
            Err(TargetError::UnreadableMemory { address: 0x1004, len: 3 })
        ));
        assert!(target.read_memory(0x0fff, 1).is_err());
    }

    #[test]
    fn test_words_are_little_endian_by_default() {
        let target = SnapshotBuilder::new(4).word(0x100, 0xdead_beef).build();
        assert_eq!(target.read_memory(0x100, 4).unwrap(), vec![0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn test_json_roundtrip_accepts_numbers_and_hex() {
        let json = r#"{
            "word_size": 4,
            "symbols": [{"name": "mp_state_ctx", "address": "0x20000000", "type": "mp_state_ctx_t"}],
            "constants": {"MICROPY_OBJ_REPR": 0},
            "memory": [{"address": 4096, "bytes": "01020304"}],
            "frames": [{"function": "main", "pc": "0x8000", "sp": "0x2000fff0",
                        "registers": {"r0": "0x1"}, "locals": {"code_state": 8192}}],
            "calls": {"gc_dump_info": "GC: total: 0\n"}
        }"#;
        let file: SnapshotFile = serde_json::from_str(json).unwrap();
        let target = SnapshotTarget::new(file.clone());

        assert_eq!(target.lookup_symbol("mp_state_ctx").unwrap().address, 0x2000_0000);
        assert_eq!(target.lookup_constant("MICROPY_OBJ_REPR").unwrap(), 0);
        assert_eq!(target.read_memory(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);

        let frames = target.frames().unwrap();
        assert_eq!(frames[0].local("code_state").unwrap(), 0x2000);
        assert_eq!(frames[0].register("r0"), Some(1));

        let reparsed: SnapshotFile =
            serde_json::from_str(&serde_json::to_string(&file).unwrap()).unwrap();
        assert_eq!(reparsed, file);
    }

    #[test]
    fn test_layout_falls_back_to_builtin() {
        let target = SnapshotBuilder::new(8).build();
        let layout = target.struct_layout("qstr_pool_t").unwrap();
        assert_eq!(layout.field("qstrs").unwrap().offset, 48);
        assert!(matches!(target.struct_layout("nope_t"), Err(TargetError::MissingType(_))));
    }

    #[test]
    fn test_calls_replay_by_symbol() {
        let target = SnapshotBuilder::new(4)
            .symbol("gc_dump_info", 0x8000_1000)
            .call_output("gc_dump_info", "GC: total: 1024\n")
            .symbol("gc_dump_alloc_table", 0x8000_2000)
            .build();

        assert_eq!(target.call_function(0x8000_1000, &[]).unwrap(), "GC: total: 1024\n");
        assert!(matches!(
            target.call_function(0x8000_2000, &[]),
            Err(TargetError::Unsupported(_))
        ));
    }
}
