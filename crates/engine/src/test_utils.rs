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

//! Synthetic MicroPython memory images for tests.
//!
//! [`ImageBuilder`] lays out interpreter state, qstr pools, one GC heap area
//! and objects the way a stock build does, on top of [`SnapshotBuilder`].
//! Offsets come from the built-in standard layouts, so the images read back
//! through the normal decoding paths.
//!
//! Fixture code: malformed requests (unknown fields, a full heap) panic.

use std::collections::HashMap;

use crate::{
    bytecode::{FunctionSignature, LineEntry, LineTable, PreludeCounts},
    context::{STATE_SYMBOL, STATE_TYPE},
    gc::{BlockKind, ALLOC_TABLE, FINALISER_TABLE, WORDS_PER_BLOCK},
    graph::THREAD_LIST_SYMBOL,
    target::{
        standard_layout, FieldKind, FieldLayout, FrameSnapshot, SnapshotBuilder, SnapshotFile, SnapshotTarget,
        Word,
    },
    Immediate, InspectContext, ObjRepr, TaggedValue,
};

/// Start of read-only data: type objects, bytecode, strings, tables.
pub const STATIC_BASE: u64 = 0x0800_0000;
/// Address of `mp_state_ctx`.
pub const STATE_BASE: u64 = 0x2000_0000;
/// First byte of the GC pool.
pub const HEAP_BASE: u64 = 0x2000_1000;
/// Lowest address of the native stack.
pub const STACK_BASE: u64 = 0x2000_8000;
/// Blocks in the GC pool.
pub const DEFAULT_HEAP_BLOCKS: usize = 256;

/// Bytecode function to lay out with [`ImageBuilder::function`].
#[derive(Debug, Clone, Default)]
pub struct FunctionSpec {
    /// Function name
    pub name: String,
    /// Source file
    pub file: String,
    /// Positional argument names
    pub args: Vec<String>,
    /// Value stack size
    pub n_state: u64,
    /// Line table
    pub lines: Vec<LineEntry>,
    /// Instructions following the prelude
    pub code: Vec<u8>,
    /// Extra module qstrs, after the file, the name and the arguments
    pub qstrs: Vec<String>,
    /// Module constant table
    pub consts: Vec<u64>,
}

impl FunctionSpec {
    /// A function without arguments.
    pub fn new(name: &str, file: &str) -> Self {
        Self { name: name.into(), file: file.into(), n_state: 2, ..Default::default() }
    }

    /// Set the positional arguments.
    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self.n_state = self.n_state.max(args.len() as u64 + 1);
        self
    }

    /// Set the value stack size.
    pub fn n_state(mut self, n_state: u64) -> Self {
        self.n_state = n_state;
        self
    }

    /// Append a line-table entry.
    pub fn line(mut self, line_delta: u32, bytecode_delta: u32) -> Self {
        self.lines.push(LineEntry::new(line_delta, bytecode_delta));
        self
    }

    /// Set the instructions.
    pub fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    /// Append module qstrs referenced by the instructions.
    pub fn qstrs(mut self, qstrs: &[&str]) -> Self {
        self.qstrs.extend(qstrs.iter().map(|q| q.to_string()));
        self
    }

    /// Set the module constant table.
    pub fn consts(mut self, consts: &[u64]) -> Self {
        self.consts = consts.to_vec();
        self
    }

    /// Index of `qstr` in the module qstr table.
    pub fn qstr_index(&self, qstr: &str) -> Option<u64> {
        let base = 2 + self.args.len();
        self.qstrs.iter().position(|q| q == qstr).map(|i| (base + i) as u64)
    }
}

/// Where [`ImageBuilder::function`] put a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    /// The `mp_obj_fun_bc_t`
    pub fun_bc: u64,
    /// Start of the prelude
    pub bytecode: u64,
    /// Offset of the first instruction from `bytecode`
    pub code_offset: u64,
}

impl FunctionInfo {
    /// Instruction pointer `offset` bytes into the instructions.
    pub fn ip(&self, offset: u64) -> u64 {
        self.bytecode + self.code_offset + offset
    }
}

/// Builds a memory image of a stock MicroPython build.
#[derive(Debug)]
pub struct ImageBuilder {
    snapshot: SnapshotBuilder,
    word_size: usize,
    repr: ObjRepr,
    next_static: u64,
    qstrs: Vec<String>,
    pool_starts: Vec<usize>,
    symbols: HashMap<String, u64>,
    kinds: Vec<BlockKind>,
    finalisers: Vec<bool>,
    next_block: usize,
    frames: Vec<FrameSnapshot>,
    thread_head: Option<u64>,
}

impl ImageBuilder {
    /// An image with empty state, one empty qstr pool and an empty heap.
    pub fn new(word_size: usize) -> Self {
        let snapshot = SnapshotBuilder::new(word_size).typed_symbol(STATE_SYMBOL, STATE_BASE, STATE_TYPE);
        let mut image = Self {
            snapshot,
            word_size,
            repr: ObjRepr::A,
            next_static: STATIC_BASE,
            qstrs: Vec::new(),
            pool_starts: vec![0],
            symbols: HashMap::new(),
            kinds: vec![BlockKind::Free; DEFAULT_HEAP_BLOCKS],
            finalisers: vec![false; DEFAULT_HEAP_BLOCKS],
            next_block: 0,
            frames: Vec::new(),
            thread_head: None,
        };

        let state_size = image.layout_size(STATE_TYPE);
        image.snapshot.put_bytes(STATE_BASE, &vec![0; state_size as usize]);
        let pool_size = DEFAULT_HEAP_BLOCKS as u64 * image.block_size();
        image.snapshot.put_bytes(HEAP_BASE, &vec![0; pool_size as usize]);
        image.set_repr(ObjRepr::A);
        image.type_object("type");
        image
    }

    /// Use another object representation.
    pub fn with_repr(mut self, repr: ObjRepr) -> Self {
        self.set_repr(repr);
        self
    }

    /// Apply a raw [`SnapshotBuilder`] edit (constants, symbols, canned calls).
    pub fn with(mut self, edit: impl FnOnce(SnapshotBuilder) -> SnapshotBuilder) -> Self {
        self.edit(edit);
        self
    }

    fn edit(&mut self, edit: impl FnOnce(SnapshotBuilder) -> SnapshotBuilder) {
        let snapshot = std::mem::replace(&mut self.snapshot, SnapshotBuilder::new(self.word_size));
        self.snapshot = edit(snapshot);
    }

    fn set_repr(&mut self, repr: ObjRepr) {
        self.repr = repr;
        self.edit(|mut snapshot| {
            for scheme in ObjRepr::ALL {
                snapshot = snapshot.constant(scheme.constant_name(), scheme.default_constant());
            }
            snapshot.constant("MICROPY_OBJ_REPR", repr.default_constant())
        });
    }

    /// Pointer width.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Bytes per GC block.
    pub fn block_size(&self) -> u64 {
        (WORDS_PER_BLOCK * self.word_size) as u64
    }

    fn layout_size(&self, type_name: &str) -> u64 {
        standard_layout(type_name, self.word_size)
            .unwrap_or_else(|| panic!("no standard layout for {type_name}"))
            .size
    }

    /// Offset and layout of a dotted member path.
    pub fn locate(&self, type_name: &str, path: &str) -> (u64, FieldLayout) {
        let mut offset = 0;
        let mut current = type_name.to_string();
        let mut found = None;
        for part in path.split('.') {
            let layout = standard_layout(&current, self.word_size)
                .unwrap_or_else(|| panic!("no standard layout for {current}"));
            let field = layout
                .field(part)
                .unwrap_or_else(|| panic!("{current} has no field {part}"))
                .clone();
            offset += field.offset;
            if let FieldKind::Struct { type_name } = &field.kind {
                current = type_name.clone();
            }
            found = Some(field);
        }
        (offset, found.unwrap_or_else(|| panic!("empty path into {type_name}")))
    }

    /// Store `value` into a scalar or pointer member of the struct at `base`.
    pub fn set_field(&mut self, base: u64, type_name: &str, path: &str, value: u64) {
        let (offset, field) = self.locate(type_name, path);
        let size = (field.size as usize).clamp(1, 8);
        self.snapshot.put_uint(base + offset, value, size);
    }

    /// Store `value` into a member of `mp_state_ctx`, e.g. `thread.dict_locals`.
    pub fn set_state(&mut self, path: &str, value: u64) {
        self.set_field(STATE_BASE, STATE_TYPE, path, value);
    }

    /// Address of a member of `mp_state_ctx`.
    pub fn state_address(&self, path: &str) -> u64 {
        STATE_BASE + self.locate(STATE_TYPE, path).0
    }

    /// Write one word.
    pub fn put_word(&mut self, address: u64, value: u64) {
        self.snapshot.put_word(address, value);
    }

    /// Write consecutive words.
    pub fn put_words(&mut self, address: u64, values: &[u64]) {
        for (i, value) in values.iter().enumerate() {
            self.put_word(address + (i * self.word_size) as u64, *value);
        }
    }

    /// Zeroed static storage.
    pub fn alloc_static(&mut self, bytes: u64) -> u64 {
        let address = self.next_static;
        self.snapshot.put_bytes(address, &vec![0; bytes as usize]);
        self.next_static = (address + bytes.max(1)).next_multiple_of(8);
        address
    }

    /// A NUL-terminated string in static storage.
    pub fn static_str(&mut self, text: &str) -> u64 {
        let address = self.alloc_static(text.len() as u64 + 1);
        self.snapshot.put_bytes(address, text.as_bytes());
        address
    }

    /// Address of a native function or global, allocated on first use.
    pub fn symbol(&mut self, name: &str) -> u64 {
        if let Some(address) = self.symbols.get(name) {
            return *address;
        }
        let address = self.alloc_static(self.word_size as u64);
        self.symbols.insert(name.to_string(), address);
        self.edit(|s| s.symbol(name, address));
        address
    }

    /// Canned output of the inferior function `name`.
    pub fn call_output(&mut self, name: &str, output: &str) {
        self.symbol(name);
        self.edit(|s| s.call_output(name, output));
    }

    // ----- values -----

    /// Encoded small int.
    pub fn small_int(&self, n: i64) -> u64 {
        self.encode(TaggedValue::SmallInt(n))
    }

    /// Encoded immediate.
    pub fn immediate(&self, imm: Immediate) -> u64 {
        self.encode(TaggedValue::Immediate(imm))
    }

    fn encode(&self, value: TaggedValue) -> u64 {
        self.repr
            .encode(&value, self.word_size)
            .unwrap_or_else(|| panic!("{value:?} is not representable in {}", self.repr))
    }

    // ----- qstrs -----

    /// Intern `text`, returning its id.
    pub fn qstr(&mut self, text: &str) -> u64 {
        match self.qstr_id(text) {
            Some(id) => id,
            None => {
                self.qstrs.push(text.to_string());
                self.qstrs.len() as u64 - 1
            }
        }
    }

    /// Id of an already interned string.
    pub fn qstr_id(&self, text: &str) -> Option<u64> {
        self.qstrs.iter().position(|q| q == text).map(|id| id as u64)
    }

    /// Interned string as an object.
    pub fn qstr_obj(&mut self, text: &str) -> u64 {
        let id = self.qstr(text);
        self.encode(TaggedValue::Qstr(id))
    }

    /// Start a new qstr pool; later strings land in it.
    pub fn new_pool(&mut self) {
        if self.pool_starts.last() != Some(&self.qstrs.len()) {
            self.pool_starts.push(self.qstrs.len());
        }
    }

    // ----- heap -----

    /// Allocate a zeroed object of at least `bytes` bytes on the GC heap.
    pub fn alloc(&mut self, bytes: u64) -> u64 {
        let blocks = (bytes.div_ceil(self.block_size()) as usize).max(1);
        let head = self.next_block;
        assert!(head + blocks <= self.kinds.len(), "synthetic heap is full");
        self.kinds[head] = BlockKind::Head;
        for kind in &mut self.kinds[head + 1..head + blocks] {
            *kind = BlockKind::Tail;
        }
        self.next_block += blocks;
        HEAP_BASE + head as u64 * self.block_size()
    }

    /// Leave `blocks` free blocks before the next allocation.
    pub fn skip_blocks(&mut self, blocks: usize) {
        self.next_block += blocks;
    }

    fn block(&self, address: u64) -> usize {
        ((address - HEAP_BASE) / self.block_size()) as usize
    }

    /// Mark the object at `address` reachable.
    pub fn mark(&mut self, address: u64) {
        let block = self.block(address);
        self.kinds[block] = BlockKind::Mark;
    }

    /// Register a finaliser for the object at `address`.
    pub fn finaliser(&mut self, address: u64) {
        let block = self.block(address);
        self.finalisers[block] = true;
    }

    // ----- objects -----

    /// Builtin `mp_type_<name>`, created on first use.
    pub fn type_object(&mut self, name: &str) -> u64 {
        let symbol = format!("mp_type_{name}");
        if let Some(address) = self.symbols.get(&symbol) {
            return *address;
        }
        let address = self.alloc_static(self.layout_size("mp_obj_type_t"));
        self.symbols.insert(symbol.clone(), address);
        self.edit(|s| s.symbol(&symbol, address));

        let meta = if name == "type" { address } else { self.type_object("type") };
        let id = self.qstr(name);
        self.set_field(address, "mp_obj_type_t", "base.type", meta);
        self.set_field(address, "mp_obj_type_t", "name", id);
        address
    }

    /// A heap object of `type_name` whose header is followed by `words`.
    pub fn object(&mut self, type_name: &str, words: &[u64]) -> u64 {
        let ty = self.type_object(type_name);
        let address = self.alloc((words.len() as u64 + 1) * self.word_size as u64);
        self.put_word(address, ty);
        self.put_words(address + self.word_size as u64, words);
        address
    }

    fn str_like(&mut self, type_name: &str, data: &[u8]) -> u64 {
        let buffer = self.alloc_static(data.len() as u64 + 1);
        self.snapshot.put_bytes(buffer, data);
        let ty = self.type_object(type_name);
        let address = self.alloc(self.layout_size("mp_obj_str_t"));
        self.set_field(address, "mp_obj_str_t", "base.type", ty);
        self.set_field(address, "mp_obj_str_t", "len", data.len() as u64);
        self.set_field(address, "mp_obj_str_t", "data", buffer);
        address
    }

    /// A `str` object.
    pub fn str_obj(&mut self, text: &str) -> u64 {
        self.str_like("str", text.as_bytes())
    }

    /// A `bytes` object.
    pub fn bytes_obj(&mut self, data: &[u8]) -> u64 {
        self.str_like("bytes", data)
    }

    /// A boxed `float` object.
    pub fn float_obj(&mut self, value: f64) -> u64 {
        let ty = self.type_object("float");
        let address = self.alloc(self.layout_size("mp_obj_float_t"));
        self.set_field(address, "mp_obj_float_t", "base.type", ty);
        self.set_field(address, "mp_obj_float_t", "value", value.to_bits());
        address
    }

    /// A `list` whose item array is a separate heap object.
    pub fn list(&mut self, items: &[u64]) -> u64 {
        let ty = self.type_object("list");
        let array = self.alloc((items.len() as u64).max(1) * self.word_size as u64);
        self.put_words(array, items);
        let address = self.alloc(self.layout_size("mp_obj_list_t"));
        self.set_field(address, "mp_obj_list_t", "base.type", ty);
        self.set_field(address, "mp_obj_list_t", "alloc", items.len() as u64);
        self.set_field(address, "mp_obj_list_t", "len", items.len() as u64);
        self.set_field(address, "mp_obj_list_t", "items", array);
        address
    }

    /// A `tuple` with inline items.
    pub fn tuple(&mut self, items: &[u64]) -> u64 {
        let len = items.len() as u64;
        let mut words = vec![len];
        words.extend_from_slice(items);
        self.object("tuple", &words)
    }

    /// A `dict` on the heap. `slots` is the raw table: use `(0, 0)` for an
    /// empty slot and `(8, 0)` (`MP_OBJ_SENTINEL`) for a deleted one.
    pub fn dict(&mut self, slots: &[(u64, u64)]) -> u64 {
        let address = self.alloc(self.layout_size("mp_obj_dict_t"));
        self.dict_at(address, slots);
        address
    }

    /// Write a `dict` into existing storage, e.g. `vm.dict_main`.
    pub fn dict_at(&mut self, address: u64, slots: &[(u64, u64)]) {
        let ty = self.type_object("dict");
        let table = self.alloc((slots.len() as u64 * 2).max(1) * self.word_size as u64);
        for (i, (key, value)) in slots.iter().enumerate() {
            self.put_words(table + (2 * i * self.word_size) as u64, &[*key, *value]);
        }
        let used = slots.iter().filter(|(key, _)| *key != 0 && *key != 8).count() as u64;

        self.set_field(address, "mp_obj_dict_t", "base.type", ty);
        // `used` shares its word with three flag bits.
        let (offset, _) = self.locate("mp_obj_dict_t", "map.used");
        self.snapshot.put_uint(address + offset, used << 3, self.word_size);
        self.set_field(address, "mp_obj_dict_t", "map.alloc", slots.len() as u64);
        self.set_field(address, "mp_obj_dict_t", "map.table", table);
    }

    // ----- code -----

    /// Lay out a bytecode function: module tables in static storage, the
    /// function object on the heap.
    pub fn function(&mut self, spec: &FunctionSpec) -> FunctionInfo {
        let names = [spec.file.as_str(), spec.name.as_str()]
            .into_iter()
            .chain(spec.args.iter().map(String::as_str))
            .chain(spec.qstrs.iter().map(String::as_str))
            .collect::<Vec<_>>();
        let qstr_table = self.alloc_static(2 * names.len() as u64);
        for (i, name) in names.iter().enumerate() {
            let id = self.qstr(name);
            self.snapshot.put_uint(qstr_table + 2 * i as u64, id, 2);
        }
        let obj_table = self.alloc_static((spec.consts.len() * self.word_size) as u64);
        self.put_words(obj_table, &spec.consts);

        let counts = PreludeCounts {
            n_state: spec.n_state,
            n_exc_stack: 0,
            scope_flags: 0,
            n_pos_args: spec.args.len() as u64,
            n_kwonly_args: 0,
            n_def_pos_args: 0,
        };
        let args = (0..spec.args.len() as u64).map(|i| i + 2).collect::<Vec<_>>();
        let mut bytes = Vec::new();
        FunctionSignature::encode(&counts, 0, 1, &args, &LineTable::new(spec.lines.clone()), &mut bytes)
            .unwrap_or_else(|err| panic!("cannot encode prelude of {}: {err}", spec.name));
        let code_offset = bytes.len() as u64;
        bytes.extend_from_slice(&spec.code);
        let bytecode = self.alloc_static(bytes.len() as u64);
        self.snapshot.put_bytes(bytecode, &bytes);

        let module_type = self.type_object("module");
        let context = self.alloc_static(self.layout_size("mp_module_context_t"));
        self.set_field(context, "mp_module_context_t", "module.base.type", module_type);
        self.set_field(context, "mp_module_context_t", "constants.qstr_table", qstr_table);
        self.set_field(context, "mp_module_context_t", "constants.obj_table", obj_table);

        let fun_type = self.type_object("fun_bc");
        let fun_bc = self.alloc(self.layout_size("mp_obj_fun_bc_t"));
        self.set_field(fun_bc, "mp_obj_fun_bc_t", "base.type", fun_type);
        self.set_field(fun_bc, "mp_obj_fun_bc_t", "context", context);
        self.set_field(fun_bc, "mp_obj_fun_bc_t", "bytecode", bytecode);

        FunctionInfo { fun_bc, bytecode, code_offset }
    }

    /// An interpreter frame running `function` at instruction offset
    /// `ip_offset`, with `args` in the top value-stack slots.
    pub fn code_state(
        &mut self,
        function: &FunctionInfo,
        n_state: u64,
        ip_offset: u64,
        args: &[u64],
    ) -> u64 {
        let (state_offset, _) = self.locate("mp_code_state_t", "state");
        let address = self.alloc_static(state_offset + n_state * self.word_size as u64);
        let state = address + state_offset;
        self.set_field(address, "mp_code_state_t", "fun_bc", function.fun_bc);
        self.set_field(address, "mp_code_state_t", "ip", function.ip(ip_offset));
        self.set_field(address, "mp_code_state_t", "sp", state);
        self.set_field(address, "mp_code_state_t", "n_state", n_state);
        for (i, arg) in args.iter().enumerate() {
            let slot = n_state - 1 - i as u64;
            self.put_word(state + slot * self.word_size as u64, *arg);
        }
        address
    }

    // ----- native context -----

    /// Append a native frame (innermost first).
    pub fn native_frame(&mut self, function: &str, sp: u64, locals: &[(&str, u64)]) {
        let pc = self.symbol(function);
        self.frames.push(FrameSnapshot {
            function: Some(function.to_string()),
            pc,
            sp,
            locals: locals.iter().map(|(name, value)| (name.to_string(), Word(*value))).collect(),
            ..Default::default()
        });
    }

    /// Append the three native frames of one interpreted call.
    pub fn python_call(&mut self, code_state: u64, sp: u64) {
        self.native_frame("mp_execute_bytecode", sp, &[("code_state", code_state)]);
        self.native_frame("fun_bc_call", sp + 0x40, &[]);
        self.native_frame("mp_call_function_n_kw", sp + 0x80, &[]);
    }

    /// Set registers of the innermost frame.
    pub fn registers(&mut self, registers: &[(&str, u64)]) {
        if let Some(frame) = self.frames.first_mut() {
            frame.registers.extend(registers.iter().map(|(name, value)| (name.to_string(), Word(*value))));
        }
    }

    /// Lay out the native stack from [`STACK_BASE`] up and point
    /// `thread.stack_top` past it. Returns the lowest slot address.
    pub fn stack(&mut self, words: &[u64]) -> u64 {
        self.put_words(STACK_BASE, words);
        self.set_state("thread.stack_top", STACK_BASE + (words.len() * self.word_size) as u64);
        STACK_BASE
    }

    /// Prepend a worker thread to the port's thread list.
    pub fn worker_thread(&mut self, id: u64, arg: u64) -> u64 {
        let list = self.symbol(THREAD_LIST_SYMBOL);
        let address = self.alloc_static(self.layout_size("mp_thread_t"));
        let head = self.thread_head.unwrap_or(0);
        self.set_field(address, "mp_thread_t", "id", id);
        self.set_field(address, "mp_thread_t", "arg", arg);
        self.set_field(address, "mp_thread_t", "next", head);
        self.put_word(list, address);
        self.thread_head = Some(address);
        address
    }

    // ----- output -----

    /// Write pools, heap metadata and frames; return the raw builder.
    pub fn finish(mut self) -> SnapshotBuilder {
        self.write_pools();
        self.write_heap();
        let frames = std::mem::take(&mut self.frames);
        self.edit(|mut snapshot| {
            for frame in frames {
                snapshot = snapshot.frame(frame);
            }
            snapshot
        });
        self.snapshot
    }

    /// The serializable snapshot.
    pub fn into_file(self) -> SnapshotFile {
        self.finish().into_file()
    }

    /// A ready target.
    pub fn build(self) -> SnapshotTarget {
        self.finish().build()
    }

    /// A session on the finished image.
    pub fn context(self) -> InspectContext<SnapshotTarget> {
        InspectContext::new(self.build())
    }

    fn write_pools(&mut self) {
        let (qstrs_offset, _) = self.locate("qstr_pool_t", "qstrs");
        let mut bounds = self.pool_starts.clone();
        bounds.push(self.qstrs.len());

        let mut prev = 0;
        for range in bounds.windows(2) {
            let (start, end) = (range[0], range[1]);
            let len = (end - start) as u64;
            let pool = self.alloc_static(qstrs_offset + len * self.word_size as u64);
            self.set_field(pool, "qstr_pool_t", "prev", prev);
            self.set_field(pool, "qstr_pool_t", "total_prev_len", start as u64);
            self.set_field(pool, "qstr_pool_t", "alloc", len);
            self.set_field(pool, "qstr_pool_t", "len", len);
            for (i, text) in self.qstrs[start..end].to_vec().iter().enumerate() {
                let data = self.static_str(text);
                self.put_word(pool + qstrs_offset + (i * self.word_size) as u64, data);
            }
            prev = pool;
        }
        self.set_state("vm.last_pool", prev);
    }

    fn write_heap(&mut self) {
        let blocks = self.kinds.len();
        let atb = self.alloc_static(blocks.div_ceil(ALLOC_TABLE.blocks_per_byte()) as u64);
        let ftb = self.alloc_static(blocks.div_ceil(FINALISER_TABLE.blocks_per_byte()) as u64);

        let mut atb_bytes = vec![0u8; blocks.div_ceil(ALLOC_TABLE.blocks_per_byte())];
        let mut ftb_bytes = vec![0u8; blocks.div_ceil(FINALISER_TABLE.blocks_per_byte())];
        for (block, kind) in self.kinds.iter().enumerate() {
            ALLOC_TABLE.store(&mut atb_bytes, block, kind.bits());
            FINALISER_TABLE.store(&mut ftb_bytes, block, u8::from(self.finalisers[block]));
        }
        self.snapshot.put_bytes(atb, &atb_bytes);
        self.snapshot.put_bytes(ftb, &ftb_bytes);

        let pool_end = HEAP_BASE + blocks as u64 * self.block_size();
        self.set_state("mem.area.gc_alloc_table_start", atb);
        self.set_state("mem.area.gc_alloc_table_byte_len", atb_bytes.len() as u64);
        self.set_state("mem.area.gc_finaliser_table_start", ftb);
        self.set_state("mem.area.gc_pool_start", HEAP_BASE);
        self.set_state("mem.area.gc_pool_end", pool_end);
        self.set_state("mem.area.next", 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gc::Heap, qstr::QstrTable};

    #[test]
    fn test_image_reads_back() {
        let mut image = ImageBuilder::new(4);
        let hello = image.str_obj("hello");
        let list = image.list(&[hello]);
        let ctx = image.context();

        assert_eq!(ctx.repr(), ObjRepr::A);
        assert_eq!(ctx.qstr(0).as_deref(), Some("type"));
        assert_eq!(ctx.object_type_name(list).as_deref(), Some("list"));

        let heap = Heap::read(&ctx).unwrap();
        assert_eq!(heap.regions().len(), 1);
        // string object, list item array, list object
        assert_eq!(heap.regions()[0].chains().count(), 3);
        assert_eq!(QstrTable::new(&ctx).pools().len(), 1);
    }
}
