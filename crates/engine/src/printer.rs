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

//! Object pretty-printer used by `obj`, `state`, `dis` and frame labels.

use crate::{
    bytecode::BytecodeFunction, settings::MapDisplay, Immediate, InspectContext, TaggedValue,
    Target, TargetError,
};

/// Nesting depth below which containers are shown by address only.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Most elements shown per container.
pub const DEFAULT_MAX_ITEMS: usize = 32;

/// Most map slots scanned per dict.
pub const MAX_MAP_SLOTS: u64 = 4096;

/// Most bytes shown per string.
pub const MAX_STR_BYTES: usize = 256;

/// Renders `mp_obj_t` words for humans.
#[derive(Debug)]
pub struct ObjPrinter<'a, T> {
    ctx: &'a InspectContext<T>,
    max_depth: usize,
    max_items: usize,
}

impl<'a, T: Target> ObjPrinter<'a, T> {
    /// Printer with the default limits.
    pub fn new(ctx: &'a InspectContext<T>) -> Self {
        Self { ctx, max_depth: DEFAULT_MAX_DEPTH, max_items: DEFAULT_MAX_ITEMS }
    }

    /// Change the nesting limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Change the per-container element limit.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Render one word.
    pub fn format(&self, word: u64) -> String {
        self.render(word, 0)
    }

    fn render(&self, word: u64, depth: usize) -> String {
        match self.ctx.classify(word) {
            TaggedValue::SmallInt(n) => n.to_string(),
            TaggedValue::Qstr(id) => match self.ctx.qstr(id) {
                Some(text) => quote_str(&text),
                None => format!("qstr({id})"),
            },
            TaggedValue::Immediate(imm) => imm.to_string(),
            TaggedValue::Float(value) => format_float(value),
            TaggedValue::HeapPointer(address) => self.render_object(address, depth),
        }
    }

    fn render_object(&self, address: u64, depth: usize) -> String {
        let ctx = self.ctx;
        let Ok(type_ptr) = ctx.object_type(address) else {
            return format!("<unreadable object at {address:#x}>");
        };
        let type_name = ctx.type_name(type_ptr);
        let opaque = || format!("object({address:#x}) {}", type_name.as_deref().unwrap_or("?"));

        let rendered = match type_name.as_deref() {
            Some("str") => self.render_str(address).map(|text| quote_str(&text)),
            Some("bytes") => self.render_bytes(address),
            Some("float") => self.render_boxed_float(address),
            Some("fun_bc") => Ok(self.render_function(address)),
            Some("type") => {
                Ok(format!("<class '{}'>", ctx.type_name(address).as_deref().unwrap_or("?")))
            }
            Some(_) if depth >= self.max_depth => return opaque(),
            Some("dict" | "ordereddict") => self.render_dict(address, depth),
            Some("list") => self.render_list(address, depth),
            Some("tuple") => self.render_tuple(address, depth),
            _ => return opaque(),
        };
        rendered.unwrap_or_else(|_| opaque())
    }

    fn render_items(&self, words: &[u64], total: u64, depth: usize) -> String {
        let mut parts: Vec<String> = words.iter().map(|word| self.render(*word, depth + 1)).collect();
        if total > words.len() as u64 {
            parts.push("...".to_string());
        }
        parts.join(", ")
    }

    fn render_list(&self, address: u64, depth: usize) -> Result<String, TargetError> {
        let len = self.ctx.read_field(address, "mp_obj_list_t", "len")?;
        let items = self.ctx.read_field(address, "mp_obj_list_t", "items")?;
        let shown = len.min(self.max_items as u64) as usize;
        let words = self.ctx.read_words(items, shown)?;
        Ok(format!("[{}]", self.render_items(&words, len, depth)))
    }

    fn render_tuple(&self, address: u64, depth: usize) -> Result<String, TargetError> {
        let len = self.ctx.read_field(address, "mp_obj_tuple_t", "len")?;
        let items = self.ctx.field_ref(address, "mp_obj_tuple_t", "items")?.address;
        let shown = len.min(self.max_items as u64) as usize;
        let words = self.ctx.read_words(items, shown)?;
        let body = self.render_items(&words, len, depth);
        Ok(if len == 1 { format!("({body},)") } else { format!("({body})") })
    }

    fn render_dict(&self, address: u64, depth: usize) -> Result<String, TargetError> {
        let map = self.ctx.field_ref(address, "mp_obj_dict_t", "map")?.address;
        let alloc = self.ctx.read_field(map, "mp_map_t", "alloc")?.min(MAX_MAP_SLOTS);
        let table = self.ctx.read_field(map, "mp_map_t", "table")?;
        let slots = self.ctx.read_words(table, 2 * alloc as usize)?;
        let show_all = self.ctx.settings().map_display == MapDisplay::All;

        let mut parts = Vec::new();
        for slot in slots.chunks_exact(2) {
            let (key, value) = (slot[0], slot[1]);
            let key_class = self.ctx.classify(key);
            if key_class.is_empty_slot() && !show_all {
                continue;
            }
            if parts.len() == self.max_items {
                parts.push("...".to_string());
                break;
            }
            parts.push(match key_class {
                TaggedValue::Immediate(Immediate::Null) => "[null]".to_string(),
                TaggedValue::Immediate(Immediate::Sentinel) => "[sentinel]".to_string(),
                _ => format!("{}: {}", self.render(key, depth + 1), self.render(value, depth + 1)),
            });
        }
        Ok(format!("dict: {{{}}}", parts.join(", ")))
    }

    fn str_bytes(&self, address: u64) -> Result<(Vec<u8>, u64), TargetError> {
        let len = self.ctx.read_field(address, "mp_obj_str_t", "len")?;
        let data = self.ctx.read_field(address, "mp_obj_str_t", "data")?;
        let shown = (len as usize).min(MAX_STR_BYTES);
        Ok((self.ctx.read_bytes(data, shown)?, len))
    }

    fn render_str(&self, address: u64) -> Result<String, TargetError> {
        let (bytes, len) = self.str_bytes(address)?;
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if len > bytes.len() as u64 {
            text.push_str("...");
        }
        Ok(text)
    }

    fn render_bytes(&self, address: u64) -> Result<String, TargetError> {
        let (bytes, len) = self.str_bytes(address)?;
        let escaped: String = bytes.iter().flat_map(|b| std::ascii::escape_default(*b)).map(char::from).collect();
        let more = if len > bytes.len() as u64 { "..." } else { "" };
        Ok(format!("b'{escaped}{more}'"))
    }

    fn render_boxed_float(&self, address: u64) -> Result<String, TargetError> {
        let field = self.ctx.field_ref(address, "mp_obj_float_t", "value")?;
        let value = if field.layout.size == 4 {
            f64::from(f32::from_bits(self.ctx.read_uint(field.address, 4)? as u32))
        } else {
            f64::from_bits(self.ctx.read_uint(field.address, 8)?)
        };
        Ok(format_float(value))
    }

    fn render_function(&self, address: u64) -> String {
        let name = BytecodeFunction::read(self.ctx, address)
            .ok()
            .and_then(|function| function.name(self.ctx))
            .unwrap_or_else(|| "?".to_string());
        format!("<function {name} at {address:#x}>")
    }
}

/// Python-style repr of a float.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}inf")
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Single-quoted, backslash-escaped string.
fn quote_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

impl<T: Target> InspectContext<T> {
    /// Render a word with the default printer.
    pub fn format_value(&self, word: u64) -> String {
        ObjPrinter::new(self).format(word)
    }
}
