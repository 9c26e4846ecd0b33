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

//! MicroPython bytecode.
//!
//! A `mp_obj_fun_bc_t` points at a byte buffer holding the prelude
//! ([`prelude`]) followed by instructions ([`disasm`]). Names and constants
//! are indices into the tables of the function's module context.

pub mod disasm;
mod line_table;
pub mod opcode;
mod prelude;

pub use disasm::{disassemble, Disassembly, Instruction, Operand};
pub use line_table::{LineEntry, LineTable};
pub use prelude::{decode_prelude, FunctionSignature, PreludeCounts, PreludeSizes};
use tracing::debug;

use crate::{DecodeError, InspectContext, Target, TargetError};

/// Struct type of a bytecode function object.
pub const FUN_BC_TYPE: &str = "mp_obj_fun_bc_t";

/// Most bytes of a function body read from the target.
pub const MAX_BYTECODE_WINDOW: usize = 8192;

const WINDOW_CHUNK: usize = 256;

/// Width of a `qstr_short_t` entry in the module qstr table.
const QSTR_SHORT_SIZE: usize = 2;

/// Bytes in the longest encodable u64.
const MAX_VAR_UINT_BYTES: usize = 10;

/// Read a big-endian base-128 uint at `*pos` and advance past it.
pub fn read_var_uint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let start = *pos;
    let mut value = 0u64;
    for _ in 0..MAX_VAR_UINT_BYTES {
        let byte = *bytes.get(*pos).ok_or(DecodeError::TruncatedVarint(start))?;
        *pos += 1;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::OverlongVarint(start))
}

/// Append `value` as a big-endian base-128 uint.
pub fn write_var_uint(value: u64, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7f) as u8];
    let mut rest = value >> 7;
    while rest != 0 {
        groups.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    out.extend(groups.into_iter().rev());
}

/// A bytecode function read from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeFunction {
    /// The `mp_obj_fun_bc_t`
    pub address: u64,
    /// Start of the prelude
    pub bytecode: u64,
    /// Module qstr table (`qstr_short_t[]`), 0 if unknown
    pub qstr_table: u64,
    /// Module constant table (`mp_obj_t[]`), 0 if unknown
    pub obj_table: u64,
    /// Readable bytes from `bytecode` on
    pub code: Vec<u8>,
    /// Decoded prelude
    pub signature: FunctionSignature,
}

impl BytecodeFunction {
    /// Read the function object at `fun_bc` and its prelude.
    pub fn read<T: Target>(ctx: &InspectContext<T>, fun_bc: u64) -> Result<Self, TargetError> {
        let bytecode = ctx.read_field(fun_bc, FUN_BC_TYPE, "bytecode")?;
        let code = read_window(ctx, bytecode);
        if code.is_empty() {
            return Err(TargetError::UnreadableMemory { address: bytecode, len: 1 });
        }

        let (qstr_table, obj_table) = match ctx.read_field(fun_bc, FUN_BC_TYPE, "context") {
            Ok(context) if context != 0 => {
                let table = |name: &str| {
                    ctx.read_field(context, "mp_module_context_t", &format!("constants.{name}"))
                        .unwrap_or(0)
                };
                (table("qstr_table"), table("obj_table"))
            }
            Ok(_) => (0, 0),
            Err(err) => {
                ctx.warn_once("fun_bc.context", format!("cannot read function context: {err}"));
                (0, 0)
            }
        };

        let signature = decode_prelude(&code, 0);
        debug!(fun_bc = %format!("{fun_bc:#x}"), complete = signature.is_complete(), "read bytecode function");
        Ok(Self { address: fun_bc, bytecode, qstr_table, obj_table, code, signature })
    }

    /// Global qstr id stored at `index` of the module qstr table.
    pub fn qstr_id<T: Target>(&self, ctx: &InspectContext<T>, index: u64) -> Option<u64> {
        if self.qstr_table == 0 {
            return None;
        }
        ctx.read_uint(self.qstr_table + index * QSTR_SHORT_SIZE as u64, QSTR_SHORT_SIZE).ok()
    }

    /// Text of the qstr at `index` of the module qstr table.
    pub fn qstr<T: Target>(&self, ctx: &InspectContext<T>, index: u64) -> Option<String> {
        self.qstr_id(ctx, index).and_then(|id| ctx.qstr(id))
    }

    /// Function name.
    pub fn name<T: Target>(&self, ctx: &InspectContext<T>) -> Option<String> {
        self.signature.name.and_then(|index| self.qstr(ctx, index))
    }

    /// Argument names in declaration order; unresolvable ones are `None`.
    pub fn arg_names<T: Target>(&self, ctx: &InspectContext<T>) -> Vec<Option<String>> {
        self.signature.args.iter().map(|index| self.qstr(ctx, *index)).collect()
    }

    /// Source file, which is entry 0 of the module qstr table.
    pub fn source_file<T: Target>(&self, ctx: &InspectContext<T>) -> Option<String> {
        self.qstr(ctx, 0)
    }

    /// Entry `index` of the constant table.
    pub fn const_obj<T: Target>(&self, ctx: &InspectContext<T>, index: u64) -> Option<u64> {
        if self.obj_table == 0 {
            return None;
        }
        ctx.read_word(self.obj_table + index * ctx.word_size() as u64).ok()
    }

    /// Offset of the first instruction from [`BytecodeFunction::bytecode`].
    pub fn code_offset(&self) -> Option<usize> {
        self.signature.code_offset
    }

    /// Source line for an instruction pointer given as an offset from the
    /// start of the prelude.
    pub fn line_of(&self, ip_offset: u64) -> Option<u32> {
        let code_ip = ip_offset.checked_sub(self.code_offset()? as u64)?;
        Some(self.signature.map_line(code_ip))
    }

    /// Disassemble the body.
    pub fn disassemble(&self) -> Disassembly {
        match self.code_offset() {
            Some(start) => disassemble(&self.code, start),
            None => Disassembly { partial: true, error: self.signature.error.clone(), ..Disassembly::default() },
        }
    }

    /// Human-readable listing: header, prelude counts and one line per instruction.
    pub fn listing<T: Target>(&self, ctx: &InspectContext<T>) -> String {
        let unknown = || "?".to_string();
        let args = self.arg_names(ctx).into_iter().map(|arg| arg.unwrap_or_else(unknown)).collect::<Vec<_>>();

        let mut lines = vec![
            format!(
                "{}({}) in {}",
                self.name(ctx).unwrap_or_else(unknown),
                args.join(", "),
                self.source_file(ctx).unwrap_or_else(unknown)
            ),
            self.signature.to_string(),
        ];

        let dis = self.disassemble();
        for inst in &dis.instructions {
            let mut line = format!("  {:04x} {}", inst.offset - dis.start, inst.mnemonic());
            let operand = self.render_operand(ctx, inst.operand, dis.start);
            if !operand.is_empty() {
                line.push(' ');
                line.push_str(&operand);
            }
            if let Some(extra) = inst.extra {
                line.push(' ');
                line.push_str(&extra.to_string());
            }
            lines.push(line);
        }
        lines.extend(listing_trailer(&dis, self.signature.error.as_ref()));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn render_operand<T: Target>(&self, ctx: &InspectContext<T>, operand: Operand, start: usize) -> String {
        match operand {
            Operand::None => String::new(),
            Operand::Uint(n) => n.to_string(),
            Operand::SmallInt(n) => n.to_string(),
            Operand::Local(n) => n.to_string(),
            Operand::Operator(name) => name.to_string(),
            Operand::Qstr(index) => self.qstr(ctx, index).unwrap_or_else(|| format!("qstr#{index}")),
            Operand::ConstObj(index) => match self.const_obj(ctx, index) {
                Some(obj) => ctx.format_value(obj),
                None => format!("const#{index}"),
            },
            Operand::Jump { offset, target } => format!("{offset:+} -> {:04x}", target - start as i64),
        }
    }
}

/// Read up to [`MAX_BYTECODE_WINDOW`] bytes at `address`, stopping at the
/// first unreadable chunk.
fn read_window<T: Target>(ctx: &InspectContext<T>, address: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < MAX_BYTECODE_WINDOW {
        let cursor = address + out.len() as u64;
        match ctx.read_bytes(cursor, WINDOW_CHUNK) {
            Ok(chunk) => out.extend(chunk),
            Err(_) => {
                // Finish the last partially mapped chunk byte by byte.
                while out.len() < MAX_BYTECODE_WINDOW {
                    match ctx.read_bytes(address + out.len() as u64, 1) {
                        Ok(byte) => out.extend(byte),
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    out
}

/// Closing line of a listing that stopped early, if it did.
fn listing_trailer(dis: &Disassembly, prelude_error: Option<&DecodeError>) -> Option<String> {
    if let Some(err) = dis.error.as_ref().or(prelude_error) {
        Some(format!("  ... ({err})"))
    } else if dis.partial {
        Some("  ... (end of readable memory)".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_trailer() {
        let complete = disassemble(&[0x51, 0x63], 0);
        assert_eq!(listing_trailer(&complete, None), None);

        let truncated = disassemble(&[0x51, 0x59], 0);
        assert!(truncated.partial);
        assert_eq!(listing_trailer(&truncated, None).as_deref(), Some("  ... (end of readable memory)"));

        let err = DecodeError::TruncatedVarint(3);
        let trailer = listing_trailer(&complete, Some(&err)).unwrap();
        assert_eq!(trailer, format!("  ... ({err})"));
    }

    #[test]
    fn test_var_uint() {
        for value in [0, 1, 127, 128, 300, 1 << 20, u64::from(u32::MAX)] {
            let mut out = Vec::new();
            write_var_uint(value, &mut out);
            let mut pos = 0;
            assert_eq!(read_var_uint(&out, &mut pos).unwrap(), value);
            assert_eq!(pos, out.len());
        }
        let mut out = Vec::new();
        write_var_uint(300, &mut out);
        assert_eq!(out, vec![0x82, 0x2c]);

        assert_eq!(read_var_uint(&[0x81], &mut 0), Err(DecodeError::TruncatedVarint(0)));
        assert_eq!(read_var_uint(&[0xff; 12], &mut 0), Err(DecodeError::OverlongVarint(0)));
    }
}
