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

//! Bytecode disassembly.
//!
//! Decoding is pure: it turns a byte window into [`Instruction`]s with raw
//! operands. Resolving qstr indices and constants against a live function is
//! done by [`crate::bytecode::BytecodeFunction::listing`].

use super::opcode::{Embedded, Opcode, OperandFormat, MP_BC_LOAD_CONST_SMALL_INT, MP_BC_RETURN_VALUE};
use crate::DecodeError;

/// Decoded operand of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Unsigned variable-length operand
    Uint(u64),
    /// Signed small int (`LOAD_CONST_SMALL_INT`, small int multi-opcodes)
    SmallInt(i64),
    /// Index into the qstr table
    Qstr(u64),
    /// Index into the constant object table
    ConstObj(u64),
    /// Local slot of a fast multi-opcode
    Local(u8),
    /// Unary or binary operator
    Operator(&'static str),
    /// Jump with its offset relative to the next instruction and the resulting target
    Jump {
        /// Relative offset as encoded
        offset: i64,
        /// Absolute target offset in the buffer
        target: i64,
    },
}

/// A single disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode in the buffer
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Its operand
    pub operand: Operand,
    /// Trailing byte of `MAKE_CLOSURE*` / `UNWIND_JUMP`
    pub extra: Option<u8>,
    /// Encoded size in bytes
    pub size: usize,
}

impl Instruction {
    /// Mnemonic, with unassigned bytes shown as hex.
    pub fn mnemonic(&self) -> String {
        match self.opcode.name() {
            Some(name) => name.to_string(),
            None => format!("'{:#04x}'(unknown opcode)", self.opcode.0),
        }
    }

    /// Whether `offset` falls inside this instruction.
    pub fn contains(&self, offset: usize) -> bool {
        (self.offset..self.offset + self.size).contains(&offset)
    }
}

/// Result of disassembling one function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    /// Offset the disassembly started at (first instruction)
    pub start: usize,
    /// Instructions in order
    pub instructions: Vec<Instruction>,
    /// Set when decoding ran off the buffer instead of reaching the final return
    pub partial: bool,
    /// Why decoding stopped early, if it did on a malformed operand
    pub error: Option<DecodeError>,
}

impl Disassembly {
    /// Instruction starting at `offset`.
    pub fn instruction_at(&self, offset: usize) -> Option<&Instruction> {
        self.instructions.iter().find(|inst| inst.offset == offset)
    }

    /// Instruction covering `offset`.
    pub fn instruction_containing(&self, offset: usize) -> Option<&Instruction> {
        self.instructions.iter().find(|inst| inst.contains(offset))
    }
}

fn decode_one(code: &[u8], offset: usize) -> Result<Instruction, DecodeError> {
    let opcode = Opcode(code[offset]);
    let truncated = || DecodeError::TruncatedOperand { opcode: opcode.0, offset };
    let mut pos = offset + 1;

    let operand = match opcode.format() {
        OperandFormat::Byte => match opcode.embedded() {
            Embedded::None => Operand::None,
            Embedded::SmallInt(n) => Operand::SmallInt(n),
            Embedded::Local(n) => Operand::Local(n),
            Embedded::Operator(name) => Operand::Operator(name),
        },
        format @ (OperandFormat::Qstr | OperandFormat::VarUint) => {
            let first = *code.get(pos).ok_or_else(truncated)?;
            let mut value = i64::from(first & 0x7f);
            if opcode.0 == MP_BC_LOAD_CONST_SMALL_INT && first & 0x40 != 0 {
                value |= -1 << 7;
            }
            let mut byte = first;
            pos += 1;
            while byte & 0x80 != 0 {
                byte = *code.get(pos).ok_or_else(truncated)?;
                value = (value << 7) | i64::from(byte & 0x7f);
                pos += 1;
            }
            match (format, opcode.0) {
                (OperandFormat::Qstr, _) => Operand::Qstr(value as u64),
                (_, MP_BC_LOAD_CONST_SMALL_INT) => Operand::SmallInt(value),
                (_, super::opcode::MP_BC_LOAD_CONST_OBJ) => Operand::ConstObj(value as u64),
                _ => Operand::Uint(value as u64),
            }
        }
        OperandFormat::Offset => {
            let b0 = *code.get(pos).ok_or_else(truncated)?;
            let (mut relative, bias) = if b0 & 0x80 == 0 {
                pos += 1;
                (i64::from(b0), 0x40)
            } else {
                let b1 = *code.get(pos + 1).ok_or_else(truncated)?;
                pos += 2;
                (i64::from(b0 & 0x7f) | (i64::from(b1) << 7), 0x4000)
            };
            if opcode.is_signed_jump() {
                relative -= bias;
            }
            // Relative to the end of the label, before any unwind count byte.
            let target = pos as i64 + relative;
            Operand::Jump { offset: relative, target }
        }
    };

    let extra = if opcode.has_extra_byte() {
        let byte = *code.get(pos).ok_or_else(truncated)?;
        pos += 1;
        Some(byte)
    } else {
        None
    };

    Ok(Instruction { offset, opcode, operand, extra, size: pos - offset })
}

/// Disassemble a function body starting at `start`.
///
/// Stops after a `RETURN_VALUE` that no earlier jump reaches past, or at the
/// end of `code` (then [`Disassembly::partial`] is set).
pub fn disassemble(code: &[u8], start: usize) -> Disassembly {
    let mut out = Disassembly { start, ..Disassembly::default() };
    let mut furthest_jump = i64::MIN;
    let mut offset = start;

    loop {
        if offset >= code.len() {
            out.partial = true;
            break;
        }
        let instruction = match decode_one(code, offset) {
            Ok(instruction) => instruction,
            Err(err) => {
                out.partial = true;
                out.error = Some(err);
                break;
            }
        };
        if let Operand::Jump { target, .. } = instruction.operand {
            furthest_jump = furthest_jump.max(target);
        }
        let done = instruction.opcode.0 == MP_BC_RETURN_VALUE && furthest_jump <= offset as i64;
        offset += instruction.size;
        out.instructions.push(instruction);
        if done {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_function() {
        // LOAD_FAST_MULTI 0, LOAD_CONST_SMALL_INT -100, BINARY_OP ADD, RETURN_VALUE, garbage
        let code = [0xb0, 0x22, 0xff, 0x1c, 0xf2, 0x63, 0xff, 0xff];
        let dis = disassemble(&code, 0);
        assert!(!dis.partial);
        let ops: Vec<_> = dis.instructions.iter().map(|i| (i.offset, i.operand)).collect();
        assert_eq!(
            ops,
            vec![
                (0, Operand::Local(0)),
                (1, Operand::SmallInt(-100)),
                (4, Operand::Operator("ADD")),
                (5, Operand::None),
            ]
        );
    }

    #[test]
    fn test_return_inside_jump_range_continues() {
        // 0: POP_JUMP_IF_FALSE +2 -> 4
        // 2: LOAD_CONST_NONE
        // 3: RETURN_VALUE      (jump target 4 lies beyond, keep going)
        // 4: LOAD_CONST_TRUE
        // 5: RETURN_VALUE
        let code = [0x44, 0x42, 0x51, 0x63, 0x52, 0x63, 0x00];
        let dis = disassemble(&code, 0);
        assert_eq!(dis.instructions.len(), 5);
        assert_eq!(dis.instructions[0].operand, Operand::Jump { offset: 2, target: 4 });
        assert!(!dis.partial);
    }

    #[test]
    fn test_two_byte_and_backward_jumps() {
        // JUMP with a two byte offset of -2: 0x3ffe biased by 0x4000
        let code = [0x51, 0x42, 0xfe, 0x7f, 0x63];
        let dis = disassemble(&code, 0);
        assert_eq!(dis.instructions[1].operand, Operand::Jump { offset: -2, target: 2 });
        assert_eq!(dis.instructions[1].size, 3);
        assert_eq!(dis.instruction_containing(3).map(|i| i.offset), Some(1));
    }

    #[test]
    fn test_closure_and_unwind_extra_bytes() {
        // MAKE_CLOSURE 3 with 2 cells, UNWIND_JUMP +0 unwinding 1, RETURN_VALUE
        let code = [0x20, 0x03, 0x02, 0x40, 0x40, 0x01, 0x63];
        let dis = disassemble(&code, 0);
        assert_eq!(dis.instructions[0].operand, Operand::Uint(3));
        assert_eq!(dis.instructions[0].extra, Some(2));
        assert_eq!(dis.instructions[1].extra, Some(1));
        assert_eq!(dis.instructions[1].operand, Operand::Jump { offset: 0, target: 5 });
        assert_eq!(dis.instructions.len(), 3);
    }

    #[test]
    fn test_unwind_jump_target_ignores_unwind_count() {
        // 0: UNWIND_JUMP +2 -> 4, unwinding 1
        // 3: LOAD_CONST_NONE
        // 4: RETURN_VALUE      (the jump lands here, so the listing ends)
        // 5: LOAD_CONST_TRUE
        let code = [0x40, 0x42, 0x01, 0x51, 0x63, 0x52, 0x63];
        let dis = disassemble(&code, 0);
        assert_eq!(dis.instructions[0].operand, Operand::Jump { offset: 2, target: 4 });
        assert_eq!(dis.instructions[0].extra, Some(1));
        assert_eq!(dis.instructions[0].size, 3);
        assert_eq!(dis.instructions.len(), 3);
        assert!(!dis.partial);
    }

    #[test]
    fn test_truncated_operand_is_partial() {
        let dis = disassemble(&[0x51, 0x23, 0x81], 0);
        assert!(dis.partial);
        assert_eq!(dis.instructions.len(), 1);
        assert_eq!(dis.error, Some(DecodeError::TruncatedOperand { opcode: 0x23, offset: 1 }));

        let dis = disassemble(&[0x51, 0x59], 0);
        assert!(dis.partial);
        assert_eq!(dis.error, None);
    }
}
