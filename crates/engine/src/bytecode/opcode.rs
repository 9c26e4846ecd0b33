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

//! Bytecode opcodes.

/// How the bytes after an opcode are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    /// No operand (the opcode itself may carry one, see [`Opcode::embedded`])
    Byte,
    /// Variable-length uint indexing the qstr table
    Qstr,
    /// Variable-length uint
    VarUint,
    /// One- or two-byte jump offset
    Offset,
}

/// Value carried by the opcode byte itself in the multi-opcode ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embedded {
    /// Nothing embedded
    None,
    /// Small int pushed by `LOAD_CONST_SMALL_INT_MULTI`
    SmallInt(i64),
    /// Local slot of `LOAD_FAST_MULTI` / `STORE_FAST_MULTI`
    Local(u8),
    /// Operator name of `UNARY_OP_MULTI` / `BINARY_OP_MULTI`
    Operator(&'static str),
}

/// First jump opcode
pub const MP_BC_BASE_JUMP_E: u8 = 0x40;
/// `LOAD_CONST_SMALL_INT`
pub const MP_BC_LOAD_CONST_SMALL_INT: u8 = 0x22;
/// `LOAD_CONST_OBJ`
pub const MP_BC_LOAD_CONST_OBJ: u8 = 0x23;
/// `RETURN_VALUE`
pub const MP_BC_RETURN_VALUE: u8 = 0x63;
/// `UNWIND_JUMP`
pub const MP_BC_UNWIND_JUMP: u8 = 0x40;
/// `JUMP`
pub const MP_BC_JUMP: u8 = 0x42;
/// `POP_JUMP_IF_TRUE`
pub const MP_BC_POP_JUMP_IF_TRUE: u8 = 0x43;
/// `POP_JUMP_IF_FALSE`
pub const MP_BC_POP_JUMP_IF_FALSE: u8 = 0x44;

/// `LOAD_CONST_SMALL_INT_MULTI`
pub const MP_BC_LOAD_CONST_SMALL_INT_MULTI: u8 = 0x70;
/// `LOAD_FAST_MULTI`
pub const MP_BC_LOAD_FAST_MULTI: u8 = 0xb0;
/// `STORE_FAST_MULTI`
pub const MP_BC_STORE_FAST_MULTI: u8 = 0xc0;
/// `UNARY_OP_MULTI`
pub const MP_BC_UNARY_OP_MULTI: u8 = 0xd0;
/// `BINARY_OP_MULTI`
pub const MP_BC_BINARY_OP_MULTI: u8 = 0xd7;

const SMALL_INT_MULTI_EXCESS: i64 = 16;

const UNARY_OPS: [&str; 4] = ["POSITIVE", "NEGATIVE", "INVERT", "NOT"];

const BINARY_OPS: [&str; 35] = [
    "LESS",
    "MORE",
    "EQUAL",
    "LESS_EQUAL",
    "MORE_EQUAL",
    "NOT_EQUAL",
    "IN",
    "IS",
    "EXCEPTION_MATCH",
    "INPLACE_OR",
    "INPLACE_XOR",
    "INPLACE_AND",
    "INPLACE_LSHIFT",
    "INPLACE_RSHIFT",
    "INPLACE_ADD",
    "INPLACE_SUBTRACT",
    "INPLACE_MULTIPLY",
    "INPLACE_MAT_MULTIPLY",
    "INPLACE_FLOOR_DIVIDE",
    "INPLACE_TRUE_DIVIDE",
    "INPLACE_MODULO",
    "INPLACE_POWER",
    "OR",
    "XOR",
    "AND",
    "LSHIFT",
    "RSHIFT",
    "ADD",
    "SUBTRACT",
    "MULTIPLY",
    "MAT_MULTIPLY",
    "FLOOR_DIVIDE",
    "TRUE_DIVIDE",
    "MODULO",
    "POWER",
];

/// One opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
    /// Operand format, from the packed per-nibble table.
    pub fn format(self) -> OperandFormat {
        match (0x0000_03a4u32 >> (2 * u32::from(self.0 >> 4))) & 3 {
            0 => OperandFormat::Byte,
            1 => OperandFormat::Qstr,
            2 => OperandFormat::VarUint,
            _ => OperandFormat::Offset,
        }
    }

    /// Whether one extra byte follows the operand (`MAKE_CLOSURE*`, `UNWIND_JUMP`).
    pub fn has_extra_byte(self) -> bool {
        self.0 & 0x9e == 0
    }

    /// Whether the jump offset is signed.
    pub fn is_signed_jump(self) -> bool {
        matches!(
            self.0,
            MP_BC_UNWIND_JUMP | MP_BC_JUMP | MP_BC_POP_JUMP_IF_TRUE | MP_BC_POP_JUMP_IF_FALSE
        )
    }

    /// Whether this is any jump.
    pub fn is_jump(self) -> bool {
        self.0 & 0xf0 == MP_BC_BASE_JUMP_E
    }

    /// Value embedded in the opcode byte.
    pub fn embedded(self) -> Embedded {
        let op = self.0;
        match op {
            0x70..=0xaf => {
                Embedded::SmallInt(i64::from(op - MP_BC_LOAD_CONST_SMALL_INT_MULTI) - SMALL_INT_MULTI_EXCESS)
            }
            0xb0..=0xbf => Embedded::Local(op - MP_BC_LOAD_FAST_MULTI),
            0xc0..=0xcf => Embedded::Local(op - MP_BC_STORE_FAST_MULTI),
            0xd0..=0xd6 => UNARY_OPS
                .get(usize::from(op - MP_BC_UNARY_OP_MULTI))
                .map_or(Embedded::None, |name| Embedded::Operator(name)),
            0xd7..=0xff => BINARY_OPS
                .get(usize::from(op - MP_BC_BINARY_OP_MULTI))
                .map_or(Embedded::None, |name| Embedded::Operator(name)),
            _ => Embedded::None,
        }
    }

    /// Mnemonic, or `None` for unassigned bytes.
    pub fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0x10 => "LOAD_CONST_STRING",
            0x11 => "LOAD_NAME",
            0x12 => "LOAD_GLOBAL",
            0x13 => "LOAD_ATTR",
            0x14 => "LOAD_METHOD",
            0x15 => "LOAD_SUPER_METHOD",
            0x16 => "STORE_NAME",
            0x17 => "STORE_GLOBAL",
            0x18 => "STORE_ATTR",
            0x19 => "DELETE_NAME",
            0x1a => "DELETE_GLOBAL",
            0x1b => "IMPORT_NAME",
            0x1c => "IMPORT_FROM",

            0x20 => "MAKE_CLOSURE",
            0x21 => "MAKE_CLOSURE_DEFARGS",
            0x22 => "LOAD_CONST_SMALL_INT",
            0x23 => "LOAD_CONST_OBJ",
            0x24 => "LOAD_FAST_N",
            0x25 => "LOAD_DEREF",
            0x26 => "STORE_FAST_N",
            0x27 => "STORE_DEREF",
            0x28 => "DELETE_FAST",
            0x29 => "DELETE_DEREF",
            0x2a => "BUILD_TUPLE",
            0x2b => "BUILD_LIST",
            0x2c => "BUILD_MAP",
            0x2d => "BUILD_SET",
            0x2e => "BUILD_SLICE",
            0x2f => "STORE_COMP",

            0x30 => "UNPACK_SEQUENCE",
            0x31 => "UNPACK_EX",
            0x32 => "MAKE_FUNCTION",
            0x33 => "MAKE_FUNCTION_DEFARGS",
            0x34 => "CALL_FUNCTION",
            0x35 => "CALL_FUNCTION_VAR_KW",
            0x36 => "CALL_METHOD",
            0x37 => "CALL_METHOD_VAR_KW",

            0x40 => "UNWIND_JUMP",
            0x42 => "JUMP",
            0x43 => "POP_JUMP_IF_TRUE",
            0x44 => "POP_JUMP_IF_FALSE",
            0x45 => "JUMP_IF_TRUE_OR_POP",
            0x46 => "JUMP_IF_FALSE_OR_POP",
            0x47 => "SETUP_WITH",
            0x48 => "SETUP_EXCEPT",
            0x49 => "SETUP_FINALLY",
            0x4a => "POP_EXCEPT_JUMP",
            0x4b => "FOR_ITER",

            0x50 => "LOAD_CONST_FALSE",
            0x51 => "LOAD_CONST_NONE",
            0x52 => "LOAD_CONST_TRUE",
            0x53 => "LOAD_NULL",
            0x54 => "LOAD_BUILD_CLASS",
            0x55 => "LOAD_SUBSCR",
            0x56 => "STORE_SUBSCR",
            0x57 => "DUP_TOP",
            0x58 => "DUP_TOP_TWO",
            0x59 => "POP_TOP",
            0x5a => "ROT_TWO",
            0x5b => "ROT_THREE",
            0x5c => "WITH_CLEANUP",
            0x5d => "END_FINALLY",
            0x5e => "GET_ITER",
            0x5f => "GET_ITER_STACK",

            0x62 => "STORE_MAP",
            0x63 => "RETURN_VALUE",
            0x64 => "RAISE_LAST",
            0x65 => "RAISE_OBJ",
            0x66 => "RAISE_FROM",
            0x67 => "YIELD_VALUE",
            0x68 => "YIELD_FROM",
            0x69 => "IMPORT_STAR",

            0x70..=0xaf => "LOAD_CONST_SMALL_INT_MULTI",
            0xb0..=0xbf => "LOAD_FAST_MULTI",
            0xc0..=0xcf => "STORE_FAST_MULTI",
            0xd0..=0xd3 => "UNARY_OP_MULTI",
            0xd7..=0xf9 => "BINARY_OP_MULTI",
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        assert_eq!(Opcode(0x51).format(), OperandFormat::Byte);
        assert_eq!(Opcode(0x12).format(), OperandFormat::Qstr);
        assert_eq!(Opcode(0x23).format(), OperandFormat::VarUint);
        assert_eq!(Opcode(0x34).format(), OperandFormat::VarUint);
        assert_eq!(Opcode(0x42).format(), OperandFormat::Offset);
        assert_eq!(Opcode(0x63).format(), OperandFormat::Byte);
        assert_eq!(Opcode(0xe4).format(), OperandFormat::Byte);
    }

    #[test]
    fn test_extra_byte_and_signed_jumps() {
        assert!(Opcode(0x20).has_extra_byte());
        assert!(Opcode(0x21).has_extra_byte());
        assert!(Opcode(0x40).has_extra_byte());
        assert!(!Opcode(0x42).has_extra_byte());
        assert!(!Opcode(0x70).has_extra_byte());

        assert!(Opcode(0x44).is_signed_jump());
        assert!(!Opcode(0x4b).is_signed_jump());
        assert!(Opcode(0x4b).is_jump());
    }

    #[test]
    fn test_embedded_operands() {
        assert_eq!(Opcode(0x70).embedded(), Embedded::SmallInt(-16));
        assert_eq!(Opcode(0x81).embedded(), Embedded::SmallInt(1));
        assert_eq!(Opcode(0xaf).embedded(), Embedded::SmallInt(47));
        assert_eq!(Opcode(0xb2).embedded(), Embedded::Local(2));
        assert_eq!(Opcode(0xd1).embedded(), Embedded::Operator("NEGATIVE"));
        assert_eq!(Opcode(0xd4).embedded(), Embedded::None);
        assert_eq!(Opcode(0xf2).embedded(), Embedded::Operator("ADD"));
        assert_eq!(Opcode(0xf9).embedded(), Embedded::Operator("POWER"));
        assert_eq!(Opcode(0xfa).embedded(), Embedded::None);
        assert_eq!(Opcode(0xfa).name(), None);
    }
}
