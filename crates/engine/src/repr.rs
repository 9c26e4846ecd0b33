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

//! Tagged object representation.
//!
//! MicroPython packs small integers, qstr references, immediate constants and
//! (in some builds) floats into the same machine word as heap pointers. Which
//! bits mean what depends on the build's `MICROPY_OBJ_REPR`:
//!
//! | scheme | small int        | qstr                    | immediate               | heap pointer |
//! |--------|------------------|-------------------------|-------------------------|--------------|
//! | A      | `xxxx...xxx1`    | `xxxx...x010`           | `xxxx...x110`           | `...00`      |
//! | B      | `xxxx...xx01`    | `xxxx...x011`           | `xxxx...x111`           | `...x0`      |
//! | C      | `xxxx...xxx1`    | `0000 0000 0xxx...0110` | `0000 0000 0xxx...1110` | `...00`, floats `...10` |
//! | D      | tag `0x0001`     | tag `0x0002`            | tag `0x0003`            | tag `0x0000`, floats otherwise |
//!
//! In every scheme the words 0, 4 and 8 are `MP_OBJ_NULL`,
//! `MP_OBJ_STOP_ITERATION` and `MP_OBJ_SENTINEL`.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Serialize};

/// Immediate (non-heap) constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    /// `MP_OBJ_NULL`
    Null,
    /// `MP_OBJ_STOP_ITERATION`
    StopIteration,
    /// `MP_OBJ_SENTINEL`
    Sentinel,
    /// `mp_const_none`
    None,
    /// `mp_const_false`
    False,
    /// `mp_const_true`
    True,
    /// An immediate object with a payload this decoder does not know
    Other(u64),
}

impl Immediate {
    const NONE: u64 = 0;
    const FALSE: u64 = 1;
    const TRUE: u64 = 3;

    fn from_payload(payload: u64) -> Self {
        match payload {
            Self::NONE => Self::None,
            Self::FALSE => Self::False,
            Self::TRUE => Self::True,
            other => Self::Other(other),
        }
    }

    /// Payload for `MP_OBJ_NEW_IMMEDIATE_OBJ`, or the raw word for singletons.
    fn payload(self) -> Result<u64, u64> {
        match self {
            Self::Null => Err(NULL),
            Self::StopIteration => Err(STOP_ITERATION),
            Self::Sentinel => Err(SENTINEL),
            Self::None => Ok(Self::NONE),
            Self::False => Ok(Self::FALSE),
            Self::True => Ok(Self::TRUE),
            Self::Other(payload) => Ok(payload),
        }
    }

    /// Whether a map slot holding this key is empty.
    pub fn is_empty_slot(self) -> bool {
        matches!(self, Self::Null | Self::Sentinel)
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("MP_OBJ_NULL"),
            Self::StopIteration => f.write_str("MP_OBJ_STOP_ITERATION"),
            Self::Sentinel => f.write_str("MP_OBJ_SENTINEL"),
            Self::None => f.write_str("None"),
            Self::False => f.write_str("False"),
            Self::True => f.write_str("True"),
            Self::Other(payload) => write!(f, "immediate({payload})"),
        }
    }
}

/// One decoded `mp_obj_t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaggedValue {
    /// Small integer
    SmallInt(i64),
    /// Interned string id
    Qstr(u64),
    /// Pointer to an object starting with `mp_obj_base_t`
    HeapPointer(u64),
    /// Singleton or immediate constant
    Immediate(Immediate),
    /// Unboxed float (schemes C and D)
    Float(f64),
}

impl TaggedValue {
    /// The heap address, if this is a pointer.
    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            Self::HeapPointer(address) => Some(*address),
            _ => None,
        }
    }

    /// Whether this is `MP_OBJ_NULL` or `MP_OBJ_SENTINEL`.
    pub fn is_empty_slot(&self) -> bool {
        matches!(self, Self::Immediate(imm) if imm.is_empty_slot())
    }
}

impl fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInt(n) => write!(f, "{n}"),
            Self::Qstr(id) => write!(f, "qstr({id})"),
            Self::HeapPointer(address) => write!(f, "{address:#x}"),
            Self::Immediate(imm) => write!(f, "{imm}"),
            Self::Float(value) => write!(f, "{value:?}"),
        }
    }
}

const NULL: u64 = 0;
const STOP_ITERATION: u64 = 4;
const SENTINEL: u64 = 8;

fn singleton(word: u64) -> Option<Immediate> {
    match word {
        NULL => Some(Immediate::Null),
        STOP_ITERATION => Some(Immediate::StopIteration),
        SENTINEL => Some(Immediate::Sentinel),
        _ => None,
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(word: u64, bits: u32) -> i64 {
    let unused = 64 - bits.min(64);
    ((word << unused) as i64) >> unused
}

fn fits_signed(n: i64, bits: u32) -> bool {
    let bits = bits.min(64);
    bits == 64 || (n >= -(1i64 << (bits - 1)) && n < (1i64 << (bits - 1)))
}

/// Decode and encode contract shared by the four schemes.
///
/// `bits` is the word width of the target (32 or 64).
pub trait ObjEncoding: fmt::Debug + Sync {
    /// Classify a raw word. Never fails: unknown patterns are heap pointers.
    fn classify(&self, word: u64, bits: u32) -> TaggedValue;

    /// Number of value bits a small int carries.
    fn small_int_bits(&self, bits: u32) -> u32;

    /// `MP_OBJ_NEW_SMALL_INT`, without range checking.
    fn encode_small_int(&self, n: i64, bits: u32) -> u64;

    /// `MP_OBJ_NEW_QSTR`
    fn encode_qstr(&self, id: u64, bits: u32) -> u64;

    /// `MP_OBJ_NEW_IMMEDIATE_OBJ`
    fn encode_immediate(&self, payload: u64, bits: u32) -> u64;

    /// Unboxed float encoding, for schemes that have one.
    fn encode_float(&self, _value: f64, _bits: u32) -> Option<u64> {
        None
    }
}

/// `MICROPY_OBJ_REPR_A`: the default 31/63-bit small int layout.
#[derive(Debug)]
pub struct ReprA;

impl ObjEncoding for ReprA {
    fn classify(&self, word: u64, bits: u32) -> TaggedValue {
        let word = word & mask(bits);
        if word & 1 != 0 {
            TaggedValue::SmallInt(sign_extend(word, bits) >> 1)
        } else if word & 7 == 2 {
            TaggedValue::Qstr(word >> 3)
        } else if let Some(imm) = singleton(word) {
            TaggedValue::Immediate(imm)
        } else if word & 7 == 6 {
            TaggedValue::Immediate(Immediate::from_payload(word >> 3))
        } else {
            TaggedValue::HeapPointer(word)
        }
    }

    fn small_int_bits(&self, bits: u32) -> u32 {
        bits - 1
    }

    fn encode_small_int(&self, n: i64, bits: u32) -> u64 {
        (((n as u64) << 1) | 1) & mask(bits)
    }

    fn encode_qstr(&self, id: u64, bits: u32) -> u64 {
        ((id << 3) | 2) & mask(bits)
    }

    fn encode_immediate(&self, payload: u64, bits: u32) -> u64 {
        ((payload << 3) | 6) & mask(bits)
    }
}

/// `MICROPY_OBJ_REPR_B`: 30/62-bit small ints, pointers only need 2-byte alignment.
#[derive(Debug)]
pub struct ReprB;

impl ObjEncoding for ReprB {
    fn classify(&self, word: u64, bits: u32) -> TaggedValue {
        let word = word & mask(bits);
        if word & 3 == 1 {
            TaggedValue::SmallInt(sign_extend(word, bits) >> 2)
        } else if word & 7 == 3 {
            TaggedValue::Qstr(word >> 3)
        } else if let Some(imm) = singleton(word) {
            TaggedValue::Immediate(imm)
        } else if word & 7 == 7 {
            TaggedValue::Immediate(Immediate::from_payload(word >> 3))
        } else {
            TaggedValue::HeapPointer(word)
        }
    }

    fn small_int_bits(&self, bits: u32) -> u32 {
        bits - 2
    }

    fn encode_small_int(&self, n: i64, bits: u32) -> u64 {
        (((n as u64) << 2) | 1) & mask(bits)
    }

    fn encode_qstr(&self, id: u64, bits: u32) -> u64 {
        ((id << 3) | 3) & mask(bits)
    }

    fn encode_immediate(&self, payload: u64, bits: u32) -> u64 {
        ((payload << 3) | 7) & mask(bits)
    }
}

/// `MICROPY_OBJ_REPR_C`: 32-bit words with 30-bit unboxed floats.
#[derive(Debug)]
pub struct ReprC;

impl ReprC {
    const TAG_MASK: u64 = 0xff80_000f;
    const FLOAT_BIAS: u64 = 0x8080_0000;
}

impl ObjEncoding for ReprC {
    fn classify(&self, word: u64, bits: u32) -> TaggedValue {
        let word = word & mask(bits);
        if word & 1 != 0 {
            TaggedValue::SmallInt(sign_extend(word, bits) >> 1)
        } else if word & Self::TAG_MASK == 0x6 {
            TaggedValue::Qstr(word >> 4)
        } else if let Some(imm) = singleton(word) {
            TaggedValue::Immediate(imm)
        } else if word & Self::TAG_MASK == 0xe {
            TaggedValue::Immediate(Immediate::from_payload(word >> 4))
        } else if word & 3 == 0 {
            TaggedValue::HeapPointer(word)
        } else {
            let raw = (word.wrapping_sub(Self::FLOAT_BIAS) & !3) as u32;
            TaggedValue::Float(f64::from(f32::from_bits(raw)))
        }
    }

    fn small_int_bits(&self, bits: u32) -> u32 {
        bits - 1
    }

    fn encode_small_int(&self, n: i64, bits: u32) -> u64 {
        (((n as u64) << 1) | 1) & mask(bits)
    }

    fn encode_qstr(&self, id: u64, bits: u32) -> u64 {
        ((id << 4) | 0x6) & mask(bits)
    }

    fn encode_immediate(&self, payload: u64, bits: u32) -> u64 {
        ((payload << 4) | 0xe) & mask(bits)
    }

    fn encode_float(&self, value: f64, bits: u32) -> Option<u64> {
        let raw = u64::from((value as f32).to_bits());
        Some((((raw & !3) | 2).wrapping_add(Self::FLOAT_BIAS)) & mask(bits))
    }
}

/// `MICROPY_OBJ_REPR_D`: 64-bit NaN boxing with a 16-bit tag in the high bits.
#[derive(Debug)]
pub struct ReprD;

impl ReprD {
    const SMALL_INT_TAG: u64 = 0x0001;
    const QSTR_TAG: u64 = 0x0002;
    const IMMEDIATE_TAG: u64 = 0x0003;
    const FLOAT_BIAS: u64 = 0x8004_0000_0000_0000;
    const FLOAT_MASK: u64 = 0xfffc_0000_0000_0000;
}

impl ObjEncoding for ReprD {
    fn classify(&self, word: u64, _bits: u32) -> TaggedValue {
        match word >> 48 {
            Self::SMALL_INT_TAG => TaggedValue::SmallInt(((word << 16) as i64) >> 17),
            Self::QSTR_TAG => TaggedValue::Qstr(u64::from((word as u32) >> 1)),
            Self::IMMEDIATE_TAG => {
                TaggedValue::Immediate(Immediate::from_payload((word >> 46) & 3))
            }
            0 => match singleton(word) {
                Some(imm) => TaggedValue::Immediate(imm),
                None => TaggedValue::HeapPointer(word),
            },
            _ if word & Self::FLOAT_MASK != 0 => {
                TaggedValue::Float(f64::from_bits(word.wrapping_sub(Self::FLOAT_BIAS)))
            }
            _ => TaggedValue::HeapPointer(word),
        }
    }

    fn small_int_bits(&self, _bits: u32) -> u32 {
        47
    }

    fn encode_small_int(&self, n: i64, _bits: u32) -> u64 {
        (((n as u64) & 0x7fff_ffff_ffff) << 1) | 0x0001_0000_0000_0001
    }

    fn encode_qstr(&self, id: u64, _bits: u32) -> u64 {
        (u64::from(id as u32) << 1) | 0x0002_0000_0000_0001
    }

    fn encode_immediate(&self, payload: u64, _bits: u32) -> u64 {
        ((payload & 3) << 46) | 0x0003_0000_0000_0000
    }

    fn encode_float(&self, value: f64, _bits: u32) -> Option<u64> {
        Some(value.to_bits().wrapping_add(Self::FLOAT_BIAS))
    }
}

/// The four object representation schemes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjRepr {
    /// `MICROPY_OBJ_REPR_A`
    #[default]
    #[serde(rename = "REPR_A")]
    A,
    /// `MICROPY_OBJ_REPR_B`
    #[serde(rename = "REPR_B")]
    B,
    /// `MICROPY_OBJ_REPR_C`
    #[serde(rename = "REPR_C")]
    C,
    /// `MICROPY_OBJ_REPR_D`
    #[serde(rename = "REPR_D")]
    D,
}

impl ObjRepr {
    /// Every scheme, in `MICROPY_OBJ_REPR_*` order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// The strategy implementing this scheme.
    pub fn encoding(self) -> &'static dyn ObjEncoding {
        match self {
            Self::A => &ReprA,
            Self::B => &ReprB,
            Self::C => &ReprC,
            Self::D => &ReprD,
        }
    }

    /// Short name as used by the `repr` setting.
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "REPR_A",
            Self::B => "REPR_B",
            Self::C => "REPR_C",
            Self::D => "REPR_D",
        }
    }

    /// Name of the build constant identifying this scheme.
    pub fn constant_name(self) -> &'static str {
        match self {
            Self::A => "MICROPY_OBJ_REPR_A",
            Self::B => "MICROPY_OBJ_REPR_B",
            Self::C => "MICROPY_OBJ_REPR_C",
            Self::D => "MICROPY_OBJ_REPR_D",
        }
    }

    /// Value of [`ObjRepr::constant_name`] in upstream `mpconfig.h`.
    pub fn default_constant(self) -> i64 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    /// Pick the scheme matching `MICROPY_OBJ_REPR`.
    ///
    /// `lookup` resolves build constants; scheme markers that cannot be
    /// resolved fall back to their upstream values. Returns `None` when
    /// `MICROPY_OBJ_REPR` itself is missing or matches no scheme.
    pub fn detect(lookup: impl Fn(&str) -> Option<i64>) -> Option<Self> {
        let configured = lookup("MICROPY_OBJ_REPR")?;
        Self::ALL.into_iter().find(|repr| {
            lookup(repr.constant_name()).unwrap_or_else(|| repr.default_constant()) == configured
        })
    }

    /// Classify a word from a target with `word_size`-byte pointers.
    pub fn classify(self, word: u64, word_size: usize) -> TaggedValue {
        self.encoding().classify(word, word_bits(word_size))
    }

    /// Representable small-int range.
    pub fn small_int_range(self, word_size: usize) -> RangeInclusive<i64> {
        let bits = self.encoding().small_int_bits(word_bits(word_size)).min(64);
        if bits == 64 {
            i64::MIN..=i64::MAX
        } else {
            -(1i64 << (bits - 1))..=(1i64 << (bits - 1)) - 1
        }
    }

    /// Encode a value, or `None` if the scheme cannot represent it.
    pub fn encode(self, value: &TaggedValue, word_size: usize) -> Option<u64> {
        let bits = word_bits(word_size);
        let encoding = self.encoding();
        match *value {
            TaggedValue::SmallInt(n) => {
                fits_signed(n, encoding.small_int_bits(bits)).then(|| encoding.encode_small_int(n, bits))
            }
            TaggedValue::Qstr(id) => Some(encoding.encode_qstr(id, bits)),
            TaggedValue::HeapPointer(address) => Some(address),
            TaggedValue::Immediate(imm) => match imm.payload() {
                Ok(payload) => Some(encoding.encode_immediate(payload, bits)),
                Err(word) => Some(word),
            },
            TaggedValue::Float(f) => encoding.encode_float(f, bits),
        }
    }
}

impl fmt::Display for ObjRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjRepr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.trim_start_matches("MICROPY_OBJ_").trim_start_matches("REPR_");
        match short {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(format!("unknown object representation {s:?}, expected REPR_A..REPR_D")),
        }
    }
}

fn word_bits(word_size: usize) -> u32 {
    (word_size as u32).saturating_mul(8).clamp(8, 64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(value: &TaggedValue) -> u8 {
        match value {
            TaggedValue::SmallInt(_) => 0,
            TaggedValue::Qstr(_) => 1,
            TaggedValue::HeapPointer(_) => 2,
            TaggedValue::Immediate(_) => 3,
            TaggedValue::Float(_) => 4,
        }
    }

    #[test]
    fn test_default_scheme_examples() {
        let a = ObjRepr::A;
        assert_eq!(a.classify(0x3, 4), TaggedValue::SmallInt(1));
        assert_eq!(a.classify(0xffff_ffff, 4), TaggedValue::SmallInt(-1));
        assert_eq!(a.classify((5 << 3) | 2, 4), TaggedValue::Qstr(5));
        assert_eq!(a.classify(0, 4), TaggedValue::Immediate(Immediate::Null));
        assert_eq!(a.classify(4, 4), TaggedValue::Immediate(Immediate::StopIteration));
        assert_eq!(a.classify(8, 4), TaggedValue::Immediate(Immediate::Sentinel));
        assert_eq!(a.classify(6, 4), TaggedValue::Immediate(Immediate::None));
        assert_eq!(a.classify(14, 4), TaggedValue::Immediate(Immediate::False));
        assert_eq!(a.classify(30, 4), TaggedValue::Immediate(Immediate::True));
        assert_eq!(a.classify(0x2000_0040, 4), TaggedValue::HeapPointer(0x2000_0040));
    }

    #[test]
    fn test_small_int_roundtrip_all_schemes() {
        for repr in ObjRepr::ALL {
            for word_size in [4usize, 8] {
                if repr == ObjRepr::C && word_size == 8 {
                    continue;
                }
                if repr == ObjRepr::D && word_size == 4 {
                    continue;
                }
                let range = repr.small_int_range(word_size);
                let samples =
                    [0, 1, -1, 42, -42, 12345, *range.start(), *range.end(), range.start() + 1, range.end() - 1];
                for n in samples {
                    let word = repr.encode(&TaggedValue::SmallInt(n), word_size).unwrap();
                    assert_eq!(
                        repr.classify(word, word_size),
                        TaggedValue::SmallInt(n),
                        "{repr} word_size={word_size} n={n}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_small_int_out_of_range_is_rejected() {
        let end = *ObjRepr::A.small_int_range(4).end();
        assert!(ObjRepr::A.encode(&TaggedValue::SmallInt(end + 1), 4).is_none());
        assert_eq!(ObjRepr::D.small_int_range(8), -(1i64 << 46)..=(1i64 << 46) - 1);
    }

    #[test]
    fn test_qstr_and_immediate_roundtrip() {
        for repr in ObjRepr::ALL {
            let word_size = if repr == ObjRepr::D { 8 } else { 4 };
            for value in [
                TaggedValue::Qstr(1),
                TaggedValue::Qstr(300),
                TaggedValue::Immediate(Immediate::None),
                TaggedValue::Immediate(Immediate::False),
                TaggedValue::Immediate(Immediate::True),
                TaggedValue::Immediate(Immediate::Null),
                TaggedValue::Immediate(Immediate::StopIteration),
                TaggedValue::Immediate(Immediate::Sentinel),
            ] {
                let word = repr.encode(&value, word_size).unwrap();
                assert_eq!(repr.classify(word, word_size), value, "{repr} {value:?}");
            }
        }
    }

    #[test]
    fn test_unboxed_floats() {
        let word = ObjRepr::C.encode(&TaggedValue::Float(1.5), 4).unwrap();
        assert_eq!(ObjRepr::C.classify(word, 4), TaggedValue::Float(1.5));

        let word = ObjRepr::D.encode(&TaggedValue::Float(-0.25), 8).unwrap();
        assert_eq!(ObjRepr::D.classify(word, 8), TaggedValue::Float(-0.25));

        assert!(ObjRepr::A.encode(&TaggedValue::Float(1.0), 4).is_none());
    }

    /// The runtime's own `mp_obj_is_*` predicates, written out per scheme.
    fn runtime_predicates(repr: ObjRepr, w: u64) -> [bool; 4] {
        match repr {
            ObjRepr::A => [w & 1 != 0, w & 7 == 2, w & 7 == 6, w & 3 == 0],
            ObjRepr::B => [w & 3 == 1, w & 7 == 3, w & 7 == 7, w & 1 == 0],
            ObjRepr::C => {
                [w & 1 != 0, w & 0xff80_000f == 6, w & 0xff80_000f == 0xe, w & 3 == 0]
            }
            ObjRepr::D => {
                let tag = w >> 48;
                [tag == 1, tag == 2, tag == 3, tag == 0]
            }
        }
    }

    #[test]
    fn test_classifications_are_mutually_exclusive() {
        let mut state = 0x1234_5678_9abc_def0u64;
        let mut words = vec![0, 2, 4, 6, 8, 10, 12, 14, 0x8000_0000, u64::MAX];
        for _ in 0..4000 {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            words.push(state);
            words.push(state & 0xffff_ffff);
            words.push(state & 0x0003_ffff_ffff_ffff);
        }

        for repr in ObjRepr::ALL {
            let word_size = if repr == ObjRepr::D { 8 } else { 4 };
            for &raw in &words {
                let word = if word_size == 4 { raw & 0xffff_ffff } else { raw };
                let holds = runtime_predicates(repr, word);
                assert!(holds.iter().filter(|h| **h).count() <= 1, "{repr} {word:#x}");

                let value = repr.classify(word, word_size);
                match holds.iter().position(|h| *h) {
                    Some(0) => assert_eq!(kind(&value), 0, "{repr} {word:#x}"),
                    Some(1) => assert_eq!(kind(&value), 1, "{repr} {word:#x}"),
                    Some(2) => assert_eq!(kind(&value), 3, "{repr} {word:#x}"),
                    // Object words 0, 4 and 8 are the singletons.
                    Some(_) => assert!(matches!(kind(&value), 2 | 3), "{repr} {word:#x}"),
                    None => assert!(matches!(kind(&value), 2 | 4), "{repr} {word:#x}"),
                }
            }
        }
    }

    #[test]
    fn test_detect_from_constants() {
        let constants = |name: &str| match name {
            "MICROPY_OBJ_REPR" => Some(2),
            _ => None,
        };
        assert_eq!(ObjRepr::detect(constants), Some(ObjRepr::C));

        let custom = |name: &str| match name {
            "MICROPY_OBJ_REPR" => Some(7),
            "MICROPY_OBJ_REPR_D" => Some(7),
            _ => None,
        };
        assert_eq!(ObjRepr::detect(custom), Some(ObjRepr::D));
        assert_eq!(ObjRepr::detect(|_| None), None);
        assert_eq!(ObjRepr::detect(|name| (name == "MICROPY_OBJ_REPR").then_some(99)), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("REPR_B".parse::<ObjRepr>().unwrap(), ObjRepr::B);
        assert_eq!("d".parse::<ObjRepr>().unwrap(), ObjRepr::D);
        assert_eq!("MICROPY_OBJ_REPR_C".parse::<ObjRepr>().unwrap(), ObjRepr::C);
        assert!("REPR_E".parse::<ObjRepr>().is_err());
    }
}
