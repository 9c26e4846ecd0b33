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

//! Function prelude.
//!
//! ```text
//! signature   xSSSSEAA [xFSSKAED ...]   S = n_state - 1, E = n_exc_stack, F = scope flags,
//!                                       A = positional args, K = keyword-only args,
//!                                       D = default positional args
//! size        xIIIIIIC [xIIIIIIC ...]   I = source info bytes, C = closure cells
//! info        name, arg names (A + K), line table     (I bytes in total)
//! closure     one byte per cell                        (C bytes)
//! code
//! ```
//!
//! Names are variable-length uints indexing the module's qstr table.

use std::fmt;

use tracing::debug;

use super::{read_var_uint, LineTable};
use crate::DecodeError;

/// Extension bytes accepted before a prelude word is declared corrupt.
const MAX_EXTENSION_BYTES: usize = 9;

/// The six counts packed into the signature word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreludeCounts {
    /// Value stack slots (locals included)
    pub n_state: u64,
    /// Exception stack depth
    pub n_exc_stack: u64,
    /// `MP_SCOPE_FLAG_*` bits
    pub scope_flags: u64,
    /// Positional arguments
    pub n_pos_args: u64,
    /// Keyword-only arguments
    pub n_kwonly_args: u64,
    /// Positional arguments with defaults
    pub n_def_pos_args: u64,
}

impl PreludeCounts {
    /// Decode the signature word at `*pos`.
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let start = *pos;
        let mut next = || {
            let z = *bytes.get(*pos).ok_or(DecodeError::TruncatedVarint(start))?;
            *pos += 1;
            Ok::<_, DecodeError>(u64::from(z))
        };

        let mut z = next()?;
        let mut counts = Self {
            n_state: (z >> 3) & 0xf,
            n_exc_stack: (z >> 2) & 1,
            n_pos_args: z & 3,
            ..Self::default()
        };
        let mut n = 0;
        while z & 0x80 != 0 {
            if n == MAX_EXTENSION_BYTES {
                return Err(DecodeError::OverlongVarint(start));
            }
            z = next()?;
            counts.n_state |= (z & 0x30) << (2 * n);
            counts.n_exc_stack |= (z & 0x02) << n;
            counts.scope_flags |= ((z & 0x40) >> 6) << n;
            counts.n_pos_args |= (z & 0x04) << n;
            counts.n_kwonly_args |= ((z & 0x08) >> 3) << n;
            counts.n_def_pos_args |= (z & 0x01) << n;
            n += 1;
        }
        counts.n_state += 1;
        Ok(counts)
    }

    /// Append the signature word.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut s = self.n_state.saturating_sub(1);
        let mut e = self.n_exc_stack;
        let mut f = self.scope_flags;
        let mut a = self.n_pos_args;
        let mut k = self.n_kwonly_args;
        let mut d = self.n_def_pos_args;

        let mut z = ((s & 0xf) << 3) | ((e & 1) << 2) | (a & 3);
        s >>= 4;
        e >>= 1;
        a >>= 2;
        while s | e | f | a | k | d != 0 {
            out.push(0x80 | z as u8);
            z = ((f & 1) << 6) | ((s & 3) << 4) | ((k & 1) << 3) | ((a & 1) << 2) | ((e & 1) << 1) | (d & 1);
            s >>= 2;
            e >>= 1;
            f >>= 1;
            a >>= 1;
            k >>= 1;
            d >>= 1;
        }
        out.push(z as u8);
    }

    /// Argument names stored in the prelude.
    pub fn n_args(&self) -> u64 {
        self.n_pos_args + self.n_kwonly_args
    }
}

impl fmt::Display for PreludeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state: {}, exc: {}, scope: {}, pos_args: {}, kwonly_args: {}, def_args: {}",
            self.n_state,
            self.n_exc_stack,
            self.scope_flags,
            self.n_pos_args,
            self.n_kwonly_args,
            self.n_def_pos_args
        )
    }
}

/// The two sizes packed into the size word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreludeSizes {
    /// Bytes of source info (names and line table)
    pub n_info: u64,
    /// Bytes of closure cell indices
    pub n_cells: u64,
}

impl PreludeSizes {
    /// Decode the size word at `*pos`.
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let start = *pos;
        let mut sizes = Self::default();
        for n in 0.. {
            if n > MAX_EXTENSION_BYTES {
                return Err(DecodeError::OverlongVarint(start));
            }
            let z = u64::from(*bytes.get(*pos).ok_or(DecodeError::TruncatedVarint(start))?);
            *pos += 1;
            sizes.n_cells |= (z & 1) << n;
            sizes.n_info |= ((z & 0x7e) >> 1) << (6 * n);
            if z & 0x80 == 0 {
                break;
            }
        }
        Ok(sizes)
    }

    /// Append the size word.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut i = self.n_info;
        let mut c = self.n_cells;
        let mut z = ((i & 0x3f) << 1) | (c & 1);
        i >>= 6;
        c >>= 1;
        while i | c != 0 {
            out.push(0x80 | z as u8);
            z = ((i & 0x3f) << 1) | (c & 1);
            i >>= 6;
            c >>= 1;
        }
        out.push(z as u8);
    }
}

/// Everything the prelude says about a function.
///
/// Decoding stops at the first malformed field; the fields read up to that
/// point are kept and [`FunctionSignature::error`] says what went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Signature word
    pub counts: Option<PreludeCounts>,
    /// Size word
    pub sizes: Option<PreludeSizes>,
    /// Qstr table index of the function name
    pub name: Option<u64>,
    /// Qstr table indices of the argument names
    pub args: Vec<u64>,
    /// Source line table
    pub lines: LineTable,
    /// Offset of the first instruction
    pub code_offset: Option<usize>,
    /// Why decoding stopped early
    pub error: Option<DecodeError>,
}

impl FunctionSignature {
    /// Whether every field decoded.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.code_offset.is_some()
    }

    /// Source line of the instruction at `code_ip` bytes past the code start.
    pub fn map_line(&self, code_ip: u64) -> u32 {
        self.lines.map_line(code_ip)
    }

    /// Append a full prelude: signature, sizes, names and line table.
    ///
    /// `n_info` is computed; closure cell bytes are not emitted.
    pub fn encode(
        counts: &PreludeCounts,
        n_cells: u64,
        name: u64,
        args: &[u64],
        lines: &LineTable,
        out: &mut Vec<u8>,
    ) -> Result<(), DecodeError> {
        let mut info = Vec::new();
        super::write_var_uint(name, &mut info);
        for arg in args {
            super::write_var_uint(*arg, &mut info);
        }
        info.extend(lines.encode()?);

        counts.encode(out);
        PreludeSizes { n_info: info.len() as u64, n_cells }.encode(out);
        out.extend(info);
        Ok(())
    }

    fn decode_into(&mut self, bytes: &[u8], offset: usize) -> Result<(), DecodeError> {
        let mut pos = offset;
        let counts = PreludeCounts::decode(bytes, &mut pos)?;
        self.counts = Some(counts);
        let sizes = PreludeSizes::decode(bytes, &mut pos)?;
        self.sizes = Some(sizes);

        let info_end = pos.saturating_add(sizes.n_info as usize);
        self.name = Some(read_var_uint(bytes, &mut pos)?);
        for _ in 0..counts.n_args() {
            self.args.push(read_var_uint(bytes, &mut pos)?);
        }

        let available = info_end.min(bytes.len());
        if pos < available {
            self.lines.extend_from(&bytes[pos..available]).map_err(|err| match err {
                DecodeError::TruncatedLineEntry(at) => DecodeError::TruncatedLineEntry(pos + at),
                other => other,
            })?;
        }
        if info_end > bytes.len() {
            return Err(DecodeError::TruncatedLineEntry(bytes.len()));
        }
        self.code_offset = Some(info_end.saturating_add(sizes.n_cells as usize));
        Ok(())
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.counts {
            Some(counts) => write!(f, "{counts}")?,
            None => write!(f, "signature unknown")?,
        }
        match self.sizes {
            Some(sizes) => write!(f, ", info: {}, cells: {}", sizes.n_info, sizes.n_cells),
            None => write!(f, ", info: unknown, cells: unknown"),
        }
    }
}

/// Decode the prelude starting at `offset`, keeping whatever is readable.
pub fn decode_prelude(bytes: &[u8], offset: usize) -> FunctionSignature {
    let mut signature = FunctionSignature::default();
    if let Err(err) = signature.decode_into(bytes, offset) {
        debug!(offset, "partial prelude: {err}");
        signature.error = Some(err);
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::LineEntry;

    fn counts(s: u64, e: u64, f: u64, a: u64, k: u64, d: u64) -> PreludeCounts {
        PreludeCounts {
            n_state: s,
            n_exc_stack: e,
            scope_flags: f,
            n_pos_args: a,
            n_kwonly_args: k,
            n_def_pos_args: d,
        }
    }

    #[test]
    fn test_two_argument_function() {
        // S=4 E=0 A=2 fits the first byte: x0011 0 10
        let mut bytes = vec![0b0_0011_0_10];
        // I=6 C=0
        bytes.push(6 << 1);
        // name 5, args 6 and 7, then a three byte line table
        bytes.extend([5, 6, 7, 0x21, 0x22, 0x01]);
        bytes.extend([0x51, 0x63]);

        let sig = decode_prelude(&bytes, 0);
        assert!(sig.is_complete(), "{:?}", sig.error);
        assert_eq!(sig.counts, Some(counts(4, 0, 0, 2, 0, 0)));
        assert_eq!(sig.sizes, Some(PreludeSizes { n_info: 6, n_cells: 0 }));
        assert_eq!(sig.name, Some(5));
        assert_eq!(sig.args, vec![6, 7]);
        assert_eq!(sig.code_offset, Some(8));
        assert_eq!(sig.lines.entries().len(), 3);
        assert_eq!(
            sig.to_string(),
            "state: 4, exc: 0, scope: 0, pos_args: 2, kwonly_args: 0, def_args: 0, info: 6, cells: 0"
        );
    }

    #[test]
    fn test_extension_bytes_round_trip() {
        for c in [
            counts(1, 0, 0, 0, 0, 0),
            counts(17, 1, 0, 0, 0, 0),
            counts(200, 3, 0b1011, 5, 2, 1),
            counts(4, 0, 1, 2, 0, 0),
            counts(1000, 40, 0xff, 255, 255, 255),
        ] {
            let mut out = Vec::new();
            c.encode(&mut out);
            let mut pos = 0;
            assert_eq!(PreludeCounts::decode(&out, &mut pos).unwrap(), c);
            assert_eq!(pos, out.len());
        }

        for sizes in [PreludeSizes { n_info: 0, n_cells: 0 }, PreludeSizes { n_info: 5000, n_cells: 3 }] {
            let mut out = Vec::new();
            sizes.encode(&mut out);
            let mut pos = 0;
            assert_eq!(PreludeSizes::decode(&out, &mut pos).unwrap(), sizes);
        }
    }

    #[test]
    fn test_encode_then_decode_full_prelude() {
        let lines = LineTable::new(vec![LineEntry::new(2, 0), LineEntry::new(1, 6), LineEntry::new(40, 3)]);
        let mut bytes = vec![0xff, 0xff];
        FunctionSignature::encode(&counts(3, 0, 0, 1, 1, 0), 2, 300, &[9, 10], &lines, &mut bytes)
            .unwrap();
        let cells_at = bytes.len();
        bytes.extend([0, 1]);

        let sig = decode_prelude(&bytes, 2);
        assert!(sig.is_complete());
        assert_eq!(sig.name, Some(300));
        assert_eq!(sig.args, vec![9, 10]);
        assert_eq!(sig.lines, lines);
        assert_eq!(sig.code_offset, Some(cells_at + 2));
        assert_eq!(sig.map_line(7), 4);
    }

    #[test]
    fn test_truncated_prelude_is_partial() {
        let sig = decode_prelude(&[0x80], 0);
        assert_eq!(sig.error, Some(DecodeError::TruncatedVarint(0)));
        assert_eq!(sig.counts, None);

        // Signature and sizes fine, name cut short.
        let sig = decode_prelude(&[0x08, 0x0c, 0x85], 0);
        assert_eq!(sig.counts.map(|c| c.n_state), Some(2));
        assert_eq!(sig.sizes.map(|s| s.n_info), Some(6));
        assert_eq!(sig.name, None);
        assert_eq!(sig.error, Some(DecodeError::TruncatedVarint(2)));
        assert_eq!(sig.to_string().split(", info").next(), Some(
            "state: 2, exc: 0, scope: 0, pos_args: 0, kwonly_args: 0, def_args: 0"
        ));

        // Line table running past the buffer keeps the entries read so far.
        let sig = decode_prelude(&[0x08, 0x0c, 0x01, 0x21], 0);
        assert_eq!(sig.name, Some(1));
        assert_eq!(sig.lines.entries(), &[LineEntry::new(1, 1)]);
        assert_eq!(sig.error, Some(DecodeError::TruncatedLineEntry(4)));
        assert_eq!(sig.code_offset, None);
    }
}
