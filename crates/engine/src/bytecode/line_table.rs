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

//! Source line table.
//!
//! A sequence of (line delta, bytecode delta) pairs in one of two widths:
//!
//! ```text
//! 0LLBBBBB              line delta 0..=3, bytecode delta 0..=31
//! 1LLLBBBB LLLLLLLL     line delta 0..=2047 (high 3 bits first), bytecode delta 0..=15
//! ```

use crate::DecodeError;

/// One line-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// Lines advanced
    pub line_delta: u32,
    /// Bytecode bytes advanced
    pub bytecode_delta: u32,
}

impl LineEntry {
    /// Largest line delta of a one-byte entry.
    pub const SHORT_MAX_LINE: u32 = 3;
    /// Largest bytecode delta of a one-byte entry.
    pub const SHORT_MAX_BYTECODE: u32 = 0x1f;
    /// Largest line delta of a two-byte entry.
    pub const LONG_MAX_LINE: u32 = 0x7ff;
    /// Largest bytecode delta of a two-byte entry.
    pub const LONG_MAX_BYTECODE: u32 = 0xf;

    /// A new entry.
    pub const fn new(line_delta: u32, bytecode_delta: u32) -> Self {
        Self { line_delta, bytecode_delta }
    }

    /// Decode the entry at `*pos`, advancing past it.
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self, DecodeError> {
        let start = *pos;
        let c = *bytes.get(start).ok_or(DecodeError::TruncatedLineEntry(start))?;
        if c & 0x80 == 0 {
            *pos += 1;
            return Ok(Self::new(u32::from(c >> 5), u32::from(c & 0x1f)));
        }
        let low = *bytes.get(start + 1).ok_or(DecodeError::TruncatedLineEntry(start))?;
        *pos += 2;
        let line_delta = ((u32::from(c) << 4) & 0x700) | u32::from(low);
        Ok(Self::new(line_delta, u32::from(c & 0xf)))
    }

    /// Append the narrowest encoding of this entry.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        let (l, b) = (self.line_delta, self.bytecode_delta);
        if l <= Self::SHORT_MAX_LINE && b <= Self::SHORT_MAX_BYTECODE {
            out.push(((l << 5) | b) as u8);
        } else if l <= Self::LONG_MAX_LINE && b <= Self::LONG_MAX_BYTECODE {
            out.push(0x80 | ((l >> 4) & 0x70) as u8 | b as u8);
            out.push((l & 0xff) as u8);
        } else {
            return Err(DecodeError::LineEntryOutOfRange { line_delta: l, bytecode_delta: b });
        }
        Ok(())
    }
}

/// A decoded line table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    /// Wrap decoded entries.
    pub fn new(entries: Vec<LineEntry>) -> Self {
        Self { entries }
    }

    /// Decode a whole table.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut table = Self::default();
        table.extend_from(bytes)?;
        Ok(table)
    }

    /// Decode entries from `bytes` and append them, keeping every entry read
    /// before a failure.
    pub(crate) fn extend_from(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut pos = 0;
        while pos < bytes.len() {
            self.entries.push(LineEntry::decode(bytes, &mut pos)?);
        }
        Ok(())
    }

    /// Encode every entry.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            entry.encode(&mut out)?;
        }
        Ok(out)
    }

    /// The entries, in order.
    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }

    /// Source line of the instruction `ip` bytes into the code.
    ///
    /// Entries are consumed while their bytecode delta does not exceed what is
    /// left of `ip`, so an offset sitting exactly on an entry boundary already
    /// belongs to the line that entry advances to.
    pub fn map_line(&self, ip: u64) -> u32 {
        let mut line = 1u32;
        let mut remaining = ip;
        for entry in &self.entries {
            if u64::from(entry.bytecode_delta) > remaining {
                break;
            }
            line = line.saturating_add(entry.line_delta);
            remaining -= u64::from(entry.bytecode_delta);
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_both_widths() {
        let entries = vec![
            LineEntry::new(0, 0),
            LineEntry::new(3, 31),
            LineEntry::new(4, 2),
            LineEntry::new(2047, 15),
            LineEntry::new(1, 0),
            LineEntry::new(300, 7),
        ];
        let table = LineTable::new(entries.clone());
        let bytes = table.encode().unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 2 + 2 + 1 + 2);
        assert_eq!(LineTable::decode(&bytes).unwrap().entries(), entries.as_slice());
    }

    #[test]
    fn test_long_entry_bit_layout() {
        let mut out = Vec::new();
        LineEntry::new(0x123, 5).encode(&mut out).unwrap();
        assert_eq!(out, vec![0x80 | 0x10 | 5, 0x23]);
    }

    #[test]
    fn test_unrepresentable_entry() {
        let err = LineEntry::new(4, 16).encode(&mut Vec::new()).unwrap_err();
        assert_eq!(err, DecodeError::LineEntryOutOfRange { line_delta: 4, bytecode_delta: 16 });
        assert!(LineEntry::new(2048, 0).encode(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_truncated_long_entry() {
        let mut table = LineTable::default();
        let err = table.extend_from(&[0x21, 0x85]).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedLineEntry(1));
        assert_eq!(table.entries(), &[LineEntry::new(1, 1)]);
    }

    #[test]
    fn test_map_line_boundaries() {
        // line 1 covers [0, 4), line 2 covers [4, 10), line 5 from 10 on
        let table = LineTable::new(vec![LineEntry::new(1, 4), LineEntry::new(3, 6)]);
        assert_eq!(table.map_line(0), 1);
        assert_eq!(table.map_line(3), 1);
        assert_eq!(table.map_line(4), 2);
        assert_eq!(table.map_line(9), 2);
        assert_eq!(table.map_line(10), 5);
        assert_eq!(table.map_line(1000), 5);
        assert_eq!(LineTable::default().map_line(7), 1);
    }
}
