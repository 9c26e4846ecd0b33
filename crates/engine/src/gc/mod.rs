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

//! Garbage-collected heap.
//!
//! The MicroPython GC keeps no per-object header. Ownership lives in the
//! allocation table (ATB, 2 bits per block: FREE/HEAD/TAIL/MARK) and the
//! optional finaliser table (FTB, 1 bit per block). An object is a HEAD (or
//! MARK, a head that survived the current mark phase) followed by TAIL blocks.
//!
//! ```text
//! ATB byte:  b3 b3 b2 b2 b1 b1 b0 b0      block n lives in byte n/4 at bit (n%4)*2
//! FTB byte:  b7 b6 b5 b4 b3 b2 b1 b0      block n lives in byte n/8 at bit n%8
//! ```
//!
//! Heaps may have several areas linked through `next`; each is a [`HeapRegion`].

mod info;

pub use info::{dump_alloc_table, dump_info, AllocTableDump, GcInfo, GcReport, ReportSource};

use std::ops::Range;

use tracing::debug;

use crate::{InspectContext, Target, TargetError};

/// Struct type of one heap area.
pub const AREA_TYPE: &str = "mp_state_mem_area_t";

/// Words per GC block in a stock build (`MICROPY_BYTES_PER_GC_BLOCK`).
pub const WORDS_PER_BLOCK: usize = 4;

/// Upper bound on chained areas before the list is declared corrupt.
pub const MAX_REGIONS: usize = 64;

/// Largest allocation table read from the target, in bytes.
pub const MAX_ALLOC_TABLE_BYTES: u64 = 4 << 20;

/// State of one block in the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Unallocated
    Free,
    /// First block of an object
    Head,
    /// Continuation of the object started by the nearest preceding head
    Tail,
    /// Head marked reachable during collection
    Mark,
}

impl BlockKind {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Free,
            1 => Self::Head,
            2 => Self::Tail,
            _ => Self::Mark,
        }
    }

    /// ATB encoding.
    pub fn bits(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Head => 1,
            Self::Tail => 2,
            Self::Mark => 3,
        }
    }

    /// Whether this block starts an object.
    pub fn is_head(self) -> bool {
        matches!(self, Self::Head | Self::Mark)
    }

    /// Character used by the allocation table dump.
    pub fn symbol(self) -> char {
        match self {
            Self::Free => '.',
            Self::Head => 'h',
            Self::Tail => '=',
            Self::Mark => 'm',
        }
    }
}

/// A packed per-block bit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTable {
    bits_per_block: u32,
}

/// The allocation table: 2 bits per block.
pub const ALLOC_TABLE: BitTable = BitTable::new(2);

/// The finaliser table: 1 bit per block.
pub const FINALISER_TABLE: BitTable = BitTable::new(1);

impl BitTable {
    /// A table with `bits_per_block` bits (1, 2, 4 or 8) per block.
    pub const fn new(bits_per_block: u32) -> Self {
        Self { bits_per_block }
    }

    /// Blocks described by one byte.
    pub const fn blocks_per_byte(&self) -> usize {
        8 / self.bits_per_block as usize
    }

    /// Entry for `block`, or `None` past the end of `table`.
    pub fn lookup(&self, table: &[u8], block: usize) -> Option<u8> {
        let per_byte = self.blocks_per_byte();
        let byte = *table.get(block / per_byte)?;
        let shift = (block % per_byte) as u32 * self.bits_per_block;
        Some((byte >> shift) & ((1u8 << self.bits_per_block) - 1))
    }

    /// Overwrite the entry for `block`. Out-of-range blocks are ignored.
    pub fn store(&self, table: &mut [u8], block: usize, value: u8) {
        let per_byte = self.blocks_per_byte();
        let shift = (block % per_byte) as u32 * self.bits_per_block;
        let mask = ((1u8 << self.bits_per_block) - 1) << shift;
        if let Some(byte) = table.get_mut(block / per_byte) {
            *byte = (*byte & !mask) | ((value << shift) & mask);
        }
    }
}

/// One run of blocks making up an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChain {
    /// Head block index
    pub head: usize,
    /// Number of blocks, head included
    pub len: usize,
    /// Kind of the head block (`Head` or `Mark`)
    pub kind: BlockKind,
    /// Whether the head has a finaliser registered
    pub finaliser: bool,
}

impl BlockChain {
    /// Block indices covered by the chain.
    pub fn blocks(&self) -> Range<usize> {
        self.head..self.head + self.len
    }
}

/// One heap area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapRegion {
    /// Position in the area list
    pub index: usize,
    /// Address of the `mp_state_mem_area_t` describing it (0 when synthetic)
    pub area_address: u64,
    /// First byte of the pool
    pub pool_start: u64,
    /// One past the last byte of the pool
    pub pool_end: u64,
    /// Bytes per block
    pub block_size: u64,
    /// Next area (0 for the last)
    pub next: u64,
    alloc_table: Vec<u8>,
    finaliser_table: Option<Vec<u8>>,
}

impl HeapRegion {
    /// Build a region from already captured tables.
    pub fn new(
        index: usize,
        pool_start: u64,
        pool_end: u64,
        block_size: u64,
        alloc_table: Vec<u8>,
        finaliser_table: Option<Vec<u8>>,
    ) -> Self {
        Self {
            index,
            area_address: 0,
            pool_start,
            pool_end,
            block_size: block_size.max(1),
            next: 0,
            alloc_table,
            finaliser_table,
        }
    }

    /// Read the area at `area_address`.
    ///
    /// The finaliser table is optional (`MICROPY_ENABLE_FINALISER`); a missing
    /// field or unreadable table just leaves it out.
    pub fn read<T: Target>(
        ctx: &InspectContext<T>,
        index: usize,
        area_address: u64,
    ) -> Result<Self, TargetError> {
        let field = |name: &str| ctx.read_field(area_address, AREA_TYPE, name);

        let atb_start = field("gc_alloc_table_start")?;
        let atb_len = field("gc_alloc_table_byte_len")?.min(MAX_ALLOC_TABLE_BYTES);
        let pool_start = field("gc_pool_start")?;
        let pool_end = field("gc_pool_end")?;
        let block_size = (WORDS_PER_BLOCK * ctx.word_size()) as u64;

        let alloc_table = ctx.read_bytes(atb_start, atb_len as usize)?;
        let ftb_len = atb_len.div_ceil(2) as usize;
        let finaliser_table = match field("gc_finaliser_table_start") {
            Ok(0) => None,
            Ok(ftb_start) => ctx.read_bytes(ftb_start, ftb_len).ok(),
            Err(err) => {
                ctx.warn_once("gc_finaliser_table_start", format!("finaliser table unavailable: {err}"));
                None
            }
        };
        let next = field("next").unwrap_or(0);

        Ok(Self {
            index,
            area_address,
            next,
            ..Self::new(index, pool_start, pool_end, block_size, alloc_table, finaliser_table)
        })
    }

    /// Number of blocks covered by both the allocation table and the pool.
    pub fn block_count(&self) -> usize {
        let by_table = self.alloc_table.len() * ALLOC_TABLE.blocks_per_byte();
        let by_pool = (self.pool_end.saturating_sub(self.pool_start) / self.block_size) as usize;
        by_table.min(by_pool)
    }

    /// Whether `address` is inside the pool.
    pub fn contains(&self, address: u64) -> bool {
        self.pool_start <= address && address < self.pool_end
    }

    /// Block holding `address`; with `aligned`, only block starts qualify.
    pub fn block_of(&self, address: u64, aligned: bool) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        let offset = address - self.pool_start;
        if aligned && offset % self.block_size != 0 {
            return None;
        }
        Some((offset / self.block_size) as usize)
    }

    /// First byte of `block`.
    pub fn block_address(&self, block: usize) -> u64 {
        self.pool_start + block as u64 * self.block_size
    }

    /// Allocation state of `block`; blocks past the table are free.
    pub fn kind(&self, block: usize) -> BlockKind {
        ALLOC_TABLE.lookup(&self.alloc_table, block).map_or(BlockKind::Free, BlockKind::from_bits)
    }

    /// Whether `block` has a finaliser registered.
    pub fn has_finaliser(&self, block: usize) -> bool {
        self.finaliser_table
            .as_deref()
            .and_then(|table| FINALISER_TABLE.lookup(table, block))
            .is_some_and(|bit| bit == 1)
    }

    /// Head of the chain containing `block`.
    ///
    /// Walks back over TAIL blocks. Landing on a FREE block, or running off the
    /// start of the region, returns `block` itself: the caller then sees a
    /// non-head block and treats it as "no containing object".
    pub fn previous_head(&self, block: usize) -> usize {
        let mut current = block;
        loop {
            match self.kind(current) {
                BlockKind::Free => return block,
                BlockKind::Head | BlockKind::Mark => return current,
                BlockKind::Tail => match current.checked_sub(1) {
                    Some(prev) => current = prev,
                    None => return block,
                },
            }
        }
    }

    /// Head block of the object containing `address`, if any.
    pub fn object_head(&self, address: u64) -> Option<usize> {
        let block = self.block_of(address, false)?;
        let head = self.previous_head(block);
        self.kind(head).is_head().then_some(head)
    }

    /// Chain starting at `head`, if `head` is a head block.
    pub fn chain_at(&self, head: usize) -> Option<BlockChain> {
        let kind = self.kind(head);
        if !kind.is_head() {
            return None;
        }
        let count = self.block_count();
        let len = 1 + (head + 1..count).take_while(|b| self.kind(*b) == BlockKind::Tail).count();
        Some(BlockChain { head, len, kind, finaliser: self.has_finaliser(head) })
    }

    /// All objects, in one forward pass over the table.
    pub fn chains(&self) -> Chains<'_> {
        Chains { region: self, block: 0, count: self.block_count(), open: None }
    }

    /// Raw allocation table bytes.
    pub fn alloc_table(&self) -> &[u8] {
        &self.alloc_table
    }
}

/// Iterator over the chains of a region. See [`HeapRegion::chains`].
#[derive(Debug, Clone)]
pub struct Chains<'a> {
    region: &'a HeapRegion,
    block: usize,
    count: usize,
    open: Option<BlockChain>,
}

impl Iterator for Chains<'_> {
    type Item = BlockChain;

    fn next(&mut self) -> Option<BlockChain> {
        while self.block < self.count {
            let block = self.block;
            self.block += 1;

            match self.region.kind(block) {
                BlockKind::Tail => {
                    // A TAIL with no open chain is orphaned and belongs to nothing.
                    if let Some(chain) = self.open.as_mut() {
                        chain.len += 1;
                    }
                }
                kind @ (BlockKind::Head | BlockKind::Mark) => {
                    let started = BlockChain {
                        head: block,
                        len: 1,
                        kind,
                        finaliser: self.region.has_finaliser(block),
                    };
                    if let Some(done) = self.open.replace(started) {
                        return Some(done);
                    }
                }
                BlockKind::Free => {
                    if let Some(done) = self.open.take() {
                        return Some(done);
                    }
                }
            }
        }
        self.open.take()
    }
}

/// All heap areas of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heap {
    regions: Vec<HeapRegion>,
}

impl Heap {
    /// Wrap already built regions.
    pub fn from_regions(regions: Vec<HeapRegion>) -> Self {
        Self { regions }
    }

    /// Walk the area list starting at `mp_state_ctx.mem.area`.
    ///
    /// A fault while following `next` ends the list; whatever was read so far
    /// is returned.
    pub fn read<T: Target>(ctx: &InspectContext<T>) -> Result<Self, TargetError> {
        let first = ctx.state_field("mem.area")?.address;
        let mut regions = vec![HeapRegion::read(ctx, 0, first)?];

        while regions.len() < MAX_REGIONS {
            let Some(next) = regions.last().map(|r| r.next).filter(|next| *next != 0) else {
                break;
            };
            match HeapRegion::read(ctx, regions.len(), next) {
                Ok(region) => regions.push(region),
                Err(err) => {
                    debug!(area = %format!("{next:#x}"), "heap area list truncated: {err}");
                    break;
                }
            }
        }
        debug!(regions = regions.len(), "read heap");
        Ok(Self { regions })
    }

    /// Areas in list order.
    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    /// Area whose pool contains `address`. With `aligned`, the address must
    /// also start a block.
    pub fn region_containing(&self, address: u64, aligned: bool) -> Option<(usize, &HeapRegion)> {
        self.regions
            .iter()
            .enumerate()
            .find(|(_, region)| region.block_of(address, aligned).is_some())
    }

    /// Region and head block of the object containing `address`.
    pub fn object_at(&self, address: u64) -> Option<(&HeapRegion, usize)> {
        let (_, region) = self.region_containing(address, false)?;
        region.object_head(address).map(|head| (region, head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BlockKind::*;

    fn region(kinds: &[BlockKind]) -> HeapRegion {
        let mut atb = vec![0u8; kinds.len().div_ceil(4)];
        for (block, kind) in kinds.iter().enumerate() {
            ALLOC_TABLE.store(&mut atb, block, kind.bits());
        }
        let pool_start = 0x2000_0000;
        HeapRegion::new(0, pool_start, pool_start + 16 * atb.len() as u64 * 4, 16, atb, None)
    }

    #[test]
    fn test_bit_table_formula() {
        // blocks 0..4 = HEAD, TAIL, FREE, MARK
        let atb = [0b11_00_10_01u8];
        let kinds: Vec<_> =
            (0..4).map(|b| BlockKind::from_bits(ALLOC_TABLE.lookup(&atb, b).unwrap())).collect();
        assert_eq!(kinds, vec![Head, Tail, Free, Mark]);
        assert_eq!(ALLOC_TABLE.lookup(&atb, 4), None);

        let ftb = [0b0000_0100u8];
        assert_eq!(FINALISER_TABLE.lookup(&ftb, 2), Some(1));
        assert_eq!(FINALISER_TABLE.lookup(&ftb, 3), Some(0));
    }

    #[test]
    fn test_chains_split_on_every_head() {
        let r = region(&[Head, Tail, Tail, Free, Head, Mark, Free]);
        // A MARK opens a chain just like a HEAD, so blocks 4 and 5 are two objects.
        let chains: Vec<_> = r.chains().map(|c| c.blocks()).collect();
        assert_eq!(chains, vec![0..3, 4..5, 5..6]);
    }

    #[test]
    fn test_marked_object_with_tails() {
        let r = region(&[Head, Tail, Tail, Free, Mark, Tail, Free]);
        let chains: Vec<_> = r.chains().collect();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].blocks(), 0..3);
        assert_eq!(chains[1].blocks(), 4..6);
        assert_eq!(chains[1].kind, Mark);
    }

    #[test]
    fn test_chain_open_at_end_is_emitted() {
        let r = region(&[Free, Tail, Head, Tail, Tail, Tail, Tail, Tail]);
        let chains: Vec<_> = r.chains().map(|c| c.blocks()).collect();
        assert_eq!(chains, vec![2..8]);
    }

    #[test]
    fn test_previous_head() {
        let r = region(&[Free, Head, Tail, Tail]);
        assert_eq!(r.previous_head(3), 1);
        assert_eq!(r.previous_head(1), 1);
        // FREE block: returned unchanged
        assert_eq!(r.previous_head(0), 0);

        // Orphan tails running off the start return the original block.
        let r = region(&[Tail, Tail, Tail, Free]);
        assert_eq!(r.previous_head(2), 2);

        // Tail preceded by FREE never skips the gap.
        let r = region(&[Head, Free, Tail]);
        assert_eq!(r.previous_head(2), 2);
        assert_eq!(r.object_head(r.block_address(2)), None);
    }

    #[test]
    fn test_region_lookup_alignment() {
        let r = region(&[Head, Tail, Free, Free]);
        let heap = Heap::from_regions(vec![r]);
        assert!(heap.region_containing(0x2000_0010, true).is_some());
        assert!(heap.region_containing(0x2000_0014, true).is_none());
        assert!(heap.region_containing(0x2000_0014, false).is_some());
        assert!(heap.region_containing(0x1fff_fff0, false).is_none());

        let (region, head) = heap.object_at(0x2000_0018).unwrap();
        assert_eq!(head, 0);
        assert_eq!(region.chain_at(head).unwrap().len, 2);
    }
}
