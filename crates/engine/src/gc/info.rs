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

//! `gc_dump_info` / `gc_dump_alloc_table`.
//!
//! Both prefer the runtime's own functions, called in the inferior with
//! `&mp_plat_print`. Hosts that cannot call functions get a local rendering
//! computed from the allocation table in the same format.

use std::fmt;

use tracing::debug;

use super::{BlockKind, Heap};
use crate::{InspectContext, Target, TargetError};

const PLAT_PRINT: &str = "mp_plat_print";

/// Blocks per line in the allocation table dump.
pub const DUMP_LINE_BLOCKS: usize = 64;

/// Heap usage summary, as `gc_info` computes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcInfo {
    /// Pool bytes across all areas
    pub total: u64,
    /// Bytes in allocated blocks
    pub used: u64,
    /// Bytes in free blocks
    pub free: u64,
    /// Objects of exactly one block
    pub num_1block: usize,
    /// Objects of exactly two blocks
    pub num_2block: usize,
    /// Largest object, in blocks
    pub max_block: usize,
    /// Longest free run, in blocks
    pub max_free: usize,
}

impl GcInfo {
    /// Summarize every area of `heap`.
    pub fn collect(heap: &Heap) -> Self {
        let mut info = Self::default();
        for region in heap.regions() {
            let count = region.block_count();
            info.total += count as u64 * region.block_size;

            let mut free_run = 0;
            for block in 0..count {
                if region.kind(block) == BlockKind::Free {
                    free_run += 1;
                    info.free += region.block_size;
                    info.max_free = info.max_free.max(free_run);
                } else {
                    free_run = 0;
                }
            }
            for chain in region.chains() {
                match chain.len {
                    1 => info.num_1block += 1,
                    2 => info.num_2block += 1,
                    _ => {}
                }
                info.max_block = info.max_block.max(chain.len);
            }
        }
        info.used = info.total - info.free;
        info
    }
}

impl fmt::Display for GcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GC: total: {}, used: {}, free: {}", self.total, self.used, self.free)?;
        writeln!(
            f,
            " No. of 1-blocks: {}, 2-blocks: {}, max blk sz: {}, max free sz: {}",
            self.num_1block, self.num_2block, self.max_block, self.max_free
        )
    }
}

/// Allocation table rendering, one character per block.
#[derive(Debug, Clone, Copy)]
pub struct AllocTableDump<'a>(pub &'a Heap);

impl fmt::Display for AllocTableDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for region in self.0.regions() {
            write!(f, "GC memory layout; from {:#x}:", region.pool_start)?;
            let count = region.block_count();
            let mut block = 0;
            while block < count {
                let line_end = (block + DUMP_LINE_BLOCKS).min(count);

                // Collapse long runs of entirely free lines.
                let free_lines = (block..count)
                    .step_by(DUMP_LINE_BLOCKS)
                    .take_while(|start| {
                        let end = (start + DUMP_LINE_BLOCKS).min(count);
                        (*start..end).all(|b| region.kind(b) == BlockKind::Free)
                    })
                    .count();
                if free_lines >= 2 {
                    write!(f, "\n       ({free_lines} lines all free)")?;
                    block += free_lines * DUMP_LINE_BLOCKS;
                    continue;
                }

                write!(f, "\n{:08x}: ", block as u64 * region.block_size)?;
                for b in block..line_end {
                    write!(f, "{}", region.kind(b).symbol())?;
                }
                block = line_end;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Where a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// Printed by the runtime itself
    Inferior,
    /// Computed by the debugger from target memory
    Local,
}

/// Output of a GC diagnostic command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Producer of `text`
    pub source: ReportSource,
    /// The printed report
    pub text: String,
}

fn call_with_plat_print<T: Target>(
    ctx: &InspectContext<T>,
    function: &str,
) -> Result<String, TargetError> {
    let function_address = ctx.symbol(function)?.address;
    let print = ctx.symbol(PLAT_PRINT)?.address;
    ctx.target().call_function(function_address, &[print])
}

fn report<T: Target>(
    ctx: &InspectContext<T>,
    function: &str,
    local: impl FnOnce(&Heap) -> String,
) -> Result<GcReport, TargetError> {
    match call_with_plat_print(ctx, function) {
        Ok(text) => Ok(GcReport { source: ReportSource::Inferior, text }),
        Err(err) => {
            debug!(function, "inferior call failed, rendering locally: {err}");
            ctx.warn_once(function, format!("cannot call {function} ({err}); computing it locally"));
            let heap = Heap::read(ctx)?;
            Ok(GcReport { source: ReportSource::Local, text: local(&heap) })
        }
    }
}

/// Run `gc_dump_info(&mp_plat_print)`.
pub fn dump_info<T: Target>(ctx: &InspectContext<T>) -> Result<GcReport, TargetError> {
    report(ctx, "gc_dump_info", |heap| GcInfo::collect(heap).to_string())
}

/// Run `gc_dump_alloc_table(&mp_plat_print)`.
pub fn dump_alloc_table<T: Target>(ctx: &InspectContext<T>) -> Result<GcReport, TargetError> {
    report(ctx, "gc_dump_alloc_table", |heap| AllocTableDump(heap).to_string())
}
