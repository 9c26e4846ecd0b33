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

//! GC diagnostics and heap graph export

use std::{fs, io::Write, path::Path};

use eyre::{Result, WrapErr};
use mpdb_engine::{
    gc::{self, GcReport, ReportSource},
    render_dot, InspectContext, Target,
};
use tracing::info;

fn relay(report: GcReport, out: &mut impl Write) -> Result<()> {
    if report.source == ReportSource::Local {
        info!("Runtime not callable, report computed from the allocation table");
    }
    write!(out, "{}", report.text)?;
    if !report.text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// `gc_dump_info(&mp_plat_print)`, or its local equivalent.
pub fn gc_dump_info<T: Target>(ctx: &InspectContext<T>, out: &mut impl Write) -> Result<()> {
    relay(gc::dump_info(ctx)?, out)
}

/// `gc_dump_alloc_table(&mp_plat_print)`, or its local equivalent.
pub fn gc_dump_alloc_table<T: Target>(ctx: &InspectContext<T>, out: &mut impl Write) -> Result<()> {
    relay(gc::dump_alloc_table(ctx)?, out)
}

/// Build the heap graph and write it as DOT to `output`, or to `out` if none.
pub fn heap_graph<T: Target>(
    ctx: &InspectContext<T>,
    output: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let graph = mpdb_engine::heap_graph(ctx)?;
    let dot = render_dot(&graph);
    info!(nodes = graph.all_nodes().len(), edges = graph.edges.len(), "Built heap graph");

    match output {
        Some(path) => {
            fs::write(path, &dot).with_context(|| format!("Failed to write {}", path.display()))?;
            writeln!(out, "Heap graph written to {}", path.display())?;
        }
        None => write!(out, "{dot}")?,
    }
    Ok(())
}
