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

//! Command modules for the MPDB CLI
//!
//! Every command writes its result to the given writer, so the one-shot
//! subcommands and the REPL share one implementation.

use std::{io::Write, path::PathBuf};

use clap::Subcommand;
use eyre::Result;
use mpdb_engine::{InspectContext, Target};

pub mod backtrace;
pub mod gc;
pub mod inspect;
pub mod params;
pub mod repl;

pub use backtrace::print_backtrace;
pub use gc::{gc_dump_alloc_table, gc_dump_info, heap_graph};
pub use inspect::{disassemble, print_object, print_qstr, print_state};
pub use params::{set_parameter, show_parameters};
pub use repl::run_repl;

/// Available commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Print every value-stack slot of the innermost interpreted frame
    State,
    /// Decode and print one value
    Obj {
        /// Expression: number, name, &name, *expr, $register, a + b
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        expr: Vec<String>,
    },
    /// Disassemble the bytecode function an expression refers to
    Dis {
        /// Expression evaluating to a function object
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        expr: Vec<String>,
    },
    /// Resolve an interned string id
    Qstr {
        /// Qstr id, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_number)]
        id: u64,
    },
    /// Print the GC heap summary
    #[command(alias = "gc_dump_info")]
    GcDumpInfo,
    /// Print the GC allocation table
    #[command(alias = "gc_dump_alloc_table")]
    GcDumpAllocTable,
    /// Export the heap object graph in DOT format
    Heap {
        /// Write the graph to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Backtrace with interpreted calls folded in
    #[command(alias = "backtrace")]
    Bt,
    /// Change a session parameter
    Set {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
    /// Show one or all session parameters
    Show {
        /// Parameter name
        name: Option<String>,
    },
    /// Read commands line by line from stdin
    Repl,
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid number {text:?}"))
}

/// Run one command against the session.
pub fn execute<T: Target>(ctx: &mut InspectContext<T>, command: &Commands, out: &mut impl Write) -> Result<()> {
    tracing::debug!(?command, "Executing command");
    match command {
        Commands::State => print_state(ctx, out),
        Commands::Obj { expr } => print_object(ctx, &expr.join(" "), out),
        Commands::Dis { expr } => disassemble(ctx, &expr.join(" "), out),
        Commands::Qstr { id } => print_qstr(ctx, *id, out),
        Commands::GcDumpInfo => gc_dump_info(ctx, out),
        Commands::GcDumpAllocTable => gc_dump_alloc_table(ctx, out),
        Commands::Heap { output } => heap_graph(ctx, output.as_deref(), out),
        Commands::Bt => print_backtrace(ctx, out),
        Commands::Set { name, value } => set_parameter(ctx, name, value),
        Commands::Show { name } => show_parameters(ctx, name.as_deref(), out),
        Commands::Repl => Err(eyre::eyre!("already reading commands interactively")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0x2a"), Ok(42));
        assert_eq!(parse_number(" 0X2A "), Ok(42));
        assert!(parse_number("forty-two").is_err());
        assert!(parse_number("-1").is_err());
    }
}
