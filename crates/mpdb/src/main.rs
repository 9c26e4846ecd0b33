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

//! MPDB - MicroPython Debugger
//!
//! Inspects the interpreter state of a paused or crashed MicroPython process
//! from a memory snapshot: decoded objects, interned strings, the GC heap,
//! bytecode and interpreted backtraces.

use std::path::PathBuf;

use clap::Parser;
use eyre::Result;
use mpdb_engine::{InspectContext, MapDisplay, ReprSetting, SnapshotTarget};

mod cmd;
mod config;

use cmd::Commands;

/// Command-line interface for MPDB
#[derive(Debug, Parser)]
#[command(name = "mpdb")]
#[command(about = "MicroPython Debugger - Inspect the interpreter state of a MicroPython process")]
#[command(version)]
pub struct Cli {
    /// Snapshot of the inspected process (JSON)
    #[arg(long, env = "MPDB_SNAPSHOT")]
    pub snapshot: PathBuf,

    /// Object representation scheme: auto, REPR_A, REPR_B, REPR_C or REPR_D
    #[arg(long, env = "MPDB_REPR")]
    pub repr: Option<ReprSetting>,

    /// Which dict slots to print: filled or all
    #[arg(long)]
    pub map_display: Option<MapDisplay>,

    /// Also write a daily-rolling log file
    #[arg(long)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = config::MpdbConfig::load()?;
    mpdb_common::logging::init_logging("mpdb", cli.log_file || config.logging.file)?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "Loaded configuration");
    }

    // Flags override the configuration file.
    let mut settings = config.settings();
    if let Some(repr) = cli.repr {
        settings.repr = repr;
    }
    if let Some(map_display) = cli.map_display {
        settings.map_display = map_display;
    }

    tracing::info!(snapshot = %cli.snapshot.display(), "Opening snapshot");
    let target = SnapshotTarget::from_path(&cli.snapshot)?;
    let mut ctx = InspectContext::with_settings(target, settings);

    let stdout = std::io::stdout();
    match cli.command {
        Commands::Repl => cmd::run_repl(&mut ctx, std::io::stdin().lock(), &mut stdout.lock()),
        command => cmd::execute(&mut ctx, &command, &mut stdout.lock()),
    }
}
