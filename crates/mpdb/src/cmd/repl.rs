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

//! Interactive command loop.
//!
//! Each input line is one command, with the same syntax as the subcommands
//! and an optional `mpy` prefix (`mpy obj $r0`). Session parameters changed
//! with `set` persist for the rest of the session. A failing command reports
//! its error on stderr and the loop carries on.

use std::io::{self, BufRead, IsTerminal, Write};

use clap::Parser;
use eyre::Result;
use mpdb_engine::{InspectContext, Target};

use super::{execute, Commands};

const PROMPT: &str = "(mpdb) ";

/// One REPL line
#[derive(Debug, Parser)]
#[command(name = "mpy", no_binary_name = true, disable_version_flag = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Commands,
}

/// What to do with one input line.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Skip,
    Quit,
    Run(Vec<String>),
}

fn split_line(line: &str) -> Line {
    let mut words = line.split_whitespace().peekable();
    if words.peek() == Some(&"mpy") {
        words.next();
    }
    match words.peek().copied() {
        None => Line::Skip,
        Some(word) if word.starts_with('#') => Line::Skip,
        Some("quit" | "exit" | "q") => Line::Quit,
        Some(_) => Line::Run(words.map(str::to_string).collect()),
    }
}

/// Read commands from `input` until end of input or `quit`.
pub fn run_repl<T: Target>(
    ctx: &mut InspectContext<T>,
    mut input: impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    let interactive = io::stdin().is_terminal();
    let mut line = String::new();
    loop {
        if interactive {
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        let words = match split_line(&line) {
            Line::Skip => continue,
            Line::Quit => break,
            Line::Run(words) => words,
        };
        match ReplLine::try_parse_from(&words) {
            Ok(ReplLine { command }) => {
                if let Err(err) = execute(ctx, &command, out) {
                    tracing::debug!(line = line.trim(), "Command failed: {err:#}");
                    eprintln!("error: {err:#}");
                }
            }
            // --help and friends are not failures
            Err(err) if !err.use_stderr() => write!(out, "{}", err.render())?,
            Err(err) => eprint!("{}", err.render()),
        }
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line() {
        assert_eq!(split_line("   \n"), Line::Skip);
        assert_eq!(split_line("# comment"), Line::Skip);
        assert_eq!(split_line("mpy"), Line::Skip);
        assert_eq!(split_line("quit\n"), Line::Quit);
        let words = ["obj", "counter", "+", "1"].map(String::from).to_vec();
        assert_eq!(split_line("mpy obj counter + 1\n"), Line::Run(words));
    }

    #[test]
    fn test_lines_parse_as_commands() {
        let parse = |line: &str| match split_line(line) {
            Line::Run(words) => ReplLine::try_parse_from(words).map(|l| l.command).ok(),
            _ => None,
        };
        assert_eq!(parse("gc_dump_info"), Some(Commands::GcDumpInfo));
        assert_eq!(parse("mpy qstr 0x10"), Some(Commands::Qstr { id: 16 }));
        assert_eq!(
            parse("set repr REPR_B"),
            Some(Commands::Set { name: "repr".to_string(), value: "REPR_B".to_string() })
        );
        assert_eq!(parse("obj *0x10"), Some(Commands::Obj { expr: vec!["*0x10".to_string()] }));
        assert_eq!(parse("frobnicate"), None);
    }
}
