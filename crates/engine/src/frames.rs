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

//! Python-level call stack.
//!
//! Each interpreted call shows up natively as up to three frames:
//!
//! ```text
//! #0  mp_execute_bytecode      <- holds `code_state`
//! #1  fun_bc_call
//! #2  mp_call_function_n_kw
//! ```
//!
//! [`FrameDecorator`] folds such a group into one [`LogicalFrame::Python`]
//! labelled with the function name, its arguments and the current source
//! line. Everything else passes through untouched.

use std::{collections::VecDeque, fmt};

use tracing::debug;

use crate::{
    bytecode::BytecodeFunction, target::NativeFrame, InspectContext, Target, TargetError,
};

/// Native function running the bytecode dispatch loop.
pub const DISPATCH_LOOP: &str = "mp_execute_bytecode";
/// Native function entering a bytecode function.
pub const CALL_TRAMPOLINE: &str = "fun_bc_call";
/// Native function dispatching a call by object type.
pub const CALL_DISPATCH: &str = "mp_call_function_n_kw";

/// Local variable of [`DISPATCH_LOOP`] pointing at the interpreter frame.
pub const CODE_STATE_LOCAL: &str = "code_state";

/// Struct type of an interpreter frame.
pub const CODE_STATE_TYPE: &str = "mp_code_state_t";

/// Most native frames folded into one logical frame.
pub const MAX_GROUP_FRAMES: usize = 3;

/// Most value-stack slots read from one interpreter frame.
pub const MAX_STATE_SLOTS: usize = 4096;

/// An interpreter frame (`mp_code_state_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeState {
    /// Address of the struct
    pub address: u64,
    /// Function being executed
    pub fun_bc: u64,
    /// Next instruction
    pub ip: u64,
    /// Top of the value stack
    pub sp: u64,
    /// Number of value-stack slots
    pub n_state: u64,
    /// Address of `state[0]`
    pub state: u64,
}

impl CodeState {
    /// Read the interpreter frame at `address`.
    pub fn read<T: Target>(ctx: &InspectContext<T>, address: u64) -> Result<Self, TargetError> {
        let field = |name: &str| ctx.read_field(address, CODE_STATE_TYPE, name);
        Ok(Self {
            address,
            fun_bc: field("fun_bc")?,
            ip: field("ip")?,
            sp: field("sp")?,
            n_state: field("n_state")?,
            state: address + ctx.field(CODE_STATE_TYPE, "state")?.offset,
        })
    }

    /// Value-stack slot `index`.
    pub fn slot<T: Target>(&self, ctx: &InspectContext<T>, index: u64) -> Result<u64, TargetError> {
        ctx.read_word(self.state + index * ctx.word_size() as u64)
    }

    /// Every value-stack slot, bounded by [`MAX_STATE_SLOTS`].
    pub fn slots<T: Target>(&self, ctx: &InspectContext<T>) -> Result<Vec<u64>, TargetError> {
        let count = (self.n_state as usize).min(MAX_STATE_SLOTS);
        ctx.read_words(self.state, count)
    }
}

/// Decoded view of an interpreted call.
#[derive(Debug, Clone, PartialEq)]
pub struct PyFrame {
    /// The interpreter frame
    pub code_state: CodeState,
    /// Function name, if resolvable
    pub name: Option<String>,
    /// Argument names and rendered values
    pub args: Vec<(String, String)>,
    /// Source file
    pub file: Option<String>,
    /// Current source line
    pub line: Option<u32>,
}

impl PyFrame {
    /// Decode the interpreter frame at `code_state`.
    pub fn read<T: Target>(ctx: &InspectContext<T>, code_state: u64) -> Result<Self, TargetError> {
        let code_state = CodeState::read(ctx, code_state)?;
        let function = BytecodeFunction::read(ctx, code_state.fun_bc)?;

        // Arguments occupy the top of the value stack, first argument highest.
        let n_state = function.signature.counts.map_or(code_state.n_state, |c| c.n_state);
        let args = function
            .arg_names(ctx)
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let value = n_state
                    .checked_sub(1 + i as u64)
                    .and_then(|slot| code_state.slot(ctx, slot).ok())
                    .map_or_else(|| "?".to_string(), |word| ctx.format_value(word));
                (name.unwrap_or_else(|| "?".to_string()), value)
            })
            .collect();

        Ok(Self {
            code_state,
            name: function.name(ctx),
            args,
            file: function.source_file(ctx),
            line: code_state.ip.checked_sub(function.bytecode).and_then(|ip| function.line_of(ip)),
        })
    }

    /// `name(arg=value,...)`, or just `name` without arguments.
    pub fn label(&self) -> String {
        let name = self.name.as_deref().unwrap_or("<unknown>");
        if self.args.is_empty() {
            return name.to_string();
        }
        let args = self.args.iter().map(|(arg, value)| format!("{arg}={value}")).collect::<Vec<_>>();
        format!("{name}({})", args.join(","))
    }
}

/// One entry of the decorated backtrace.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalFrame {
    /// A native frame shown as is
    Native(NativeFrame),
    /// A folded interpreter call
    Python {
        /// The dispatch loop frame
        frame: NativeFrame,
        /// Decoded call, when the interpreter frame could be read
        decoded: Option<PyFrame>,
        /// Trampoline frames folded into this one
        elided: Vec<NativeFrame>,
    },
}

impl LogicalFrame {
    /// The native frame the entry is anchored at.
    pub fn native(&self) -> &NativeFrame {
        match self {
            Self::Native(frame) | Self::Python { frame, .. } => frame,
        }
    }

    /// Function label as shown in the backtrace.
    pub fn function(&self) -> String {
        match self {
            Self::Python { decoded: Some(py), .. } => py.label(),
            _ => self.native().function.clone().unwrap_or_else(|| "??".to_string()),
        }
    }

    /// Source file, for decoded interpreter calls.
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Python { decoded: Some(py), .. } => py.file.as_deref(),
            _ => None,
        }
    }

    /// Source line, for decoded interpreter calls.
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::Python { decoded: Some(py), .. } => py.line,
            _ => None,
        }
    }

    /// Folded trampoline frames.
    pub fn elided(&self) -> &[NativeFrame] {
        match self {
            Self::Python { elided, .. } => elided,
            Self::Native(_) => &[],
        }
    }
}

impl fmt::Display for LogicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.native();
        write!(f, "#{:<3} {:#010x} in {}", frame.level, frame.pc, self.function())?;
        match (self.filename(), self.line()) {
            (Some(file), Some(line)) => write!(f, " at {file}:{line}")?,
            (Some(file), None) => write!(f, " at {file}")?,
            _ => {}
        }
        for elided in self.elided() {
            write!(
                f,
                "\n    #{:<3} {:#010x} in {}",
                elided.level,
                elided.pc,
                elided.function.as_deref().unwrap_or("??")
            )?;
        }
        Ok(())
    }
}

/// Position inside a trampoline group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Normal,
    InDispatchLoop,
    InTrampoline,
    InCallDispatch,
}

impl GroupState {
    /// Native function that extends the group from here, and the state it leads to.
    fn expects(self) -> Option<(&'static str, Self)> {
        match self {
            Self::InDispatchLoop => Some((CALL_TRAMPOLINE, Self::InTrampoline)),
            Self::InTrampoline => Some((CALL_DISPATCH, Self::InCallDispatch)),
            Self::Normal | Self::InCallDispatch => None,
        }
    }
}

/// Turns native frames (innermost first) into logical frames.
#[derive(Debug)]
pub struct FrameDecorator<'a, T, I> {
    ctx: &'a InspectContext<T>,
    frames: I,
    pushback: VecDeque<NativeFrame>,
    state: GroupState,
}

impl<'a, T: Target, I: Iterator<Item = NativeFrame>> FrameDecorator<'a, T, I> {
    /// Decorate `frames`.
    pub fn new(ctx: &'a InspectContext<T>, frames: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            ctx,
            frames: frames.into_iter(),
            pushback: VecDeque::with_capacity(MAX_GROUP_FRAMES),
            state: GroupState::Normal,
        }
    }

    fn pull(&mut self) -> Option<NativeFrame> {
        self.pushback.pop_front().or_else(|| self.frames.next())
    }

    fn decode(&self, frame: &NativeFrame) -> Option<PyFrame> {
        let code_state = frame.local(CODE_STATE_LOCAL).ok()?;
        match PyFrame::read(self.ctx, code_state) {
            Ok(py) => Some(py),
            Err(err) => {
                debug!(level = frame.level, "cannot decode interpreter frame: {err}");
                None
            }
        }
    }
}

impl<T: Target, I: Iterator<Item = NativeFrame>> Iterator for FrameDecorator<'_, T, I> {
    type Item = LogicalFrame;

    fn next(&mut self) -> Option<LogicalFrame> {
        let frame = self.pull()?;
        if !frame.is_function(DISPATCH_LOOP) {
            return Some(LogicalFrame::Native(frame));
        }

        self.state = GroupState::InDispatchLoop;
        let mut elided = Vec::new();
        while let Some((expected, next_state)) = self.state.expects() {
            match self.pull() {
                Some(candidate) if candidate.is_function(expected) => {
                    elided.push(candidate);
                    self.state = next_state;
                }
                Some(other) => {
                    self.pushback.push_back(other);
                    break;
                }
                None => break,
            }
        }
        self.state = GroupState::Normal;

        let decoded = self.decode(&frame);
        Some(LogicalFrame::Python { frame, decoded, elided })
    }
}

/// Innermost interpreter frame: the first native frame, from the innermost
/// outwards, that has a `code_state` local.
pub fn current_code_state<T: Target>(ctx: &InspectContext<T>) -> Result<CodeState, TargetError> {
    let frames = ctx.target().frames()?;
    let address = frames
        .iter()
        .find_map(|frame| frame.local(CODE_STATE_LOCAL).ok())
        .ok_or_else(|| TargetError::MissingLocal(CODE_STATE_LOCAL.to_string()))?;
    CodeState::read(ctx, address)
}

/// The decorated backtrace of the target.
pub fn backtrace<T: Target>(ctx: &InspectContext<T>) -> Result<Vec<LogicalFrame>, TargetError> {
    let frames = ctx.target().frames()?;
    Ok(FrameDecorator::new(ctx, frames).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SnapshotBuilder;

    fn native(level: usize, function: &str) -> NativeFrame {
        NativeFrame {
            level,
            function: Some(function.to_string()),
            pc: 0x1000 + level as u64,
            ..NativeFrame::default()
        }
    }

    fn names(frames: &[LogicalFrame]) -> Vec<(String, usize)> {
        frames
            .iter()
            .map(|f| (f.native().function.clone().unwrap_or_default(), f.elided().len()))
            .collect()
    }

    #[test]
    fn test_full_and_partial_groups() {
        let ctx = InspectContext::new(SnapshotBuilder::new(4).build());
        let frames = vec![
            native(0, "mp_hal_delay_ms"),
            native(1, DISPATCH_LOOP),
            native(2, CALL_TRAMPOLINE),
            native(3, CALL_DISPATCH),
            native(4, DISPATCH_LOOP),
            native(5, CALL_TRAMPOLINE),
            native(6, "mp_call_function_0"),
            native(7, DISPATCH_LOOP),
            native(8, "main"),
        ];
        let logical: Vec<_> = FrameDecorator::new(&ctx, frames).collect();
        assert_eq!(
            names(&logical),
            vec![
                ("mp_hal_delay_ms".to_string(), 0),
                (DISPATCH_LOOP.to_string(), 2),
                (DISPATCH_LOOP.to_string(), 1),
                ("mp_call_function_0".to_string(), 0),
                (DISPATCH_LOOP.to_string(), 0),
                ("main".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_group_never_reenters() {
        let ctx = InspectContext::new(SnapshotBuilder::new(4).build());
        // A call dispatch directly under the loop does not extend the group.
        let frames = vec![native(0, DISPATCH_LOOP), native(1, CALL_DISPATCH), native(2, CALL_TRAMPOLINE)];
        let logical: Vec<_> = FrameDecorator::new(&ctx, frames).collect();
        assert_eq!(logical.len(), 3);
        assert!(matches!(logical[1], LogicalFrame::Native(_)));
        assert!(matches!(logical[2], LogicalFrame::Native(_)));
    }

    #[test]
    fn test_undecodable_frame_keeps_native_name() {
        let ctx = InspectContext::new(SnapshotBuilder::new(4).build());
        let mut frame = native(0, DISPATCH_LOOP);
        frame.locals.insert(CODE_STATE_LOCAL.to_string(), 0xdead_0000);
        let logical: Vec<_> = FrameDecorator::new(&ctx, vec![frame]).collect();
        assert_eq!(logical[0].function(), DISPATCH_LOOP);
        assert!(logical[0].to_string().starts_with("#0   0x00001000 in mp_execute_bytecode"));
    }

    #[test]
    fn test_label_formatting() {
        let code_state =
            CodeState { address: 0, fun_bc: 0, ip: 0, sp: 0, n_state: 0, state: 0 };
        let mut py = PyFrame {
            code_state,
            name: Some("add".into()),
            args: vec![("a".into(), "1".into()), ("b".into(), "'x'".into())],
            file: Some("main.py".into()),
            line: Some(3),
        };
        assert_eq!(py.label(), "add(a=1,b='x')");
        py.args.clear();
        assert_eq!(py.label(), "add");
    }
}
