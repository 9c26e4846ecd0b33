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

//! MPDB Engine - MicroPython memory image decoding
//!
//! Everything here works on a paused, possibly crashed process seen through a
//! [`Target`]: symbol lookup, struct layouts and raw memory reads. Nothing
//! needs the interpreter to cooperate.
//!
//! - [`repr`] decodes `mp_obj_t` words under the four object representations
//! - [`qstr`] resolves interned strings through the pool chain
//! - [`gc`] walks the allocation table of each heap area
//! - [`bytecode`] decodes function preludes, line tables and instructions
//! - [`frames`] folds native backtraces into interpreted calls
//! - [`graph`] builds the heap object graph and renders it as DOT
//! - [`printer`] renders objects for humans
//!
//! All of them take an [`InspectContext`], which owns the target, the
//! session settings and the lazy lookup caches.

pub mod bytecode;
pub mod context;
pub mod error;
pub mod events;
pub mod expr;
pub mod frames;
pub mod gc;
pub mod graph;
pub mod printer;
pub mod qstr;
pub mod repr;
pub mod settings;
pub mod target;
pub mod test_utils;
pub mod types;

pub use context::{FieldRef, InspectContext};
pub use error::{DecodeError, InspectError, InspectResult, TargetError};
pub use events::{StopDispatcher, StopOutcome};
pub use expr::{evaluate, Expr, ExprError};
pub use frames::{backtrace, LogicalFrame, PyFrame};
pub use gc::{GcInfo, Heap, HeapRegion};
pub use graph::{heap_graph, render_dot, HeapGraph};
pub use printer::ObjPrinter;
pub use qstr::{QstrError, QstrTable};
pub use repr::{Immediate, ObjRepr, TaggedValue};
pub use settings::{MapDisplay, ReprSetting, SettingError, Settings};
pub use target::{NativeFrame, SnapshotTarget, Target};
