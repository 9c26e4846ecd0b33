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

//! Breakpoint auto-continue.
//!
//! Handlers are registered against native function symbols. When the target
//! stops at one of them, the handler runs and execution is resumed right away;
//! the continue request is fire-and-forget.

use std::fmt;

use tracing::{debug, warn};

use crate::{InspectContext, Target, TargetError};

/// Callback run when the target stops at a registered function.
pub type StopHandler<T> = Box<dyn FnMut(&InspectContext<T>)>;

struct Registration<T> {
    symbol: String,
    handler: StopHandler<T>,
}

/// What [`StopDispatcher::on_stop`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The pc matched no registered function
    Ignored,
    /// A handler ran
    Handled {
        /// Function that matched
        symbol: String,
        /// Whether the continue request was accepted
        continued: bool,
    },
}

/// Registry of stop handlers keyed by native function.
pub struct StopDispatcher<T> {
    registrations: Vec<Registration<T>>,
}

impl<T> fmt::Debug for StopDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopDispatcher")
            .field("symbols", &self.registrations.iter().map(|r| &r.symbol).collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Default for StopDispatcher<T> {
    fn default() -> Self {
        Self { registrations: Vec::new() }
    }
}

impl<T: Target> StopDispatcher<T> {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` whenever the target stops at the entry of `symbol`.
    /// A later registration for the same symbol replaces the earlier one.
    pub fn register(&mut self, symbol: &str, handler: impl FnMut(&InspectContext<T>) + 'static) {
        self.registrations.retain(|r| r.symbol != symbol);
        self.registrations.push(Registration { symbol: symbol.to_string(), handler: Box::new(handler) });
    }

    /// Registered symbols.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|r| r.symbol.as_str())
    }

    /// Handle a stop at `pc`.
    ///
    /// Symbols resolve through the session cache, so functions missing from
    /// this build are retried on every stop and never match.
    pub fn on_stop(&mut self, ctx: &InspectContext<T>, pc: u64) -> StopOutcome {
        let Some(registration) =
            self.registrations.iter_mut().find(|r| ctx.symbol_address(&r.symbol) == Some(pc))
        else {
            return StopOutcome::Ignored;
        };

        debug!(symbol = %registration.symbol, pc = %format!("{pc:#x}"), "stop handler");
        (registration.handler)(ctx);

        let continued = match ctx.target().request_continue() {
            Ok(()) => true,
            Err(err) => {
                warn!(symbol = %registration.symbol, "cannot resume after stop handler: {err}");
                false
            }
        };
        StopOutcome::Handled { symbol: registration.symbol.clone(), continued }
    }

    /// Handle a stop at the innermost frame's pc.
    pub fn on_stop_event(&mut self, ctx: &InspectContext<T>) -> Result<StopOutcome, TargetError> {
        let frames = ctx.target().frames()?;
        let pc = frames.first().map(|frame| frame.pc).ok_or(TargetError::NoStack)?;
        Ok(self.on_stop(ctx, pc))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::target::{SnapshotBuilder, SnapshotTarget};

    #[test]
    fn test_dispatch_and_continue() {
        let target = SnapshotBuilder::new(4).symbol("mp_hal_stdout_tx_strn", 0x8000).build();
        let ctx = InspectContext::new(target);

        let hits = Rc::new(Cell::new(0));
        let mut dispatcher = StopDispatcher::<SnapshotTarget>::new();
        let counter = hits.clone();
        dispatcher.register("mp_hal_stdout_tx_strn", move |_| counter.set(counter.get() + 1));
        dispatcher.register("not_in_this_build", |_| panic!("never matches"));

        assert_eq!(dispatcher.on_stop(&ctx, 0x8004), StopOutcome::Ignored);
        assert_eq!(
            dispatcher.on_stop(&ctx, 0x8000),
            StopOutcome::Handled { symbol: "mp_hal_stdout_tx_strn".into(), continued: true }
        );
        assert_eq!(hits.get(), 1);
        assert_eq!(ctx.target().continue_requests(), 1);
        assert!(dispatcher.on_stop_event(&ctx).is_err());
    }
}
