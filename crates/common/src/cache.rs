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

//! Lazy resolution cache.
//!
//! Every lookup against the host debugger (symbols, struct layouts, build
//! constants, type-descriptor addresses) goes through a [`LazyCache`]: the
//! first access resolves the name, later accesses hit the map. A failed
//! resolution is never stored, so the next access retries. Failures are
//! reported at `warn` the first time a name fails and at `trace` afterwards.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
};

use tracing::{debug, trace, warn};

/// A name-keyed cache of resolved handles.
///
/// Single-threaded by construction: an inspection session runs on one
/// logical thread of control, so interior mutability uses `RefCell`.
pub struct LazyCache<V> {
    label: &'static str,
    quiet: bool,
    entries: RefCell<HashMap<String, V>>,
    reported: RefCell<HashSet<String>>,
}

impl<V> fmt::Debug for LazyCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCache")
            .field("label", &self.label)
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}

impl<V: Clone> LazyCache<V> {
    /// Create an empty cache. `label` names the kind of handle in log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            quiet: false,
            entries: RefCell::new(HashMap::new()),
            reported: RefCell::new(HashSet::new()),
        }
    }

    /// Create a cache whose failures are expected (probing optional names);
    /// they are logged at `debug` instead of `warn`.
    pub fn quiet(label: &'static str) -> Self {
        Self { quiet: true, ..Self::new(label) }
    }

    /// Return the cached handle for `name`, resolving it on first access.
    ///
    /// On failure the entry is evicted (or never inserted) and the error is
    /// returned to the caller.
    pub fn try_get<E, F>(&self, name: &str, resolve: F) -> Result<V, E>
    where
        E: fmt::Display,
        F: FnOnce(&str) -> Result<V, E>,
    {
        if let Some(value) = self.entries.borrow().get(name) {
            return Ok(value.clone());
        }

        match resolve(name) {
            Ok(value) => {
                self.entries.borrow_mut().insert(name.to_string(), value.clone());
                Ok(value)
            }
            Err(err) => {
                self.evict(name);
                self.report(name, &err);
                Err(err)
            }
        }
    }

    /// Like [`LazyCache::try_get`], but swallows the error.
    pub fn get<E, F>(&self, name: &str, resolve: F) -> Option<V>
    where
        E: fmt::Display,
        F: FnOnce(&str) -> Result<V, E>,
    {
        self.try_get(name, resolve).ok()
    }

    /// Look at a cached entry without resolving.
    pub fn peek(&self, name: &str) -> Option<V> {
        self.entries.borrow().get(name).cloned()
    }

    /// Drop a single entry so the next access resolves again.
    pub fn evict(&self, name: &str) {
        self.entries.borrow_mut().remove(name);
    }

    /// Drop every cached entry and forget which failures were reported.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.reported.borrow_mut().clear();
    }

    /// Number of resolved entries currently held.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no entry has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn report(&self, name: &str, err: &dyn fmt::Display) {
        if self.reported.borrow_mut().insert(name.to_string()) {
            if self.quiet {
                debug!(kind = self.label, name, "unable to resolve: {err}");
            } else {
                warn!(kind = self.label, name, "unable to resolve: {err}");
            }
        } else {
            trace!(kind = self.label, name, "still unable to resolve: {err}");
        }
    }
}

/// Emit a `warn` once per key, `trace` afterwards.
///
/// Used for conditions that are not tied to a cache entry but would otherwise
/// flood the log on every heap walk (e.g. an optional struct field that this
/// build of the runtime does not have).
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: RefCell<HashSet<String>>,
}

impl WarnOnce {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` for `key`. Returns `true` the first time `key` is seen.
    pub fn warn(&self, key: &str, message: impl fmt::Display) -> bool {
        if self.seen.borrow_mut().insert(key.to_string()) {
            warn!("{message}");
            true
        } else {
            trace!("{message}");
            false
        }
    }
}
