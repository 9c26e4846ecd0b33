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

//! Interned strings (qstrs).
//!
//! qstrs live in a chain of append-only pools. Each pool records how many ids
//! all earlier pools hold (`total_prev_len`), so an id belongs to the newest
//! pool whose `total_prev_len` is not above it. The newest pool is
//! `mp_state_ctx.vm.last_pool`; it moves as the program runs, so it is re-read
//! on every lookup and nothing here is cached.

use thiserror::Error;
use tracing::trace;

use crate::{InspectContext, Target, TargetError};

/// Struct type of a pool.
pub const POOL_TYPE: &str = "qstr_pool_t";

/// Upper bound on pool hops before a chain is declared corrupt.
pub const MAX_POOL_HOPS: usize = 4096;

/// Why a qstr id did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QstrError {
    /// `vm.last_pool` could not be located or read
    #[error("qstr pools unavailable: {0}")]
    NoPool(TargetError),
    /// Id above everything interned so far
    #[error("qstr {id} out of range (only {known} interned)")]
    OutOfRange {
        /// Requested id
        id: u64,
        /// Number of ids known to the newest pool
        known: u64,
    },
    /// The `prev` chain ended before reaching the id's pool
    #[error("qstr {id}: pool chain ends at {pool:#x}")]
    ChainBroken {
        /// Requested id
        id: u64,
        /// Last pool reached
        pool: u64,
    },
    /// The pool or the string data could not be read
    #[error("qstr {id}: {source}")]
    Unreadable {
        /// Requested id
        id: u64,
        /// Underlying failure
        source: TargetError,
    },
}

/// Header of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QstrPool {
    /// Address of the pool struct
    pub address: u64,
    /// Previous (older) pool, 0 for the first
    pub prev: u64,
    /// Ids held by all older pools
    pub total_prev_len: u64,
    /// Ids held by this pool
    pub len: u64,
    qstrs: u64,
}

impl QstrPool {
    /// Read the pool header at `address`.
    pub fn read<T: Target>(ctx: &InspectContext<T>, address: u64) -> Result<Self, TargetError> {
        let field = |name: &str| ctx.read_field(address, POOL_TYPE, name);
        Ok(Self {
            address,
            prev: field("prev")?,
            total_prev_len: field("total_prev_len")?,
            len: field("len")?,
            qstrs: address + ctx.field(POOL_TYPE, "qstrs")?.offset,
        })
    }

    /// One past the largest id this pool holds.
    pub fn end(&self) -> u64 {
        self.total_prev_len + self.len
    }

    /// Whether `id` lives in this pool.
    pub fn holds(&self, id: u64) -> bool {
        (self.total_prev_len..self.end()).contains(&id)
    }

    /// Address of the `char *` slot for `id`.
    fn slot(&self, id: u64, word_size: usize) -> u64 {
        self.qstrs + (id - self.total_prev_len) * word_size as u64
    }
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQstr {
    /// The string
    pub text: String,
    /// Pools walked back from the newest one
    pub hops: usize,
    /// Pool holding the id
    pub pool: u64,
}

/// Read-only view of the qstr pools of a session.
#[derive(Debug)]
pub struct QstrTable<'a, T> {
    ctx: &'a InspectContext<T>,
}

impl<'a, T: Target> QstrTable<'a, T> {
    /// View the pools of `ctx`.
    pub fn new(ctx: &'a InspectContext<T>) -> Self {
        Self { ctx }
    }

    /// Address of the newest pool.
    pub fn last_pool(&self) -> Result<u64, TargetError> {
        self.ctx.read_state_field("vm.last_pool")
    }

    /// Resolve an id, reporting how it failed.
    pub fn lookup(&self, id: u64) -> Result<ResolvedQstr, QstrError> {
        let unreadable = |source| QstrError::Unreadable { id, source };

        let mut address = self.last_pool().map_err(QstrError::NoPool)?;
        if address == 0 {
            return Err(QstrError::NoPool(TargetError::Other("vm.last_pool is NULL".into())));
        }
        let mut pool = QstrPool::read(self.ctx, address).map_err(unreadable)?;
        if id >= pool.end() {
            return Err(QstrError::OutOfRange { id, known: pool.end() });
        }

        let mut hops = 0;
        while id < pool.total_prev_len {
            if pool.prev == 0 || hops >= MAX_POOL_HOPS {
                return Err(QstrError::ChainBroken { id, pool: address });
            }
            address = pool.prev;
            pool = QstrPool::read(self.ctx, address).map_err(unreadable)?;
            hops += 1;
        }

        let data = self.ctx.read_word(pool.slot(id, self.ctx.word_size())).map_err(unreadable)?;
        let text = self.ctx.read_c_string(data).map_err(unreadable)?;
        trace!(id, hops, %text, "resolved qstr");
        Ok(ResolvedQstr { text, hops, pool: address })
    }

    /// Resolve an id, or `None` if it cannot be resolved right now.
    pub fn resolve(&self, id: u64) -> Option<String> {
        self.lookup(id).ok().map(|resolved| resolved.text)
    }

    /// Every pool from newest to oldest, stopping at the first unreadable one.
    pub fn pools(&self) -> Vec<QstrPool> {
        let mut pools = Vec::new();
        let Ok(mut address) = self.last_pool() else {
            return pools;
        };
        while address != 0 && pools.len() < MAX_POOL_HOPS {
            let Ok(pool) = QstrPool::read(self.ctx, address) else {
                break;
            };
            address = pool.prev;
            pools.push(pool);
        }
        pools
    }

    /// Number of ids interned so far.
    pub fn count(&self) -> Option<u64> {
        let address = self.last_pool().ok()?;
        QstrPool::read(self.ctx, address).ok().map(|pool| pool.end())
    }
}

impl<T: Target> InspectContext<T> {
    /// Shorthand for [`QstrTable::resolve`].
    pub fn qstr(&self, id: u64) -> Option<String> {
        QstrTable::new(self).resolve(id)
    }
}
