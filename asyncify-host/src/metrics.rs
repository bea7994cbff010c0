// Copyright 2025 AgentReplay (https://github.com/agentreplay)
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

//! Boundary counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the dispatcher, the future table and the guest queue
#[derive(Debug, Default)]
pub struct BoundaryMetrics {
    calls: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
    delivered: AtomicU64,
    cancelled: AtomicU64,
    stale: AtomicU64,
    faults: AtomicU64,
}

/// Point-in-time copy of [`BoundaryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Calls received from the guest
    pub calls: u64,
    /// Calls refused before execution (protocol, bounds, validation)
    pub rejected: u64,
    /// Calls answered with a value
    pub completed: u64,
    /// Calls answered with an execution or dispatch error
    pub failed: u64,
    /// Futures handed out
    pub pending: u64,
    /// Callbacks enqueued for the guest
    pub delivered: u64,
    /// Futures removed without a callback
    pub cancelled: u64,
    /// Completions that found no pending future
    pub stale: u64,
    /// Fatal guest faults
    pub faults: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl BoundaryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_call, calls);
    counter!(record_rejected, rejected);
    counter!(record_completed, completed);
    counter!(record_failed, failed);
    counter!(record_pending, pending);
    counter!(record_delivered, delivered);
    counter!(record_stale, stale);
    counter!(record_fault, faults);

    pub fn record_cancelled(&self, count: u64) {
        self.cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}
