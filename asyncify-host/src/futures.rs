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

//! Pending-future table
//!
//! Every asynchronous call gets an index. The table maps the index to the
//! guest callback that must run when the host-side work finishes, and makes
//! sure that happens at most once.
//!
//! # Concurrency Model
//!
//! `register`, `complete` and `cancel` take one mutex. A completion removes
//! its record and enqueues the callback while still holding it, so the order
//! of callbacks in the guest queue is the order in which futures reached a
//! terminal state. A `cancel` racing a `complete` is settled by whichever
//! takes the mutex first; the loser sees no record.
//!
//! Indices start at 1 (0 means "no future" on the wire), grow
//! monotonically and are never reused. Running past the configured limit is
//! fatal: all pending futures are swept and the table is closed.
//!
//! There is no timeout. A capability that never completes keeps its index
//! until someone cancels it.

use crate::catalog::CapabilityResult;
use crate::error::{HostError, HostResult};
use crate::memory::Pointer;
use crate::metrics::BoundaryMetrics;
use crate::wire;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Guest-supplied callback template carried by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FutureTemplate {
    /// Opaque guest buffer echoed back in the reply
    pub data: Pointer,
    /// Guest function table slot of the callback
    pub callback: u32,
    /// Context handed to the callback
    pub context: Pointer,
}

impl From<wire::Future> for FutureTemplate {
    fn from(f: wire::Future) -> Self {
        Self {
            data: Pointer::new(f.data, f.len),
            callback: f.callback,
            context: Pointer::new(f.context, f.context_len),
        }
    }
}

/// A registered future. Immutable once handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutureRecord {
    pub index: u32,
    pub data: Pointer,
    pub callback: u32,
    pub context: Pointer,
}

impl From<FutureRecord> for wire::Future {
    fn from(r: FutureRecord) -> Self {
        wire::Future {
            data: r.data.offset,
            len: r.data.len,
            callback: r.callback,
            context: r.context.offset,
            context_len: r.context.len,
            index: r.index,
        }
    }
}

/// Receives callbacks that are ready to run in the guest.
///
/// `deliver` is called with the table lock held and must not block.
pub trait CallbackSink: Send + Sync {
    fn deliver(&self, record: FutureRecord, result: CapabilityResult) -> HostResult<()>;
}

struct TableState {
    next_index: u64,
    pending: HashMap<u32, FutureRecord>,
    closed: bool,
}

pub struct FutureTable {
    state: Mutex<TableState>,
    sink: Arc<dyn CallbackSink>,
    limit: u32,
    metrics: Arc<BoundaryMetrics>,
}

impl FutureTable {
    pub fn new(sink: Arc<dyn CallbackSink>, limit: u32, metrics: Arc<BoundaryMetrics>) -> Self {
        Self {
            state: Mutex::new(TableState {
                next_index: 1,
                pending: HashMap::new(),
                closed: false,
            }),
            sink,
            limit,
            metrics,
        }
    }

    /// Assign the next index to `template` and record it as pending.
    pub fn register(&self, template: FutureTemplate) -> HostResult<FutureRecord> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(HostError::GuestUnavailable(
                "future table is closed".to_string(),
            ));
        }
        if state.next_index > self.limit as u64 {
            let swept = Self::sweep(&mut state);
            self.metrics.record_cancelled(swept as u64);
            self.metrics.record_fault();
            tracing::error!(limit = self.limit, swept, "Future index space exhausted");
            return Err(HostError::IndexExhausted { limit: self.limit });
        }

        // Bounded by `limit` above.
        let index = state.next_index as u32;
        state.next_index += 1;

        let record = FutureRecord {
            index,
            data: template.data,
            callback: template.callback,
            context: template.context,
        };
        state.pending.insert(index, record);
        self.metrics.record_pending();
        tracing::trace!(index, "Registered future");
        Ok(record)
    }

    /// Finish the future `index` and queue its callback.
    ///
    /// Completing an index that is no longer pending (already completed,
    /// cancelled or swept) does nothing and reports
    /// [`HostError::StaleCompletion`].
    pub fn complete(&self, index: u32, result: CapabilityResult) -> HostResult<()> {
        let mut state = self.state.lock();
        let Some(record) = state.pending.remove(&index) else {
            self.metrics.record_stale();
            tracing::warn!(index, "Stale completion ignored");
            return Err(HostError::StaleCompletion { index });
        };

        if let Err(e) = self.sink.deliver(record, result) {
            let swept = Self::sweep(&mut state);
            self.metrics.record_cancelled(swept as u64);
            self.metrics.record_fault();
            tracing::error!(index, swept, error = %e, "Callback delivery failed");
            return Err(e);
        }
        self.metrics.record_delivered();
        tracing::trace!(index, "Future completed");
        Ok(())
    }

    /// Drop the future `index` without running its callback.
    ///
    /// Returns `false` if it was not pending.
    pub fn cancel(&self, index: u32) -> bool {
        let removed = self.state.lock().pending.remove(&index).is_some();
        if removed {
            self.metrics.record_cancelled(1);
            tracing::debug!(index, "Future cancelled");
        }
        removed
    }

    /// Cancel everything and refuse further registrations.
    pub fn cancel_all(&self) -> usize {
        let swept = Self::sweep(&mut self.state.lock());
        self.metrics.record_cancelled(swept as u64);
        if swept > 0 {
            tracing::debug!(swept, "Swept pending futures");
        }
        swept
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_pending(&self, index: u32) -> bool {
        self.state.lock().pending.contains_key(&index)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn sweep(state: &mut TableState) -> usize {
        state.closed = true;
        let swept = state.pending.len();
        state.pending.clear();
        swept
    }
}

impl std::fmt::Debug for FutureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FutureTable")
            .field("pending", &state.pending.len())
            .field("next_index", &state.next_index)
            .field("closed", &state.closed)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<(u32, CapabilityResult)>>,
    }

    impl CallbackSink for Recorder {
        fn deliver(&self, record: FutureRecord, result: CapabilityResult) -> HostResult<()> {
            self.delivered.lock().push((record.index, result));
            Ok(())
        }
    }

    fn table(limit: u32) -> (FutureTable, Arc<Recorder>) {
        let sink = Arc::new(Recorder::default());
        let table = FutureTable::new(sink.clone(), limit, Arc::new(BoundaryMetrics::new()));
        (table, sink)
    }

    #[test]
    fn test_indices_start_at_one_and_increase() {
        let (table, _) = table(u32::MAX);
        let a = table.register(FutureTemplate::default()).unwrap();
        let b = table.register(FutureTemplate::default()).unwrap();
        assert_eq!(a.index, 1);
        assert_eq!(b.index, 2);
        assert_eq!(table.pending_count(), 2);
    }

    #[test]
    fn test_complete_once() {
        let (table, sink) = table(u32::MAX);
        let rec = table.register(FutureTemplate::default()).unwrap();
        table.complete(rec.index, Ok(b"done".to_vec())).unwrap();
        assert_eq!(
            table.complete(rec.index, Ok(vec![])),
            Err(HostError::StaleCompletion { index: rec.index })
        );
        assert_eq!(sink.delivered.lock().len(), 1);
    }

    #[test]
    fn test_cancel_then_complete_is_stale() {
        let (table, sink) = table(u32::MAX);
        for _ in 0..7 {
            table.register(FutureTemplate::default()).unwrap();
        }
        assert!(table.cancel(7));
        assert!(!table.cancel(7));
        assert_eq!(
            table.complete(7, Ok(vec![1])),
            Err(HostError::StaleCompletion { index: 7 })
        );
        assert!(sink.delivered.lock().is_empty());
        assert_eq!(table.pending_count(), 6);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let (table, _) = table(2);
        table.register(FutureTemplate::default()).unwrap();
        table.register(FutureTemplate::default()).unwrap();
        assert_eq!(
            table.register(FutureTemplate::default()),
            Err(HostError::IndexExhausted { limit: 2 })
        );
        assert_eq!(table.pending_count(), 0);
        assert!(table.is_closed());
        assert!(matches!(
            table.register(FutureTemplate::default()),
            Err(HostError::GuestUnavailable(_))
        ));
    }

    #[test]
    fn test_delivery_failure_sweeps() {
        struct Gone;
        impl CallbackSink for Gone {
            fn deliver(&self, _: FutureRecord, _: CapabilityResult) -> HostResult<()> {
                Err(HostError::GuestUnavailable("unloaded".into()))
            }
        }
        let table = FutureTable::new(Arc::new(Gone), 10, Arc::new(BoundaryMetrics::new()));
        let a = table.register(FutureTemplate::default()).unwrap();
        table.register(FutureTemplate::default()).unwrap();
        assert!(table.complete(a.index, Ok(vec![])).is_err());
        assert_eq!(table.pending_count(), 0);
        assert!(table.is_closed());
    }

    #[test]
    fn test_template_round_trip() {
        let wire_future = wire::Future {
            data: 16,
            len: 4,
            callback: 3,
            context: 64,
            context_len: 8,
            index: 0,
        };
        let template = FutureTemplate::from(wire_future);
        assert_eq!(template.context, Pointer::new(64, 8));
    }
}
