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

//! Guest-call queue
//!
//! The guest is not reentrant. Every host-to-guest entry (a top-level `call`
//! or a future callback) is sent through one channel and executed by a
//! single worker thread that owns the [`GuestInvoker`]. Worker threads that
//! finish native work never touch the guest themselves.

use crate::catalog::CapabilityResult;
use crate::error::{HostError, HostResult};
use crate::futures::{CallbackSink, FutureRecord, FutureTable};
use crate::metrics::BoundaryMetrics;
use crate::wire;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Entry points of a loaded guest.
///
/// Implementations are driven from the queue thread only.
pub trait GuestInvoker: Send {
    /// Run the guest's `call` export with an encoded request.
    fn call(&mut self, input: &[u8]) -> HostResult<Vec<u8>>;

    /// Run the guest callback of `record` with an encoded [`wire::Reply`].
    fn invoke_callback(&mut self, record: FutureRecord, payload: &[u8]) -> HostResult<()>;
}

enum GuestTask {
    Call {
        input: Vec<u8>,
        reply: oneshot::Sender<HostResult<Vec<u8>>>,
    },
    Callback {
        record: FutureRecord,
        payload: Vec<u8>,
    },
    Shutdown,
}

/// Sending half of the queue. Cheap to clone.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<GuestTask>,
}

/// Receiving half, consumed by [`GuestWorker::spawn`]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<GuestTask>,
}

pub fn channel() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

fn closed() -> HostError {
    HostError::GuestUnavailable("guest queue is closed".to_string())
}

impl QueueSender {
    /// Enqueue a guest call and return the receiver for its reply.
    pub fn submit(&self, input: Vec<u8>) -> HostResult<oneshot::Receiver<HostResult<Vec<u8>>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GuestTask::Call { input, reply })
            .map_err(|_| closed())?;
        Ok(rx)
    }

    /// Enter the guest and wait for the reply.
    ///
    /// Blocks the current thread; must not be called from inside a tokio
    /// runtime. Use [`QueueSender::call_async`] there.
    pub fn call(&self, input: Vec<u8>) -> HostResult<Vec<u8>> {
        self.submit(input)?.blocking_recv().map_err(|_| closed())?
    }

    pub async fn call_async(&self, input: Vec<u8>) -> HostResult<Vec<u8>> {
        self.submit(input)?.await.map_err(|_| closed())?
    }

    /// Ask the worker to stop after the tasks already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(GuestTask::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl CallbackSink for QueueSender {
    fn deliver(&self, record: FutureRecord, result: CapabilityResult) -> HostResult<()> {
        let payload = completion_reply(result);
        self.tx
            .send(GuestTask::Callback { record, payload })
            .map_err(|_| closed())
    }
}

/// Encode the outcome of deferred work as the reply the callback receives.
pub fn completion_reply(result: CapabilityResult) -> Vec<u8> {
    let result = match result {
        Ok(bytes) => wire::reply::Result::Value(wire::Bytes {
            data: Some(wire::bytes::Data::Raw(bytes)),
        }),
        Err(e) => wire::reply::Result::Error(HostError::from(e).to_boundary().into()),
    };
    wire::encode(&wire::Reply {
        result: Some(result),
    })
}

/// The thread that owns the guest
pub struct GuestWorker {
    handle: JoinHandle<()>,
}

impl GuestWorker {
    /// Start draining `receiver` on a dedicated thread.
    ///
    /// `table` is held weakly: the table owns the sending half, and the
    /// worker only needs it to sweep pending futures on a guest fault.
    pub fn spawn(
        receiver: QueueReceiver,
        invoker: Box<dyn GuestInvoker>,
        table: Weak<FutureTable>,
        metrics: Arc<BoundaryMetrics>,
        thread_name: &str,
    ) -> HostResult<Self> {
        let handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || drain(receiver, invoker, table, metrics))
            .map_err(|e| HostError::GuestUnavailable(format!("failed to start guest thread: {}", e)))?;
        Ok(Self { handle })
    }

    /// Wait for the worker to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("Guest thread panicked");
        }
    }
}

fn drain(
    mut receiver: QueueReceiver,
    mut invoker: Box<dyn GuestInvoker>,
    table: Weak<FutureTable>,
    metrics: Arc<BoundaryMetrics>,
) {
    let mut fault: Option<String> = None;

    while let Some(task) = receiver.rx.blocking_recv() {
        match task {
            GuestTask::Call { input, reply } => {
                let result = match &fault {
                    Some(reason) => Err(HostError::GuestUnavailable(reason.clone())),
                    None => invoker.call(&input),
                };
                if let Err(e) = &result {
                    if e.is_fatal() && fault.is_none() {
                        fault = Some(e.to_string());
                        on_fault(&table, &metrics, e);
                    }
                }
                // The caller may have gone away; nothing to do then.
                let _ = reply.send(result);
            }
            GuestTask::Callback { record, payload } => {
                if fault.is_some() {
                    tracing::debug!(index = record.index, "Dropping callback for faulted guest");
                    continue;
                }
                if let Err(e) = invoker.invoke_callback(record, &payload) {
                    tracing::error!(index = record.index, error = %e, "Guest callback failed");
                    fault = Some(e.to_string());
                    on_fault(&table, &metrics, &e);
                }
            }
            GuestTask::Shutdown => break,
        }
    }

    receiver.rx.close();
    tracing::debug!("Guest queue drained");
}

fn on_fault(table: &Weak<FutureTable>, metrics: &BoundaryMetrics, error: &HostError) {
    metrics.record_fault();
    let swept = table.upgrade().map(|t| t.cancel_all()).unwrap_or(0);
    tracing::error!(error = %error, swept, "Guest faulted; pending futures swept");
}
