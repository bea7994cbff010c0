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

//! Host instance lifecycle
//!
//! A [`HostInstance`] ties one guest to its future table, its guest-call
//! queue and a dispatcher over a shared catalog. Teardown sweeps pending
//! futures, lets the queue drain and joins the guest thread; it runs at most
//! once, either explicitly or on drop.

use crate::catalog::Catalog;
use crate::config::HostConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{HostError, HostResult};
use crate::futures::FutureTable;
use crate::media::MediaClassifier;
use crate::metrics::{BoundaryMetrics, MetricsSnapshot};
use crate::queue::{self, GuestInvoker, GuestWorker, QueueSender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Collaborators shared by every instance of a host
#[derive(Clone)]
pub struct HostContext {
    pub catalog: Arc<Catalog>,
    pub classifier: Arc<dyn MediaClassifier>,
    /// Runtime for deferred capability work
    pub runtime: Handle,
}

pub struct HostInstance {
    dispatcher: Arc<Dispatcher>,
    table: Arc<FutureTable>,
    sender: QueueSender,
    worker: Mutex<Option<GuestWorker>>,
    metrics: Arc<BoundaryMetrics>,
}

impl HostInstance {
    /// Wire a new guest to the host.
    ///
    /// `load` receives the dispatcher the guest's imports must call into and
    /// returns the guest's entry points. It runs on the calling thread; the
    /// returned invoker is then moved to the guest thread.
    pub fn launch<F>(config: &HostConfig, context: HostContext, load: F) -> HostResult<Self>
    where
        F: FnOnce(Arc<Dispatcher>) -> HostResult<Box<dyn GuestInvoker>>,
    {
        config
            .validate()
            .map_err(|e| HostError::GuestUnavailable(e.to_string()))?;

        let (sender, receiver) = queue::channel();
        let metrics = Arc::new(BoundaryMetrics::new());
        let table = Arc::new(FutureTable::new(
            Arc::new(sender.clone()),
            config.index_limit,
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(
            Dispatcher::builder(Arc::clone(&context.catalog), Arc::clone(&table))
                .classifier(context.classifier)
                .runtime(context.runtime)
                .metrics(Arc::clone(&metrics))
                .inline_threshold(config.inline_threshold)
                .build(),
        );

        let invoker = load(Arc::clone(&dispatcher))?;
        let worker = GuestWorker::spawn(
            receiver,
            invoker,
            Arc::downgrade(&table),
            Arc::clone(&metrics),
            &config.queue_thread_name,
        )?;

        tracing::debug!(
            capabilities = context.catalog.len(),
            inline_threshold = config.inline_threshold,
            "Host instance launched"
        );

        Ok(Self {
            dispatcher,
            table,
            sender,
            worker: Mutex::new(Some(worker)),
            metrics,
        })
    }

    /// Enter the guest with an encoded request and wait for its output.
    ///
    /// Blocks; use [`HostInstance::call_async`] from async code.
    pub fn call(&self, input: Vec<u8>) -> HostResult<Vec<u8>> {
        self.sender.call(input)
    }

    pub async fn call_async(&self, input: Vec<u8>) -> HostResult<Vec<u8>> {
        self.sender.call_async(input).await
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn table(&self) -> &Arc<FutureTable> {
        &self.table
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait until no futures are pending, polling until `timeout`.
    ///
    /// Returns `false` on timeout. Blocks the calling thread.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.table.pending_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Cancel pending futures, drain the queue and stop the guest thread.
    pub fn teardown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let swept = self.table.cancel_all();
        self.sender.shutdown();
        worker.join();
        tracing::debug!(swept, "Host instance torn down");
    }
}

impl Drop for HostInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futures::FutureRecord;
    use crate::media::NoMedia;
    use crate::memory::GuestMemory;
    use crate::wire;

    /// Guest that forwards its input as a call to the dispatcher
    struct Forwarder {
        dispatcher: Arc<Dispatcher>,
    }

    impl GuestInvoker for Forwarder {
        fn call(&mut self, input: &[u8]) -> HostResult<Vec<u8>> {
            let memory = Vec::new();
            let outcome = self.dispatcher.handle(input, &GuestMemory::new(&memory));
            let mut scratch = crate::memory::ScratchMemory::new(0);
            Ok(wire::encode(&self.dispatcher.reply(outcome, &mut scratch)))
        }

        fn invoke_callback(&mut self, _: FutureRecord, _: &[u8]) -> HostResult<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_launch_call_teardown() {
        let context = HostContext {
            catalog: Arc::new(Catalog::new()),
            classifier: Arc::new(NoMedia),
            runtime: Handle::current(),
        };
        let instance = HostInstance::launch(&HostConfig::default(), context, |dispatcher| {
            Ok(Box::new(Forwarder { dispatcher }) as Box<dyn GuestInvoker>)
        })
        .unwrap();

        let request = wire::encode(&wire::Call {
            id: "catalog.list".into(),
            args: vec![],
            future: None,
        });
        let output = instance.call_async(request).await.unwrap();
        let reply: wire::Reply = wire::decode(&output).unwrap();
        assert!(matches!(reply.result, Some(wire::reply::Result::Value(_))));
        assert_eq!(instance.metrics().calls, 1);

        instance.teardown();
        assert!(!instance.is_running());
        // Second teardown is a no-op
        instance.teardown();
        assert!(instance.call_async(vec![]).await.is_err());
    }
}
