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

//! Invocation dispatcher
//!
//! Turns one guest call into exactly one [`Outcome`]:
//!
//! ```text
//! Received -> Validating -> Rejected
//!                        -> Executing -> Completed | Failed
//!                                     -> Pending (-> callback later)
//! ```
//!
//! Argument memory is resolved through the bounds gate before validation,
//! so neither validators nor capabilities ever see an unchecked pointer. The
//! dispatcher keeps no per-call state once `dispatch` returns; deferred work
//! reports to the [`FutureTable`] on its own.

use crate::catalog::{Catalog, Execution, CATALOG_DESCRIBE, CATALOG_LIST};
use crate::error::{
    BoundaryError, DispatchError, ErrorCode, HostError, HostResult, ValidationError,
};
use crate::futures::{FutureRecord, FutureTable, FutureTemplate};
use crate::media::{MediaClassifier, NoMedia};
use crate::memory::{GuestAllocator, GuestMemory};
use crate::metrics::BoundaryMetrics;
use crate::validator::validate;
use crate::value::{self, Value};
use crate::wire;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Lifecycle of a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Received,
    Validating,
    Rejected,
    Executing,
    Pending,
    Completed,
    Failed,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Received => "received",
            CallPhase::Validating => "validating",
            CallPhase::Rejected => "rejected",
            CallPhase::Executing => "executing",
            CallPhase::Pending => "pending",
            CallPhase::Completed => "completed",
            CallPhase::Failed => "failed",
        }
    }
}

/// Terminal result of [`Dispatcher::dispatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Finished synchronously with a payload
    Completed(Vec<u8>),
    /// Rejected or failed; the error is already in boundary form
    Failed(BoundaryError),
    /// Running on the host; the callback fires when it completes
    Pending(FutureRecord),
}

impl Outcome {
    fn failed(error: HostError) -> Self {
        Outcome::Failed(error.to_boundary())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }

    /// Error code of a failed outcome
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Failed(e) => e.kind(),
            _ => None,
        }
    }
}

/// Routes guest calls to capabilities.
pub struct Dispatcher {
    catalog: Arc<Catalog>,
    classifier: Arc<dyn MediaClassifier>,
    table: Arc<FutureTable>,
    runtime: Option<Handle>,
    metrics: Arc<BoundaryMetrics>,
    inline_threshold: usize,
}

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder {
    catalog: Arc<Catalog>,
    table: Arc<FutureTable>,
    classifier: Arc<dyn MediaClassifier>,
    runtime: Option<Handle>,
    metrics: Arc<BoundaryMetrics>,
    inline_threshold: usize,
}

impl DispatcherBuilder {
    pub fn classifier(mut self, classifier: Arc<dyn MediaClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Runtime that executes deferred capability work
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn metrics(mut self, metrics: Arc<BoundaryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            catalog: self.catalog,
            classifier: self.classifier,
            table: self.table,
            runtime: self.runtime.or_else(|| Handle::try_current().ok()),
            metrics: self.metrics,
            inline_threshold: self.inline_threshold,
        }
    }
}

impl Dispatcher {
    pub fn builder(catalog: Arc<Catalog>, table: Arc<FutureTable>) -> DispatcherBuilder {
        DispatcherBuilder {
            catalog,
            table,
            classifier: Arc::new(NoMedia),
            runtime: None,
            metrics: Arc::new(BoundaryMetrics::new()),
            inline_threshold: 256,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn table(&self) -> &Arc<FutureTable> {
        &self.table
    }

    pub fn metrics(&self) -> &Arc<BoundaryMetrics> {
        &self.metrics
    }

    /// Decode an encoded [`wire::Call`] and dispatch it.
    pub fn handle(&self, request: &[u8], memory: &GuestMemory<'_>) -> Outcome {
        match wire::decode::<wire::Call>(request) {
            Ok(call) => self.dispatch(call, memory),
            Err(e) => {
                self.metrics.record_call();
                self.metrics.record_rejected();
                tracing::debug!(error = %e, "Rejected undecodable call");
                Outcome::failed(e)
            }
        }
    }

    /// Run one call to its terminal phase.
    pub fn dispatch(&self, call: wire::Call, memory: &GuestMemory<'_>) -> Outcome {
        self.metrics.record_call();
        let id = call.id.as_str();
        transition(id, CallPhase::Received);

        match id {
            CATALOG_LIST => return self.finish(id, Ok(self.list(&call))),
            CATALOG_DESCRIBE => return self.finish(id, self.describe(&call, memory)),
            _ => {}
        }

        let Some(capability) = self.catalog.get(id) else {
            return self.fail(
                id,
                DispatchError::UnknownCapability(id.to_string()).into(),
            );
        };

        transition(id, CallPhase::Validating);
        let args = match self.resolve_args(&call, memory).and_then(|decoded| {
            let borrowed: Vec<Option<&[u8]>> = decoded.iter().map(|d| d.as_deref()).collect();
            let schema = &capability.descriptor().schema;
            validate(schema, &borrowed, self.classifier.as_ref()).map_err(HostError::from)
        }) {
            Ok(args) => args,
            Err(e) => return self.reject(id, e),
        };

        transition(id, CallPhase::Executing);
        match capability.invoke(args) {
            Execution::Ready(result) => self.finish(id, result.map_err(HostError::from)),
            Execution::Deferred(work) => {
                let Some(template) = call.future.map(FutureTemplate::from) else {
                    return self.fail(id, DispatchError::CallbackRequired(id.to_string()).into());
                };
                let Some(runtime) = &self.runtime else {
                    return self.fail(
                        id,
                        HostError::GuestUnavailable("no runtime for deferred work".to_string()),
                    );
                };
                let record = match self.table.register(template) {
                    Ok(record) => record,
                    Err(e) => return self.fail(id, e),
                };

                let table = Arc::clone(&self.table);
                let capability_id = id.to_string();
                runtime.spawn(async move {
                    let result = work.await;
                    if let Err(e) = table.complete(record.index, result) {
                        tracing::debug!(
                            capability = %capability_id,
                            index = record.index,
                            error = %e,
                            "Deferred completion not delivered"
                        );
                    }
                });

                transition(id, CallPhase::Pending);
                tracing::debug!(capability = %id, index = record.index, "Call pending");
                Outcome::Pending(record)
            }
        }
    }

    /// Build the reply message for an outcome.
    ///
    /// Payloads at or above the inline threshold are placed in guest memory
    /// and returned by reference.
    pub fn reply(&self, outcome: Outcome, allocator: &mut dyn GuestAllocator) -> wire::Reply {
        let result = match outcome {
            Outcome::Completed(bytes) => {
                match value::encode(&bytes, self.inline_threshold, allocator) {
                    Ok(value) => wire::reply::Result::Value(value.into()),
                    Err(e) => wire::reply::Result::Error(e.to_boundary().into()),
                }
            }
            Outcome::Failed(error) => wire::reply::Result::Error(error.into()),
            Outcome::Pending(record) => wire::reply::Result::Future(record.into()),
        };
        wire::Reply {
            result: Some(result),
        }
    }

    /// Resolve every present argument through the bounds gate.
    fn resolve_args<'a>(
        &self,
        call: &'a wire::Call,
        memory: &GuestMemory<'a>,
    ) -> HostResult<Vec<Option<Cow<'a, [u8]>>>> {
        call.args
            .iter()
            .map(|arg| match &arg.value {
                None => Ok(None),
                Some(bytes) => value::decode_wire(bytes, memory).map(Some),
            })
            .collect()
    }

    fn list(&self, _call: &wire::Call) -> Vec<u8> {
        wire::encode(&wire::Catalog {
            entries: self.catalog.entries(),
        })
    }

    fn describe(&self, call: &wire::Call, memory: &GuestMemory<'_>) -> HostResult<Vec<u8>> {
        if call.args.len() != 1 {
            return Err(ValidationError::Arity {
                expected: 1,
                actual: call.args.len(),
            }
            .into());
        }
        let value = match call.args[0].value.clone() {
            Some(bytes) => Value::try_from(bytes)?,
            None => {
                return Err(ValidationError::MissingRequired {
                    argument: "id".to_string(),
                }
                .into())
            }
        };
        let target = value::decode_text(&value, memory)?;
        let described = self
            .catalog
            .describe(&target)
            .ok_or_else(|| DispatchError::UnknownCapability(target.to_string()))?;
        Ok(wire::encode(&described))
    }

    fn finish(&self, id: &str, result: HostResult<Vec<u8>>) -> Outcome {
        match result {
            Ok(bytes) => {
                self.metrics.record_completed();
                transition(id, CallPhase::Completed);
                Outcome::Completed(bytes)
            }
            Err(e @ HostError::Validation(_))
            | Err(e @ HostError::Protocol(_))
            | Err(e @ HostError::Bounds(_)) => self.reject(id, e),
            Err(e) => self.fail(id, e),
        }
    }

    fn reject(&self, id: &str, error: HostError) -> Outcome {
        self.metrics.record_rejected();
        transition(id, CallPhase::Rejected);
        tracing::debug!(capability = %id, error = %error, "Call rejected");
        Outcome::failed(error)
    }

    fn fail(&self, id: &str, error: HostError) -> Outcome {
        self.metrics.record_failed();
        transition(id, CallPhase::Failed);
        tracing::debug!(capability = %id, error = %error, "Call failed");
        Outcome::failed(error)
    }
}

fn transition(id: &str, phase: CallPhase) {
    tracing::trace!(capability = %id, phase = phase.as_str(), "Call phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Descriptor, FnCapability};
    use crate::futures::CallbackSink;
    use crate::memory::ScratchMemory;
    use crate::schema::{Argument, IntRule, Schema, Validator};
    use crate::catalog::CapabilityResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u32, CapabilityResult)>>);

    impl CallbackSink for Recorder {
        fn deliver(&self, record: FutureRecord, result: CapabilityResult) -> HostResult<()> {
            self.0.lock().push((record.index, result));
            Ok(())
        }
    }

    fn setup() -> (Dispatcher, Arc<Recorder>) {
        let catalog = Arc::new(Catalog::new());
        let schema = Schema::new(vec![Argument::new(
            "n",
            Validator::int(IntRule {
                min: Some(0),
                max: Some(100),
                default: None,
            })
            .required(),
        )])
        .unwrap();
        catalog
            .register(FnCapability::new(
                Descriptor::new("math.double", "Double", schema.clone()),
                |args| {
                    let n = args.int("n").unwrap_or_default();
                    Execution::ready((n * 2).to_le_bytes().to_vec())
                },
            ))
            .unwrap();
        catalog
            .register(FnCapability::new(
                Descriptor::new("math.later", "Later", schema),
                |args| {
                    let n = args.int("n").unwrap_or_default();
                    Execution::deferred(async move { CapabilityResult::Ok(n.to_le_bytes().to_vec()) })
                },
            ))
            .unwrap();

        let sink = Arc::new(Recorder::default());
        let metrics = Arc::new(BoundaryMetrics::new());
        let table = Arc::new(FutureTable::new(sink.clone(), u32::MAX, metrics.clone()));
        let dispatcher = Dispatcher::builder(catalog, table)
            .metrics(metrics)
            .inline_threshold(8)
            .build();
        (dispatcher, sink)
    }

    fn call(id: &str, args: Vec<Option<Value>>) -> wire::Call {
        wire::Call {
            id: id.to_string(),
            args: args
                .into_iter()
                .map(|v| wire::Arg {
                    value: v.map(Into::into),
                })
                .collect(),
            future: None,
        }
    }

    #[test]
    fn test_sync_completion() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let outcome = dispatcher.dispatch(
            call("math.double", vec![Some(Value::int(21))]),
            &GuestMemory::new(&mem),
        );
        assert_eq!(outcome, Outcome::Completed(42i32.to_le_bytes().to_vec()));
        assert_eq!(dispatcher.metrics().snapshot().completed, 1);
    }

    #[test]
    fn test_unknown_capability() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let outcome = dispatcher.dispatch(call("nope", vec![]), &GuestMemory::new(&mem));
        assert_eq!(outcome.error_code(), Some(ErrorCode::UnknownCapability));
    }

    #[test]
    fn test_validation_rejected() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let outcome = dispatcher.dispatch(
            call("math.double", vec![Some(Value::int(150))]),
            &GuestMemory::new(&mem),
        );
        assert_eq!(outcome.error_code(), Some(ErrorCode::OutOfRange));
        match outcome {
            Outcome::Failed(e) => assert!(e.reason.contains("Int.max")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(dispatcher.metrics().snapshot().rejected, 1);
    }

    #[test]
    fn test_reference_argument_out_of_bounds() {
        let (dispatcher, _) = setup();
        let mem = vec![0u8; 8];
        let outcome = dispatcher.dispatch(
            call("math.double", vec![Some(Value::reference(6, 4))]),
            &GuestMemory::new(&mem),
        );
        assert_eq!(outcome.error_code(), Some(ErrorCode::OutOfBounds));
    }

    #[test]
    fn test_reference_argument_in_bounds() {
        let (dispatcher, _) = setup();
        let mut mem = vec![0u8; 4];
        mem.extend_from_slice(&7i32.to_le_bytes());
        let outcome = dispatcher.dispatch(
            call("math.double", vec![Some(Value::reference(4, 4))]),
            &GuestMemory::new(&mem),
        );
        assert_eq!(outcome, Outcome::Completed(14i32.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_unset_argument_value() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let mut c = call("math.double", vec![]);
        c.args.push(wire::Arg {
            value: Some(wire::Bytes { data: None }),
        });
        let outcome = dispatcher.dispatch(c, &GuestMemory::new(&mem));
        assert_eq!(outcome.error_code(), Some(ErrorCode::InvalidValue));
    }

    #[test]
    fn test_deferred_without_callback() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let outcome = dispatcher.dispatch(
            call("math.later", vec![Some(Value::int(3))]),
            &GuestMemory::new(&mem),
        );
        assert_eq!(outcome.error_code(), Some(ErrorCode::CallbackRequired));
        assert_eq!(dispatcher.table().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_completes_through_table() {
        let (dispatcher, sink) = setup();
        let mem = Vec::new();
        let mut c = call("math.later", vec![Some(Value::int(3))]);
        c.future = Some(wire::Future {
            callback: 9,
            ..Default::default()
        });
        let outcome = dispatcher.dispatch(c, &GuestMemory::new(&mem));
        let Outcome::Pending(record) = outcome else {
            panic!("expected pending outcome");
        };
        assert_eq!(record.index, 1);
        assert_eq!(record.callback, 9);

        for _ in 0..100 {
            if !sink.0.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let delivered = sink.0.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, Ok(3i32.to_le_bytes().to_vec()));
        assert_eq!(dispatcher.table().pending_count(), 0);
    }

    #[test]
    fn test_catalog_builtins() {
        let (dispatcher, _) = setup();
        let mem = Vec::new();
        let Outcome::Completed(bytes) =
            dispatcher.dispatch(call(CATALOG_LIST, vec![]), &GuestMemory::new(&mem))
        else {
            panic!("catalog.list failed");
        };
        let listing: wire::Catalog = wire::decode(&bytes).unwrap();
        let ids: Vec<_> = listing.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["math.double", "math.later"]);

        let Outcome::Completed(bytes) = dispatcher.dispatch(
            call(CATALOG_DESCRIBE, vec![Some(Value::text("math.double"))]),
            &GuestMemory::new(&mem),
        ) else {
            panic!("catalog.describe failed");
        };
        let described: wire::Describe = wire::decode(&bytes).unwrap();
        assert_eq!(described.arguments.len(), 1);
        assert_eq!(described.arguments[0].name, "n");
    }

    #[test]
    fn test_large_reply_goes_by_reference() {
        let (dispatcher, _) = setup();
        let mut scratch = ScratchMemory::new(1024);
        let reply = dispatcher.reply(Outcome::Completed(vec![5u8; 32]), &mut scratch);
        match reply.result {
            Some(wire::reply::Result::Value(wire::Bytes {
                data: Some(wire::bytes::Data::Ptr(p)),
            })) => assert_eq!(p.len, 32),
            other => panic!("unexpected reply: {other:?}"),
        }
        let small = dispatcher.reply(Outcome::Completed(vec![1, 2]), &mut scratch);
        assert!(matches!(
            small.result,
            Some(wire::reply::Result::Value(wire::Bytes {
                data: Some(wire::bytes::Data::Raw(_))
            }))
        ));
    }
}
