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

//! Integration tests for deferred calls, the future table and the guest queue

use asyncify_host::queue::{self, GuestWorker};
use asyncify_host::{
    wire, Argument, BoundaryMetrics, CapabilityResult, Catalog, ClassifyError, Descriptor,
    Dispatcher, ErrorCode, Execution, FnCapability, FormatRule, FutureRecord, FutureTable,
    FutureTemplate, GuestInvoker, GuestMemory, HostConfig, HostContext, HostError, HostInstance,
    HostResult, MediaInfo, MediaKind, MediaRule, Outcome, Schema, Validator, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Delivered = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

/// Guest that records every callback it receives
struct RecordingGuest {
    delivered: Delivered,
}

impl GuestInvoker for RecordingGuest {
    fn call(&mut self, input: &[u8]) -> HostResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn invoke_callback(&mut self, record: FutureRecord, payload: &[u8]) -> HostResult<()> {
        self.delivered.lock().push((record.index, payload.to_vec()));
        Ok(())
    }
}

fn queue_with_table() -> (queue::QueueSender, GuestWorker, Arc<FutureTable>, Delivered) {
    let (sender, receiver) = queue::channel();
    let metrics = Arc::new(BoundaryMetrics::new());
    let table = Arc::new(FutureTable::new(
        Arc::new(sender.clone()),
        u32::MAX,
        metrics.clone(),
    ));
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let worker = GuestWorker::spawn(
        receiver,
        Box::new(RecordingGuest {
            delivered: delivered.clone(),
        }),
        Arc::downgrade(&table),
        metrics,
        "lifecycle-guest",
    )
    .unwrap();
    (sender, worker, table, delivered)
}

/// Test that cancelling index 7 suppresses its callback and a late
/// completion is reported as stale
#[test]
fn test_cancel_then_complete_index_seven() {
    let (sender, worker, table, delivered) = queue_with_table();
    for _ in 0..7 {
        table.register(FutureTemplate::default()).unwrap();
    }
    assert!(table.is_pending(7));

    assert!(table.cancel(7));
    let err = table.complete(7, Ok(b"late".to_vec())).unwrap_err();
    assert_eq!(err, HostError::StaleCompletion { index: 7 });
    assert_eq!(err.code(), ErrorCode::StaleCompletion);

    sender.shutdown();
    worker.join();
    assert!(delivered.lock().iter().all(|(index, _)| *index != 7));
}

/// Test that racing completions and cancellations settle each index once
#[test]
fn test_each_index_terminates_once() {
    let (sender, worker, table, delivered) = queue_with_table();
    let records: Vec<_> = (0..64)
        .map(|_| table.register(FutureTemplate::default()).unwrap())
        .collect();

    let mut handles = Vec::new();
    for round in 0..4 {
        let table = table.clone();
        let indices: Vec<u32> = records.iter().map(|r| r.index).collect();
        handles.push(std::thread::spawn(move || {
            let mut wins = 0usize;
            for index in indices {
                let won = if (index + round) % 2 == 0 {
                    table.complete(index, Ok(vec![round as u8])).is_ok()
                } else {
                    table.cancel(index)
                };
                if won {
                    wins += 1;
                }
            }
            wins
        }));
    }
    let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(wins, 64);
    assert_eq!(table.pending_count(), 0);

    sender.shutdown();
    worker.join();

    let delivered = delivered.lock();
    let mut seen: Vec<u32> = delivered.iter().map(|(index, _)| *index).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), delivered.len());
}

/// Test that indices are never reused after completion
#[test]
fn test_indices_are_not_reused() {
    let (sender, worker, table, _) = queue_with_table();
    let first = table.register(FutureTemplate::default()).unwrap();
    table.complete(first.index, Ok(vec![])).unwrap();
    let second = table.register(FutureTemplate::default()).unwrap();
    assert!(second.index > first.index);
    sender.shutdown();
    worker.join();
}

/// Test that the callback payload is an encoded reply carrying the result
#[test]
fn test_callback_payload_is_reply() {
    let (sender, worker, table, delivered) = queue_with_table();
    let record = table.register(FutureTemplate::default()).unwrap();
    table.complete(record.index, Ok(b"pixels".to_vec())).unwrap();
    sender.shutdown();
    worker.join();

    let delivered = delivered.lock();
    let reply: wire::Reply = wire::decode(&delivered[0].1).unwrap();
    assert_eq!(
        reply.result,
        Some(wire::reply::Result::Value(Value::raw("pixels").into()))
    );
}

fn fake_classifier(bytes: &[u8]) -> Result<MediaInfo, ClassifyError> {
    match bytes {
        [b'V', ..] => Ok(MediaInfo {
            mime: "video/mp4".into(),
            kind: MediaKind::Video { duration: Some(3.0) },
            dpi: None,
            resolution: None,
        }),
        [b'I', ..] => Ok(MediaInfo::image("image/png")),
        _ => Err(ClassifyError::Unrecognized),
    }
}

fn media_catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    let schema = Schema::new(vec![Argument::new(
        "image",
        Validator::media(MediaRule {
            formats: vec![FormatRule::Image],
            ..Default::default()
        })
        .required(),
    )])
    .unwrap();
    catalog
        .register(FnCapability::new(
            Descriptor::new("image.size", "Size", schema.clone()),
            |args| {
                let size = args.media("image").map_or(0, |(bytes, _)| bytes.len());
                Execution::ready((size as i32).to_le_bytes().to_vec())
            },
        ))
        .unwrap();
    catalog
        .register(FnCapability::new(
            Descriptor::new("image.slow", "Slow", schema),
            |_args| {
                Execution::deferred(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    CapabilityResult::Ok(vec![])
                })
            },
        ))
        .unwrap();
    catalog
}

/// Test that a video payload is refused where only images are accepted
#[test]
fn test_video_rejected_for_image_argument() {
    let metrics = Arc::new(BoundaryMetrics::new());
    let (sender, _receiver) = queue::channel();
    let table = Arc::new(FutureTable::new(Arc::new(sender), 16, metrics.clone()));
    let dispatcher = Dispatcher::builder(media_catalog(), table)
        .classifier(Arc::new(fake_classifier))
        .metrics(metrics)
        .build();

    let mem = Vec::new();
    let call = |payload: &[u8]| wire::Call {
        id: "image.size".into(),
        args: vec![wire::Arg {
            value: Some(Value::raw(payload).into()),
        }],
        future: None,
    };

    let outcome = dispatcher.dispatch(call(b"V..."), &GuestMemory::new(&mem));
    assert_eq!(outcome.error_code(), Some(ErrorCode::UnsupportedFormat));

    let outcome = dispatcher.dispatch(call(b"I..."), &GuestMemory::new(&mem));
    assert_eq!(outcome, Outcome::Completed(4i32.to_le_bytes().to_vec()));
}

/// Test that teardown sweeps futures whose work never finishes
#[tokio::test(flavor = "multi_thread")]
async fn test_teardown_sweeps_pending() {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let context = HostContext {
        catalog: media_catalog(),
        classifier: Arc::new(fake_classifier),
        runtime: tokio::runtime::Handle::current(),
    };
    let guest_delivered = delivered.clone();
    let instance = HostInstance::launch(&HostConfig::default(), context, move |_| {
        Ok(Box::new(RecordingGuest {
            delivered: guest_delivered,
        }) as Box<dyn GuestInvoker>)
    })
    .unwrap();

    let mem = Vec::new();
    let outcome = instance.dispatcher().dispatch(
        wire::Call {
            id: "image.slow".into(),
            args: vec![wire::Arg {
                value: Some(Value::raw("I").into()),
            }],
            future: Some(wire::Future {
                callback: 2,
                ..Default::default()
            }),
        },
        &GuestMemory::new(&mem),
    );
    assert!(outcome.is_pending());
    assert_eq!(instance.table().pending_count(), 1);
    assert!(!tokio::task::block_in_place(|| instance
        .wait_idle(Duration::from_millis(20))));

    tokio::task::block_in_place(|| instance.teardown());
    assert_eq!(instance.table().pending_count(), 0);
    assert!(instance.table().is_closed());
    assert_eq!(instance.metrics().cancelled, 1);
    assert!(delivered.lock().is_empty());
}
