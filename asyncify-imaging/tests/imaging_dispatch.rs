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

//! Integration tests for imaging capabilities behind the dispatcher

use asyncify_host::{
    wire, BoundaryMetrics, CallbackSink, CapabilityResult, Catalog, Dispatcher, ErrorCode,
    FutureRecord, FutureTable, GuestMemory, HostResult, Outcome, Value,
};
use asyncify_imaging::{register_all, ImageLibrary, IMAGE_COMPRESS, IMAGE_METADATA};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sink that forwards completions to the test
struct ChannelSink(mpsc::UnboundedSender<(FutureRecord, CapabilityResult)>);

impl CallbackSink for ChannelSink {
    fn deliver(&self, record: FutureRecord, result: CapabilityResult) -> HostResult<()> {
        let _ = self.0.send((record, result));
        Ok(())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn dispatcher(sink: Arc<dyn CallbackSink>) -> Dispatcher {
    let library = Arc::new(ImageLibrary::new());
    let catalog = Arc::new(Catalog::new());
    register_all(&catalog, Arc::clone(&library)).unwrap();
    let metrics = Arc::new(BoundaryMetrics::new());
    let table = Arc::new(FutureTable::new(sink, 64, Arc::clone(&metrics)));
    Dispatcher::builder(catalog, table)
        .classifier(library)
        .metrics(metrics)
        .build()
}

fn arg(value: Option<Value>) -> wire::Arg {
    wire::Arg {
        value: value.map(Into::into),
    }
}

/// Test that a WAVE payload is refused by an image-only argument
#[test]
fn test_metadata_rejects_audio() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let dispatcher = dispatcher(Arc::new(ChannelSink(tx)));

    let mut wav = b"RIFF\x24\0\0\0WAVEfmt ".to_vec();
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&[1, 0, 1, 0, 0x40, 0x1F, 0, 0, 0x40, 0x1F, 0, 0, 1, 0, 8, 0]);

    let mem = Vec::new();
    let outcome = dispatcher.dispatch(
        wire::Call {
            id: IMAGE_METADATA.into(),
            args: vec![arg(Some(Value::raw(wav)))],
            future: None,
        },
        &GuestMemory::new(&mem),
    );
    assert_eq!(outcome.error_code(), Some(ErrorCode::UnsupportedFormat));
}

/// Test that an image passed by reference into guest memory is read in place
#[test]
fn test_metadata_by_reference() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let dispatcher = dispatcher(Arc::new(ChannelSink(tx)));

    let image = png(6, 2);
    let mut mem = vec![0u8; 16];
    mem.extend_from_slice(&image);

    let outcome = dispatcher.dispatch(
        wire::Call {
            id: IMAGE_METADATA.into(),
            args: vec![arg(Some(Value::reference(16, image.len() as u32)))],
            future: None,
        },
        &GuestMemory::new(&mem),
    );
    let Outcome::Completed(bytes) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let fields: wire::Fields = wire::decode(&bytes).unwrap();
    assert!(fields
        .fields
        .iter()
        .any(|f| f.r#type == "height" && f.value == "2"));
}

/// Test that compression runs on the host and completes through the table
#[tokio::test(flavor = "multi_thread")]
async fn test_compress_completes_through_callback() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = dispatcher(Arc::new(ChannelSink(tx)));
    let mem = Vec::new();

    let outcome = dispatcher.dispatch(
        wire::Call {
            id: IMAGE_COMPRESS.into(),
            args: vec![
                arg(Some(Value::raw(png(20, 10)))),
                arg(Some(Value::text("bmp"))),
                arg(Some(Value::int(50))),
                arg(None),
            ],
            future: Some(wire::Future {
                callback: 9,
                ..Default::default()
            }),
        },
        &GuestMemory::new(&mem),
    );
    let Outcome::Pending(record) = outcome else {
        panic!("expected a pending future, got {outcome:?}");
    };
    assert_eq!(record.callback, 9);

    let (delivered, result) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.index, record.index);

    let meta = ImageLibrary::new().metadata(&result.unwrap()).unwrap();
    assert_eq!((meta.format.as_str(), meta.width, meta.height), ("bmp", 10, 5));
    assert_eq!(dispatcher.table().pending_count(), 0);
}

/// Test that compression without a callback is refused
#[test]
fn test_compress_requires_callback() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let dispatcher = dispatcher(Arc::new(ChannelSink(tx)));
    let mem = Vec::new();

    let outcome = dispatcher.dispatch(
        wire::Call {
            id: IMAGE_COMPRESS.into(),
            args: vec![arg(Some(Value::raw(png(2, 2)))), arg(None), arg(None), arg(None)],
            future: None,
        },
        &GuestMemory::new(&mem),
    );
    assert_eq!(outcome.error_code(), Some(ErrorCode::CallbackRequired));
}
