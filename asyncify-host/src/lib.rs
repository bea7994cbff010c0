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

//! Asyncify Host Runtime
//!
//! Typed call protocol between a sandboxed WASM guest and a native host that
//! exposes a catalog of capabilities.
//!
//! # Architecture
//!
//! - **Values** cross the boundary inline (`Raw`) or as a pointer into guest
//!   linear memory (`Ref`). Every pointer is bounds-checked before anything
//!   else looks at it.
//! - **Schemas** declare the arguments of each capability; the validator
//!   checks calls against them before dispatch.
//! - **Dispatcher** resolves a call to a capability and produces a value, an
//!   error, or a future.
//! - **Future table** correlates deferred completions with guest callbacks,
//!   exactly once, through a single guest-call queue.
//!
//! # Example
//!
//! ```rust,ignore
//! use asyncify_host::{Catalog, HostConfig, HostContext, HostInstance, WasmHost};
//!
//! let config = HostConfig::default();
//! let host = WasmHost::new(&config)?;
//! let context = HostContext { catalog, classifier, runtime: handle };
//! let instance = HostInstance::launch(&config, context, |dispatcher| {
//!     Ok(Box::new(host.load_file(path, dispatcher)?) as Box<dyn GuestInvoker>)
//! })?;
//! let reply = instance.call(request)?;
//! instance.teardown();
//! ```

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod futures;
pub mod instance;
pub mod media;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod schema;
pub mod validator;
pub mod value;
#[cfg(feature = "wasm")]
pub mod wasm;
pub mod wire;

// Re-exports
pub use catalog::{
    Capability, CapabilityResult, Catalog, CatalogError, Descriptor, Execution, FnCapability,
    CATALOG_DESCRIBE, CATALOG_LIST,
};
pub use config::{ConfigError, HostConfig, WasmRuntimeConfig};
pub use dispatcher::{CallPhase, Dispatcher, DispatcherBuilder, Outcome};
pub use error::{
    BoundaryError, BoundsError, Constraint, DispatchError, ErrorCode, ExecutionError, HostError,
    HostResult, ProtocolError, ValidationError,
};
pub use futures::{CallbackSink, FutureRecord, FutureTable, FutureTemplate};
pub use instance::{HostContext, HostInstance};
pub use media::{ClassifyError, Dimensions, MediaClassifier, MediaInfo, MediaKind, NoMedia};
pub use memory::{GuestAllocator, GuestMemory, LinearMemory, Pointer, ScratchMemory, SliceMemory};
pub use metrics::{BoundaryMetrics, MetricsSnapshot};
pub use queue::{GuestInvoker, GuestWorker, QueueSender};
pub use schema::{
    Argument, AudioRule, DoubleRule, FormatRule, IntRule, MediaRule, Pattern, Schema, SchemaError,
    StringRule, Validator, ValidatorKind, VideoRule,
};
pub use validator::{validate, ArgValue, ValidatedArgs};
pub use value::Value;
#[cfg(feature = "wasm")]
pub use wasm::{WasmGuest, WasmHost};
