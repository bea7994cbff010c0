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

//! wasmtime guest adapter
//!
//! Loads a core WASM module and links it against the `asyncify` import
//! module:
//!
//! | Import | Signature | Purpose |
//! |---|---|---|
//! | `log` | `(ptr, len)` | UTF-8 log line from the guest |
//! | `invoke` | `(out_ptr, req_ptr, req_len) -> i32` | run an encoded `Call`; the reply's pointer and length are written to `out_ptr` as two little-endian u32 |
//!
//! The guest must export `memory`, `allocate(len) -> ptr`,
//! `call(in_ptr, in_len, out_ptr)` and
//! `callback(fn_ptr, index, ctx_ptr, ctx_len, data_ptr, data_len)`;
//! `release(ptr)` is optional.
//!
//! Every guest entry is refuelled with the configured budget. A trap,
//! running out of fuel or a missing export makes the guest unavailable.

use crate::config::{HostConfig, WasmRuntimeConfig};
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::{HostError, HostResult};
use crate::futures::FutureRecord;
use crate::memory::{GuestAllocator, GuestMemory, Pointer, SliceMemory};
use crate::queue::GuestInvoker;
use crate::wire;
use std::path::Path;
use std::sync::Arc;
use wasmtime::*;

/// Name of the import module guests link against
pub const IMPORT_MODULE: &str = "asyncify";

/// Per-store state visible to host functions
pub struct GuestState {
    dispatcher: Arc<Dispatcher>,
    limits: StoreLimits,
    log_guest: bool,
}

/// Compiles and links guest modules
pub struct WasmHost {
    engine: Engine,
    linker: Linker<GuestState>,
    config: WasmRuntimeConfig,
    log_guest: bool,
}

impl WasmHost {
    pub fn new(config: &HostConfig) -> HostResult<Self> {
        let mut engine_config = Config::new();
        // Fuel bounds every guest entry
        engine_config.consume_fuel(true);

        let engine = Engine::new(&engine_config).map_err(|e| unavailable("create engine", e))?;

        let mut linker = Linker::new(&engine);
        linker
            .func_wrap(IMPORT_MODULE, "log", guest_log)
            .map_err(|e| unavailable("link asyncify.log", e))?;
        linker
            .func_wrap(IMPORT_MODULE, "invoke", guest_invoke)
            .map_err(|e| unavailable("link asyncify.invoke", e))?;

        Ok(Self {
            engine,
            linker,
            config: config.wasm.clone(),
            log_guest: config.log_guest,
        })
    }

    /// Instantiate a guest from WASM (or WAT) bytes.
    pub fn load(&self, bytes: &[u8], dispatcher: Arc<Dispatcher>) -> HostResult<WasmGuest> {
        let module = Module::new(&self.engine, bytes).map_err(|e| unavailable("compile module", e))?;

        let state = GuestState {
            dispatcher,
            limits: StoreLimitsBuilder::new()
                .memory_size(self.config.max_memory_bytes)
                .build(),
            log_guest: self.log_guest,
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        refuel(&mut store, &self.config)?;

        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(|e| unavailable("instantiate module", e))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| HostError::GuestUnavailable("guest does not export memory".into()))?;
        let allocate = instance
            .get_typed_func::<u32, u32>(&mut store, "allocate")
            .map_err(|e| unavailable("resolve allocate", e))?;
        let call = instance
            .get_typed_func::<(u32, u32, u32), ()>(&mut store, "call")
            .map_err(|e| unavailable("resolve call", e))?;
        let callback = instance
            .get_typed_func::<(u32, u32, u32, u32, u32, u32), ()>(&mut store, "callback")
            .map_err(|e| unavailable("resolve callback", e))?;
        let release = instance
            .get_typed_func::<u32, ()>(&mut store, "release")
            .ok();

        tracing::debug!(
            memory_bytes = memory.data_size(&store),
            "Guest module instantiated"
        );

        Ok(WasmGuest {
            store,
            memory,
            allocate,
            release,
            call,
            callback,
            config: self.config.clone(),
        })
    }

    pub fn load_file(&self, path: &Path, dispatcher: Arc<Dispatcher>) -> HostResult<WasmGuest> {
        let bytes = std::fs::read(path).map_err(|e| {
            HostError::GuestUnavailable(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.load(&bytes, dispatcher)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// A loaded guest; driven by the guest-call queue
pub struct WasmGuest {
    store: Store<GuestState>,
    memory: Memory,
    allocate: TypedFunc<u32, u32>,
    release: Option<TypedFunc<u32, ()>>,
    call: TypedFunc<(u32, u32, u32), ()>,
    callback: TypedFunc<(u32, u32, u32, u32, u32, u32), ()>,
    config: WasmRuntimeConfig,
}

impl WasmGuest {
    fn place(&mut self, bytes: &[u8]) -> HostResult<Pointer> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| HostError::GuestUnavailable("payload exceeds 4GiB".into()))?;
        let ptr = self
            .allocate
            .call(&mut self.store, len)
            .map_err(|e| unavailable("allocate", e))?;
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|e| unavailable("write guest memory", e))?;
        Ok(Pointer::new(ptr, len))
    }

    fn free(&mut self, ptr: Pointer) {
        if let Some(release) = &self.release {
            if let Err(e) = release.call(&mut self.store, ptr.offset) {
                tracing::warn!(ptr = ptr.offset, error = %e, "Guest release failed");
            }
        }
    }

    fn read(&self, ptr: Pointer) -> HostResult<Vec<u8>> {
        let view = SliceMemory(self.memory.data(&self.store));
        let memory = GuestMemory::new(&view);
        Ok(memory.read(ptr)?.to_vec())
    }
}

impl GuestInvoker for WasmGuest {
    fn call(&mut self, input: &[u8]) -> HostResult<Vec<u8>> {
        refuel(&mut self.store, &self.config)?;
        let request = self.place(input)?;
        let out = self.place(&[0u8; 8])?;

        self.call
            .call(&mut self.store, (request.offset, request.len, out.offset))
            .map_err(|e| unavailable("guest call", e))?;

        let slot = self.read(out)?;
        let reply = Pointer::new(read_u32(&slot[..4]), read_u32(&slot[4..]));
        let output = self.read(reply)?;

        self.free(request);
        self.free(out);
        self.free(reply);
        Ok(output)
    }

    fn invoke_callback(&mut self, record: FutureRecord, payload: &[u8]) -> HostResult<()> {
        refuel(&mut self.store, &self.config)?;
        let data = self.place(payload)?;
        self.callback
            .call(
                &mut self.store,
                (
                    record.callback,
                    record.index,
                    record.context.offset,
                    record.context.len,
                    data.offset,
                    data.len,
                ),
            )
            .map_err(|e| unavailable("guest callback", e))?;
        self.free(data);
        Ok(())
    }
}

/// Allocates through the guest's `allocate` export from inside a host call
struct CallerAllocator<'a, 'c> {
    caller: &'a mut Caller<'c, GuestState>,
    memory: Memory,
    allocate: TypedFunc<u32, u32>,
}

impl GuestAllocator for CallerAllocator<'_, '_> {
    fn place(&mut self, bytes: &[u8]) -> HostResult<Pointer> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| HostError::GuestUnavailable("payload exceeds 4GiB".into()))?;
        let ptr = self
            .allocate
            .call(&mut *self.caller, len)
            .map_err(|e| unavailable("allocate", e))?;
        self.memory
            .write(&mut *self.caller, ptr as usize, bytes)
            .map_err(|e| unavailable("write guest memory", e))?;
        Ok(Pointer::new(ptr, len))
    }
}

fn guest_log(mut caller: Caller<'_, GuestState>, ptr: u32, len: u32) -> Result<()> {
    if !caller.data().log_guest {
        return Ok(());
    }
    let memory = exported_memory(&mut caller)?;
    let view = SliceMemory(memory.data(&caller));
    let bytes = GuestMemory::new(&view).read(Pointer::new(ptr, len))?;
    tracing::info!(target: "asyncify::guest", "{}", String::from_utf8_lossy(bytes));
    Ok(())
}

fn guest_invoke(
    mut caller: Caller<'_, GuestState>,
    out_ptr: u32,
    req_ptr: u32,
    req_len: u32,
) -> Result<i32> {
    let memory = exported_memory(&mut caller)?;
    let dispatcher = Arc::clone(&caller.data().dispatcher);

    let outcome = {
        let view = SliceMemory(memory.data(&caller));
        let guest = GuestMemory::new(&view);
        match guest.read(Pointer::new(req_ptr, req_len)) {
            Ok(request) => dispatcher.handle(request, &guest),
            Err(e) => Outcome::Failed(HostError::from(e).to_boundary()),
        }
    };

    let allocate = caller
        .get_export("allocate")
        .and_then(Extern::into_func)
        .ok_or_else(|| anyhow::anyhow!("guest does not export allocate"))?
        .typed::<u32, u32>(&caller)?;

    let mut allocator = CallerAllocator {
        caller: &mut caller,
        memory,
        allocate,
    };
    let reply = wire::encode(&dispatcher.reply(outcome, &mut allocator));
    let placed = allocator.place(&reply)?;

    let mut slot = [0u8; 8];
    slot[..4].copy_from_slice(&placed.offset.to_le_bytes());
    slot[4..].copy_from_slice(&placed.len.to_le_bytes());
    memory.write(&mut caller, out_ptr as usize, &slot)?;
    Ok(0)
}

fn exported_memory(caller: &mut Caller<'_, GuestState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow::anyhow!("guest does not export memory"))
}

fn refuel(store: &mut Store<GuestState>, config: &WasmRuntimeConfig) -> HostResult<()> {
    let fuel = if config.debug_mode {
        u64::MAX
    } else {
        config.max_fuel
    };
    store.set_fuel(fuel).map_err(|e| unavailable("set fuel", e))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn unavailable(what: &str, error: impl std::fmt::Display) -> HostError {
    HostError::GuestUnavailable(format!("{}: {}", what, error))
}
