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

//! Guest linear memory access
//!
//! The engine exposes guest memory through [`LinearMemory`]. Nothing in the
//! host reads it directly: [`GuestMemory`] wraps the accessor and refuses any
//! pointer whose range leaves the current memory size, and only the value
//! module is allowed to read through it.

use crate::error::{BoundsError, HostError, HostResult};
use serde::{Deserialize, Serialize};

/// `{offset, length}` reference into guest linear memory (WASM32 addresses)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Pointer {
    pub offset: u32,
    pub len: u32,
}

impl Pointer {
    pub fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    /// One past the last byte; computed wide so it cannot wrap.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Linear memory accessor provided by the WASM engine.
pub trait LinearMemory {
    /// Current size of the memory in bytes.
    fn bounds(&self) -> usize;

    /// Borrow `len` bytes at `offset`.
    ///
    /// Only called by [`GuestMemory`] after the range has been checked
    /// against [`LinearMemory::bounds`].
    fn read(&self, offset: usize, len: usize) -> &[u8];
}

/// Places host-produced bytes into guest memory so they can travel as `Ref`.
pub trait GuestAllocator {
    fn place(&mut self, bytes: &[u8]) -> HostResult<Pointer>;
}

/// Borrowed view over a memory snapshot (e.g. `wasmtime::Memory::data`).
#[derive(Debug, Clone, Copy)]
pub struct SliceMemory<'a>(pub &'a [u8]);

impl LinearMemory for SliceMemory<'_> {
    fn bounds(&self) -> usize {
        self.0.len()
    }

    fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.0[offset..offset + len]
    }
}

impl LinearMemory for Vec<u8> {
    fn bounds(&self) -> usize {
        self.len()
    }

    fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self[offset..offset + len]
    }
}

/// Bounds-checked gate in front of a [`LinearMemory`].
#[derive(Clone, Copy)]
pub struct GuestMemory<'m> {
    inner: &'m dyn LinearMemory,
}

impl<'m> GuestMemory<'m> {
    pub fn new(inner: &'m dyn LinearMemory) -> Self {
        Self { inner }
    }

    /// Current size of the underlying memory
    pub fn bounds(&self) -> usize {
        self.inner.bounds()
    }

    /// Check that `ptr` lies entirely inside the memory.
    ///
    /// A range ending exactly at `bounds()` is valid.
    pub fn check(&self, ptr: Pointer) -> Result<(), BoundsError> {
        let bounds = self.inner.bounds();
        if ptr.end() > bounds as u64 {
            return Err(BoundsError {
                offset: ptr.offset,
                len: ptr.len,
                bounds,
            });
        }
        Ok(())
    }

    pub(crate) fn read(&self, ptr: Pointer) -> Result<&'m [u8], BoundsError> {
        self.check(ptr)?;
        Ok(self.inner.read(ptr.offset as usize, ptr.len as usize))
    }
}

/// Host-owned memory with a bump allocator.
///
/// Stands in for a guest's linear memory where no engine is involved: host
/// side encoding, tests and tooling.
#[derive(Debug, Clone)]
pub struct ScratchMemory {
    bytes: Vec<u8>,
    limit: usize,
}

impl ScratchMemory {
    /// Memory that may grow up to `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Memory pre-filled with `bytes`; allocation continues after them.
    pub fn with_contents(bytes: Vec<u8>) -> Self {
        let limit = bytes.len().max(u32::MAX as usize);
        Self { bytes, limit }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn view(&self) -> GuestMemory<'_> {
        GuestMemory::new(self)
    }
}

impl LinearMemory for ScratchMemory {
    fn bounds(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }
}

impl GuestAllocator for ScratchMemory {
    fn place(&mut self, bytes: &[u8]) -> HostResult<Pointer> {
        let offset = self.bytes.len();
        if offset + bytes.len() > self.limit || offset + bytes.len() > u32::MAX as usize {
            return Err(HostError::GuestUnavailable(format!(
                "scratch memory exhausted: {} + {} > {}",
                offset,
                bytes.len(),
                self.limit
            )));
        }
        self.bytes.extend_from_slice(bytes);
        Ok(Pointer::new(offset as u32, bytes.len() as u32))
    }
}
