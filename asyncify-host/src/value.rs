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

//! Boundary values
//!
//! A [`Value`] is either inlined (`Raw`) or a [`Pointer`] into guest linear
//! memory (`Ref`). The enum makes the "neither" state unrepresentable; the
//! wire form can still express it, so [`Value::try_from`] rejects it with a
//! protocol error.
//!
//! [`decode`] is the single gate through which boundary memory is read. A
//! `Ref` is bounds-checked here, before any validator or capability sees it,
//! and is borrowed rather than copied.

use crate::error::{HostResult, ProtocolError};
use crate::memory::{GuestAllocator, GuestMemory, Pointer};
use crate::wire;
use std::borrow::Cow;

/// A payload crossing the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Inline bytes (also used for UTF-8 text)
    Raw(Vec<u8>),
    /// Reference into guest memory; the guest owns and keeps it valid for
    /// the duration of the call
    Ref(Pointer),
}

impl Value {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Raw(bytes.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Raw(s.into().into_bytes())
    }

    /// `Int` arguments travel as 4-byte little-endian
    pub fn int(v: i32) -> Self {
        Value::Raw(v.to_le_bytes().to_vec())
    }

    /// `Double` arguments travel as 8-byte little-endian
    pub fn double(v: f64) -> Self {
        Value::Raw(v.to_le_bytes().to_vec())
    }

    pub fn reference(offset: u32, len: u32) -> Self {
        Value::Ref(Pointer::new(offset, len))
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Value::Raw(_))
    }

    /// Payload length without touching guest memory
    pub fn len(&self) -> usize {
        match self {
            Value::Raw(bytes) => bytes.len(),
            Value::Ref(ptr) => ptr.len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Choose the representation for `payload`: inline below `threshold`,
/// otherwise placed in guest memory and referenced.
pub fn encode(
    payload: &[u8],
    threshold: usize,
    allocator: &mut dyn GuestAllocator,
) -> HostResult<Value> {
    if payload.len() < threshold {
        return Ok(Value::Raw(payload.to_vec()));
    }
    let ptr = allocator.place(payload)?;
    Ok(Value::Ref(ptr))
}

/// Resolve a value to its bytes.
///
/// `Raw` never consults memory. `Ref` fails with a bounds error if
/// `offset + len` exceeds the memory's current size.
pub fn decode<'a>(value: &'a Value, memory: &GuestMemory<'a>) -> HostResult<Cow<'a, [u8]>> {
    match value {
        Value::Raw(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
        Value::Ref(ptr) => Ok(Cow::Borrowed(memory.read(*ptr)?)),
    }
}

/// Resolve a value to UTF-8 text.
pub fn decode_text<'a>(value: &'a Value, memory: &GuestMemory<'a>) -> HostResult<Cow<'a, str>> {
    match decode(value, memory)? {
        Cow::Borrowed(bytes) => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()).into()),
        Cow::Owned(bytes) => String::from_utf8(bytes)
            .map(Cow::Owned)
            .map_err(|e| ProtocolError::InvalidUtf8(e.to_string()).into()),
    }
}

/// Resolve a wire value in place, rejecting an unset oneof.
///
/// Borrows from the message or from guest memory; nothing is copied.
pub fn decode_wire<'a>(
    value: &'a wire::Bytes,
    memory: &GuestMemory<'a>,
) -> HostResult<Cow<'a, [u8]>> {
    match &value.data {
        Some(wire::bytes::Data::Raw(bytes)) => Ok(Cow::Borrowed(bytes.as_slice())),
        Some(wire::bytes::Data::Ptr(ptr)) => Ok(Cow::Borrowed(memory.read((*ptr).into())?)),
        None => Err(ProtocolError::UnsetValue.into()),
    }
}

impl TryFrom<wire::Bytes> for Value {
    type Error = ProtocolError;

    fn try_from(value: wire::Bytes) -> Result<Self, Self::Error> {
        match value.data {
            Some(wire::bytes::Data::Raw(bytes)) => Ok(Value::Raw(bytes)),
            Some(wire::bytes::Data::Ptr(ptr)) => Ok(Value::Ref(ptr.into())),
            None => Err(ProtocolError::UnsetValue),
        }
    }
}

impl TryFrom<wire::Text> for Value {
    type Error = ProtocolError;

    fn try_from(value: wire::Text) -> Result<Self, Self::Error> {
        match value.data {
            Some(wire::text::Data::Raw(s)) => Ok(Value::Raw(s.into_bytes())),
            Some(wire::text::Data::Ptr(ptr)) => Ok(Value::Ref(ptr.into())),
            None => Err(ProtocolError::UnsetValue),
        }
    }
}

impl From<Value> for wire::Bytes {
    fn from(value: Value) -> Self {
        let data = match value {
            Value::Raw(bytes) => wire::bytes::Data::Raw(bytes),
            Value::Ref(ptr) => wire::bytes::Data::Ptr(ptr.into()),
        };
        wire::Bytes { data: Some(data) }
    }
}

impl From<wire::Pointer> for Pointer {
    fn from(p: wire::Pointer) -> Self {
        Pointer::new(p.ptr, p.len)
    }
}

impl From<Pointer> for wire::Pointer {
    fn from(p: Pointer) -> Self {
        wire::Pointer {
            ptr: p.offset,
            len: p.len,
        }
    }
}
