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

//! Capability catalog
//!
//! Capabilities are registered under a unique id together with the schema of
//! their arguments. The catalog is read concurrently by every dispatch.

use crate::error::ExecutionError;
use crate::schema::Schema;
use crate::validator::ValidatedArgs;
use crate::wire;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Id of the built-in listing capability
pub const CATALOG_LIST: &str = "catalog.list";

/// Id of the built-in describe capability
pub const CATALOG_DESCRIBE: &str = "catalog.describe";

/// Result of a capability: the encoded reply payload or a failure
pub type CapabilityResult = Result<Vec<u8>, ExecutionError>;

/// Boxed work that completes a deferred call
pub type DeferredWork = Pin<Box<dyn Future<Output = CapabilityResult> + Send + 'static>>;

/// How a capability answers a call.
pub enum Execution {
    /// Finished on the calling thread
    Ready(CapabilityResult),
    /// Finishes later on the host runtime; the guest receives a future
    Deferred(DeferredWork),
}

impl Execution {
    pub fn ready(bytes: Vec<u8>) -> Self {
        Execution::Ready(Ok(bytes))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Execution::Ready(Err(ExecutionError::new(reason)))
    }

    pub fn deferred<F>(work: F) -> Self
    where
        F: Future<Output = CapabilityResult> + Send + 'static,
    {
        Execution::Deferred(Box::pin(work))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Execution::Deferred(_))
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
            Execution::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Static description of a capability
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schema: Schema,
}

impl Descriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, schema: Schema) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn entry(&self) -> wire::Entry {
        wire::Entry {
            id: self.id.clone(),
            name: self.name.clone(),
            desc: self.description.clone(),
        }
    }
}

/// A native operation callable by the guest.
///
/// `invoke` runs on the dispatching thread with arguments that have already
/// passed validation. Work that may take a while should return
/// [`Execution::Deferred`].
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &Descriptor;

    fn invoke(&self, args: ValidatedArgs) -> Execution;
}

/// Errors raised while registering capabilities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("capability already registered: {0}")]
    AlreadyRegistered(String),

    #[error("capability id is reserved: {0}")]
    Reserved(String),

    #[error("capability id must not be empty")]
    EmptyId,
}

/// Registry of capabilities keyed by id.
pub struct Catalog {
    capabilities: DashMap<String, Arc<dyn Capability>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            capabilities: DashMap::new(),
        }
    }

    /// Register a capability under its descriptor id.
    pub fn register(&self, capability: impl Capability + 'static) -> Result<(), CatalogError> {
        self.register_arc(Arc::new(capability))
    }

    pub fn register_arc(&self, capability: Arc<dyn Capability>) -> Result<(), CatalogError> {
        let id = capability.descriptor().id.clone();
        if id.is_empty() {
            return Err(CatalogError::EmptyId);
        }
        if id == CATALOG_LIST || id == CATALOG_DESCRIBE {
            return Err(CatalogError::Reserved(id));
        }
        match self.capabilities.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                Err(CatalogError::AlreadyRegistered(e.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                tracing::debug!(capability = %e.key(), "Registered capability");
                e.insert(capability);
                Ok(())
            }
        }
    }

    /// Remove a capability; returns whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        self.capabilities.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Catalog entries sorted by id
    pub fn entries(&self) -> Vec<wire::Entry> {
        let mut entries: Vec<_> = self
            .capabilities
            .iter()
            .map(|c| c.value().descriptor().entry())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Entry plus argument list of one capability
    pub fn describe(&self, id: &str) -> Option<wire::Describe> {
        self.capabilities.get(id).map(|c| {
            let descriptor = c.value().descriptor();
            wire::Describe {
                entry: Some(descriptor.entry()),
                arguments: descriptor.schema.to_wire(),
            }
        })
    }
}

/// Capability backed by a plain function
pub struct FnCapability<F> {
    descriptor: Descriptor,
    handler: F,
}

impl<F> FnCapability<F>
where
    F: Fn(ValidatedArgs) -> Execution + Send + Sync,
{
    pub fn new(descriptor: Descriptor, handler: F) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

impl<F> Capability for FnCapability<F>
where
    F: Fn(ValidatedArgs) -> Execution + Send + Sync,
{
    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn invoke(&self, args: ValidatedArgs) -> Execution {
        (self.handler)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(id: &str) -> FnCapability<impl Fn(ValidatedArgs) -> Execution + Send + Sync> {
        FnCapability::new(
            Descriptor::new(id, id.to_uppercase(), Schema::empty()),
            |_args| Execution::ready(b"ok".to_vec()),
        )
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let catalog = Catalog::new();
        catalog.register(echo("a.b")).unwrap();
        assert_eq!(
            catalog.register(echo("a.b")),
            Err(CatalogError::AlreadyRegistered("a.b".into()))
        );
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_reserved_ids() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.register(echo(CATALOG_LIST)),
            Err(CatalogError::Reserved(_))
        ));
    }

    #[test]
    fn test_entries_sorted() {
        let catalog = Catalog::new();
        for id in ["z.last", "a.first", "m.middle"] {
            catalog.register(echo(id)).unwrap();
        }
        let ids: Vec<_> = catalog.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a.first", "m.middle", "z.last"]);
    }

    #[test]
    fn test_describe_and_unregister() {
        let catalog = Catalog::new();
        catalog.register(echo("x.y")).unwrap();
        let described = catalog.describe("x.y").unwrap();
        assert_eq!(described.entry.unwrap().name, "X.Y");
        assert!(described.arguments.is_empty());
        assert!(catalog.unregister("x.y"));
        assert!(catalog.describe("x.y").is_none());
    }
}
