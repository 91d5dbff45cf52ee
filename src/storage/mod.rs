//! Storage boundary — generic CRUD over gateway records
//!
//! The core never depends on a storage engine. Configuration records are
//! read through [`Repository`], and each engine supplies an adapter.
//! [`MemoryRepository`] is the in-process one.

mod memory;

pub use memory::MemoryRepository;

use crate::config::{EndpointConfig, OriginConfig};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Storage failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    #[error("record not found: {0}")]
    NotFound(String),

    /// A record with the same id or GUID already exists
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// Engine-specific failure
    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A persistable record with a human identifier and a GUID
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn guid(&self) -> Uuid;
}

impl Record for OriginConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn guid(&self) -> Uuid {
        self.guid
    }
}

impl Record for EndpointConfig {
    fn id(&self) -> &str {
        &self.id
    }

    fn guid(&self) -> Uuid {
        self.guid
    }
}

/// Predicate used by filtered queries
pub type Predicate<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Async CRUD repository
///
/// Every operation fails with [`StorageError::Cancelled`] when `cancel`
/// fires before it completes. Results keep insertion order.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Store a new record; rejects a duplicate id or GUID
    async fn insert(&self, record: T, cancel: &CancellationToken) -> StorageResult<T>;

    async fn select_all(&self, cancel: &CancellationToken) -> StorageResult<Vec<T>>;

    async fn select_many(
        &self,
        predicate: Predicate<'_, T>,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<T>>;

    async fn select_by_id(&self, id: &str, cancel: &CancellationToken) -> StorageResult<Option<T>>;

    async fn select_by_guid(
        &self,
        guid: Uuid,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<T>>;

    /// Replace the record with the same GUID
    async fn update(&self, record: T, cancel: &CancellationToken) -> StorageResult<T>;

    /// Delete by GUID; returns whether a record was removed
    async fn delete(&self, guid: Uuid, cancel: &CancellationToken) -> StorageResult<bool>;

    /// Delete every matching record; returns how many were removed
    async fn delete_many(
        &self,
        predicate: Predicate<'_, T>,
        cancel: &CancellationToken,
    ) -> StorageResult<usize>;

    async fn exists(&self, guid: Uuid, cancel: &CancellationToken) -> StorageResult<bool>;

    async fn count(&self, cancel: &CancellationToken) -> StorageResult<usize>;
}
