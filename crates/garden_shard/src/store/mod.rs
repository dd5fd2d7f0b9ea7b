//! Durable storage for plant documents.
//!
//! The coordinator only talks to the [`DurableStore`] trait. The bundled
//! [`DocumentStore`] keeps documents in memory and mirrors them to a
//! JSON-lines file.

pub mod document;
pub mod filter;

use crate::error::StoreError;
use async_trait::async_trait;

pub use document::DocumentStore;
pub use filter::Filter;

/// A stored document: a flat JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Declares `fields` as a unique composite key. Fails if existing
    /// documents already collide.
    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), StoreError>;

    /// Reads persisted documents from the backing file, replacing whatever
    /// is held in memory.
    async fn load(&self) -> Result<usize, StoreError>;

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Inserts all documents or none of them.
    async fn insert(&self, docs: Vec<Document>) -> Result<Vec<Document>, StoreError>;

    /// Removes matching documents (only the first one unless `multi`).
    async fn remove(&self, filter: &Filter, multi: bool) -> Result<usize, StoreError>;

    /// Merges `patch` into matching documents (only the first one unless
    /// `multi`).
    async fn update(&self, filter: &Filter, patch: &Document, multi: bool) -> Result<usize, StoreError>;

    /// Removes every document.
    async fn drop_all(&self) -> Result<(), StoreError>;

    /// Swaps the whole collection for `docs` in a single write. On error
    /// the previous contents stay in place.
    async fn replace_all(&self, docs: Vec<Document>) -> Result<usize, StoreError>;
}
