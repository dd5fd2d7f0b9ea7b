//! Error types for the shard layer.
//!
//! Errors are split by where they are allowed to travel:
//!
//! * [`ValidationError`] stays inside the worker that raised it. Batches
//!   collect them per item and keep going.
//! * [`RpcError`] crosses the process boundary inside a response envelope,
//!   so it is serializable and rebuilt on the calling side.
//! * [`StoreError`] and [`CoordinatorError`] live on the primary.

use crate::types::Point;
use serde::{Deserialize, Serialize};

/// Rejection of a single plant candidate or interaction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("plant record must be an object")]
    NotAnObject,

    #[error("missing plant field `{0}`")]
    MissingField(&'static str),

    #[error("wrong plant field `{field}`: {value}")]
    BadField { field: &'static str, value: String },

    #[error("unknown seed: {0}")]
    UnknownSeed(i64),

    #[error("space {0} is already taken")]
    Occupied(Point),

    #[error("no plants on {0}")]
    NoPlant(Point),

    #[error("cannot interact with growing plant on {0}")]
    Growing(Point),
}

/// Failure of an RPC call, as seen by the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RpcError {
    /// The call name is not part of the protocol at all.
    #[error("unknown RPC call `{0}`")]
    UnknownCall(String),

    /// The call exists but the receiving side does not serve it.
    #[error("{0} RPC is not registered")]
    NotRegistered(String),

    #[error("bad arguments for `{name}`: {reason}")]
    BadArguments { name: String, reason: String },

    /// The handler ran and returned an error.
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("peer {0} disconnected")]
    Disconnected(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Codec(e.to_string())
    }
}

/// Durable store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error on line {line}: {reason}")]
    Codec { line: usize, reason: String },

    #[error("unique index on {fields:?} violated by key {key}")]
    UniqueViolation { fields: Vec<String>, key: String },

    #[error("document is not an object: {0}")]
    NotAnObject(String),
}

/// Invalid growth profile definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("seed `{name}`: {reason}")]
    InvalidSeed { name: String, reason: String },
}

/// Errors surfaced by the coordinator's own operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
