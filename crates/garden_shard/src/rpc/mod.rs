//! Request/response RPC between the primary and its workers.
//!
//! Frames are JSON [`Envelope`]s carried over a [`Link`]. Each side owns an
//! [`RpcEndpoint`] that correlates responses with callers by
//! `(peer, call name)` and coalesces duplicate in-flight calls.

pub mod call;
pub mod endpoint;
pub mod envelope;
pub mod link;

pub use call::{Call, CallName};
pub use endpoint::{CorrelationKey, Incoming, RpcEndpoint};
pub use envelope::{Envelope, Request, Response};
pub use link::{Link, Peer};
