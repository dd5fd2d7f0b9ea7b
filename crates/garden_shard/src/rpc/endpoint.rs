//! Call correlation for one side of the RPC layer.
//!
//! Outgoing calls are keyed by `(peer, call name)`. While a key is in
//! flight, further calls with the same key join the pending result instead
//! of sending another frame, so only the first caller's arguments ever reach
//! the wire.

use super::call::{Call, CallName};
use super::envelope::{Envelope, Request, Response};
use super::link::Peer;
use crate::error::RpcError;
use crate::types::PeerId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type Waiter = oneshot::Sender<Result<Value, RpcError>>;

/// Identifies one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub peer: PeerId,
    pub name: CallName,
}

/// A request received from a peer, ready to be dispatched.
#[derive(Debug)]
pub struct Incoming {
    /// Name as it appeared on the wire, echoed back in the response.
    pub name: String,
    pub silent: bool,
    /// The decoded call, or the error to answer with.
    pub call: Result<Call, RpcError>,
}

#[derive(Debug)]
pub struct RpcEndpoint {
    local: PeerId,
    waiters: DashMap<CorrelationKey, Vec<Waiter>>,
}

impl RpcEndpoint {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            waiters: DashMap::new(),
        }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Sends `call` to `peer` and waits for its response.
    ///
    /// Joins the pending result if the same call to the same peer is
    /// already in flight.
    pub async fn call(&self, peer: &Peer, call: Call) -> Result<Value, RpcError> {
        let key = CorrelationKey {
            peer: peer.id(),
            name: call.name(),
        };
        let (tx, rx) = oneshot::channel();

        let first = match self.waiters.entry(key) {
            Entry::Occupied(mut waiting) => {
                waiting.get_mut().push(tx);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![tx]);
                true
            }
        };

        if first {
            let request = Request {
                name: key.name.to_string(),
                args: call.into_args(),
                silent: false,
            };
            if let Err(e) = peer.send(&Envelope::Rpc(request)) {
                self.settle(key, Err(e));
            }
        } else {
            trace!(local = %self.local, peer = %key.peer, call = %key.name, "Joining in-flight call");
        }

        rx.await
            .unwrap_or_else(|_| Err(RpcError::Disconnected(key.peer.to_string())))
    }

    /// Fire-and-forget call. Nothing waits for an answer.
    pub fn notify(&self, peer: &Peer, call: Call) -> Result<(), RpcError> {
        let request = Request {
            name: call.name().to_string(),
            args: call.into_args(),
            silent: true,
        };
        peer.send(&Envelope::Rpc(request))
    }

    /// Processes a frame received from `from`.
    ///
    /// Responses are matched against waiting callers and consumed here.
    /// Requests are decoded and handed back for dispatch.
    pub fn accept(&self, from: PeerId, frame: &str) -> Option<Incoming> {
        match Envelope::decode(frame) {
            Ok(Envelope::Rpc(request)) => {
                let call = request
                    .name
                    .parse::<CallName>()
                    .and_then(|name| Call::from_wire(name, request.args));
                Some(Incoming {
                    name: request.name,
                    silent: request.silent,
                    call,
                })
            }
            Ok(Envelope::RpcResp(response)) => {
                self.resolve(from, response);
                None
            }
            Err(e) => {
                warn!(local = %self.local, peer = %from, "⚠️ Dropping malformed frame: {e}");
                None
            }
        }
    }

    /// Answers a request. Successful results of silent calls are not sent;
    /// errors always are.
    pub fn respond(
        &self,
        peer: &Peer,
        name: &str,
        silent: bool,
        outcome: Result<Value, RpcError>,
    ) -> Result<(), RpcError> {
        if silent && outcome.is_ok() {
            return Ok(());
        }
        peer.send(&Envelope::RpcResp(Response::from_outcome(name, outcome)))
    }

    /// Rejects every call waiting on `peer`.
    pub fn fail_peer(&self, peer: PeerId) -> usize {
        let keys: Vec<CorrelationKey> = self
            .waiters
            .iter()
            .filter(|entry| entry.key().peer == peer)
            .map(|entry| *entry.key())
            .collect();

        for key in &keys {
            self.settle(*key, Err(RpcError::Disconnected(peer.to_string())));
        }
        keys.len()
    }

    /// Number of distinct in-flight correlation keys.
    pub fn in_flight(&self) -> usize {
        self.waiters.len()
    }

    fn resolve(&self, from: PeerId, response: Response) {
        let name = match response.name.parse::<CallName>() {
            Ok(name) => name,
            Err(_) => {
                debug!(local = %self.local, peer = %from, call = %response.name, "Discarding response to unknown call");
                return;
            }
        };

        let key = CorrelationKey { peer: from, name };
        if !self.settle(key, response.into_result()) {
            debug!(local = %self.local, peer = %from, call = %name, "Discarding unawaited response");
        }
    }

    fn settle(&self, key: CorrelationKey, outcome: Result<Value, RpcError>) -> bool {
        let Some((_, waiters)) = self.waiters.remove(&key) else {
            return false;
        };
        for waiter in waiters {
            // The caller may have given up; nothing to do then.
            let _ = waiter.send(outcome.clone());
        }
        true
    }
}
