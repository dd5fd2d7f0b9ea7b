//! In-process stand-in for the channel between the primary and a worker.
//!
//! Frames are serialized strings, so nothing but plain data crosses the
//! boundary, as it would between processes.

use super::envelope::Envelope;
use crate::error::RpcError;
use crate::types::PeerId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Sending half addressed to a remote peer.
#[derive(Debug, Clone)]
pub struct Peer {
    id: PeerId,
    tx: UnboundedSender<String>,
}

impl Peer {
    /// Identity of the remote side.
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn send(&self, envelope: &Envelope) -> Result<(), RpcError> {
        let frame = envelope.encode()?;
        self.send_frame(frame)
    }

    pub fn send_frame(&self, frame: String) -> Result<(), RpcError> {
        self.tx
            .send(frame)
            .map_err(|_| RpcError::Disconnected(self.id.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One end of a bidirectional link: a [`Peer`] to talk to the other side
/// and the inbox of frames the other side sent.
#[derive(Debug)]
pub struct Link {
    peer: Peer,
    inbox: UnboundedReceiver<String>,
}

impl Link {
    /// Connects `a` and `b`. The first link is held by `a` and talks to `b`.
    pub fn pair(a: PeerId, b: PeerId) -> (Link, Link) {
        let (to_b, b_inbox) = mpsc::unbounded_channel();
        let (to_a, a_inbox) = mpsc::unbounded_channel();

        (
            Link {
                peer: Peer { id: b, tx: to_b },
                inbox: a_inbox,
            },
            Link {
                peer: Peer { id: a, tx: to_a },
                inbox: b_inbox,
            },
        )
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn split(self) -> (Peer, UnboundedReceiver<String>) {
        (self.peer, self.inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Request;
    use crate::types::WorkerId;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let worker = PeerId::Worker(WorkerId(1));
        let (primary_side, worker_side) = Link::pair(PeerId::Primary, worker);
        assert_eq!(primary_side.peer().id(), worker);
        assert_eq!(worker_side.peer().id(), PeerId::Primary);

        let (to_worker, mut primary_inbox) = primary_side.split();
        let (to_primary, mut worker_inbox) = worker_side.split();

        to_worker.send_frame("ping".into()).unwrap();
        to_primary
            .send(&Envelope::Rpc(Request {
                name: "remove_plant".into(),
                args: vec![],
                silent: true,
            }))
            .unwrap();

        assert_eq!(worker_inbox.recv().await.as_deref(), Some("ping"));
        let frame = primary_inbox.recv().await.unwrap();
        assert!(frame.contains("remove_plant"));
    }

    #[tokio::test]
    async fn test_send_to_dropped_side_fails() {
        let (primary_side, worker_side) = Link::pair(PeerId::Primary, PeerId::Worker(WorkerId(3)));
        drop(worker_side);

        let peer = primary_side.peer().clone();
        assert!(peer.is_closed());
        assert_eq!(
            peer.send_frame("x".into()),
            Err(RpcError::Disconnected("worker-3".into()))
        );
    }
}
