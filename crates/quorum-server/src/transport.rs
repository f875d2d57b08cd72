//! Outbound transport abstraction.
//!
//! The WebSocket (or other) connection layer lives outside this crate. The
//! server only needs to hand encoded frames to a peer; [`MemoryTransport`]
//! does that over a Tokio channel for tests and embedding.

use quorum_core::PeerId;
use tokio::sync::mpsc;

use crate::error::ServerError;

/// Delivers encoded frames to peers.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Send `bytes` to `peer`.
    ///
    /// Delivery is best effort: reliability and ordering are the transport's
    /// concern, and the ratchet tolerates loss and reordering.
    fn send(
        &self,
        peer: &PeerId,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), ServerError>> + Send;
}

/// Frame handed to a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination peer
    pub peer: PeerId,
    /// Encoded frame
    pub bytes: Vec<u8>,
}

/// In-process transport backed by an unbounded Tokio channel.
#[derive(Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl MemoryTransport {
    /// Create a transport and the receiver that observes everything it sends.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for MemoryTransport {
    fn send(
        &self,
        peer: &PeerId,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), ServerError>> + Send {
        let result = self
            .tx
            .send(Outbound { peer: peer.clone(), bytes })
            .map_err(|_| ServerError::Transport(format!("receiver for {peer} dropped")));
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_receiver() {
        let (transport, mut rx) = MemoryTransport::channel();
        transport.send(&PeerId::from("alice"), b"frame".to_vec()).await.unwrap();

        let outbound = rx.recv().await.unwrap();
        assert_eq!(outbound.peer, PeerId::from("alice"));
        assert_eq!(outbound.bytes, b"frame");
    }

    #[tokio::test]
    async fn closed_receiver_is_transport_error() {
        let (transport, rx) = MemoryTransport::channel();
        drop(rx);

        let result = transport.send(&PeerId::from("alice"), Vec::new()).await;
        assert!(matches!(result, Err(ServerError::Transport(_))));
    }
}
