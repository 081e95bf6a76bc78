//! Tests for the torus-net crate.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use torus_types::Peer;

    use crate::message::{RingMessage, RingState};
    use crate::security::TransportSecurity;
    use crate::transport::QuicTransport;
    use crate::{NetError, PeerRpc, Transport};

    /// A canned handler: answers every lookup with its own peer,
    /// records notifies, and fails lookups for one poisoned id.
    struct StubNode {
        local: Peer,
        notified: Mutex<Vec<Peer>>,
    }

    const POISONED_ID: u64 = 0xdead;

    impl StubNode {
        fn new(name: &str, id: u64) -> Arc<Self> {
            Arc::new(Self {
                local: Peer::new(name, id, format!("{name}:0")),
                notified: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl PeerRpc for StubNode {
        async fn find_successor(&self, id: u64) -> Result<Peer, NetError> {
            if id == POISONED_ID {
                return Err(NetError::Remote("no contender answered".into()));
            }
            Ok(self.local.clone())
        }

        async fn get_ring(&self) -> Result<RingState, NetError> {
            Ok(RingState {
                successors: vec![self.local.clone()],
                predecessor: Some(self.local.clone()),
            })
        }

        async fn notify(&self, peer: Peer) -> Result<(), NetError> {
            self.notified.lock().await.push(peer);
            Ok(())
        }
    }

    /// Two served transports sharing one self-signed identity, so each
    /// trusts the other's certificate.
    async fn two_transports() -> (
        QuicTransport,
        Box<dyn crate::ServerHandle>,
        String,
        Arc<StubNode>,
    ) {
        let security = TransportSecurity::self_signed().unwrap();

        let caller = QuicTransport::new("127.0.0.1:0".parse().unwrap(), security.clone());
        let caller_stub = StubNode::new("caller", 1);
        let _caller_handle = caller.serve(caller_stub).await.unwrap();

        let callee_stub = StubNode::new("callee", 2);
        let callee = QuicTransport::new("127.0.0.1:0".parse().unwrap(), security);
        let callee_handle = callee.serve(callee_stub.clone()).await.unwrap();
        let callee_addr = callee_handle.local_addr();

        (caller, callee_handle, callee_addr, callee_stub)
    }

    #[test]
    fn test_message_roundtrip_postcard() {
        let peer = Peer::new("n1", 42, "127.0.0.1:9000");
        let messages = vec![
            RingMessage::FindSuccessor { id: 7 },
            RingMessage::FoundSuccessor { peer: peer.clone() },
            RingMessage::GetRing,
            RingMessage::Ring(RingState {
                successors: vec![peer.clone(), peer.clone()],
                predecessor: None,
            }),
            RingMessage::Ring(RingState {
                successors: vec![],
                predecessor: Some(peer.clone()),
            }),
            RingMessage::Notify { peer },
            RingMessage::NotifyAck,
            RingMessage::Failed {
                reason: "gone".into(),
            },
        ];

        for msg in &messages {
            let encoded = postcard::to_allocvec(msg).unwrap();
            let decoded: RingMessage = postcard::from_bytes(&encoded).unwrap();
            assert_eq!(msg, &decoded);
        }
    }

    #[tokio::test]
    async fn test_find_successor_over_quic() {
        let (caller, _callee_handle, callee_addr, _) = two_transports().await;

        let client = caller.connect(&callee_addr).await.unwrap();
        let peer = client.find_successor(42).await.unwrap();
        assert_eq!(peer.name, "callee");
        assert_eq!(peer.id, 2);
    }

    #[tokio::test]
    async fn test_get_ring_over_quic() {
        let (caller, _callee_handle, callee_addr, _) = two_transports().await;

        let client = caller.connect(&callee_addr).await.unwrap();
        let state = client.get_ring().await.unwrap();
        assert_eq!(state.successors.len(), 1);
        assert_eq!(state.predecessor.unwrap().name, "callee");
    }

    #[tokio::test]
    async fn test_notify_reaches_handler() {
        let (caller, _callee_handle, callee_addr, callee_stub) = two_transports().await;

        let client = caller.connect(&callee_addr).await.unwrap();
        client
            .notify(Peer::new("caller", 1, "caller:0"))
            .await
            .unwrap();

        let notified = callee_stub.notified.lock().await;
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].name, "caller");
    }

    #[tokio::test]
    async fn test_semantic_failure_surfaces_as_remote_error() {
        let (caller, _callee_handle, callee_addr, _) = two_transports().await;

        let client = caller.connect(&callee_addr).await.unwrap();
        let err = client.find_successor(POISONED_ID).await.unwrap_err();
        assert!(matches!(err, NetError::Remote(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_connect_before_serve_fails() {
        let security = TransportSecurity::self_signed().unwrap();
        let transport = QuicTransport::new("127.0.0.1:0".parse().unwrap(), security);

        let err = transport.connect("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, NetError::NotStarted), "got: {err}");
    }

    #[tokio::test]
    async fn test_bad_address_rejected() {
        let security = TransportSecurity::self_signed().unwrap();
        let transport = QuicTransport::new("127.0.0.1:0".parse().unwrap(), security);
        let _handle = transport.serve(StubNode::new("n", 1)).await.unwrap();

        let err = transport.connect("not-an-address").await.unwrap_err();
        assert!(matches!(err, NetError::BadAddress(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let (caller, callee_handle, callee_addr, _) = two_transports().await;

        let client = caller.connect(&callee_addr).await.unwrap();
        client.find_successor(1).await.unwrap();

        callee_handle.shutdown();

        // The pooled connection was closed by the remote endpoint; the
        // next call must surface an error, not hang or succeed.
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            client.find_successor(1),
        )
        .await
        .expect("call must not hang");
        assert!(result.is_err());
    }
}
