//! QUIC transport: framing, listener accept loop, pooled client.

use std::net::SocketAddr;
use std::sync::Arc;

use iroh_quinn::TokioRuntime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use torus_types::Peer;

use crate::error::NetError;
use crate::message::{RingMessage, RingState};
use crate::security::TransportSecurity;
use crate::{PeerRpc, ServerHandle, Transport};

/// Maximum framed message size. Ring messages carry at most a handful
/// of peer descriptors; anything near this limit is corrupt.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Per-call deadline, covering connect, request, and response. Keeps
/// dead-peer detection bounded so a stabilization pass cannot hang on
/// an unresponsive successor.
const RPC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Send one message on a stream: 4-byte big-endian length prefix, then
/// the postcard-encoded payload, then finish the stream.
pub async fn send_message(
    send: &mut iroh_quinn::SendStream,
    message: &RingMessage,
) -> Result<(), NetError> {
    let payload =
        postcard::to_allocvec(message).map_err(|e| NetError::Serialization(e.to_string()))?;

    send.write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    send.write_all(&payload).await?;
    send.finish()?;

    Ok(())
}

/// Receive one length-prefixed message from a stream.
pub async fn recv_message(recv: &mut iroh_quinn::RecvStream) -> Result<RingMessage, NetError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let payload = recv.read_to_end(len).await?;
    let message =
        postcard::from_bytes(&payload).map_err(|e| NetError::Serialization(e.to_string()))?;

    Ok(message)
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// The production transport: one iroh-quinn endpoint per node, serving
/// incoming RPCs and dialing peers by socket-address string.
pub struct QuicTransport {
    bind_addr: SocketAddr,
    security: TransportSecurity,
    endpoint: Mutex<Option<iroh_quinn::Endpoint>>,
}

impl QuicTransport {
    /// Create a transport that will bind `bind_addr` when served.
    /// No sockets are opened here.
    pub fn new(bind_addr: SocketAddr, security: TransportSecurity) -> Self {
        Self {
            bind_addr,
            security,
            endpoint: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Transport for QuicTransport {
    async fn serve(&self, handler: Arc<dyn PeerRpc>) -> Result<Box<dyn ServerHandle>, NetError> {
        let mut slot = self.endpoint.lock().await;
        if slot.is_some() {
            return Err(NetError::Connect("endpoint already bound".into()));
        }

        let socket = std::net::UdpSocket::bind(self.bind_addr)
            .map_err(|e| NetError::Connect(e.to_string()))?;
        let mut endpoint = iroh_quinn::Endpoint::new(
            iroh_quinn::EndpointConfig::default(),
            Some(self.security.server.clone()),
            socket,
            Arc::new(TokioRuntime),
        )
        .map_err(|e| NetError::Connect(e.to_string()))?;
        endpoint.set_default_client_config(self.security.client.clone());

        let local_addr = endpoint
            .local_addr()
            .map_err(|e| NetError::Connect(e.to_string()))?;

        let task = tokio::spawn(accept_loop(endpoint.clone(), handler));
        *slot = Some(endpoint.clone());

        debug!(%local_addr, "rpc listener bound");

        Ok(Box::new(QuicServerHandle {
            endpoint,
            local_addr,
            task,
        }))
    }

    async fn connect(&self, addr: &str) -> Result<Arc<dyn PeerRpc>, NetError> {
        let endpoint = self
            .endpoint
            .lock()
            .await
            .clone()
            .ok_or(NetError::NotStarted)?;
        let remote: SocketAddr = addr
            .parse()
            .map_err(|_| NetError::BadAddress(addr.to_string()))?;

        Ok(Arc::new(QuicClient {
            endpoint,
            remote,
            server_name: self.security.server_name.clone(),
            conn: Mutex::new(None),
        }))
    }
}

struct QuicServerHandle {
    endpoint: iroh_quinn::Endpoint,
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle for QuicServerHandle {
    fn local_addr(&self) -> String {
        self.local_addr.to_string()
    }

    fn shutdown(&self) {
        self.task.abort();
        self.endpoint.close(0u32.into(), b"stopped");
    }
}

/// Accept connections until the endpoint closes; one task per
/// connection, one task per request stream.
async fn accept_loop(endpoint: iroh_quinn::Endpoint, handler: Arc<dyn PeerRpc>) {
    while let Some(incoming) = endpoint.accept().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            let conn = match incoming.await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(%e, "handshake failed");
                    return;
                }
            };
            loop {
                match conn.accept_bi().await {
                    Ok((send, recv)) => {
                        let handler = handler.clone();
                        tokio::spawn(handle_stream(send, recv, handler));
                    }
                    Err(e) => {
                        debug!(%e, "connection closed");
                        break;
                    }
                }
            }
        });
    }
}

async fn handle_stream(
    mut send: iroh_quinn::SendStream,
    mut recv: iroh_quinn::RecvStream,
    handler: Arc<dyn PeerRpc>,
) {
    let request = match recv_message(&mut recv).await {
        Ok(request) => request,
        Err(e) => {
            warn!(%e, "failed to decode request");
            return;
        }
    };

    let response = dispatch(&*handler, request).await;

    if let Err(e) = send_message(&mut send, &response).await {
        debug!(%e, "failed to send response");
    }
}

/// Map one request to one response through the handler. Handler errors
/// become [`RingMessage::Failed`] so the caller can tell a semantic
/// failure from a dead peer.
async fn dispatch(handler: &dyn PeerRpc, request: RingMessage) -> RingMessage {
    match request {
        RingMessage::FindSuccessor { id } => match handler.find_successor(id).await {
            Ok(peer) => RingMessage::FoundSuccessor { peer },
            Err(e) => RingMessage::Failed {
                reason: e.to_string(),
            },
        },
        RingMessage::GetRing => match handler.get_ring().await {
            Ok(state) => RingMessage::Ring(state),
            Err(e) => RingMessage::Failed {
                reason: e.to_string(),
            },
        },
        RingMessage::Notify { peer } => match handler.notify(peer).await {
            Ok(()) => RingMessage::NotifyAck,
            Err(e) => RingMessage::Failed {
                reason: e.to_string(),
            },
        },
        other => RingMessage::Failed {
            reason: format!("not a request: {other:?}"),
        },
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// A pooled client for one remote peer.
struct QuicClient {
    endpoint: iroh_quinn::Endpoint,
    remote: SocketAddr,
    server_name: String,
    /// Cached connection. The lock is held across the connect so two
    /// concurrent callers cannot race each other into two connections.
    conn: Mutex<Option<iroh_quinn::Connection>>,
}

impl QuicClient {
    async fn connection(&self) -> Result<iroh_quinn::Connection, NetError> {
        let mut slot = self.conn.lock().await;

        if let Some(conn) = slot.as_ref()
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        let conn = self
            .endpoint
            .connect(self.remote, &self.server_name)
            .map_err(|e| NetError::Connect(e.to_string()))?
            .await?;

        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn call(&self, request: RingMessage) -> Result<RingMessage, NetError> {
        tokio::time::timeout(RPC_TIMEOUT, async {
            let conn = self.connection().await?;
            let (mut send, mut recv) = conn
                .open_bi()
                .await
                .map_err(|e| NetError::StreamOpen(e.to_string()))?;

            send_message(&mut send, &request).await?;
            recv_message(&mut recv).await
        })
        .await
        .map_err(|_| NetError::Timeout)?
    }
}

#[async_trait::async_trait]
impl PeerRpc for QuicClient {
    async fn find_successor(&self, id: u64) -> Result<Peer, NetError> {
        match self.call(RingMessage::FindSuccessor { id }).await? {
            RingMessage::FoundSuccessor { peer } => Ok(peer),
            RingMessage::Failed { reason } => Err(NetError::Remote(reason)),
            other => Err(NetError::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    async fn get_ring(&self) -> Result<RingState, NetError> {
        match self.call(RingMessage::GetRing).await? {
            RingMessage::Ring(state) => Ok(state),
            RingMessage::Failed { reason } => Err(NetError::Remote(reason)),
            other => Err(NetError::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    async fn notify(&self, peer: Peer) -> Result<(), NetError> {
        match self.call(RingMessage::Notify { peer }).await? {
            RingMessage::NotifyAck => Ok(()),
            RingMessage::Failed { reason } => Err(NetError::Remote(reason)),
            other => Err(NetError::UnexpectedMessage(format!("{other:?}"))),
        }
    }
}
