//! Physical transports behind the [`Connector`](crate::Connector).
//!
//! A [`Dialer`] turns an endpoint string into a [`Link`]: a pair of unbounded
//! channels carrying [`Envelope`]s in each direction, plus the background
//! tasks that pump them. The connector never sees sockets.
//!
//! ```text
//!   Connector ──outbound──▶ writer task ──▶ TCP (one JSON envelope per line)
//!   Connector ◀──inbound─── reader task ◀── TCP
//! ```
//!
//! Closing is by drop: dropping `outbound` ends the writer, dropping the
//! [`Link`]'s task guard aborts both pumps. A peer hang-up closes `inbound`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tabula_types::Envelope;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, trace, warn};

use crate::constants::{CONNECT_TIMEOUT, MAX_FRAME_BYTES};

/// Errors establishing a link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused by {0}")]
    Refused(String),
    #[error("connect aborted by disconnect")]
    Aborted,
}

/// Background pump tasks of a link. Aborted on drop.
#[derive(Default)]
pub struct LinkTasks(Vec<JoinHandle<()>>);

impl Drop for LinkTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// A live bidirectional message channel.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    pub tasks: LinkTasks,
}

/// Opens links to an endpoint.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, endpoint: &str) -> Result<Link, TransportError>;
}

// ============================================================================
// TCP
// ============================================================================

/// Newline-delimited JSON envelopes over TCP.
///
/// Endpoints are `host:port`, optionally prefixed with `tcp://`.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: &str) -> Result<Link, TransportError> {
        let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!("TCP link established to {}", addr);

        let (read_half, write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<Envelope>();

        let mut writer = FramedWrite::new(write_half, LinesCodec::new());
        let writer_task = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let line = match serde_json::to_string(&envelope) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Dropping unserializable '{}' envelope: {}", envelope.event, e);
                        continue;
                    }
                };
                if let Err(e) = writer.send(line).await {
                    error!("TCP write failed: {}", e);
                    break;
                }
            }
            trace!("TCP writer finished");
        });

        let mut reader =
            FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let line = match frame {
                    Ok(line) => line,
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        warn!("Dropping inbound frame over {} bytes", MAX_FRAME_BYTES);
                        continue;
                    }
                    Err(LinesCodecError::Io(e)) => {
                        error!("TCP read failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        if inbound_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping unparseable inbound frame: {}", e),
                }
            }
            trace!("TCP reader finished");
        });

        Ok(Link {
            outbound,
            inbound,
            tasks: LinkTasks(vec![writer_task, reader_task]),
        })
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process transport. Each successful dial hands the backend side of the
/// new link to the receiver returned by [`MemoryDialer::new`].
pub struct MemoryDialer {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
}

impl MemoryDialer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: AtomicBool::new(false),
            },
            peers_rx,
        )
    }

    /// Make subsequent dials fail with [`TransportError::Refused`].
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, endpoint: &str) -> Result<Link, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(endpoint.to_string()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            from_client,
            to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Refused(endpoint.to_string()))?;

        Ok(Link {
            outbound,
            inbound,
            tasks: LinkTasks::default(),
        })
    }
}

/// Backend side of an in-memory link. Dropping it hangs up on the client.
pub struct MemoryPeer {
    endpoint: String,
    from_client: mpsc::UnboundedReceiver<Envelope>,
    to_client: mpsc::UnboundedSender<Envelope>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Next envelope sent by the client; `None` once the client disconnected.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.from_client.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.from_client.try_recv().ok()
    }

    /// Push an event to the client. Returns `false` if the client is gone.
    pub fn send(&self, event: &str, payload: impl Serialize) -> bool {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("MemoryPeer: unserializable '{}' payload: {}", event, e);
                return false;
            }
        };
        self.to_client.send(Envelope::new(event, payload)).is_ok()
    }
}
