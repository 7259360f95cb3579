//! The transport connector: one persistent link plus event fan-out.
//!
//! The connector owns the physical link (through a [`Dialer`]) and the
//! per-event-name listener registry. Everything above it (job client,
//! rollback exchange) talks in terms of `send(event, payload)` and
//! `on(event, callback)`.
//!
//! # Dispatch
//!
//! One reader task per live link pulls envelopes off the inbound channel and
//! invokes the listeners registered for that event name, in order, with the
//! registry lock released. Handler execution is therefore serialized and
//! follows transport order.
//!
//! # Epochs
//!
//! Every connect attempt bumps an epoch counter. A dial that completes after
//! a `disconnect()` (stale epoch) is discarded, and a reader task whose link
//! was already replaced does not report a remote close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use strum::EnumString;
use tabula_types::Envelope;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ClientError;
use crate::transport::{Dialer, Link, LinkTasks, TransportError};

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle returned by [`Connector::on`] / [`Connector::on_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

struct LiveLink {
    outbound: mpsc::UnboundedSender<Envelope>,
    reader: Option<JoinHandle<()>>,
    _tasks: LinkTasks,
}

struct Inner {
    state: ConnectionState,
    epoch: u64,
    endpoint: Option<String>,
    link: Option<LiveLink>,
}

pub struct Connector {
    dialer: Arc<dyn Dialer>,
    inner: Mutex<Inner>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventCallback)>>>,
    state_listeners: Mutex<Vec<(ListenerId, StateCallback)>>,
    next_listener: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connector {
    pub fn new(dialer: Arc<dyn Dialer>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            dialer,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                epoch: 0,
                endpoint: None,
                link: None,
            }),
            listeners: Mutex::new(HashMap::new()),
            state_listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            state_tx,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Establish the link. A no-op while already connected or connecting.
    ///
    /// On failure the state returns to `Disconnected`; there is no retry.
    pub async fn connect(self: &Arc<Self>, endpoint: &str) -> Result<(), ClientError> {
        let epoch = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                trace!("connect({}) ignored: already {}", endpoint, inner.state);
                return Ok(());
            }
            inner.epoch += 1;
            inner.state = ConnectionState::Connecting;
            inner.endpoint = Some(endpoint.to_string());
            inner.epoch
        };
        self.notify_state(ConnectionState::Connecting);
        info!("Connecting to {}", endpoint);

        let dialed = self.dialer.dial(endpoint).await;

        let inbound = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
                debug!("Dial to {} finished after disconnect, dropping link", endpoint);
                return Err(TransportError::Aborted.into());
            }
            match dialed {
                Err(e) => {
                    inner.state = ConnectionState::Disconnected;
                    drop(inner);
                    warn!("Connect to {} failed: {}", endpoint, e);
                    self.notify_state(ConnectionState::Disconnected);
                    return Err(e.into());
                }
                Ok(Link {
                    outbound,
                    inbound,
                    tasks,
                }) => {
                    inner.link = Some(LiveLink {
                        outbound,
                        reader: None,
                        _tasks: tasks,
                    });
                    inner.state = ConnectionState::Connected;
                    inbound
                }
            }
        };
        info!("Connected to {}", endpoint);
        self.notify_state(ConnectionState::Connected);

        // Started only after Connected was announced, so listeners never
        // observe a remote close ahead of the connect.
        let reader = tokio::spawn(Self::read_loop(Arc::downgrade(self), epoch, inbound));
        let mut inner = self.inner.lock();
        let current = inner.epoch == epoch;
        match inner.link.as_mut() {
            Some(link) if current => link.reader = Some(reader),
            _ => reader.abort(),
        }
        Ok(())
    }

    /// Tear the link down. Safe to call when already disconnected.
    ///
    /// State listeners run before this returns.
    pub fn disconnect(&self) {
        let link = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            inner.epoch += 1;
            inner.state = ConnectionState::Disconnected;
            inner.link.take()
        };
        if let Some(link) = link
            && let Some(reader) = link.reader
        {
            reader.abort();
        }
        info!("Disconnected");
        self.notify_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint of the current or most recent connection attempt.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.lock().endpoint.clone()
    }

    /// Receiver that always holds the latest connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Send one event. Fails with `NotConnected` unless connected.
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<(), ClientError> {
        let inner = self.inner.lock();
        let link = match (inner.state, inner.link.as_ref()) {
            (ConnectionState::Connected, Some(link)) => link,
            _ => return Err(ClientError::NotConnected),
        };
        let payload = serde_json::to_value(payload)?;
        link.outbound
            .send(Envelope::new(event, payload))
            .map_err(|_| ClientError::NotConnected)?;
        trace!("Sent '{}'", event);
        Ok(())
    }

    /// Register a listener for one event name. Survives reconnects.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove exactly the listener `id` from `event`. Returns whether it existed.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Register a synchronous connection-state listener.
    pub fn on_state<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.state_listeners.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn off_state(&self, id: ListenerId) -> bool {
        let mut listeners = self.state_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn notify_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        let callbacks: Vec<StateCallback> = self
            .state_listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(state);
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let callbacks: Vec<EventCallback> = match self.listeners.lock().get(&envelope.event) {
            Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => Vec::new(),
        };
        if callbacks.is_empty() {
            debug!("No listener for '{}', dropping", envelope.event);
            return;
        }
        trace!("Dispatching '{}' to {} listener(s)", envelope.event, callbacks.len());
        for callback in callbacks {
            callback(&envelope.payload);
        }
    }

    async fn read_loop(
        weak: Weak<Self>,
        epoch: u64,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
    ) {
        while let Some(envelope) = inbound.recv().await {
            let Some(connector) = weak.upgrade() else {
                return;
            };
            connector.dispatch(&envelope);
        }
        if let Some(connector) = weak.upgrade() {
            connector.on_remote_close(epoch);
        }
    }

    fn on_remote_close(&self, epoch: u64) {
        let link = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state != ConnectionState::Connected {
                return;
            }
            inner.epoch += 1;
            inner.state = ConnectionState::Disconnected;
            inner.link.take()
        };
        drop(link);
        warn!("Connection closed by peer");
        self.notify_state(ConnectionState::Disconnected);
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Some(link) = self.inner.get_mut().link.take()
            && let Some(reader) = link.reader
        {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryDialer, MemoryPeer};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn connected() -> (Arc<Connector>, MemoryPeer, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (dialer, mut peers) = MemoryDialer::new();
        let connector = Connector::new(Arc::new(dialer));
        connector.connect("mem://test").await.unwrap();
        let peer = peers.recv().await.unwrap();
        (connector, peer, peers)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (connector, _peer, mut peers) = connected().await;
        connector.connect("mem://test").await.unwrap();
        assert!(connector.is_connected());
        assert!(peers.try_recv().is_err(), "second connect must not dial");
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let (dialer, _peers) = MemoryDialer::new();
        let connector = Connector::new(Arc::new(dialer));
        let err = connector.send("job-submit", &json!({})).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_disconnected() {
        let (dialer, _peers) = MemoryDialer::new();
        dialer.refuse_connections(true);
        let connector = Connector::new(Arc::new(dialer));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        connector.on_state(move |s| sink.lock().push(s));

        let err = connector.connect("mem://down").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Refused(_))));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_safe_twice() {
        let (connector, mut peer, _peers) = connected().await;
        connector.disconnect();
        connector.disconnect();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_close_transitions_to_disconnected() {
        let (connector, peer, _peers) = connected().await;
        let mut state = connector.subscribe_state();
        assert_eq!(*state.borrow(), ConnectionState::Connected);

        drop(peer);
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(!connector.is_connected());
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    #[tokio::test]
    async fn test_on_and_off_route_by_event_name() {
        let (connector, peer, _peers) = connected().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&hits);
        let first = connector.on("job-planned", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        connector.on("job-planned", move |payload| {
            let _ = done_tx.send(payload.clone());
        });

        peer.send("job-planned", json!({"n": 1}));
        assert_eq!(done_rx.recv().await.unwrap(), json!({"n": 1}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(connector.off("job-planned", first));
        assert!(!connector.off("job-planned", first));

        peer.send("job-planned", json!({"n": 2}));
        assert_eq!(done_rx.recv().await.unwrap(), json!({"n": 2}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listeners_survive_reconnect() {
        let (connector, peer, mut peers) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        connector.on("job-error", move |payload| {
            let _ = tx.send(payload.clone());
        });

        connector.disconnect();
        drop(peer);
        connector.connect("mem://test").await.unwrap();
        let peer = peers.recv().await.unwrap();

        peer.send("job-error", json!({"message": "again"}));
        assert_eq!(rx.recv().await.unwrap()["message"], "again");
    }

    #[tokio::test]
    async fn test_remote_close_then_reconnect_reports_every_transition() {
        let (connector, peer, mut peers) = connected().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        connector.on_state(move |s| sink.lock().push(s));

        let mut state = connector.subscribe_state();
        drop(peer);
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        connector.connect("mem://test").await.unwrap();
        let peer = peers.recv().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );

        // The new link has its own reader attached.
        let (tx, mut rx) = mpsc::unbounded_channel();
        connector.on("job-timeout", move |payload| {
            let _ = tx.send(payload.clone());
        });
        peer.send("job-timeout", json!({"jobId": "j"}));
        assert_eq!(rx.recv().await.unwrap()["jobId"], "j");
    }

    #[tokio::test]
    async fn test_outbound_envelope_shape() {
        let (connector, mut peer, _peers) = connected().await;
        connector
            .send("rollback-message", &json!({"branchId": "b"}))
            .unwrap();
        let envelope = peer.recv().await.unwrap();
        assert_eq!(envelope.event, "rollback-message");
        assert_eq!(envelope.payload["branchId"], "b");
    }
}
