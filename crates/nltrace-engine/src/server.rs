//! Trace endpoint and connection manager
//!
//! Owns the loopback listening socket and accepts exactly one trace client
//! at a time. The accept loop runs as a tokio task; each connection is
//! handled inline so a second client cannot interleave with the first.
//! After a disconnect, whether graceful or after a protocol violation, the
//! endpoint goes straight back to listening for a fresh client.
//!
//! Shutdown cancels the accept loop and joins its task, so no I/O can fire
//! against the endpoint after `shutdown` returns.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use nltrace_protocol::packet::encode_pointer_query;
use nltrace_protocol::wire::to_hex;
use nltrace_protocol::{Packet, PacketBody, PacketCodec, PointerData, ProtocolError, TraceEvent};

use crate::config::EngineConfig;
use crate::correlator::RequestCorrelator;
use crate::error::EngineError;
use crate::queue::EventQueue;

/// Handler invoked once per drained event by `dispatch_events`
pub type EventHandler = Box<dyn FnMut(TraceEvent) + Send>;

/// Lifecycle state of the trace endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No endpoint is active (before bind or after shutdown)
    Idle,
    /// Waiting for a client to connect
    Listening,
    /// A client is connected and streaming
    Connected,
    /// The current connection is being torn down
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Listening => write!(f, "listening"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// State shared between the public API and the transport task
struct Shared {
    queue: EventQueue,
    correlator: RequestCorrelator,
    /// Outbound write channel, present only while a client is connected
    outbound: RwLock<Option<mpsc::Sender<Bytes>>>,
    state: RwLock<ConnectionState>,
    query_timeout: Option<Duration>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }
}

/// The trace engine: listening endpoint, event queue, and query path
pub struct TraceServer {
    shared: Arc<Shared>,
    handler: Mutex<Option<EventHandler>>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl TraceServer {
    /// Bind the trace endpoint and start accepting clients.
    ///
    /// The endpoint is loopback-only; connections from other hosts are
    /// rejected without disturbing the current state.
    pub async fn bind(config: EngineConfig) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Trace endpoint listening on {}", local_addr);

        let shared = Arc::new(Shared {
            queue: EventQueue::new(),
            correlator: RequestCorrelator::new(),
            outbound: RwLock::new(None),
            state: RwLock::new(ConnectionState::Listening),
            query_timeout: config.query_timeout,
        });

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&shared),
            cancel.clone(),
        ));

        Ok(Self {
            shared,
            handler: Mutex::new(None),
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
            local_addr,
        })
    }

    /// Address the endpoint is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of events waiting to be dispatched
    pub fn pending_events(&self) -> usize {
        self.shared.queue.len()
    }

    /// Register the single event handler invoked by `dispatch_events`
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.lock().expect("handler lock poisoned") = Some(handler);
    }

    /// Drain all pending events and invoke the handler once per event, in
    /// arrival order. Returns the number of events dispatched.
    ///
    /// Called periodically by the consumer's poll cycle. The queue lock is
    /// released before the handler runs, so transport tasks keep enqueuing
    /// freely while the batch is processed.
    pub fn dispatch_events(&self) -> Result<usize, EngineError> {
        let mut guard = self.handler.lock().expect("handler lock poisoned");
        let handler = guard.as_mut().ok_or(EngineError::NoEventHandler)?;

        let events = self.shared.queue.drain();
        let count = events.len();
        for event in events {
            handler(event);
        }
        Ok(count)
    }

    /// Ask the connected client to resolve the function symbol for an
    /// address.
    ///
    /// Fails immediately with `NotConnected` when no client is attached,
    /// with `RequestTimeout` when the configured deadline elapses, and with
    /// `ConnectionLost` when the client drops while the query is in flight.
    pub async fn resolve_pointer(&self, address: u64) -> Result<PointerData, EngineError> {
        let outbound = self
            .shared
            .outbound
            .read()
            .expect("outbound lock poisoned")
            .clone()
            .ok_or(EngineError::NotConnected)?;

        let pending = self.shared.correlator.issue();
        let id = pending.id;
        tracing::debug!(
            request_id = id,
            address = format_args!("{:#x}", address),
            "Issuing symbol query"
        );

        if outbound
            .send(encode_pointer_query(id, address))
            .await
            .is_err()
        {
            // Connection tore down between the check and the send
            self.shared.correlator.abandon(id);
            return Err(EngineError::NotConnected);
        }

        let mut payload = self
            .shared
            .correlator
            .await_response(pending, self.shared.query_timeout)
            .await?;

        Ok(PointerData::parse(&mut payload)?)
    }

    /// Stop accepting, tear down any live connection, and wait for the
    /// transport task to finish.
    ///
    /// A final `Disconnected` event is enqueued if a client was connected;
    /// once this returns, no transport I/O can fire against the endpoint.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .accept_task
            .lock()
            .expect("accept task lock poisoned")
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Transport task panicked during shutdown: {}", e);
            }
        }
    }
}

impl Drop for TraceServer {
    fn drop(&mut self) {
        // Explicit shutdown joins the task; this only makes sure it exits
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        shared.set_state(ConnectionState::Listening);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Trace endpoint shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }
                        handle_connection(&shared, stream, peer_addr, &cancel).await;
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept trace connection: {}", e);
                    }
                }
            }
        }
    }

    shared.set_state(ConnectionState::Idle);
}

/// Run one connection to completion and restore the disconnected state.
///
/// Exactly one connection is live at a time: the accept loop awaits this
/// inline instead of spawning, so a new accept is only issued after the
/// previous connection is fully torn down.
async fn handle_connection(
    shared: &Shared,
    stream: TcpStream,
    peer_addr: SocketAddr,
    cancel: &CancellationToken,
) {
    tracing::info!("Trace client connected from {}", peer_addr);
    shared.set_state(ConnectionState::Connected);
    shared.queue.enqueue(TraceEvent::Connected);

    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(64);
    *shared.outbound.write().expect("outbound lock poisoned") = Some(outbound_tx);

    let result = run_connection(shared, stream, outbound_rx, cancel).await;

    shared.set_state(ConnectionState::Closing);
    *shared.outbound.write().expect("outbound lock poisoned") = None;

    let failed = shared.correlator.fail_all();
    if failed > 0 {
        tracing::warn!("Failed {} in-flight queries on disconnect", failed);
    }

    match result {
        Ok(()) => tracing::info!("Trace client disconnected"),
        Err(e) => tracing::warn!("Trace connection torn down: {}", e),
    }

    shared.queue.enqueue(TraceEvent::Disconnected);
}

async fn run_connection(
    shared: &Shared,
    stream: TcpStream,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let mut framed = Framed::new(stream, PacketCodec::new());

    // The packet sequence counter starts over with every connection
    let mut next_sequence: i64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            Some(packet) = outbound_rx.recv() => {
                framed.send(packet).await?;
            }

            frame = framed.next() => {
                match frame {
                    // Zero-length read: the client closed the pipe
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(bytes)) => {
                        next_sequence += 1;
                        handle_packet(shared, bytes, next_sequence)?;
                    }
                }
            }
        }
    }
}

fn handle_packet(shared: &Shared, bytes: Bytes, expected_sequence: i64) -> Result<(), EngineError> {
    let packet = match Packet::parse(bytes.clone(), expected_sequence) {
        Ok(packet) => packet,
        Err(e @ ProtocolError::SequenceMismatch { .. }) => {
            tracing::debug!(packet = %to_hex(&bytes), "Desynchronized packet");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    match packet.body {
        PacketBody::Event(event) => {
            tracing::trace!(seq = packet.sequence, kind = event.kind(), "Trace event");
            shared.queue.enqueue(event);
        }
        PacketBody::QueryResponse {
            request_id,
            payload,
        } => {
            tracing::debug!(request_id, "Query response received");
            shared.correlator.complete(request_id, payload)?;
        }
    }

    Ok(())
}
