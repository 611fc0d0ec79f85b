//! Websocket implementation of [`Connection`].
//!
//! One io task owns the socket: it fans pushed state deltas out to
//! listeners in arrival order and resolves range fetches by request id.
//! When the stream drops, every pending fetch fails fast, listeners see a
//! synthetic `closed: true` delta, and the task reconnects with backoff;
//! `closed: false` follows once a new stream is up. Fresh generations
//! arrive with the server's post-reconnect snapshot, which is what re-fences
//! everything downstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use super::{Connection, ConnectionError, ListenerHub, RangeBatch, StateListener};
use crate::model::ListKind;
use crate::protocol::{self, ClientFrame, ServerFrame, StateDelta};
use crate::pubsub::Subscription;
use crate::sync::RetryPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FetchResult = Result<RangeBatch, ConnectionError>;

struct WsState {
    closed: bool,
    next_request_id: u64,
    pending: HashMap<u64, oneshot::Sender<FetchResult>>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

struct Inner {
    hub: ListenerHub,
    state: Mutex<WsState>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

pub struct WebSocketConnection {
    inner: Arc<Inner>,
}

impl WebSocketConnection {
    /// Connects to the backend and spawns the io task. The initial connect
    /// failure is surfaced to the caller; later drops reconnect silently
    /// behind the `closed` state.
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(url).map_err(|err| ConnectionError::Transport(err.to_string()))?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))?;

        let inner = Arc::new(Inner {
            hub: ListenerHub::new(),
            state: Mutex::new(WsState {
                closed: false,
                next_request_id: 1,
                pending: HashMap::new(),
                outgoing: None,
            }),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        });

        tokio::spawn(io_task(Arc::clone(&inner), stream, url));
        Ok(Self { inner })
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<(), ConnectionError> {
        let outgoing = {
            let state = self.inner.state.lock();
            if state.closed {
                return Err(ConnectionError::Closed);
            }
            state.outgoing.clone().ok_or(ConnectionError::Closed)?
        };
        let text = protocol::encode_client_frame(frame)?;
        outgoing
            .send(Message::Text(text))
            .map_err(|_| ConnectionError::Closed)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn subscribe(&self, listener: StateListener) -> Subscription {
        self.inner.hub.add(listener)
    }

    fn unsubscribe(&self, handle: Subscription) -> bool {
        self.inner.hub.remove(handle)
    }

    async fn fetch_range(
        &self,
        list: ListKind,
        start: u64,
        end: u64,
    ) -> Result<RangeBatch, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ConnectionError::Closed);
            }
            let request_id = state.next_request_id;
            state.next_request_id += 1;
            state.pending.insert(request_id, tx);
            request_id
        };

        let frame = ClientFrame::FetchRange {
            list,
            request_id,
            start,
            end,
        };
        if let Err(err) = self.send_frame(&frame) {
            self.inner.state.lock().pending.remove(&request_id);
            return Err(err);
        }

        rx.await.unwrap_or(Err(ConnectionError::RequestDropped))
    }

    async fn skip_to(&self, list: ListKind, index: u64) -> Result<(), ConnectionError> {
        self.send_frame(&ClientFrame::SkipTo { list, index })
    }

    fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // notify_one stores a permit for a waiter that has not registered
        // yet; notify_waiters covers the one that has.
        self.inner.shutdown_notify.notify_one();
        self.inner.shutdown_notify.notify_waiters();
    }
}

async fn io_task(inner: Arc<Inner>, stream: WsStream, url: Url) {
    let retry = RetryPolicy::default();
    let mut stream = Some(stream);

    while let Some(active) = stream.take() {
        serve_stream(&inner, active).await;
        mark_closed(&inner);
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        stream = reconnect(&inner, &url, &retry).await;
    }
}

/// Runs one live stream to completion, routing frames both ways.
async fn serve_stream(inner: &Arc<Inner>, mut stream: WsStream) {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    {
        let mut state = inner.state.lock();
        state.outgoing = Some(outgoing_tx);
        state.closed = false;
    }
    // Listeners learn about the transition through the ordinary push path.
    inner.hub.push(&StateDelta {
        closed: Some(false),
        ..StateDelta::default()
    });

    loop {
        tokio::select! {
            _ = inner.shutdown_notify.notified() => {
                let _ = stream.close(None).await;
                return;
            }
            outbound = outgoing_rx.recv() => {
                let Some(message) = outbound else { return };
                if let Err(err) = stream.send(message).await {
                    debug!(target: "connection::ws", error = %err, "send failed");
                    return;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => handle_text(inner, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        if stream.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(target: "connection::ws", error = %err, "receive failed");
                        return;
                    }
                }
            }
        }
    }
}

fn handle_text(inner: &Arc<Inner>, text: &str) {
    match protocol::decode_server_frame(text) {
        Ok(ServerFrame::State(delta)) => {
            trace!(target: "connection::ws", "state delta received");
            inner.hub.push(&delta);
        }
        Ok(ServerFrame::RangeResult {
            request_id,
            generation,
            start,
            rows,
            ..
        }) => {
            let waiter = inner.state.lock().pending.remove(&request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Ok(RangeBatch {
                        generation,
                        start,
                        rows,
                    }));
                }
                // The fetch was abandoned; its response has nowhere to land.
                None => trace!(target: "connection::ws", request_id, "unmatched range result"),
            }
        }
        Err(err) => warn!(target: "connection::ws", error = %err, "undecodable frame"),
    }
}

/// Fails every pending fetch and tells listeners the channel is down.
fn mark_closed(inner: &Arc<Inner>) {
    let pending = {
        let mut state = inner.state.lock();
        state.closed = true;
        state.outgoing = None;
        std::mem::take(&mut state.pending)
    };
    for (_, tx) in pending {
        let _ = tx.send(Err(ConnectionError::Closed));
    }
    inner.hub.push(&StateDelta {
        closed: Some(true),
        ..StateDelta::default()
    });
}

/// Reconnects with the shared backoff schedule until it succeeds or the
/// connection is dropped.
async fn reconnect(inner: &Arc<Inner>, url: &Url, retry: &RetryPolicy) -> Option<WsStream> {
    let mut attempt: u32 = 0;
    loop {
        let delay = retry.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = inner.shutdown_notify.notified() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                debug!(target: "connection::ws", attempt, "reconnected");
                return Some(stream);
            }
            Err(err) => {
                debug!(target: "connection::ws", attempt, error = %err, "reconnect failed");
            }
        }
    }
}
