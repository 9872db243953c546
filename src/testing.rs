//! In-memory transport for driving `TelemetryClient` deterministically.
//!
//! [`MockTransport::new`] returns the transport plus a [`MockServer`] control handle. Every
//! connect attempt consumes the next scripted [`ConnectPlan`] (falling back to a default),
//! and every accepted attempt surfaces as a [`MockConnection`] the test can push frames
//! through, read outbound frames from, or drop.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Sink, Stream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::{
    ReconnectStrategy, TelemetryError, TelemetryResult, WebSocketBufferConfig, WsFrame,
};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// Outcome of one connect attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectPlan {
    Accept,
    /// Fail the handshake immediately.
    Refuse,
    /// Never resolve.
    Hang,
}

struct Shared {
    plans: Mutex<VecDeque<ConnectPlan>>,
    default_plan: ConnectPlan,
    attempts: Mutex<Vec<(Instant, String)>>,
    accepted_tx: mpsc::UnboundedSender<MockConnection>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Transport that accepts every attempt unless scripted otherwise.
    pub fn new() -> (Self, MockServer) {
        Self::with_default(ConnectPlan::Accept)
    }

    /// Transport that refuses every attempt unless scripted otherwise.
    pub fn refusing() -> (Self, MockServer) {
        Self::with_default(ConnectPlan::Refuse)
    }

    pub fn with_default(default_plan: ConnectPlan) -> (Self, MockServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            plans: Mutex::new(VecDeque::new()),
            default_plan,
            attempts: Mutex::new(Vec::new()),
            accepted_tx,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MockServer {
                shared,
                accepted_rx,
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            lock(&shared.attempts).push((Instant::now(), url.clone()));
            let plan = lock(&shared.plans)
                .pop_front()
                .unwrap_or(shared.default_plan);

            match plan {
                ConnectPlan::Accept => {
                    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let connection = MockConnection {
                        url,
                        inbound_tx: Some(inbound_tx),
                        outbound_rx,
                    };
                    shared
                        .accepted_tx
                        .send(connection)
                        .map_err(|_| TelemetryError::TransportError {
                            context: "mock_connect",
                            error: "mock server dropped".to_string(),
                        })?;
                    Ok((MockReader { rx: inbound_rx }, MockWriter { tx: outbound_tx }))
                }
                ConnectPlan::Refuse => Err(TelemetryError::TransportError {
                    context: "connect",
                    error: format!("connection refused: {url}"),
                }),
                ConnectPlan::Hang => futures_util::future::pending().await,
            }
        })
    }
}

/// Test-side control handle paired with [`MockTransport`].
pub struct MockServer {
    shared: Arc<Shared>,
    accepted_rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    /// Queue outcomes for the next attempts, in order.
    pub fn script(&self, plans: impl IntoIterator<Item = ConnectPlan>) {
        lock(&self.shared.plans).extend(plans);
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.shared.attempts).len()
    }

    /// When each attempt started, on tokio's clock.
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.shared.attempts)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub async fn next_connection(&mut self) -> Option<MockConnection> {
        self.accepted_rx.recv().await
    }

    pub async fn next_connection_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accepted_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockConnectionError {
    /// The socket was already dropped from the server side.
    SocketDropped,
    /// The client no longer reads this connection.
    ChannelClosed,
}

impl std::fmt::Display for MockConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockConnectionError::SocketDropped => f.write_str("mock socket already dropped"),
            MockConnectionError::ChannelClosed => f.write_str("mock client side is closed"),
        }
    }
}

impl std::error::Error for MockConnectionError {}

/// Server side of one accepted attempt.
pub struct MockConnection {
    url: String,
    inbound_tx: Option<mpsc::UnboundedSender<TelemetryResult<WsFrame>>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockConnection {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send_frame(&self, frame: WsFrame) -> Result<(), MockConnectionError> {
        self.push(Ok(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockConnectionError> {
        self.send_frame(WsFrame::text(text))
    }

    /// Fail the read side with a transport error.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), MockConnectionError> {
        self.push(Err(TelemetryError::TransportError {
            context: "read",
            error: error.into(),
        }))
    }

    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), MockConnectionError> {
        self.send_frame(WsFrame::close(code, reason))
    }

    /// End the inbound stream without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Next frame the client wrote; `None` once the client side is gone.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    fn push(&self, item: TelemetryResult<WsFrame>) -> Result<(), MockConnectionError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockConnectionError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockConnectionError::ChannelClosed)
    }
}

pub struct MockReader {
    rx: mpsc::UnboundedReceiver<TelemetryResult<WsFrame>>,
}

impl Stream for MockReader {
    type Item = TelemetryResult<WsFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = TelemetryError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| TelemetryError::TransportError {
                context: "write",
                error: "mock peer closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Reconnect strategy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self, _failed_attempts: u32) -> bool {
        false
    }
}
