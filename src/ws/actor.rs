//! Telemetry connection actor.
//!
//! The websocket read loop runs outside kameo; the actor owns connection state, the reconnect
//! policy, the subscription hub and the writer, and receives everything else as messages.
//! Every transport attempt is tagged with a generation number so late results from an
//! abandoned transport are dropped instead of corrupting state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{
    ClientConfig, ConnectionState, DisconnectReason, ReconnectStrategy, TelemetryError,
    TelemetryHealth, TelemetryResult, TelemetryStats, WsFrame, data_payload, describe_close,
};
use crate::hub::{Channel, Listener, Subscription, SubscriptionHub, TelemetryEvent};
use crate::telemetry::{TelemetrySnapshot, decode_snapshot_bytes};
use crate::transport::WsTransport;

/// Upper bound on a detached writer close; a peer that stops reading cannot hold it longer.
pub(crate) const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close `writer`, giving up after `limit`. Returns whether the close completed in time.
pub(crate) async fn close_writer<W>(mut writer: W, limit: Duration) -> bool
where
    W: Sink<WsFrame, Error = TelemetryError> + Unpin,
{
    match tokio::time::timeout(limit, writer.close()).await {
        Ok(result) => {
            if let Err(err) = result {
                debug!(error = %err, "telemetry writer close failed");
            }
            true
        }
        Err(_) => {
            debug!(limit_ms = limit.as_millis() as u64, "telemetry writer close timed out");
            false
        }
    }
}

fn close_writer_detached<W>(writer: W)
where
    W: Sink<WsFrame, Error = TelemetryError> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        close_writer(writer, WRITER_CLOSE_TIMEOUT).await;
    });
}

pub struct TelemetryActorArgs<T, R> {
    pub config: ClientConfig,
    pub transport: T,
    pub reconnect: R,
}

pub struct TelemetryActor<T: WsTransport, R: ReconnectStrategy> {
    config: ClientConfig,
    transport: T,
    reconnect: R,
    actor_ref: ActorRef<Self>,
    hub: SubscriptionHub,
    health: TelemetryHealth,
    state: ConnectionState,
    /// Attempts since the last successful open or explicit `connect()`.
    attempts: u32,
    generation: u64,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    writer: Option<T::Writer>,
}

impl<T, R> Actor for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Args = TelemetryActorArgs<T, R>;
    type Error = TelemetryError;

    fn name() -> &'static str {
        "TelemetryActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> TelemetryResult<Self> {
        let TelemetryActorArgs {
            config,
            transport,
            mut reconnect,
        } = args;
        config.validate()?;
        reconnect.configure(&config);

        Ok(Self {
            config,
            transport,
            reconnect,
            actor_ref: ctx,
            hub: SubscriptionHub::new(),
            health: TelemetryHealth::new(),
            state: ConnectionState::Disconnected,
            attempts: 0,
            generation: 0,
            connect_task: None,
            reader_task: None,
            retry_timer: None,
            writer: None,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> TelemetryResult<()> {
        self.teardown();
        Ok(())
    }
}

impl<T, R> TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    fn url(&self) -> &str {
        &self.config.url
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn publish(&mut self, event: TelemetryEvent) {
        self.hub.publish(event);
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(connection = %self.url(), from = %from, to = %to, "telemetry state transition");
        self.publish(TelemetryEvent::StateChanged { from, to });
    }

    fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    /// Drop the live transport and any in-flight handshake. Invalidates the current generation.
    fn release_transport(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(writer) = self.writer.take() {
            close_writer_detached(writer);
        }
    }

    fn teardown(&mut self) {
        self.cancel_retry_timer();
        self.release_transport();
        if self.state == ConnectionState::Connected {
            self.health.record_disconnected();
        }
        self.state = ConnectionState::Disconnected;
        self.hub.clear();
    }

    fn begin_attempt(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.attempts = self.attempts.saturating_add(1);
        let generation = self.generation;
        let attempt = self.attempts;
        self.transition(ConnectionState::Connecting);
        info!(connection = %self.url(), attempt, generation, "opening telemetry feed");

        let actor_ref = self.actor_ref.clone();
        let url = self.config.url.clone();
        let buffers = self.config.buffers;
        let transport = self.transport.clone();
        self.connect_task = Some(tokio::spawn(async move {
            match transport.connect(url, buffers).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            generation,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed {
                            generation,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        }));
    }

    /// Run the reconnect policy after a failed attempt or a lost connection.
    ///
    /// The configured attempt limit always applies; a strategy can only stop earlier.
    fn schedule_reconnect(&mut self, reason: &str) {
        let attempts = self.attempts;
        let limit = self.config.max_reconnect_attempts;
        let budget = if attempts >= limit {
            Some(limit)
        } else if !self.reconnect.should_retry(attempts) {
            Some(attempts)
        } else {
            None
        };
        if let Some(budget) = budget {
            warn!(
                connection = %self.url(),
                attempts,
                budget,
                reason,
                "telemetry reconnect budget exhausted"
            );
            self.transition(ConnectionState::Failed);
            let error = TelemetryError::ReconnectExhausted { attempts, budget };
            self.health.record_error("reconnect", &error.to_string());
            self.publish(TelemetryEvent::Error(error));
            return;
        }

        let delay = self.reconnect.next_delay();
        let generation = self.generation;
        self.health.increment_reconnect();
        self.transition(ConnectionState::Reconnecting);
        warn!(
            connection = %self.url(),
            attempt = self.attempts.saturating_add(1),
            delay_ms = delay.as_millis() as u64,
            generation,
            reason,
            "telemetry reconnect scheduled"
        );

        self.cancel_retry_timer();
        let actor_ref = self.actor_ref.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor_ref.tell(RetryConnect { generation }).send().await;
        }));
    }

    fn spawn_reader(&mut self, generation: u64, mut reader: T::Reader) {
        let actor_ref = self.actor_ref.clone();
        let connection = self.config.url.clone();
        self.reader_task = Some(tokio::spawn(async move {
            let reason = loop {
                match reader.next().await {
                    Some(Ok(WsFrame::Close(frame))) => {
                        info!(connection = %connection, close = ?frame, "telemetry feed sent close frame");
                        break DisconnectReason::RemoteClosed {
                            detail: describe_close(frame.as_ref()),
                        };
                    }
                    Some(Ok(frame)) if frame.is_data() => {
                        if actor_ref
                            .tell(InboundFrame { generation, frame })
                            .send()
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(_control)) => {}
                    Some(Err(err)) => {
                        break DisconnectReason::TransportFailure {
                            error: err.to_string(),
                        };
                    }
                    None => {
                        break DisconnectReason::RemoteClosed {
                            detail: "stream ended".to_string(),
                        };
                    }
                }
            };
            let _ = actor_ref
                .tell(TransportClosed { generation, reason })
                .send()
                .await;
        }));
    }

    fn on_established(&mut self, generation: u64, reader: T::Reader, writer: T::Writer) {
        self.connect_task = None;
        self.attempts = 0;
        self.reconnect.reset();
        self.writer = Some(writer);
        self.spawn_reader(generation, reader);
        self.health.record_connected();
        info!(connection = %self.url(), generation, "telemetry feed connected");
        self.transition(ConnectionState::Connected);
        self.publish(TelemetryEvent::Connected { generation });
    }

    fn on_connect_failed(&mut self, error: String) {
        self.connect_task = None;
        let attempt = self.attempts;
        warn!(connection = %self.url(), attempt, error = %error, "telemetry feed connect failed");
        self.health.record_connect_failure(&error);
        self.publish(TelemetryEvent::Error(TelemetryError::ConnectionFailed {
            attempt,
            error: error.clone(),
        }));
        self.schedule_reconnect(&error);
    }

    /// An open connection ended without a `disconnect()` call.
    fn on_connection_lost(&mut self, reason: DisconnectReason) {
        self.release_transport();
        self.health.record_disconnected();
        warn!(connection = %self.url(), reason = %reason, "telemetry feed connection lost");
        if let DisconnectReason::TransportFailure { error } = &reason {
            self.health.record_error("read", error);
        }
        let detail = reason.to_string();
        self.publish(TelemetryEvent::Disconnected { reason });
        self.schedule_reconnect(&detail);
    }

    fn on_frame(&mut self, frame: WsFrame) {
        let Some(payload) = data_payload(&frame) else {
            return;
        };
        self.health.record_frame();
        match decode_snapshot_bytes(payload) {
            Ok(snapshot) => {
                self.health.record_snapshot();
                self.publish(TelemetryEvent::Snapshot(Arc::new(snapshot)));
            }
            Err(err) => {
                warn!(
                    connection = %self.url(),
                    payload_len = payload.len(),
                    error = %err,
                    "telemetry frame decode failed"
                );
                self.health.record_decode_error(&err.to_string());
                self.publish(TelemetryEvent::Error(TelemetryError::Decode(err)));
            }
        }
    }

    async fn write_text(&mut self, text: String) -> TelemetryResult<()> {
        if self.state != ConnectionState::Connected {
            warn!(connection = %self.url(), state = %self.state, "send while not connected");
            return Err(TelemetryError::NotConnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(TelemetryError::NotConnected);
        };

        if let Err(err) = writer.send(WsFrame::text(text)).await {
            self.on_connection_lost(DisconnectReason::TransportFailure {
                error: err.to_string(),
            });
            return Err(err);
        }
        Ok(())
    }

    fn log_stale(&self, kind: &'static str, generation: u64) {
        debug!(
            connection = %self.url(),
            message = kind,
            generation,
            current = self.generation,
            "discarding stale transport message"
        );
    }
}

/// Open the feed. No-op while connecting or connected.
pub struct Connect;

/// Close the feed and suppress reconnection.
pub struct Disconnect;

pub struct Subscribe {
    pub channel: Channel,
    pub listener: Listener,
}

pub struct Unsubscribe(pub Subscription);

/// Serialized JSON text to write on the live transport.
pub struct SendText(pub String);

pub struct GetConnectionState;
pub struct GetLatestSnapshot;
pub struct GetConnectionStats;

/// Release the transport and every registration ahead of stopping the actor.
pub struct Shutdown;

pub(crate) struct RetryConnect {
    generation: u64,
}

pub(crate) struct ConnectionEstablished<TR: WsTransport> {
    generation: u64,
    reader: TR::Reader,
    writer: TR::Writer,
}

pub(crate) struct ConnectionFailed {
    generation: u64,
    error: String,
}

pub(crate) struct InboundFrame {
    generation: u64,
    frame: WsFrame,
}

pub(crate) struct TransportClosed {
    generation: u64,
    reason: DisconnectReason,
}

impl<T, R> KameoMessage<Connect> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(&mut self, _msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.state.is_active() {
            debug!(connection = %self.url(), state = %self.state, "connect ignored");
            return Ok(());
        }
        self.cancel_retry_timer();
        self.release_transport();
        self.attempts = 0;
        self.reconnect.reset();
        self.begin_attempt();
        Ok(())
    }
}

impl<T, R> KameoMessage<Disconnect> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.cancel_retry_timer();
        self.release_transport();
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        if self.state == ConnectionState::Connected {
            self.health.record_disconnected();
        }
        info!(connection = %self.url(), from = %self.state, "telemetry feed disconnect requested");
        self.attempts = 0;
        self.transition(ConnectionState::Disconnected);
        self.publish(TelemetryEvent::Disconnected {
            reason: DisconnectReason::Requested,
        });
        Ok(())
    }
}

impl<T, R> KameoMessage<RetryConnect> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        msg: RetryConnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.is_current(msg.generation) || self.state != ConnectionState::Reconnecting {
            self.log_stale("retry_connect", msg.generation);
            return Ok(());
        }
        self.retry_timer = None;
        self.begin_attempt();
        Ok(())
    }
}

impl<T, R> KameoMessage<ConnectionEstablished<T>> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let ConnectionEstablished {
            generation,
            reader,
            writer,
        } = msg;
        if !self.is_current(generation) || self.state != ConnectionState::Connecting {
            self.log_stale("connection_established", generation);
            drop(reader);
            close_writer_detached(writer);
            return Ok(());
        }
        self.on_established(generation, reader, writer);
        Ok(())
    }
}

impl<T, R> KameoMessage<ConnectionFailed> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.is_current(msg.generation) || self.state != ConnectionState::Connecting {
            self.log_stale("connection_failed", msg.generation);
            return Ok(());
        }
        self.on_connect_failed(msg.error);
        Ok(())
    }
}

impl<T, R> KameoMessage<InboundFrame> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        msg: InboundFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.is_current(msg.generation) || self.state != ConnectionState::Connected {
            self.log_stale("inbound_frame", msg.generation);
            return Ok(());
        }
        self.on_frame(msg.frame);
        Ok(())
    }
}

impl<T, R> KameoMessage<TransportClosed> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(
        &mut self,
        msg: TransportClosed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.is_current(msg.generation) || self.state != ConnectionState::Connected {
            self.log_stale("transport_closed", msg.generation);
            return Ok(());
        }
        self.reader_task = None;
        self.on_connection_lost(msg.reason);
        Ok(())
    }
}

impl<T, R> KameoMessage<Subscribe> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<Subscription>;

    async fn handle(
        &mut self,
        msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.hub.subscribe_boxed(msg.channel, msg.listener))
    }
}

impl<T, R> KameoMessage<Unsubscribe> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<bool>;

    async fn handle(
        &mut self,
        msg: Unsubscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.hub.unsubscribe(&msg.0))
    }
}

impl<T, R> KameoMessage<SendText> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(&mut self, msg: SendText, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.write_text(msg.0).await
    }
}

impl<T, R> KameoMessage<GetConnectionState> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<ConnectionState>;

    async fn handle(
        &mut self,
        _msg: GetConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state)
    }
}

impl<T, R> KameoMessage<GetLatestSnapshot> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<Option<Arc<TelemetrySnapshot>>>;

    async fn handle(
        &mut self,
        _msg: GetLatestSnapshot,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.hub.latest_snapshot())
    }
}

impl<T, R> KameoMessage<GetConnectionStats> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<TelemetryStats>;

    async fn handle(
        &mut self,
        _msg: GetConnectionStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self
            .health
            .get_stats(self.state, self.hub.listener_failures()))
    }
}

impl<T, R> KameoMessage<Shutdown> for TelemetryActor<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    type Reply = TelemetryResult<()>;

    async fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        info!(connection = %self.url(), "telemetry client shutting down");
        self.teardown();
        Ok(())
    }
}
