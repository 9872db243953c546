use std::sync::Arc;

use kameo::Actor;
use kameo::error::SendError;
use kameo::prelude::ActorRef;
use serde::Serialize;

use super::actor::{
    Connect, Disconnect, GetConnectionState, GetConnectionStats, GetLatestSnapshot, SendText,
    Shutdown, Subscribe, TelemetryActor, TelemetryActorArgs, Unsubscribe,
};
use crate::core::{
    ClientConfig, ConnectionState, FixedDelayReconnect, ReconnectStrategy, TelemetryError,
    TelemetryResult, TelemetryStats,
};
use crate::hub::{Channel, ListenerResult, Subscription, TelemetryEvent};
use crate::telemetry::TelemetrySnapshot;
use crate::transport::{TungsteniteTransport, WsTransport};

fn map_send_error<M>(err: SendError<M, TelemetryError>) -> TelemetryError {
    match err {
        SendError::HandlerError(err) => err,
        // Not running, mailbox closed or no reply: the actor is gone for our purposes.
        _ => TelemetryError::ClientStopped,
    }
}

/// Cloneable handle to one telemetry feed connection.
///
/// All clones drive the same actor. Outcomes of `connect`/`disconnect` are reported through
/// subscribed listeners; the returned `Result` only covers delivery of the command itself.
pub struct TelemetryClient<T = TungsteniteTransport, R = FixedDelayReconnect>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    actor: ActorRef<TelemetryActor<T, R>>,
}

impl<T, R> Clone for TelemetryClient<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl TelemetryClient {
    /// Client over tokio-tungstenite with the fixed-delay policy taken from `config`.
    pub fn new(config: ClientConfig) -> TelemetryResult<Self> {
        let reconnect = FixedDelayReconnect::from_config(&config);
        Self::with_transport(config, TungsteniteTransport::new(), reconnect)
    }
}

impl<T, R> TelemetryClient<T, R>
where
    T: WsTransport,
    R: ReconnectStrategy,
{
    /// Client over a caller-supplied transport and strategy.
    ///
    /// The strategy is configured from `config` on start, and `max_reconnect_attempts` caps
    /// retries whatever the strategy allows.
    pub fn with_transport(config: ClientConfig, transport: T, reconnect: R) -> TelemetryResult<Self> {
        config.validate()?;
        Ok(Self::spawn(TelemetryActorArgs {
            config,
            transport,
            reconnect,
        }))
    }

    /// Spawn without validating; the actor still refuses to start on an invalid config.
    pub fn spawn(args: TelemetryActorArgs<T, R>) -> Self {
        Self {
            actor: TelemetryActor::spawn(args),
        }
    }

    pub fn actor_ref(&self) -> &ActorRef<TelemetryActor<T, R>> {
        &self.actor
    }

    pub async fn connect(&self) -> TelemetryResult<()> {
        self.actor.ask(Connect).await.map_err(map_send_error)
    }

    /// Close the feed. The pending reconnect timer, if any, is cancelled before this returns.
    pub async fn disconnect(&self) -> TelemetryResult<()> {
        self.actor.ask(Disconnect).await.map_err(map_send_error)
    }

    /// Register `listener` on `channel`. A `Snapshot` listener receives the latest cached
    /// snapshot before this returns.
    pub async fn subscribe<F>(&self, channel: Channel, listener: F) -> TelemetryResult<Subscription>
    where
        F: FnMut(&TelemetryEvent) -> ListenerResult + Send + 'static,
    {
        self.actor
            .ask(Subscribe {
                channel,
                listener: Box::new(listener),
            })
            .await
            .map_err(map_send_error)
    }

    /// Returns `false` when the registration was already removed.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> TelemetryResult<bool> {
        self.actor
            .ask(Unsubscribe(subscription.duplicate()))
            .await
            .map_err(map_send_error)
    }

    /// Serialize `payload` as JSON and write it on the live connection.
    pub async fn send<S>(&self, payload: &S) -> TelemetryResult<()>
    where
        S: Serialize + ?Sized,
    {
        let text =
            sonic_rs::to_string(payload).map_err(|e| TelemetryError::Serialize(e.to_string()))?;
        self.actor.ask(SendText(text)).await.map_err(map_send_error)
    }

    pub async fn state(&self) -> TelemetryResult<ConnectionState> {
        self.actor
            .ask(GetConnectionState)
            .await
            .map_err(map_send_error)
    }

    pub async fn latest_snapshot(&self) -> TelemetryResult<Option<Arc<TelemetrySnapshot>>> {
        self.actor
            .ask(GetLatestSnapshot)
            .await
            .map_err(map_send_error)
    }

    pub async fn stats(&self) -> TelemetryResult<TelemetryStats> {
        self.actor
            .ask(GetConnectionStats)
            .await
            .map_err(map_send_error)
    }

    /// Close the transport, drop every registration and stop the actor.
    ///
    /// Later calls on any clone return `ClientStopped`.
    pub async fn shutdown(&self) -> TelemetryResult<()> {
        self.actor.ask(Shutdown).await.map_err(map_send_error)?;
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
        Ok(())
    }
}
