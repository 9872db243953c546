use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{TelemetryError, TelemetryResult, WebSocketBufferConfig, WsFrame};

pub mod tungstenite;

pub use tungstenite::TungsteniteTransport;

/// Future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = TelemetryResult<(R, W)>> + Send + 'static>>;

/// Transport boundary for websocket IO.
///
/// The read loop lives outside the actor as a plain tokio task; the actor owns the writer,
/// the state machine and the reconnect policy. Tests swap in an in-memory transport here.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, TelemetryError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = TelemetryError> + Send + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
