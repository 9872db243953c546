//! Server side of a telemetry feed.
//!
//! Used by the loopback tests and the demo simulator to stand in for the site telemetry
//! server: accept a websocket on a raw TCP stream and push JSON frames at the client.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async_with_config};

use crate::core::{TelemetryError, TelemetryResult, WebSocketBufferConfig, WsFrame};
use crate::transport::tungstenite::{frame_to_msg, map_ws_error, msg_to_frame, ws_config};

/// One accepted client connection.
pub struct FeedPeer {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedPeer {
    /// Publish a raw JSON document as a text frame.
    pub async fn send_json(&mut self, json: impl Into<String>) -> TelemetryResult<()> {
        self.send(WsFrame::text(json)).await
    }

    /// Serialize `value` and publish it as a text frame.
    pub async fn send_value<S: Serialize>(&mut self, value: &S) -> TelemetryResult<()> {
        let json =
            sonic_rs::to_string(value).map_err(|e| TelemetryError::Serialize(e.to_string()))?;
        self.send_json(json).await
    }

    pub async fn send(&mut self, frame: WsFrame) -> TelemetryResult<()> {
        self.inner
            .send(frame_to_msg(frame))
            .await
            .map_err(|e| map_ws_error("peer_write", e))
    }

    /// Next frame from the client, `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<TelemetryResult<WsFrame>> {
        self.inner
            .next()
            .await
            .map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("peer_read", e)))
    }

    /// Send a close frame and drop the connection.
    pub async fn close(mut self, code: u16, reason: &str) -> TelemetryResult<()> {
        self.send(WsFrame::close(code, reason.to_string())).await
    }
}

/// Perform the server handshake on an accepted TCP stream.
pub async fn accept_feed(stream: TcpStream) -> TelemetryResult<FeedPeer> {
    accept_feed_with_buffers(stream, WebSocketBufferConfig::default()).await
}

pub async fn accept_feed_with_buffers(
    stream: TcpStream,
    buffers: WebSocketBufferConfig,
) -> TelemetryResult<FeedPeer> {
    let inner = accept_async_with_config(MaybeTlsStream::Plain(stream), Some(ws_config(buffers)))
        .await
        .map_err(|e| map_ws_error("accept", e))?;
    Ok(FeedPeer { inner })
}
