use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into/from `WsFrame`; the connection
/// actor only ever sees this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    /// Build a text frame from an owned string without re-validating UTF-8.
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<Bytes>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Data frames carry telemetry; control frames never do.
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, WsFrame::Text(_) | WsFrame::Binary(_))
    }
}

/// Borrow the payload of a data frame (text or binary).
#[inline]
pub fn data_payload(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) | WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => None,
    }
}

/// Human-readable description of a close frame for disconnect reasons and logs.
pub fn describe_close(frame: Option<&WsCloseFrame>) -> String {
    match frame {
        Some(close) => format!(
            "code={} reason={}",
            close.code,
            String::from_utf8_lossy(close.reason.as_ref())
        ),
        None => "remote closed".to_string(),
    }
}
