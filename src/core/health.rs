use std::time::{Duration, Instant};

use super::circular_buffer::CircularBuffer;
use super::types::{ConnectionState, TelemetryStats};

const MAX_RECENT_ERRORS: usize = 32;
const MAX_ERROR_TEXT_BYTES: usize = 1024;

#[derive(Debug, Clone)]
struct ErrorRec {
    _timestamp: Instant,
    context: &'static str,
    error: String,
}

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Counters and recent-error ring owned by the connection actor.
///
/// Plain fields, no interior mutability: only the actor touches it.
#[derive(Debug)]
pub struct TelemetryHealth {
    connection_started: Option<Instant>,
    last_frame_received: Option<Instant>,
    connects: u64,
    connect_failures: u64,
    reconnects: u64,
    frames: u64,
    snapshots: u64,
    decode_errors: u64,
    recent_errors: CircularBuffer<ErrorRec>,
}

impl Default for TelemetryHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryHealth {
    pub fn new() -> Self {
        Self {
            connection_started: None,
            last_frame_received: None,
            connects: 0,
            connect_failures: 0,
            reconnects: 0,
            frames: 0,
            snapshots: 0,
            decode_errors: 0,
            recent_errors: CircularBuffer::new(MAX_RECENT_ERRORS),
        }
    }

    pub fn record_connected(&mut self) {
        self.connection_started = Some(Instant::now());
        self.last_frame_received = None;
        self.connects = self.connects.saturating_add(1);
    }

    pub fn record_disconnected(&mut self) {
        self.connection_started = None;
    }

    pub fn record_connect_failure(&mut self, error: &str) {
        self.connect_failures = self.connect_failures.saturating_add(1);
        self.record_error("connect", error);
    }

    pub fn record_frame(&mut self) {
        self.last_frame_received = Some(Instant::now());
        self.frames = self.frames.saturating_add(1);
    }

    pub fn record_snapshot(&mut self) {
        self.snapshots = self.snapshots.saturating_add(1);
    }

    pub fn record_decode_error(&mut self, error: &str) {
        self.decode_errors = self.decode_errors.saturating_add(1);
        self.record_error("decode", error);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn record_error(&mut self, context: &'static str, error: &str) {
        self.recent_errors.push(ErrorRec {
            _timestamp: Instant::now(),
            context,
            error: truncate_string(error),
        });
    }

    /// Listener failures are counted by the subscription hub and passed in.
    pub fn get_stats(&self, state: ConnectionState, listener_failures: u64) -> TelemetryStats {
        TelemetryStats {
            state,
            uptime: self
                .connection_started
                .map(|started| started.elapsed())
                .unwrap_or(Duration::ZERO),
            connects: self.connects,
            connect_failures: self.connect_failures,
            reconnects: self.reconnects,
            frames: self.frames,
            snapshots: self.snapshots,
            decode_errors: self.decode_errors,
            listener_failures,
            last_frame_age: self.last_frame_received.map(|at| at.elapsed()),
            recent_errors: self
                .recent_errors
                .iter()
                .map(|rec| format!("{}: {}", rec.context, rec.error))
                .collect(),
        }
    }
}
