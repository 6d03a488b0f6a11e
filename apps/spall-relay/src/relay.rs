use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    buffer::{Delta, TraceBuffer},
    service::RelayService,
};

pub const START_COMMAND: &str = "start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Other,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        if text == START_COMMAND {
            Command::Start
        } else {
            Command::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No "start" received yet.
    Idle,
    CaughtUp,
    /// Bytes past the cursor exist; they go out on the next "start".
    Pending,
}

/// Per-viewer replay cursor. The server never pushes: deltas leave only in
/// response to a command.
#[derive(Debug, Default)]
pub struct RelayCursor {
    sent: Option<usize>,
}

impl RelayCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.sent.unwrap_or(0)
    }

    pub fn state(&self, buffer: &TraceBuffer) -> RelayState {
        match self.sent {
            None => RelayState::Idle,
            Some(sent) if sent == buffer.fill_cursor() => RelayState::CaughtUp,
            Some(_) => RelayState::Pending,
        }
    }

    /// Applies one command and returns the delta to send, if any.
    ///
    /// A "start" on a caught-up cursor is a no-op. Any other "start" rewinds
    /// to offset 0 and hands back `[0, fill)` copied under one read guard.
    /// The caught-up check reads the fill cursor separately, so an append
    /// landing between the two only makes the delta longer; the cursor always
    /// ends at the copied delta's end. Unrecognized commands never send and
    /// never move the cursor.
    pub fn on_command(&mut self, command: Command, buffer: &TraceBuffer) -> Option<Delta> {
        if command != Command::Start {
            return None;
        }
        if self.sent == Some(buffer.fill_cursor()) {
            return None;
        }

        self.sent = Some(0);
        let delta = buffer.delta_from(0)?;
        self.sent = Some(delta.end);
        Some(delta)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("viewer read failed: {0}")]
    Read(#[source] axum::Error),
    #[error("viewer write failed: {0}")]
    Write(#[source] axum::Error),
}

pub async fn ws_handler(
    State(service): State<Arc<RelayService>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(reason = %rejection, "viewer upgrade rejected");
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(|err: axum::Error| warn!(error = %err, "viewer upgrade failed"))
        .on_upgrade(move |socket| handle_viewer(socket, service))
}

async fn handle_viewer(socket: WebSocket, service: Arc<RelayService>) {
    let viewer_id = Uuid::new_v4();
    let active = service.on_viewer_connected();
    info!(viewer_id = %viewer_id, active_viewers = active, "ws opened");

    if let Err(err) = relay_loop(socket, &service, viewer_id).await {
        warn!(viewer_id = %viewer_id, error = %err, "viewer connection ended with error");
    }

    let active = service.on_viewer_disconnected();
    info!(viewer_id = %viewer_id, active_viewers = active, "ws closed");
}

async fn relay_loop(
    mut socket: WebSocket,
    service: &RelayService,
    viewer_id: Uuid,
) -> Result<(), RelayError> {
    let mut cursor = RelayCursor::new();

    while let Some(frame) = socket.recv().await {
        let text = match frame.map_err(RelayError::Read)? {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(viewer_id = %viewer_id, "ignoring non-utf8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        debug!(viewer_id = %viewer_id, command = %text, "command from viewer");

        let Some(delta) = cursor.on_command(Command::parse(&text), service.buffer()) else {
            continue;
        };

        let len = delta.len();
        info!(
            viewer_id = %viewer_id,
            bytes = len,
            cursor = delta.end,
            "sending delta to viewer"
        );
        socket
            .send(Message::Binary(delta.bytes))
            .await
            .map_err(RelayError::Write)?;
        service.on_delta_sent(len);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn command_parsing_is_exact() {
        assert_eq!(Command::parse("start"), Command::Start);
        assert_eq!(Command::parse("Start"), Command::Other);
        assert_eq!(Command::parse("start "), Command::Other);
        assert_eq!(Command::parse(""), Command::Other);
    }

    #[test_timeout::timeout]
    fn idle_cursor_never_sends_without_start() {
        let buffer = TraceBuffer::new();
        let mut cursor = RelayCursor::new();

        buffer.append(b"growth");
        assert_eq!(cursor.state(&buffer), RelayState::Idle);
        assert!(cursor.on_command(Command::Other, &buffer).is_none());
        buffer.append(b"more growth");
        assert!(cursor.on_command(Command::Other, &buffer).is_none());
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.state(&buffer), RelayState::Idle);
    }

    #[test_timeout::timeout]
    fn start_on_empty_buffer_sends_nothing() {
        let buffer = TraceBuffer::new();
        let mut cursor = RelayCursor::new();

        assert!(cursor.on_command(Command::Start, &buffer).is_none());
        assert_eq!(cursor.state(&buffer), RelayState::CaughtUp);
    }

    #[test_timeout::timeout]
    fn replay_scenario() {
        let buffer = TraceBuffer::new();
        let mut cursor = RelayCursor::new();

        buffer.append(b"0123456789");
        let first = cursor.on_command(Command::Start, &buffer).expect("initial delta");
        assert_eq!(first.bytes, b"0123456789");
        assert_eq!(cursor.position(), 10);

        assert!(cursor.on_command(Command::Start, &buffer).is_none());
        assert_eq!(cursor.state(&buffer), RelayState::CaughtUp);

        buffer.append(b"abcde");
        assert_eq!(cursor.state(&buffer), RelayState::Pending);
        assert!(cursor.on_command(Command::Other, &buffer).is_none());
        assert_eq!(cursor.position(), 10);

        let replay = cursor.on_command(Command::Start, &buffer).expect("full replay");
        assert_eq!(replay.start, 0);
        assert_eq!(replay.bytes, b"0123456789abcde");
        assert_eq!(cursor.position(), 15);
    }

    #[test_timeout::timeout]
    fn start_cursor_lands_on_delta_end_under_concurrent_appends() {
        let buffer = std::sync::Arc::new(TraceBuffer::with_capacity(0));
        let writer = {
            let buffer = std::sync::Arc::clone(&buffer);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    buffer.append(&[1u8; 64]);
                }
            })
        };

        let mut cursor = RelayCursor::new();
        while !writer.is_finished() {
            if let Some(delta) = cursor.on_command(Command::Start, &buffer) {
                assert_eq!(delta.start, 0);
                assert_eq!(delta.len(), delta.end);
                assert_eq!(cursor.position(), delta.end);
            }
            assert!(cursor.position() <= buffer.fill_cursor());
        }
        writer.join().unwrap();

        cursor.on_command(Command::Start, &buffer);
        assert_eq!(cursor.position(), 500 * 64);
        assert_eq!(cursor.state(&buffer), RelayState::CaughtUp);
    }

    #[test_timeout::timeout]
    fn cursor_never_exceeds_fill() {
        let buffer = TraceBuffer::new();
        let mut cursor = RelayCursor::new();

        for round in 0..20u8 {
            buffer.append(&vec![round; round as usize]);
            let command = if round % 3 == 0 { Command::Other } else { Command::Start };
            cursor.on_command(command, &buffer);
            assert!(cursor.position() <= buffer.fill_cursor());
        }
    }
}
