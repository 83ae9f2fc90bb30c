//! In-process field server for integration tests.
//!
//! Speaks just enough of the field protocol to exercise the client: it
//! accepts WebSocket sessions on an ephemeral localhost port, pushes
//! event frames as JSON text and decodes the position frames the client
//! sends back.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use presence_shared::net::{decode_outbound, OutboundFrame, WS_PATH};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::debug;

/// Upper bound on waiting for the client's close reply.
const CLOSE_DRAIN: Duration = Duration::from_secs(2);

pub struct FieldServer {
    listener: TcpListener,
    url: String,
}

/// Binds a field server to an ephemeral localhost port.
pub async fn bind_ephemeral() -> anyhow::Result<FieldServer> {
    let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let listener = TcpListener::bind(bind).await.context("bind listener")?;
    let addr = listener.local_addr().context("local_addr")?;
    Ok(FieldServer {
        listener,
        url: format!("ws://{addr}{WS_PATH}"),
    })
}

impl FieldServer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Waits for one client and completes the WebSocket handshake.
    pub async fn accept_one(&self) -> anyhow::Result<FieldConn> {
        let (stream, peer) = self.listener.accept().await.context("accept")?;
        let ws = accept_async(stream).await.context("ws handshake")?;
        debug!(%peer, "Field client accepted");
        Ok(FieldConn { ws })
    }
}

/// Server side of one field session.
pub struct FieldConn {
    ws: WebSocketStream<TcpStream>,
}

impl FieldConn {
    pub async fn send_text(&mut self, text: impl Into<String>) -> anyhow::Result<()> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .context("ws send")
    }

    pub async fn send_events(&mut self, events: &Value) -> anyhow::Result<()> {
        self.send_text(events.to_string()).await
    }

    /// Next position frame from the client. `None` if nothing arrives
    /// within `wait` or the client went away.
    pub async fn recv_frame(&mut self, wait: Duration) -> anyhow::Result<Option<OutboundFrame>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };
            match next {
                Some(Ok(Message::Text(text))) => return decode_outbound(&text).map(Some),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "Field connection errored");
                    return Ok(None);
                }
            }
        }
    }

    /// Waits for a frame matching `pred`, skipping others.
    pub async fn recv_frame_where(
        &mut self,
        wait: Duration,
        pred: impl Fn(&OutboundFrame) -> bool,
    ) -> anyhow::Result<Option<OutboundFrame>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_frame(left).await? {
                Some(frame) if pred(&frame) => return Ok(Some(frame)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Closes the session with a close handshake.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await.context("ws close")?;
        // Drain until the client acknowledges or goes away.
        let drain = async { while let Some(Ok(_)) = self.ws.next().await {} };
        let _ = tokio::time::timeout(CLOSE_DRAIN, drain).await;
        Ok(())
    }
}

/// An event frame with every collection present.
pub fn events(messages: Value, speaker_phones: Value, reactions: Value, actions: Value) -> Value {
    json!({
        "messages": messages,
        "speakerPhones": speaker_phones,
        "reactions": reactions,
        "explorerActions": actions,
    })
}

/// An event frame carrying only explorer actions.
pub fn actions(actions: Value) -> Value {
    events(json!([]), json!([]), json!([]), actions)
}

/// Explorer arrive in the server's nested shape.
pub fn arrive(id: &str, user: &str, x: f64, y: f64) -> Value {
    json!({
        "type": "arrive",
        "id": id,
        "inner": {"id": user},
        "position": {"x": x, "y": y},
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
