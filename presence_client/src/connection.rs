//! Field session connection.
//!
//! One WebSocket per client, opened once. The session runs as its own task
//! and talks to the owner through channels:
//! - inbound text frames are forwarded unparsed over an `mpsc` channel;
//! - outbound frames come from a subscription to the reporter's bus.
//!
//! Completing the handshake is the "ready" point: the last known position
//! is flushed right away so the server learns the viewport before any
//! movement. When the session drops, it either ends (the default) or
//! reconnects under a bounded [`RetryPolicy`], re-sending the last frame
//! on every new connection.

use std::time::Duration;

use anyhow::Context;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use presence_shared::{
    config::RetryPolicy,
    event::{EventBus, Subscription},
    net::{encode_outbound, OutboundFrame},
};
use rand::Rng;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Inbound frames buffered between the session task and its owner.
const INBOUND_BUFFER: usize = 64;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Closed from our side (`close`, handle dropped, or bus gone).
    Closed,
    /// Connection lost and not recovered.
    Lost,
}

/// Owner's side of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    inbound: mpsc::Receiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SessionEnd>>,
}

impl SessionHandle {
    /// Next inbound text frame; `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Closes the socket, drops the bus subscription and waits for the
    /// session task to finish.
    pub async fn close(mut self) -> SessionEnd {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.inbound.close();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(end) => end,
                Err(e) => {
                    warn!(error = %e, "Session task failed");
                    SessionEnd::Lost
                }
            },
            None => SessionEnd::Closed,
        }
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Opens the field session at `url`.
    ///
    /// `last_known` is sent as soon as the handshake completes. Outbound
    /// frames published on `bus` afterwards are written to the socket for
    /// as long as the session lives.
    pub async fn open(
        url: &str,
        retry: RetryPolicy,
        bus: &EventBus<OutboundFrame>,
        last_known: Option<OutboundFrame>,
    ) -> anyhow::Result<SessionHandle> {
        // Subscribe before the handshake so nothing published meanwhile is lost.
        let outbound = bus.subscribe();
        let ws = connect(url, retry).await?;
        info!(url, "Field session open");

        let (mut sink, source) = ws.split();
        if let Some(frame) = last_known {
            send_frame(&mut sink, &frame)
                .await
                .context("send initial position")?;
            debug!(x = frame.position.x, y = frame.position.y, "Initial position flushed");
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Session {
            url: url.to_string(),
            retry,
            outbound,
            inbound: inbound_tx,
            shutdown: shutdown_rx,
            last_sent: last_known,
        };
        let task = tokio::spawn(session.run(sink, source));

        Ok(SessionHandle {
            inbound: inbound_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

async fn connect(url: &str, retry: RetryPolicy) -> anyhow::Result<WsStream> {
    let mut attempt = 0;
    loop {
        match connect_async(url).await {
            Ok((ws, _response)) => return Ok(ws),
            Err(e) if attempt < retry.max_attempts => {
                let delay = jittered(retry.backoff(attempt));
                warn!(url, error = %e, attempt = attempt + 1, ?delay, "Connect failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("connect to {url}")),
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let spread = (delay.as_millis() / 4) as u64;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

async fn send_frame(sink: &mut WsSink, frame: &OutboundFrame) -> anyhow::Result<()> {
    let text = encode_outbound(frame)?;
    sink.send(Message::Text(text)).await.context("ws send")?;
    Ok(())
}

enum PumpEnd {
    Shutdown,
    Dropped(String),
}

enum Reconnect {
    Connected(WsStream),
    Shutdown,
    Exhausted,
}

struct Session {
    url: String,
    retry: RetryPolicy,
    outbound: Subscription<OutboundFrame>,
    inbound: mpsc::Sender<String>,
    shutdown: oneshot::Receiver<()>,
    last_sent: Option<OutboundFrame>,
}

impl Session {
    async fn run(mut self, mut sink: WsSink, mut source: WsSource) -> SessionEnd {
        loop {
            match self.pump(&mut sink, &mut source).await {
                PumpEnd::Shutdown => {
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    info!(url = %self.url, "Field session closed");
                    return SessionEnd::Closed;
                }
                PumpEnd::Dropped(reason) => {
                    warn!(url = %self.url, %reason, "Field session dropped");
                    match self.reconnect().await {
                        Reconnect::Connected(ws) => {
                            (sink, source) = ws.split();
                            info!(url = %self.url, "Field session reopened");
                            if let Some(frame) = self.last_sent {
                                if let Err(e) = send_frame(&mut sink, &frame).await {
                                    warn!(error = %e, "Re-flush after reconnect failed");
                                }
                            }
                        }
                        Reconnect::Shutdown => return SessionEnd::Closed,
                        Reconnect::Exhausted => {
                            warn!(url = %self.url, "Field session lost; sync stopped");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    async fn pump(&mut self, sink: &mut WsSink, source: &mut WsSource) -> PumpEnd {
        let mut close_reason = None;
        loop {
            tokio::select! {
                _ = &mut self.shutdown => return PumpEnd::Shutdown,
                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        self.last_sent = Some(frame);
                        if let Err(e) = send_frame(sink, &frame).await {
                            return PumpEnd::Dropped(format!("{e:#}"));
                        }
                    }
                    // Every publisher is gone; nothing more will ever be sent.
                    None => return PumpEnd::Shutdown,
                },
                msg = source.next() => match msg {
                    // A full inbound buffer must not block shutdown.
                    Some(Ok(Message::Text(text))) => tokio::select! {
                        sent = self.inbound.send(text) => {
                            if sent.is_err() {
                                return PumpEnd::Shutdown;
                            }
                        }
                        _ = &mut self.shutdown => return PumpEnd::Shutdown,
                    },
                    // Keep reading so the close reply goes out; the stream ends next.
                    Some(Ok(Message::Close(frame))) => {
                        close_reason = Some(format!("server closed: {frame:?}"));
                    }
                    Some(Ok(other)) => debug!(kind = ?other, "Ignoring non-text frame"),
                    Some(Err(e)) => {
                        return PumpEnd::Dropped(close_reason.unwrap_or_else(|| e.to_string()));
                    }
                    None => {
                        return PumpEnd::Dropped(
                            close_reason.unwrap_or_else(|| "stream ended".to_string()),
                        );
                    }
                },
            }
        }
    }

    async fn reconnect(&mut self) -> Reconnect {
        for attempt in 0..self.retry.max_attempts {
            let delay = jittered(self.retry.backoff(attempt));
            info!(attempt = attempt + 1, ?delay, "Reconnecting field session");
            tokio::select! {
                _ = &mut self.shutdown => return Reconnect::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
            match connect_async(self.url.as_str()).await {
                Ok((ws, _response)) => return Reconnect::Connected(ws),
                Err(e) => warn!(error = %e, attempt = attempt + 1, "Reconnect failed"),
            }
        }
        Reconnect::Exhausted
    }
}
