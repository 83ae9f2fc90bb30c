//! Client implementation.
//!
//! [`FieldClient`] owns every piece of client state and drives it from a
//! single `select!` loop:
//! - inbound frames from the field session feed the world store;
//! - the avatar ticker eases the local avatar toward the last click;
//! - the render ticker eases remote actors and releases throttled reports;
//! - commands (clicks, resizes, shutdown) arrive over an `mpsc` channel.
//!
//! Renderers observe the world through a `watch` channel of
//! [`WorldSnapshot`]s. When the session is lost the view freezes but the
//! loop keeps serving commands until shutdown.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use presence_shared::{
    config::{ClientConfig, SweepPolicy},
    event::EventBus,
    math::{FieldSize, Position},
    model::ActorId,
    net::OutboundFrame,
};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionManager, SessionEnd, SessionHandle},
    inbound::InboundProcessor,
    input::display_to_world,
    interp::{AvatarStep, LocalAvatarMotion, RemoteActorMotion},
    reporter::PositionReporter,
    scheduler::Ticker,
    store::{Changed, WorldSnapshot, WorldStore},
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No session opened yet, or closed on shutdown.
    Disconnected,
    Connected,
    /// Session dropped and not recovered; the world view is frozen.
    Lost,
}

/// Requests from the host (UI, console, tests).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientCommand {
    /// Pointer click at a display-space position.
    Click { display: Position },
    Resize(FieldSize),
    Shutdown,
}

pub struct FieldClient {
    pub state: ClientState,
    cfg: ClientConfig,
    store: WorldStore,
    processor: InboundProcessor,
    avatar: LocalAvatarMotion,
    remotes: RemoteActorMotion,
    bus: EventBus<OutboundFrame>,
    reporter: PositionReporter,
    avatar_ticker: Ticker,
    render_ticker: Ticker,
    sweep_ticker: Option<Ticker>,
    session: Option<SessionHandle>,
    snapshots: watch::Sender<WorldSnapshot>,
}

impl FieldClient {
    pub fn new(cfg: ClientConfig) -> Self {
        let mut store = WorldStore::new();
        store.set_local_position(cfg.start_position());
        store.set_field_size(cfg.field_size);

        let bus = EventBus::default();
        let reporter = PositionReporter::new(bus.clone(), cfg.report_throttle());
        let sweep_ticker = match cfg.sweep {
            SweepPolicy::Periodic { interval_ms } => {
                Some(Ticker::new("sweep", Duration::from_millis(interval_ms)))
            }
            SweepPolicy::OnFrame | SweepPolicy::Disabled => None,
        };
        let (snapshots, _) = watch::channel(store.snapshot());

        Self {
            state: ClientState::Disconnected,
            processor: InboundProcessor::new(cfg.sweep),
            avatar: LocalAvatarMotion::new(cfg.world),
            remotes: RemoteActorMotion::new(),
            avatar_ticker: Ticker::new("avatar", cfg.avatar_period()),
            render_ticker: Ticker::new("render", cfg.render_period()),
            sweep_ticker,
            session: None,
            store,
            bus,
            reporter,
            snapshots,
            cfg,
        }
    }

    /// Opens the field session. The current position goes out as soon as
    /// the handshake completes.
    pub async fn connect(&mut self) -> anyhow::Result<()> {
        let handle = ConnectionManager::open(
            &self.cfg.server_url,
            self.cfg.retry,
            &self.bus,
            self.store.last_known_frame(),
        )
        .await?;
        self.session = Some(handle);
        self.state = ClientState::Connected;
        info!(url = %self.cfg.server_url, "Field client connected");
        Ok(())
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn bus(&self) -> &EventBus<OutboundFrame> {
        &self.bus
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<WorldSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn avatar_target(&self) -> Option<Position> {
        self.avatar.target()
    }

    pub fn is_moving(&self) -> bool {
        self.avatar_ticker.is_running()
    }

    pub fn displayed_actor(&self, id: &ActorId) -> Option<Position> {
        self.remotes.displayed(id)
    }

    /// Applies a command. Returns `false` once the client should stop.
    /// Must run inside a Tokio runtime; a click starts the avatar ticker.
    pub fn handle_command(&mut self, cmd: ClientCommand) -> bool {
        match cmd {
            ClientCommand::Click { display } => self.click(display),
            ClientCommand::Resize(size) => self.resize(size),
            ClientCommand::Shutdown => return false,
        }
        true
    }

    fn viewport(&self) -> (Position, FieldSize) {
        (
            self.store
                .local_position()
                .unwrap_or_else(|| self.cfg.start_position()),
            self.store.field_size().unwrap_or(self.cfg.field_size),
        )
    }

    fn click(&mut self, display: Position) {
        let (camera, field) = self.viewport();
        let target = self.avatar.set_target(display_to_world(display, field, camera));
        self.avatar_ticker.start();
        debug!(x = target.x, y = target.y, "Avatar target set");
    }

    fn resize(&mut self, size: FieldSize) {
        self.store.set_field_size(size);
        let (position, size) = self.viewport();
        self.reporter.report_final(position, size);
        self.publish();
    }

    /// Feeds one inbound text frame through the processor. `None` when the
    /// frame was dropped as undecodable.
    pub fn handle_inbound(&mut self, text: &str) -> Option<Changed> {
        let changed = self.processor.handle_text(&mut self.store, text, Utc::now())?;
        if changed.contains(Changed::ACTORS) {
            self.remotes.sync(self.store.actors());
        }
        if !changed.is_empty() {
            self.publish();
        }
        Some(changed)
    }

    pub fn on_avatar_tick(&mut self, elapsed: Duration) {
        let (current, size) = self.viewport();
        match self.avatar.advance(current, elapsed) {
            AvatarStep::Moving(p) => {
                self.store.set_local_position(p);
                self.reporter.report(p, size);
            }
            AvatarStep::Arrived(p) => {
                self.store.set_local_position(p);
                self.reporter.report_final(p, size);
                self.avatar_ticker.cancel();
                debug!(x = p.x, y = p.y, "Avatar arrived");
            }
            AvatarStep::Idle => {
                self.avatar_ticker.cancel();
                return;
            }
        }
        self.publish();
    }

    pub fn on_render_tick(&mut self, elapsed: Duration) {
        let moved = self.remotes.advance(self.store.actors(), elapsed);
        self.reporter.poll(Instant::now());
        if moved > 0 {
            self.publish();
        }
    }

    pub fn on_sweep_tick(&mut self) {
        let changed = self.store.sweep_expired(Utc::now());
        if !changed.is_empty() {
            debug!(?changed, "Expired entries swept");
            self.publish();
        }
    }

    fn publish(&self) {
        let displayed = Arc::new(self.remotes.displayed_positions().clone());
        self.snapshots
            .send_replace(self.store.snapshot().with_displayed_actors(displayed));
    }

    /// Runs until `Shutdown` arrives or every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) -> anyhow::Result<()> {
        self.render_ticker.start();
        if let Some(sweep) = self.sweep_ticker.as_mut() {
            sweep.start();
        }
        self.publish();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                text = next_inbound(&mut self.session) => match text {
                    Some(text) => {
                        self.handle_inbound(&text);
                    }
                    None => self.on_session_end().await,
                },
                tick = self.avatar_ticker.tick() => self.on_avatar_tick(tick.elapsed),
                tick = self.render_ticker.tick() => self.on_render_tick(tick.elapsed),
                _ = next_sweep(&mut self.sweep_ticker) => self.on_sweep_tick(),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn on_session_end(&mut self) {
        let Some(handle) = self.session.take() else {
            return;
        };
        match handle.close().await {
            SessionEnd::Lost => {
                self.state = ClientState::Lost;
                warn!("Field session lost; world view frozen");
            }
            SessionEnd::Closed => {
                self.state = ClientState::Disconnected;
                info!("Field session closed");
            }
        }
    }

    /// Stops every timer and closes the session.
    pub async fn shutdown(&mut self) {
        self.avatar_ticker.cancel();
        self.render_ticker.cancel();
        if let Some(sweep) = self.sweep_ticker.as_mut() {
            sweep.cancel();
        }
        self.avatar.clear();
        self.reporter.flush();
        if let Some(handle) = self.session.take() {
            handle.close().await;
        }
        self.state = ClientState::Disconnected;
        info!("Field client shut down");
    }
}

async fn next_inbound(session: &mut Option<SessionHandle>) -> Option<String> {
    match session.as_mut() {
        Some(handle) => handle.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_sweep(ticker: &mut Option<Ticker>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
