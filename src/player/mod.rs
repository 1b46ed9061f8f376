//! Per-guild player bridging the host's voice handshake to a node.
//!
//! The host delivers two fragments in any order: the voice session id and
//! the voice server descriptor. Once both are known the player resolves a
//! node for the server's region and forwards the credentials, after which
//! playback commands are accepted. Fragments that repeat what was already
//! sent do not produce another request.

mod state;
#[cfg(test)]
mod tests;

pub use state::PlayerPhase;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::filter::Filter;
use crate::model::incoming::PlayerState;
use crate::model::outgoing::UpdateTrack;
use crate::model::{SearchResult, SearchType, Track, TrackEndReason, TrackEvent, UpdatePlayer};
use crate::node::{Node, SessionHandle};
use crate::pool::NodePool;
use crate::voice::{ConnectOptions, VoiceChannel, VoiceGateway, VoiceProtocol, VoiceServer};
use crate::{Error, Result};
use state::{Playback, Session};

/// Volume ceiling accepted by the node.
const MAX_VOLUME: u16 = 1000;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A playback change. Fields left `None` are not touched.
#[derive(Debug, Clone, Default)]
pub struct PlayerUpdate {
    /// `Some(None)` stops playback.
    pub track: Option<Option<Track>>,
    pub position: Option<u64>,
    /// `Some(None)` clears a previously set end time.
    pub end_time: Option<Option<u64>>,
    pub volume: Option<u16>,
    pub paused: Option<bool>,
    pub filter: Option<Filter>,
    /// Whether a new track replaces one that is already playing.
    pub replace: bool,
}

impl PlayerUpdate {
    pub fn play(track: Track) -> Self {
        Self {
            track: Some(Some(track)),
            replace: true,
            ..Self::default()
        }
    }

    /// Stopping must override whatever is playing, so it always replaces.
    pub fn stop() -> Self {
        Self {
            track: Some(None),
            replace: true,
            ..Self::default()
        }
    }

    pub fn start_at(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn end_at(mut self, end_time: u64) -> Self {
        self.end_time = Some(Some(end_time));
        self
    }

    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume.min(MAX_VOLUME));
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    fn to_request(&self) -> UpdatePlayer {
        UpdatePlayer {
            track: self.track.as_ref().map(|track| UpdateTrack {
                encoded: track.as_ref().map(|track| track.encoded.clone()),
            }),
            position: self.position,
            end_time: self.end_time,
            volume: self.volume,
            paused: self.paused,
            filters: self.filter.clone(),
            voice: None,
        }
    }
}

struct Shared {
    guild_id: u64,
    channel: VoiceChannel,
    pool: NodePool,
    gateway: Arc<dyn VoiceGateway>,
    session: Mutex<Session>,
    playback: RwLock<Playback>,
    destroyed: AtomicBool,
    this: Weak<Shared>,
}

/// Handle to a guild's player. Clones share state.
#[derive(Clone)]
pub struct Player {
    shared: Arc<Shared>,
}

impl Player {
    pub fn new(pool: NodePool, gateway: Arc<dyn VoiceGateway>, channel: VoiceChannel) -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            guild_id: channel.guild_id,
            channel,
            pool,
            gateway,
            session: Mutex::new(Session::default()),
            playback: RwLock::new(Playback::default()),
            destroyed: AtomicBool::new(false),
            this: this.clone(),
        });
        Self { shared }
    }

    pub fn guild_id(&self) -> u64 {
        self.shared.guild_id
    }

    pub fn channel(&self) -> VoiceChannel {
        self.shared.channel
    }

    pub fn phase(&self) -> PlayerPhase {
        self.shared.playback.read().phase
    }

    /// Joined and handshake complete.
    pub fn is_connected(&self) -> bool {
        self.shared.playback.read().is_active()
    }

    /// Milliseconds into the current track, extrapolated from the node's
    /// last report.
    pub fn position(&self) -> u64 {
        self.shared.playback.read().position_at(now_millis())
    }

    /// Node to Discord latency in milliseconds, -1 when unknown.
    pub fn ping(&self) -> i64 {
        self.shared.playback.read().ping
    }

    pub fn current(&self) -> Option<Track> {
        self.shared.playback.read().current.clone()
    }

    pub fn volume(&self) -> u16 {
        self.shared.playback.read().volume
    }

    pub fn paused(&self) -> bool {
        self.shared.playback.read().paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.shared.pool.assignment(self.shared.guild_id)
    }

    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        self.shared.connect(options).await
    }

    pub async fn disconnect(&self, force: bool) {
        self.shared.disconnect(force).await
    }

    pub async fn on_session_id(&self, session_id: impl Into<String>) -> Result<()> {
        self.shared.on_session_id(session_id.into()).await
    }

    pub async fn on_server_update(&self, server: VoiceServer) -> Result<()> {
        self.shared.on_server_update(server).await
    }

    /// Leaves the channel and removes the node-side player. Calling it
    /// again does nothing.
    pub async fn destroy(&self) {
        self.shared.destroy().await
    }

    pub async fn update(&self, update: PlayerUpdate) -> Result<()> {
        let session = self.shared.session.lock().await;
        self.shared.apply(&session, update).await
    }

    pub async fn play(&self, track: Track) -> Result<()> {
        self.update(PlayerUpdate::play(track)).await
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.update(PlayerUpdate::default().paused(paused)).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.pause(false).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.update(PlayerUpdate::stop()).await
    }

    pub async fn seek(&self, position: u64) -> Result<()> {
        self.update(PlayerUpdate::default().start_at(position)).await
    }

    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        self.update(PlayerUpdate::default().volume(volume)).await
    }

    /// Adds or replaces the filter under `label` and pushes the combined
    /// filter. With `fast_apply` the player seeks to its current position so
    /// the change is heard without waiting for the node's buffer.
    pub async fn add_filter(
        &self,
        label: impl Into<String>,
        filter: Filter,
        fast_apply: bool,
    ) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        self.shared.active_node(&session)?;
        session.filters.insert(label, filter);
        self.shared.push_filters(&session, fast_apply).await
    }

    pub async fn remove_filter(&self, label: &str, fast_apply: bool) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        self.shared.active_node(&session)?;
        if session.filters.remove(label).is_none() {
            return Err(Error::FilterNotFound(label.to_string()));
        }
        self.shared.push_filters(&session, fast_apply).await
    }

    pub async fn clear_filters(&self, fast_apply: bool) -> Result<()> {
        let mut session = self.shared.session.lock().await;
        self.shared.active_node(&session)?;
        session.filters.clear();
        self.shared.push_filters(&session, fast_apply).await
    }

    pub async fn filter_labels(&self) -> Vec<String> {
        let session = self.shared.session.lock().await;
        session.filters.labels().map(str::to_string).collect()
    }

    /// Searches on the assigned node, or on any connected node if the player
    /// has none yet.
    pub async fn search(&self, query: &str, search_type: &SearchType) -> Result<SearchResult> {
        let node = match self.node() {
            Some(node) => node,
            None => {
                warn!(
                    guild = self.shared.guild_id,
                    "player has no node yet, searching on a random node"
                );
                self.shared.pool.select_random_node()?
            }
        };
        node.search(query, search_type).await
    }
}

impl Shared {
    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::PlayerDestroyed);
        }
        Ok(())
    }

    /// The node commands should go to, if the player may issue commands.
    fn active_node(&self, session: &Session) -> Result<Arc<Node>> {
        self.ensure_alive()?;
        if !self.playback.read().is_active() {
            return Err(Error::PlayerNotConnected);
        }
        self.assigned_node(session)
            .ok_or(Error::PlayerNotConnected)
    }

    /// The node this session is assigned to, if it is still in the pool.
    fn assigned_node(&self, session: &Session) -> Option<Arc<Node>> {
        let label = session.node.as_deref()?;
        self.pool
            .assignment(self.guild_id)
            .filter(|node| node.label() == label)
    }

    async fn connect(&self, options: ConnectOptions) -> Result<()> {
        self.ensure_alive()?;
        if !self.channel.kind.carries_voice() {
            return Err(Error::InvalidChannel);
        }

        debug!(
            guild = self.guild_id,
            channel = self.channel.id,
            reconnect = options.reconnect,
            "joining voice channel"
        );
        {
            let mut playback = self.playback.write();
            if playback.phase == PlayerPhase::Idle {
                playback.phase = PlayerPhase::Joining;
            }
        }

        let join = self.gateway.update_voice_state(
            self.guild_id,
            Some(self.channel.id),
            options.self_mute,
            options.self_deaf,
        );
        let result = match timeout(options.timeout, join).await {
            Ok(result) => result,
            Err(_) => Err(Error::JoinTimeout),
        };

        let mut playback = self.playback.write();
        match result {
            Ok(()) => {
                playback.connected = true;
                info!(
                    "🔗 Joined voice channel {} in guild {}",
                    self.channel.id, self.guild_id
                );
                Ok(())
            }
            Err(e) => {
                if playback.phase == PlayerPhase::Joining {
                    playback.phase = PlayerPhase::Idle;
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self, force: bool) {
        if !self.playback.read().connected && !force {
            return;
        }

        debug!(guild = self.guild_id, "leaving voice channel");
        if let Err(e) = self
            .gateway
            .update_voice_state(self.guild_id, None, false, false)
            .await
        {
            warn!(guild = self.guild_id, error = %e, "failed to leave voice channel");
        }

        self.session.lock().await.reset_voice();

        let mut playback = self.playback.write();
        playback.connected = false;
        playback.node_connected = false;
        playback.phase = PlayerPhase::Idle;
    }

    async fn destroy(&self) {
        debug!(guild = self.guild_id, "destroying player");
        self.disconnect(false).await;
        self.destroyed.store(true, Ordering::SeqCst);

        let label = {
            let mut session = self.session.lock().await;
            session.filters.clear();
            session.node.take()
        };
        let released = self.pool.release(self.guild_id);

        let Some(label) = label else {
            return;
        };
        let Some(node) = released.or_else(|| self.pool.get(&label)) else {
            debug!(guild = self.guild_id, node = %label, "node already gone");
            return;
        };

        node.unregister_player(self.guild_id);
        if let Err(e) = node.destroy_player(self.guild_id).await {
            warn!(guild = self.guild_id, node = %label, error = %e, "failed to destroy remote player");
        }
        self.playback.write().current = None;
        info!("🗑️ Player for guild {} destroyed", self.guild_id);
    }

    async fn on_session_id(&self, session_id: String) -> Result<()> {
        self.ensure_alive()?;
        let mut session = self.session.lock().await;

        if session.session_id.as_deref() == Some(session_id.as_str())
            && self.assigned_node(&session).is_some()
        {
            debug!(guild = self.guild_id, "voice session id unchanged");
            return Ok(());
        }
        session.session_id = Some(session_id);

        self.resolve_node(&mut session, false)?;
        self.enter_handshake(&session);
        self.dispatch(&mut session).await
    }

    async fn on_server_update(&self, server: VoiceServer) -> Result<()> {
        self.ensure_alive()?;
        let mut session = self.session.lock().await;

        let endpoint_changed = session
            .server
            .as_ref()
            .map_or(true, |known| known.endpoint != server.endpoint);
        // Kept even if no node can take it yet; the host will not resend it.
        session.server = Some(server);

        self.resolve_node(&mut session, endpoint_changed)?;
        self.enter_handshake(&session);
        self.dispatch(&mut session).await
    }

    /// Picks a node for the known voice server when the session has none
    /// left in the pool, or when the endpoint moved.
    fn resolve_node(&self, session: &mut Session, endpoint_changed: bool) -> Result<()> {
        let Some(endpoint) = session.server.as_ref().map(|server| server.endpoint.clone()) else {
            return Ok(());
        };
        let assigned = self.assigned_node(session);
        if assigned.is_some() && !endpoint_changed {
            return Ok(());
        }

        let node = self.pool.select_node(&endpoint)?;
        let same_node = assigned
            .as_ref()
            .is_some_and(|assigned| Arc::ptr_eq(assigned, &node));

        if !same_node {
            match &session.node {
                Some(previous) => info!(
                    "🔀 Moving player {} from node {} to {}",
                    self.guild_id,
                    previous,
                    node.label()
                ),
                None => debug!(guild = self.guild_id, node = %node.label(), "node assigned"),
            }
            session.node = Some(node.label().to_string());
            session.dispatched = None;
        }

        let handle: Weak<dyn SessionHandle> = self.this.clone();
        self.pool.assign(self.guild_id, &node, handle);
        Ok(())
    }

    fn enter_handshake(&self, session: &Session) {
        let mut playback = self.playback.write();
        if matches!(playback.phase, PlayerPhase::Idle | PlayerPhase::Joining)
            && session.has_fragment()
        {
            playback.phase = PlayerPhase::AwaitingHandshake;
        }
    }

    /// Sends credentials once both fragments and a node are known, unless
    /// the same credentials were already accepted.
    async fn dispatch(&self, session: &mut Session) -> Result<()> {
        let (Some(session_id), Some(server)) = (session.session_id.clone(), session.server.clone())
        else {
            debug!(guild = self.guild_id, "waiting for the rest of the voice handshake");
            return Ok(());
        };
        let Some(node) = self.assigned_node(session) else {
            debug!(guild = self.guild_id, "voice fragments arrived before a node was chosen");
            return Ok(());
        };

        if session
            .dispatched
            .as_ref()
            .is_some_and(|(sent_id, sent_server)| *sent_id == session_id && *sent_server == server)
        {
            debug!(guild = self.guild_id, "voice credentials unchanged");
            return Ok(());
        }

        match node
            .send_voice_update(self.guild_id, &session_id, &server)
            .await
        {
            Ok(()) => {
                session.dispatched = Some((session_id, server));
                self.playback.write().phase = PlayerPhase::Active;
                info!(
                    "🎤 Player for guild {} active on node {}",
                    self.guild_id,
                    node.label()
                );
                Ok(())
            }
            Err(e) => {
                session.dispatched = None;
                let mut playback = self.playback.write();
                if playback.phase == PlayerPhase::Active {
                    playback.phase = PlayerPhase::AwaitingHandshake;
                }
                Err(e)
            }
        }
    }

    async fn apply(&self, session: &Session, update: PlayerUpdate) -> Result<()> {
        let node = self.active_node(session)?;
        let now = now_millis();

        {
            let mut playback = self.playback.write();
            match &update.track {
                Some(Some(track)) => {
                    playback.current = Some(track.clone());
                    playback.seek(update.position.unwrap_or(0), now);
                }
                Some(None) => playback.current = None,
                None => {}
            }
            if let Some(position) = update.position {
                playback.seek(position, now);
            }
            if let Some(volume) = update.volume {
                playback.volume = volume;
            }
            if let Some(paused) = update.paused {
                playback.paused = paused;
            }
        }

        node.update_player(self.guild_id, &update.to_request(), !update.replace)
            .await
    }

    async fn push_filters(&self, session: &Session, fast_apply: bool) -> Result<()> {
        let update = PlayerUpdate {
            filter: Some(session.filters.combined()),
            ..PlayerUpdate::default()
        };
        self.apply(session, update).await?;

        if fast_apply {
            let position = self.playback.read().position_at(now_millis());
            self.apply(session, PlayerUpdate::default().start_at(position))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for Shared {
    fn detach(&self) {
        let mut playback = self.playback.write();
        playback.node_connected = false;
        if playback.phase == PlayerPhase::Active {
            playback.phase = PlayerPhase::AwaitingHandshake;
        }
        warn!(guild = self.guild_id, "node removed, waiting for the next voice event");
    }

    fn update_state(&self, state: &PlayerState) {
        let mut playback = self.playback.write();
        playback.position = state.position;
        playback.sampled_at = state.time;
        playback.ping = state.ping;
        playback.node_connected = state.connected;
    }

    fn handle_event(&self, event: &TrackEvent) {
        match event {
            TrackEvent::TrackStart(start) => {
                debug!(guild = self.guild_id, track = %start.track.title(), "track started");
                self.playback.write().current = Some(start.track.clone());
            }
            TrackEvent::TrackEnd(end) => {
                debug!(guild = self.guild_id, track = %end.track.title(), reason = ?end.reason, "track ended");
                if end.reason == TrackEndReason::Replaced {
                    return;
                }
                let mut playback = self.playback.write();
                if playback
                    .current
                    .as_ref()
                    .is_some_and(|current| current.encoded == end.track.encoded)
                {
                    playback.current = None;
                }
            }
            TrackEvent::TrackException(failure) => warn!(
                guild = self.guild_id,
                track = %failure.track.title(),
                severity = %failure.exception.severity,
                "track exception: {}",
                failure.exception.message.as_deref().unwrap_or("unknown error")
            ),
            TrackEvent::TrackStuck(stuck) => warn!(
                guild = self.guild_id,
                track = %stuck.track.title(),
                threshold_ms = stuck.threshold_ms,
                "track stuck"
            ),
            TrackEvent::WebSocketClosed(closed) => warn!(
                guild = self.guild_id,
                code = closed.code,
                by_remote = closed.by_remote,
                "node voice connection closed: {}",
                closed.reason
            ),
        }
    }

    async fn resync(&self) {
        let mut session = self.session.lock().await;
        session.dispatched = None;
        if let Err(e) = self.dispatch(&mut session).await {
            warn!(guild = self.guild_id, error = %e, "failed to resend voice credentials");
            return;
        }

        let snapshot = self.playback.read().clone();
        if !snapshot.is_active() {
            return;
        }
        let Some(track) = snapshot.current.clone() else {
            return;
        };

        let update = PlayerUpdate {
            track: Some(Some(track)),
            position: Some(snapshot.position_at(now_millis())),
            volume: Some(snapshot.volume),
            paused: Some(snapshot.paused),
            filter: (!session.filters.is_empty()).then(|| session.filters.combined()),
            replace: true,
            ..PlayerUpdate::default()
        };
        match self.apply(&session, update).await {
            Ok(()) => info!("♻️ Player for guild {} restored", self.guild_id),
            Err(e) => warn!(guild = self.guild_id, error = %e, "failed to restore playback"),
        }
    }
}

#[async_trait]
impl VoiceProtocol for Player {
    async fn on_session_id(&self, session_id: String) -> Result<()> {
        self.shared.on_session_id(session_id).await
    }

    async fn on_server_update(&self, server: VoiceServer) -> Result<()> {
        self.shared.on_server_update(server).await
    }

    async fn connect(&self, options: ConnectOptions) -> Result<()> {
        self.shared.connect(options).await
    }

    async fn disconnect(&self, force: bool) {
        self.shared.disconnect(force).await
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.shared.guild_id)
            .field("channel", &self.shared.channel.id)
            .field("phase", &self.phase())
            .finish()
    }
}
