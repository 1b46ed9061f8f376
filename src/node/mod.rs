//! A single Lavalink node: one websocket for events, REST for commands.
//!
//! [`Node::connect`] opens the websocket and spawns a task that owns it. The
//! task reconnects with exponential backoff until [`Node::close`] is called,
//! offering the previous session id so the node can resume players it still
//! holds. When the node answers that it could not resume, every registered
//! [`SessionHandle`] is asked to push its voice credentials and playback again.

mod backoff;
mod connection;
mod rest;

pub use backoff::BackoffConfig;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::codec::Codec;
use crate::model::{PlayerState, Stats, TrackEvent, VoiceState};
use crate::{Error, Result};

pub(crate) const CLIENT_NAME: &str = concat!("lavabridge/", env!("CARGO_PKG_VERSION"));

const EVENT_CAPACITY: usize = 256;

/// Where and how to reach a node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Unique name within a pool.
    pub label: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    /// Discord voice region this node serves, e.g. `us` or `eu-west`.
    pub region: Option<String>,
    /// Bound on opening the websocket and on waiting for `ready`.
    pub timeout: Duration,
    /// How long the node should keep players alive while we are away.
    pub resume_timeout: Duration,
    pub backoff: BackoffConfig,
    pub codec: Codec,
}

impl NodeOptions {
    pub fn new(
        label: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            region: None,
            timeout: Duration::from_secs(10),
            resume_timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            codec: Codec::default(),
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into().to_lowercase());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resume_timeout(mut self, timeout: Duration) -> Self {
        self.resume_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    fn rest_url(&self) -> Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Ok(Url::parse(&format!("{scheme}://{}:{}/v4/", self.host, self.port))?)
    }

    fn websocket_url(&self) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        Ok(Url::parse(&format!(
            "{scheme}://{}:{}/v4/websocket",
            self.host, self.port
        ))?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// `ready` received; commands are accepted.
    Connected,
    /// The socket dropped and the node is retrying, possibly resuming.
    Reconnecting,
    /// Closed on request. Terminal.
    Closed,
}

/// What a node needs from a player registered on it.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// The node was removed from its pool; the player must pick another one
    /// on its next voice event.
    fn detach(&self);

    /// A `playerUpdate` frame arrived for this guild.
    fn update_state(&self, state: &PlayerState);

    fn handle_event(&self, event: &TrackEvent);

    /// The node lost its session; voice credentials and playback must be
    /// pushed again.
    async fn resync(&self);
}

pub struct Node {
    options: NodeOptions,
    user_id: u64,
    http: reqwest::Client,
    rest_url: Url,
    websocket_url: Url,
    state: watch::Sender<ConnectionState>,
    session_id: RwLock<Option<String>>,
    stats: RwLock<Option<Stats>>,
    players: DashMap<u64, Weak<dyn SessionHandle>>,
    // Last credentials accepted per guild, so repeats are not re-sent.
    voice_sent: DashMap<u64, VoiceState>,
    events: broadcast::Sender<TrackEvent>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(options: NodeOptions, user_id: u64) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(CLIENT_NAME)
            .build()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        debug!(
            node = %options.label,
            codec = options.codec.name(),
            "node created"
        );

        Ok(Arc::new(Self {
            rest_url: options.rest_url()?,
            websocket_url: options.websocket_url()?,
            options,
            user_id,
            http,
            state,
            session_id: RwLock::new(None),
            stats: RwLock::new(None),
            players: DashMap::new(),
            voice_sent: DashMap::new(),
            events,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }))
    }

    pub fn label(&self) -> &str {
        &self.options.label
    }

    pub fn region(&self) -> Option<&str> {
        self.options.region.as_deref()
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn stats(&self) -> Option<Stats> {
        self.stats.read().clone()
    }

    /// Penalty score used for balancing; lower is better. Zero until the
    /// first stats frame.
    pub fn load(&self) -> u64 {
        self.stats.read().as_ref().map_or(0, Stats::load)
    }

    /// Whether a voice server in `region` should be served by this node.
    ///
    /// `us` serves `us` as well as `us-east`, `us-west` and so on.
    pub fn serves_region(&self, region: &str) -> bool {
        match self.region() {
            Some(own) => {
                region == own
                    || region
                        .strip_prefix(own)
                        .is_some_and(|rest| rest.starts_with('-'))
            }
            None => false,
        }
    }

    /// Track events for every player on this node.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.events.subscribe()
    }

    /// Players still alive on this node. Handles of dropped players are
    /// pruned on the way.
    pub fn player_count(&self) -> usize {
        self.players.retain(|_, handle| handle.strong_count() > 0);
        self.players.len()
    }

    pub fn has_player(&self, guild_id: u64) -> bool {
        self.players
            .get(&guild_id)
            .is_some_and(|handle| handle.strong_count() > 0)
    }

    /// A handle is registered for `guild_id` but its player is gone.
    pub(crate) fn has_dropped_player(&self, guild_id: u64) -> bool {
        self.players
            .get(&guild_id)
            .is_some_and(|handle| handle.strong_count() == 0)
    }

    pub(crate) fn register_player(&self, guild_id: u64, handle: Weak<dyn SessionHandle>) {
        self.players.insert(guild_id, handle);
    }

    pub(crate) fn unregister_player(&self, guild_id: u64) {
        self.players.remove(&guild_id);
        self.voice_sent.remove(&guild_id);
    }

    /// Empties the player registry, returning the players still alive.
    pub(crate) fn take_players(&self) -> Vec<Arc<dyn SessionHandle>> {
        self.voice_sent.clear();
        let guilds: Vec<u64> = self.players.iter().map(|entry| *entry.key()).collect();
        guilds
            .into_iter()
            .filter_map(|guild_id| self.players.remove(&guild_id))
            .filter_map(|(_, handle)| handle.upgrade())
            .collect()
    }

    fn player(&self, guild_id: u64) -> Option<Arc<dyn SessionHandle>> {
        self.players.get(&guild_id).and_then(|handle| handle.upgrade())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(node = %self.label(), ?previous, ?state, "connection state changed");
        }
    }

    /// Stops reconnecting and closes the websocket. Commands fail afterwards.
    pub async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(node = %self.label(), error = %e, "connection task ended abnormally");
            }
        }

        self.set_state(ConnectionState::Closed);
        self.voice_sent.clear();
        info!("🔌 Node {} closed", self.label());
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::NodeClosed(self.label().to_string()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn mark_ready(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
        self.set_state(ConnectionState::Connected);
    }

    #[cfg(test)]
    pub(crate) fn set_stats(&self, stats: Stats) {
        *self.stats.write() = Some(stats);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("label", &self.options.label)
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("region", &self.options.region)
            .field("state", &self.state())
            .field("players", &self.players.len())
            .finish()
    }
}
