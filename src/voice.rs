//! The seam between a Discord library and the player.
//!
//! The host library implements [`VoiceGateway`] so a player can ask it to
//! join or leave a channel, and forwards the two voice handshake fragments to
//! the player through [`VoiceProtocol`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Stage,
    Text,
    Category,
    Other,
}

impl ChannelKind {
    pub fn carries_voice(&self) -> bool {
        matches!(self, ChannelKind::Voice | ChannelKind::Stage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceChannel {
    pub id: u64,
    pub guild_id: u64,
    pub kind: ChannelKind,
}

impl VoiceChannel {
    pub fn new(id: u64, guild_id: u64, kind: ChannelKind) -> Self {
        Self { id, guild_id, kind }
    }
}

/// The voice server descriptor from a `VOICE_SERVER_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceServer {
    /// `region1234.discord.media:443`
    pub endpoint: String,
    pub token: String,
}

impl VoiceServer {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// How long the host may take to accept the join.
    pub timeout: Duration,
    /// Passed through to hosts that can rejoin on their own.
    pub reconnect: bool,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            reconnect: true,
            self_mute: false,
            self_deaf: false,
        }
    }
}

/// Implemented by the host Discord library.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Identifies the host library, used when negotiating between several.
    fn name(&self) -> String;

    /// Whether this gateway can drive players. Hosts that only partially
    /// support voice return `false`.
    fn is_compatible(&self) -> bool {
        true
    }

    /// Sends a voice state update; `channel_id: None` leaves the channel.
    async fn update_voice_state(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()>;
}

/// Implemented by players; the host calls into it.
#[async_trait]
pub trait VoiceProtocol: Send + Sync {
    /// The host's voice session id for the bot user changed.
    async fn on_session_id(&self, session_id: String) -> Result<()>;

    async fn on_server_update(&self, server: VoiceServer) -> Result<()>;

    async fn connect(&self, options: ConnectOptions) -> Result<()>;

    /// Leaves the channel. Never fails; gateway errors are logged.
    async fn disconnect(&self, force: bool);
}

/// Picks the voice gateway a pool should bind to.
pub struct HostBinding;

impl HostBinding {
    /// Exactly one candidate must be compatible. With `ignore_check` the
    /// first candidate wins regardless.
    pub fn negotiate(
        candidates: Vec<Arc<dyn VoiceGateway>>,
        ignore_check: bool,
    ) -> Result<Arc<dyn VoiceGateway>> {
        if ignore_check {
            let first = candidates.into_iter().next().ok_or(Error::NoCompatibleHost)?;
            warn!(host = %first.name(), "skipping host compatibility check");
            return Ok(first);
        }

        let mut compatible: Vec<_> = candidates
            .into_iter()
            .filter(|gateway| gateway.is_compatible())
            .collect();

        match compatible.len() {
            0 => Err(Error::NoCompatibleHost),
            1 => {
                let gateway = compatible.remove(0);
                debug!(host = %gateway.name(), "voice gateway selected");
                Ok(gateway)
            }
            _ => Err(Error::MultipleCompatibleHosts(
                compatible.iter().map(|gateway| gateway.name()).collect(),
            )),
        }
    }
}
