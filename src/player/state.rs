use crate::filter::FilterChain;
use crate::model::Track;
use crate::voice::VoiceServer;

/// Where a player is in the voice handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerPhase {
    #[default]
    Idle,
    /// A join was requested from the host.
    Joining,
    /// At least one handshake fragment arrived.
    AwaitingHandshake,
    /// Credentials were accepted by a node.
    Active,
}

/// Handshake and node assignment. Guarded by the player's async mutex so
/// interleaved host events are applied one at a time.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub node: Option<String>,
    pub session_id: Option<String>,
    pub server: Option<VoiceServer>,
    /// The last `(session_id, server)` pair a node accepted.
    pub dispatched: Option<(String, VoiceServer)>,
    pub filters: FilterChain,
}

impl Session {
    pub fn has_fragment(&self) -> bool {
        self.session_id.is_some() || self.server.is_some()
    }

    pub fn reset_voice(&mut self) {
        self.session_id = None;
        self.server = None;
        self.dispatched = None;
    }
}

/// Locally cached playback, readable without awaiting.
#[derive(Debug, Clone)]
pub(crate) struct Playback {
    pub phase: PlayerPhase,
    /// Set by a successful join, cleared on disconnect.
    pub connected: bool,
    pub position: u64,
    /// Epoch milliseconds at which `position` was sampled.
    pub sampled_at: i64,
    pub ping: i64,
    /// The node's own voice connection, as last reported.
    pub node_connected: bool,
    pub current: Option<Track>,
    pub volume: u16,
    pub paused: bool,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            phase: PlayerPhase::Idle,
            connected: false,
            position: 0,
            sampled_at: 0,
            ping: -1,
            node_connected: false,
            current: None,
            volume: 100,
            paused: false,
        }
    }
}

impl Playback {
    pub fn is_active(&self) -> bool {
        self.connected && self.phase == PlayerPhase::Active
    }

    /// Position extrapolated to `now`, never past the track's end.
    pub fn position_at(&self, now: i64) -> u64 {
        match &self.current {
            Some(track) if self.phase == PlayerPhase::Active => {
                let elapsed = u64::try_from(now - self.sampled_at).unwrap_or(0);
                self.position.saturating_add(elapsed).min(track.length())
            }
            _ => self.position,
        }
    }

    pub fn seek(&mut self, position: u64, now: i64) {
        self.position = position;
        self.sampled_at = now;
    }
}
