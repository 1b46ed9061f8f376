use thiserror::Error;

/// Errors surfaced by the node pool, node connections and players.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool has no connected node that could take the request.
    #[error("no nodes available")]
    NoNodesAvailable,

    /// The node exists but its connection is not ready for commands.
    #[error("node {0} is not connected")]
    NodeUnavailable(String),

    /// The node was explicitly closed and will not reconnect.
    #[error("node {0} has been closed")]
    NodeClosed(String),

    #[error("a node labelled {0} is already registered")]
    DuplicateNode(String),

    /// A player-mutating call was issued before the voice handshake finished.
    #[error("player is not connected")]
    PlayerNotConnected,

    #[error("player has been destroyed")]
    PlayerDestroyed,

    #[error("no filter labelled {0}")]
    FilterNotFound(String),

    /// The target channel cannot carry voice.
    #[error("channel must be a voice or stage channel")]
    InvalidChannel,

    #[error("timed out waiting for the voice join")]
    JoinTimeout,

    #[error("no compatible voice gateway was provided")]
    NoCompatibleHost,

    #[error("multiple compatible voice gateways were provided: {}", .0.join(", "))]
    MultipleCompatibleHosts(Vec<String>),

    /// The host framework rejected a voice state change.
    #[error("voice gateway error: {0}")]
    Gateway(String),

    /// The node could not load the requested track(s).
    #[error("the track could not be loaded: {message} ({severity} error)")]
    TrackLoad { message: String, severity: String },

    /// A non-success response from the node's REST API.
    #[error("node responded with {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("failed to decode track: {0}")]
    TrackDecode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "simd")]
    #[error(transparent)]
    SimdJson(#[from] simd_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
