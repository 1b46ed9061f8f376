//! Wire types exchanged with a Lavalink node.

pub mod decode;
pub mod incoming;
pub mod info;
pub mod outgoing;
pub mod stats;
pub mod track;

pub use incoming::{IncomingMessage, PlayerState, Ready, TrackEndReason, TrackEvent};
pub use info::{NodeInfo, Plugin, RoutePlannerStatus};
pub use outgoing::{UpdatePlayer, VoiceState};
pub use stats::Stats;
pub use track::{Exception, Playlist, SearchResult, SearchType, Severity, Track, TrackInfo};

/// Discord ids travel as strings on the node protocol.
pub(crate) mod snowflake {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
