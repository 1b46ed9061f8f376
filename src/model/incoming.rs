use serde::Deserialize;

use super::{snowflake, Exception, Stats, Track};

/// Frames received on a node's websocket, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    Ready(Ready),
    PlayerUpdate(PlayerUpdate),
    Stats(Stats),
    Event(TrackEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    /// Whether the node picked up the previous session.
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub state: PlayerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PlayerState {
    /// Unix timestamp in milliseconds at which the state was sampled.
    pub time: i64,
    #[serde(default)]
    pub position: u64,
    /// Whether the node is connected to the voice gateway.
    pub connected: bool,
    /// Milliseconds, -1 when not connected.
    pub ping: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart(TrackStart),
    #[serde(rename = "TrackEndEvent")]
    TrackEnd(TrackEnd),
    #[serde(rename = "TrackExceptionEvent")]
    TrackException(TrackException),
    #[serde(rename = "TrackStuckEvent")]
    TrackStuck(TrackStuck),
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosed),
}

impl TrackEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            TrackEvent::TrackStart(event) => event.guild_id,
            TrackEvent::TrackEnd(event) => event.guild_id,
            TrackEvent::TrackException(event) => event.guild_id,
            TrackEvent::TrackStuck(event) => event.guild_id,
            TrackEvent::WebSocketClosed(event) => event.guild_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStart {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEnd {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Whether a queue would normally advance after this end.
    pub fn may_start_next(&self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub exception: Exception,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuck {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: Track,
    pub threshold_ms: u64,
}

/// The node's own voice websocket to Discord was closed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::track_json;
    use serde_json::json;

    #[test]
    fn parses_ready() {
        let msg: IncomingMessage =
            serde_json::from_value(json!({"op": "ready", "resumed": true, "sessionId": "abc"}))
                .unwrap();
        match msg {
            IncomingMessage::Ready(ready) => {
                assert!(ready.resumed);
                assert_eq!(ready.session_id, "abc");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_player_update_without_position() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "op": "playerUpdate",
            "guildId": "1234",
            "state": {"time": 1500, "connected": false, "ping": -1}
        }))
        .unwrap();
        match msg {
            IncomingMessage::PlayerUpdate(update) => {
                assert_eq!(update.guild_id, 1234);
                assert_eq!(update.state.position, 0);
                assert_eq!(update.state.ping, -1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_nested_events() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "42",
            "track": track_json("a", 1000),
            "reason": "loadFailed"
        }))
        .unwrap();
        match msg {
            IncomingMessage::Event(TrackEvent::TrackEnd(end)) => {
                assert_eq!(end.guild_id, 42);
                assert_eq!(end.reason, TrackEndReason::LoadFailed);
                assert!(end.reason.may_start_next());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let closed: IncomingMessage = serde_json::from_value(json!({
            "op": "event",
            "type": "WebSocketClosedEvent",
            "guildId": "42",
            "code": 4006,
            "reason": "session no longer valid",
            "byRemote": true
        }))
        .unwrap();
        assert!(matches!(
            closed,
            IncomingMessage::Event(TrackEvent::WebSocketClosed(WebSocketClosed { code: 4006, .. }))
        ));
    }

    #[test]
    fn rejects_unknown_ops() {
        assert!(serde_json::from_value::<IncomingMessage>(json!({"op": "dance"})).is_err());
    }
}
