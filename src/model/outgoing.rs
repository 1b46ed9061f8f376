use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// Body of `PATCH /v4/sessions/{session}/players/{guild}`.
///
/// Every `None` field is omitted so the node leaves that part of the player
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdateTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// `Some(None)` clears a previously set end time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

impl UpdatePlayer {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `encoded: null` stops the current track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateTrack {
    pub encoded: Option<String>,
}

/// Voice credentials forwarded from the Discord gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct ResumeConfig {
    pub resuming: bool,
    /// Seconds the node keeps the session alive after a disconnect.
    pub timeout: u64,
}

/// Error body returned by the node's REST API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: Option<String>,
    pub path: String,
}

impl ErrorBody {
    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{} ({}): {}", self.error, self.path, message),
            None => format!("{} ({})", self.error, self.path),
        }
    }
}
