use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{Error, Result};

/// A playable track as returned by `loadtracks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque base64 blob the node uses to identify the track.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub plugin_info: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Length in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Length in milliseconds.
    pub fn length(&self) -> u64 {
        self.info.length
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    /// Builds a track from its encoded blob alone, without asking a node.
    pub fn decode(encoded: &str) -> Result<Self> {
        let info = super::decode::decode_track(encoded)?;

        Ok(Self {
            encoded: encoded.to_string(),
            info,
            plugin_info: Value::Null,
            user_data: Value::Null,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, -1 when none is selected.
    pub selected_track: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub plugin_info: Value,
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn selected(&self) -> Option<&Track> {
        usize::try_from(self.info.selected_track)
            .ok()
            .and_then(|index| self.tracks.get(index))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Common => "common",
            Severity::Suspicious => "suspicious",
            Severity::Fault => "fault",
        };
        f.write_str(name)
    }
}

/// Error details reported by the node for a failed load or a track exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

impl From<Exception> for Error {
    fn from(exception: Exception) -> Self {
        Error::TrackLoad {
            message: exception
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
            severity: exception.severity.to_string(),
        }
    }
}

/// Outcome of a search: tracks, a playlist, or an explicit "no matches".
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    Tracks(Vec<Track>),
    Playlist(Playlist),
    NoMatches,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, SearchResult::NoMatches)
    }

    /// Flattens the result into its tracks.
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            SearchResult::Tracks(tracks) => tracks,
            SearchResult::Playlist(playlist) => playlist.tracks,
            SearchResult::NoMatches => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LoadType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

/// Raw `loadtracks` body; `data` depends on `loadType`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoadResult {
    load_type: LoadType,
    #[serde(default)]
    data: Value,
}

impl LoadResult {
    pub(crate) fn into_search_result(self) -> Result<SearchResult> {
        match self.load_type {
            LoadType::Track => Ok(SearchResult::Tracks(vec![serde_json::from_value(self.data)?])),
            LoadType::Search => {
                let tracks: Vec<Track> = serde_json::from_value(self.data)?;
                if tracks.is_empty() {
                    Ok(SearchResult::NoMatches)
                } else {
                    Ok(SearchResult::Tracks(tracks))
                }
            }
            LoadType::Playlist => Ok(SearchResult::Playlist(serde_json::from_value(self.data)?)),
            LoadType::Empty => Ok(SearchResult::NoMatches),
            LoadType::Error => {
                let exception: Exception = serde_json::from_value(self.data)?;
                Err(exception.into())
            }
        }
    }
}

/// Source prefix applied to free-text queries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchType {
    #[default]
    YouTube,
    YouTubeMusic,
    SoundCloud,
    Custom(String),
}

impl SearchType {
    pub fn prefix(&self) -> &str {
        match self {
            SearchType::YouTube => "ytsearch",
            SearchType::YouTubeMusic => "ytmsearch",
            SearchType::SoundCloud => "scsearch",
            SearchType::Custom(prefix) => prefix,
        }
    }

    /// Builds the `identifier` sent to the node. URLs pass through untouched.
    pub fn identifier(&self, query: &str) -> String {
        let query = query.trim();
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("{}:{}", self.prefix(), query)
        }
    }
}

impl From<&str> for SearchType {
    fn from(value: &str) -> Self {
        match value {
            "ytsearch" => SearchType::YouTube,
            "ytmsearch" => SearchType::YouTubeMusic,
            "scsearch" => SearchType::SoundCloud,
            other => SearchType::Custom(other.to_string()),
        }
    }
}
