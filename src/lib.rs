//! Client for a pool of Lavalink audio nodes.
//!
//! A [`NodePool`] holds websocket connections to one or more nodes and picks
//! the least loaded one for a guild's voice region. A [`Player`] receives
//! the voice handshake from the host Discord library and, once it is
//! complete, drives playback on its node.

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod node;
pub mod player;
pub mod pool;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::Codec;
pub use error::{Error, Result};
pub use filter::{Filter, FilterChain};
pub use model::{SearchResult, SearchType, Track, TrackEvent};
pub use node::{ConnectionState, Node, NodeOptions, SessionHandle};
pub use player::{Player, PlayerPhase, PlayerUpdate};
pub use pool::NodePool;
pub use voice::{
    ChannelKind, ConnectOptions, HostBinding, VoiceChannel, VoiceGateway, VoiceProtocol,
    VoiceServer,
};
