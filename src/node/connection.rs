use futures::StreamExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::backoff::Backoff;
use super::{ConnectionState, Node, CLIENT_NAME};
use crate::model::{IncomingMessage, Ready};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl Node {
    /// Opens the websocket and waits for the node's `ready` frame.
    ///
    /// Calling this on a node that already has a live connection task is a
    /// no-op. If the socket opens but `ready` does not arrive in time the
    /// error is returned while the task keeps retrying in the background.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.ensure_open()?;

        if self
            .task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return Ok(());
        }

        info!(
            "🔗 Connecting to node {} at {}",
            self.label(),
            self.websocket_url
        );
        self.set_state(ConnectionState::Connecting);

        let socket = match self.open_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut state = self.state.subscribe();
        let node = Arc::clone(self);
        *self.task.lock() = Some(tokio::spawn(node.run(socket)));

        let ready = state.wait_for(|s| {
            matches!(s, ConnectionState::Connected | ConnectionState::Closed)
        });
        let outcome = match timeout(self.options.timeout, ready).await {
            Ok(Ok(s)) if *s == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(Error::NodeClosed(self.label().to_string())),
            Err(_) => {
                warn!(node = %self.label(), "no ready frame within {:?}", self.options.timeout);
                Err(Error::NodeUnavailable(self.label().to_string()))
            }
        };
        outcome
    }

    async fn open_socket(&self) -> Result<Socket> {
        let mut request = self.websocket_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.options.password)?);
        headers.insert("User-Id", header_value(&self.user_id.to_string())?);
        headers.insert("Client-Name", header_value(CLIENT_NAME)?);
        if let Some(session_id) = self.session_id() {
            headers.insert("Session-Id", header_value(&session_id)?);
        }

        let (socket, _) = timeout(self.options.timeout, connect_async(request))
            .await
            .map_err(|_| Error::NodeUnavailable(self.label().to_string()))??;
        Ok(socket)
    }

    async fn run(self: Arc<Self>, mut socket: Socket) {
        let mut backoff = Backoff::new(self.options.backoff);

        loop {
            match self.listen(&mut socket, &mut backoff).await {
                Ok(()) => debug!(node = %self.label(), "websocket closed"),
                Err(e) => warn!(node = %self.label(), error = %e, "websocket failed"),
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            socket = match self.reconnect(&mut backoff).await {
                Some(socket) => socket,
                None => break,
            };
        }

        self.set_state(ConnectionState::Closed);
    }

    /// Retries until a socket opens or the node is closed.
    async fn reconnect(&self, backoff: &mut Backoff) -> Option<Socket> {
        loop {
            let delay = backoff.next_delay();
            warn!(
                "🔄 Reconnecting to node {} in {:.1?} (attempt {})",
                self.label(),
                delay,
                backoff.attempts()
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = sleep(delay) => {}
            }

            match self.open_socket().await {
                Ok(socket) => return Some(socket),
                Err(e) => debug!(node = %self.label(), error = %e, "reconnect attempt failed"),
            }
        }
    }

    async fn listen(self: &Arc<Self>, socket: &mut Socket, backoff: &mut Backoff) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    if let Err(e) = socket.close(None).await {
                        debug!(node = %self.label(), error = %e, "close handshake failed");
                    }
                    return Ok(());
                }
                message = socket.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text, backoff),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_frame(text, backoff),
                    Err(_) => debug!(node = %self.label(), "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(node = %self.label(), ?frame, "node closed the websocket");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, text: &str, backoff: &mut Backoff) {
        let message: IncomingMessage = match self.options.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(node = %self.label(), error = %e, "unrecognised frame: {}", text);
                return;
            }
        };

        match message {
            IncomingMessage::Ready(ready) => {
                backoff.reset();
                self.handle_ready(ready);
            }
            IncomingMessage::PlayerUpdate(update) => match self.player(update.guild_id) {
                Some(player) => player.update_state(&update.state),
                None => trace!(node = %self.label(), guild = update.guild_id, "update for unknown player"),
            },
            IncomingMessage::Stats(stats) => {
                trace!(node = %self.label(), players = stats.players, load = stats.load(), "stats");
                *self.stats.write() = Some(stats);
            }
            IncomingMessage::Event(event) => {
                if let Some(player) = self.player(event.guild_id()) {
                    player.handle_event(&event);
                }
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
        }
    }

    fn handle_ready(self: &Arc<Self>, ready: Ready) {
        let previous = self.session_id.write().replace(ready.session_id.clone());
        self.set_state(ConnectionState::Connected);

        if ready.resumed {
            info!("✅ Node {} resumed session {}", self.label(), ready.session_id);
        } else {
            info!("✅ Node {} ready with session {}", self.label(), ready.session_id);
            if previous.is_some() {
                self.resync_players();
            }
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = node.configure_resuming().await {
                warn!(node = %node.label(), error = %e, "failed to enable session resuming");
            }
        });
    }

    /// The node started a fresh session, so nothing it knew about our
    /// players survives.
    pub(crate) fn resync_players(&self) {
        self.voice_sent.clear();

        let mut stale = Vec::new();
        let mut live = Vec::new();
        for entry in self.players.iter() {
            match entry.value().upgrade() {
                Some(player) => live.push(player),
                None => stale.push(*entry.key()),
            }
        }
        for guild_id in stale {
            self.players.remove(&guild_id);
        }

        warn!(
            "⚠️ Node {} could not resume, resynchronising {} players",
            self.label(),
            live.len()
        );
        for player in live {
            tokio::spawn(async move { player.resync().await });
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("invalid header value: {e}")))
}
