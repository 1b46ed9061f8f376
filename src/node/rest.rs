use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::{ConnectionState, Node};
use crate::model::outgoing::{ErrorBody, ResumeConfig};
use crate::model::track::LoadResult;
use crate::model::{
    NodeInfo, RoutePlannerStatus, SearchResult, SearchType, UpdatePlayer, VoiceState,
};
use crate::voice::VoiceServer;
use crate::{Error, Result};

impl Node {
    /// Patches the node-side player for `guild_id`.
    ///
    /// With `no_replace` set, a `track` in the update is ignored if something
    /// is already playing.
    pub async fn update_player(
        &self,
        guild_id: u64,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<()> {
        let session = self.active_session()?;
        let mut url = self.endpoint(&format!("sessions/{session}/players/{guild_id}"))?;
        url.query_pairs_mut()
            .append_pair("noReplace", if no_replace { "true" } else { "false" });

        let body = self.options.codec.encode(update)?;
        self.request(Method::PATCH, url, Some(body)).await?;
        debug!(node = %self.label(), guild = guild_id, "player updated");
        Ok(())
    }

    /// Forwards voice credentials. Sending the same credentials twice for a
    /// guild results in a single request.
    pub async fn send_voice_update(
        &self,
        guild_id: u64,
        session_id: &str,
        server: &VoiceServer,
    ) -> Result<()> {
        let voice = VoiceState {
            token: server.token.clone(),
            endpoint: server.endpoint.clone(),
            session_id: session_id.to_string(),
        };

        if self
            .voice_sent
            .get(&guild_id)
            .is_some_and(|sent| *sent == voice)
        {
            debug!(node = %self.label(), guild = guild_id, "voice credentials unchanged");
            return Ok(());
        }

        let update = UpdatePlayer {
            voice: Some(voice.clone()),
            ..UpdatePlayer::default()
        };
        self.update_player(guild_id, &update, true).await?;
        self.voice_sent.insert(guild_id, voice);
        Ok(())
    }

    /// Removes the node-side player. A player the node never had counts as
    /// destroyed.
    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        self.voice_sent.remove(&guild_id);

        let session = self.active_session()?;
        let url = self.endpoint(&format!("sessions/{session}/players/{guild_id}"))?;
        match self.request(Method::DELETE, url, None).await {
            Ok(_) => Ok(()),
            Err(Error::Remote { status: 404, .. }) => {
                debug!(node = %self.label(), guild = guild_id, "player already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn search(&self, query: &str, search_type: &SearchType) -> Result<SearchResult> {
        self.load_tracks(&search_type.identifier(query)).await
    }

    /// Resolves a raw identifier, such as a URL or `ytsearch:query`.
    pub async fn load_tracks(&self, identifier: &str) -> Result<SearchResult> {
        self.ensure_connected()?;

        let mut url = self.endpoint("loadtracks")?;
        url.query_pairs_mut().append_pair("identifier", identifier);

        let result: LoadResult = self.get_json(url).await?;
        let result = result.into_search_result();
        if let Err(e) = &result {
            warn!(node = %self.label(), identifier, error = %e, "track load failed");
        }
        result
    }

    pub async fn info(&self) -> Result<NodeInfo> {
        self.ensure_connected()?;
        self.get_json(self.endpoint("info")?).await
    }

    pub async fn route_planner_status(&self) -> Result<RoutePlannerStatus> {
        self.ensure_connected()?;

        let response = self
            .request(Method::GET, self.endpoint("routeplanner/status")?, None)
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(RoutePlannerStatus {
                kind: None,
                details: None,
            });
        }
        let text = response.text().await?;
        self.options.codec.decode(&text)
    }

    /// Asks the node to hold our players for `resume_timeout` after a
    /// disconnect.
    pub(crate) async fn configure_resuming(&self) -> Result<()> {
        let session = self.active_session()?;
        let url = self.endpoint(&format!("sessions/{session}"))?;
        let body = self.options.codec.encode(&ResumeConfig {
            resuming: true,
            timeout: self.options.resume_timeout.as_secs(),
        })?;
        self.request(Method::PATCH, url, Some(body)).await?;
        debug!(node = %self.label(), "session resuming enabled");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state() != ConnectionState::Connected {
            return Err(Error::NodeUnavailable(self.label().to_string()));
        }
        Ok(())
    }

    fn active_session(&self) -> Result<String> {
        self.ensure_connected()?;
        self.session_id()
            .ok_or_else(|| Error::NodeUnavailable(self.label().to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.rest_url.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let text = self.request(Method::GET, url, None).await?.text().await?;
        self.options.codec.decode(&text)
    }

    async fn request(&self, method: Method, url: Url, body: Option<String>) -> Result<Response> {
        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", &self.options.password);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = self
            .options
            .codec
            .decode::<ErrorBody>(&text)
            .map(|body| body.describe())
            .unwrap_or(text);
        Err(Error::Remote {
            status: status.as_u16(),
            message,
        })
    }
}
