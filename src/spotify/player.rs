use reqwest::{Method, StatusCode};

use super::client::SpotifyClient;
use super::error::ApiError;
use super::types::{Paging, PlaybackState, Playlist, Queue, UserProfile};

impl SpotifyClient {
    /// GET /me/player. `None` when no device is active (204 or empty body).
    pub async fn current_playback(&self) -> Result<Option<PlaybackState>, ApiError> {
        let resp = self.request(Method::GET, "/me/player").send().await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }

    pub async fn queue(&self) -> Result<Queue, ApiError> {
        let resp = self.request(Method::GET, "/me/player/queue").send().await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(Queue::default());
        }
        Ok(resp.json().await?)
    }

    /// Resume on the active device.
    pub async fn play(&self) -> Result<(), ApiError> {
        self.request(Method::PUT, "/me/player/play").send().await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), ApiError> {
        self.request(Method::PUT, "/me/player/pause").send().await?;
        Ok(())
    }

    pub async fn next(&self) -> Result<(), ApiError> {
        self.request(Method::POST, "/me/player/next").send().await?;
        Ok(())
    }

    pub async fn previous(&self) -> Result<(), ApiError> {
        self.request(Method::POST, "/me/player/previous")
            .send()
            .await?;
        Ok(())
    }

    pub async fn seek(&self, position_ms: u64) -> Result<(), ApiError> {
        let position = position_ms.to_string();
        self.request(Method::PUT, "/me/player/seek")
            .query(&[("position_ms", position.as_str())])
            .send()
            .await?;
        Ok(())
    }

    pub async fn set_volume(&self, percent: u8) -> Result<(), ApiError> {
        let percent = percent.min(100).to_string();
        self.request(Method::PUT, "/me/player/volume")
            .query(&[("volume_percent", percent.as_str())])
            .send()
            .await?;
        Ok(())
    }

    /// Start a playlist, album or artist context.
    pub async fn play_context(&self, context_uri: &str) -> Result<(), ApiError> {
        self.request(Method::PUT, "/me/player/play")
            .json(&serde_json::json!({ "context_uri": context_uri }))
            .send()
            .await?;
        Ok(())
    }

    pub async fn play_uris(&self, uris: &[String]) -> Result<(), ApiError> {
        self.request(Method::PUT, "/me/player/play")
            .json(&serde_json::json!({ "uris": uris }))
            .send()
            .await?;
        Ok(())
    }

    /// First page (up to 50) of the user's playlists.
    pub async fn playlists(&self) -> Result<Paging<Playlist>, ApiError> {
        let resp = self
            .request(Method::GET, "/me/playlists")
            .query(&[("limit", "50")])
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        let resp = self.request(Method::GET, "/me").send().await?;
        Ok(resp.json().await?)
    }
}
