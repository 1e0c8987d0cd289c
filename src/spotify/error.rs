use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not logged in")]
    Unauthenticated,
    #[error("access token could not be refreshed; log in again")]
    TokenRefreshFailed,
    #[error("request to the Spotify API failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Spotify API error ({status}): {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response from the Spotify API: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request body cannot be replayed after a token refresh")]
    NotReplayable,
}

impl ApiError {
    /// True when the session is gone and the user has to log in again.
    pub fn is_auth_lost(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::TokenRefreshFailed)
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error object returned by the Web API: `{"error": {"status": 404, "message": "..."}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyApiError {
    pub error: SpotifyErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyErrorDetail {
    pub status: Option<u16>,
    pub message: Option<String>,
    /// Set on player endpoints, e.g. `NO_ACTIVE_DEVICE`.
    #[serde(default)]
    pub reason: Option<String>,
}

impl std::fmt::Display for SpotifyApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (reason: {})",
            self.error.message.as_deref().unwrap_or("unknown"),
            self.error.reason.as_deref().unwrap_or("none"),
        )
    }
}
