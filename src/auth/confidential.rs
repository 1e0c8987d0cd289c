//! Secret-bearing authorization-code and refresh grants.
//!
//! This is for server-side integrations that can keep a client secret. It is
//! unrelated to the desktop PKCE session and shares no state with it.

use std::time::Duration;

use serde::Serialize;

use super::error::AuthError;
use super::oauth;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

pub struct ConfidentialClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ConfidentialClient {
    pub fn new(
        accounts_base: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<Self, AuthError> {
        if client_id.is_empty() {
            return Err(AuthError::MissingCredentials("client id"));
        }
        let client_secret = client_secret
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingCredentials(
                "client secret (set auth.client_secret or SPOTIFY_CLIENT_SECRET)",
            ))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            token_url: oauth::token_url(accounts_base),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        Self::new(
            &config.api.accounts_base,
            &config.auth.client_id,
            config.auth.client_secret.as_deref(),
        )
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AuthError> {
        let resp = oauth::request_token(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
            Some((self.client_id.as_str(), self.client_secret.as_str())),
        )
        .await?;
        Ok(grant(resp))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let resp = oauth::request_token(
            &self.http,
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            Some((self.client_id.as_str(), self.client_secret.as_str())),
        )
        .await?;
        Ok(grant(resp))
    }
}

fn grant(resp: oauth::TokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_in: resp.expires_in,
    }
}
