pub mod confidential;
mod error;
pub mod login;
mod oauth;
pub mod pkce;
mod token_store;

pub use error::AuthError;
pub use login::{run_login_flow, spawn_stdin_reader};
pub use token_store::{ProcessChannel, TokenChannel, TokenPair, TokenStore, resolve_token_path};

use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use url::Url;

use crate::config::Config;
use pkce::PkceSession;

/// Where the session is in the login lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    AwaitingRedirect,
    ExchangingCode,
    Authenticated,
    RefreshPending,
}

/// Public-client settings for the PKCE flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub accounts_base: String,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.auth.client_id.clone(),
            redirect_uri: config.auth.redirect_uri(),
            accounts_base: config.api.accounts_base.clone(),
        }
    }
}

/// One authenticated (or not yet authenticated) user session.
///
/// Built once at startup and shared by `Arc`; `logout` resets it to `Idle`
/// rather than dropping it.
pub struct Session {
    settings: AuthSettings,
    store: TokenStore,
    http: reqwest::Client,
    phase: Mutex<AuthPhase>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(settings: AuthSettings, store: TokenStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            settings,
            store,
            http,
            phase: Mutex::new(AuthPhase::Idle),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn phase(&self) -> AuthPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, next: AuthPhase) {
        let mut phase = self.phase.lock();
        if *phase != next {
            tracing::debug!(from = ?*phase, to = ?next, "auth phase");
            *phase = next;
        }
    }

    /// Reload tokens from storage. Returns whether the session is usable.
    pub async fn load(&self) -> bool {
        let found = self.store.load().await.is_some();
        match (found, self.phase()) {
            (true, _) => self.set_phase(AuthPhase::Authenticated),
            (false, AuthPhase::Authenticated | AuthPhase::RefreshPending) => {
                self.set_phase(AuthPhase::Idle)
            }
            (false, _) => {}
        }
        found
    }

    /// Accept tokens another party stored since `baseline` was read, and
    /// write them through to every channel. Returns whether a new pair was
    /// adopted.
    pub async fn adopt_stored_tokens(&self, baseline: Option<&TokenPair>) -> bool {
        let Some(pair) = self.store.load().await else {
            return false;
        };
        if baseline == Some(&pair) {
            return false;
        }
        self.store.save(&pair).await;
        self.store.clear_verifier().await;
        self.set_phase(AuthPhase::Authenticated);
        true
    }

    /// Cheap check that never awaits; see `TokenStore::is_authenticated_sync`.
    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated_sync()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// Start a login attempt with a fresh PKCE session.
    pub async fn build_authorization_url(&self) -> Result<Url> {
        let pkce = PkceSession::new();
        self.store.save_verifier(&pkce.code_verifier).await;

        let url = oauth::authorization_url(
            &self.settings.accounts_base,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            &pkce.challenge(),
            &pkce.state,
        )?;
        self.set_phase(AuthPhase::AwaitingRedirect);
        Ok(url)
    }

    /// Memory first, then the store's verifier slot, then the `state` envelope.
    async fn resolve_verifier(&self, state: Option<&str>) -> Option<String> {
        if let Some(v) = self.store.cached_verifier() {
            return Some(v);
        }
        if let Some(v) = self.store.load_verifier().await {
            tracing::debug!("code verifier recovered from storage");
            return Some(v);
        }
        let v = pkce::decode_state(state?)?;
        tracing::info!("code verifier recovered from state parameter");
        self.store.save_verifier(&v).await;
        Some(v)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// On any failure the phase is left as it was so the caller can retry or
    /// start over.
    pub async fn exchange_code(&self, code: &str, state: Option<&str>) -> Result<(), AuthError> {
        let Some(verifier) = self.resolve_verifier(state).await else {
            tracing::error!("no code verifier found, cannot exchange code");
            return Err(AuthError::MissingVerifier);
        };

        let previous = self.phase();
        self.set_phase(AuthPhase::ExchangingCode);

        let result = oauth::request_token(
            &self.http,
            &oauth::token_url(&self.settings.accounts_base),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("client_id", self.settings.client_id.as_str()),
                ("code_verifier", verifier.as_str()),
            ],
            None,
        )
        .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "token exchange failed");
                self.set_phase(previous);
                return Err(e);
            }
        };

        let Some(refresh_token) = resp.refresh_token else {
            tracing::error!("token exchange returned no refresh token");
            self.set_phase(previous);
            return Err(AuthError::NoRefreshToken);
        };

        self.store
            .save(&TokenPair {
                access_token: resp.access_token,
                refresh_token,
            })
            .await;
        self.store.clear_verifier().await;
        self.set_phase(AuthPhase::Authenticated);
        tracing::info!("authorization code exchanged, tokens stored");
        Ok(())
    }

    /// Mint a new access token from the cached refresh token.
    ///
    /// An error here means the session cannot be repaired without logging in
    /// again.
    pub async fn refresh_access_token(&self) -> Result<(), AuthError> {
        let Some(current_refresh) = self.store.refresh_token() else {
            tracing::error!("no refresh token available");
            return Err(AuthError::NoRefreshToken);
        };

        let previous = self.phase();
        self.set_phase(AuthPhase::RefreshPending);

        let result = oauth::request_token(
            &self.http,
            &oauth::token_url(&self.settings.accounts_base),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", current_refresh.as_str()),
                ("client_id", self.settings.client_id.as_str()),
            ],
            None,
        )
        .await;

        match result {
            Ok(resp) => {
                // Spotify only sometimes rotates the refresh token.
                let refresh_token = resp.refresh_token.unwrap_or(current_refresh);
                self.store
                    .save(&TokenPair {
                        access_token: resp.access_token,
                        refresh_token,
                    })
                    .await;
                self.set_phase(AuthPhase::Authenticated);
                tracing::debug!("access token refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.set_phase(previous);
                Err(e)
            }
        }
    }

    /// Refresh after the API rejected `rejected`, unless a concurrent caller
    /// already replaced it while this one waited for the gate.
    pub async fn refresh_rejected(&self, rejected: &str) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;
        if self.access_token().is_some_and(|current| current != rejected) {
            tracing::debug!("access token already refreshed by a concurrent request");
            return Ok(());
        }
        self.refresh_access_token().await
    }

    /// Forget all credentials in every channel.
    pub async fn logout(&self) {
        self.store.clear().await;
        self.store.clear_verifier().await;
        self.set_phase(AuthPhase::Idle);
        tracing::info!("session cleared");
    }
}
