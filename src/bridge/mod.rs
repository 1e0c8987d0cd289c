//! Loopback HTTP bridge.
//!
//! The OAuth redirect lands in a real browser, not in this process. The
//! bridge gives that browser a way back in:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /tokens` | store a token pair in the process channel |
//! | `POST /pending-auth` | stage `{code, state}` for the login flow (one-shot) |
//! | `GET /callback` | redirect target; a page that forwards to `/pending-auth` |
//!
//! Only ever bound to 127.0.0.1.

mod pending;

pub use pending::{PendingAuth, PendingAuthSlot};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::auth::{ProcessChannel, TokenChannel, TokenPair};

const CALLBACK_PAGE: &str = include_str!("callback.html");

#[derive(Clone)]
pub struct BridgeState {
    pub tokens: ProcessChannel,
    pub pending: Arc<PendingAuthSlot>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/tokens", post(store_tokens))
        .route("/pending-auth", post(stage_pending_auth))
        .route("/callback", get(callback_page))
        // the callback page may be served from another origin in dev setups
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("could not bind loopback bridge on 127.0.0.1:{port}"))
}

/// Serve the bridge on `listener` until `cancel` fires.
pub fn spawn(listener: TcpListener, state: BridgeState, cancel: CancellationToken) -> JoinHandle<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    tokio::spawn(async move {
        if let Some(addr) = addr {
            tracing::info!(%addr, "loopback bridge listening");
        }
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "loopback bridge terminated");
        }
        tracing::debug!("loopback bridge stopped");
    })
}

async fn store_tokens(
    State(state): State<BridgeState>,
    Json(tokens): Json<TokenPair>,
) -> Json<serde_json::Value> {
    tracing::info!("token pair received from browser");
    if let Err(e) = state.tokens.save_tokens(&tokens).await {
        tracing::error!("failed to store tokens from browser: {e:#}");
        return Json(serde_json::json!({ "success": false, "error": "storage failed" }));
    }
    Json(serde_json::json!({ "success": true }))
}

async fn stage_pending_auth(
    State(state): State<BridgeState>,
    Json(auth): Json<PendingAuth>,
) -> Json<serde_json::Value> {
    tracing::info!(has_state = auth.state.is_some(), "authorization code staged");
    state.pending.put(auth);
    Json(serde_json::json!({ "success": true }))
}

async fn callback_page(Query(params): Query<CallbackParams>) -> Html<&'static str> {
    match &params.error {
        Some(error) => tracing::warn!(%error, "authorization denied in browser"),
        None => tracing::info!(
            has_code = params.code.is_some(),
            has_state = params.state.is_some(),
            "OAuth callback received"
        ),
    }
    Html(CALLBACK_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start() -> (String, BridgeState, CancellationToken) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = BridgeState {
            tokens: ProcessChannel::new(),
            pending: Arc::new(PendingAuthSlot::new()),
        };
        let cancel = CancellationToken::new();
        spawn(listener, state.clone(), cancel.clone());
        (base, state, cancel)
    }

    #[tokio::test]
    async fn pending_auth_is_consumed_once() {
        let (base, state, cancel) = start().await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/pending-auth"))
            .json(&serde_json::json!({ "code": "abc", "state": "s1" }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);

        assert_eq!(
            state.pending.take(),
            Some(PendingAuth {
                code: "abc".into(),
                state: Some("s1".into()),
            })
        );
        assert_eq!(state.pending.take(), None);
        cancel.cancel();
    }

    #[tokio::test]
    async fn posted_tokens_land_in_process_channel() {
        let (base, state, cancel) = start().await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/tokens"))
            .json(&serde_json::json!({ "accessToken": "A1", "refreshToken": "R1" }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        assert_eq!(
            state.tokens.load_tokens().await.unwrap(),
            Some(TokenPair {
                access_token: "A1".into(),
                refresh_token: "R1".into(),
            })
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (base, state, cancel) = start().await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/pending-auth"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert_eq!(state.pending.take(), None);
        cancel.cancel();
    }

    #[tokio::test]
    async fn callback_serves_forwarding_page() {
        let (base, _state, cancel) = start().await;

        let resp = reqwest::get(format!("{base}/callback?code=xyz&state=s1"))
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let html = resp.text().await.unwrap();
        assert!(html.contains("/pending-auth"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (base, _state, cancel) = start().await;
        let resp = reqwest::get(format!("{base}/nope")).await.unwrap();
        assert_eq!(resp.status(), 404);
        cancel.cancel();
    }
}
