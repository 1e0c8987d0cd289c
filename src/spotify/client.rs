use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use super::error::{ApiError, SpotifyApiError};
use crate::auth::Session;

pub struct SpotifyClient {
    http: reqwest::Client,
    session: Arc<Session>,
    api_base: String,
}

impl SpotifyClient {
    pub fn new(session: Arc<Session>, api_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            session,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Build an authenticated request to the Web API.
    pub fn request(&self, method: Method, path: &str) -> AuthenticatedRequest<'_> {
        let url = format!("{}{path}", self.api_base);
        AuthenticatedRequest {
            client: self,
            builder: self.http.request(method.clone(), &url),
            method,
        }
    }
}

/// Helper that attaches the bearer token and sends with one refresh-retry.
pub struct AuthenticatedRequest<'a> {
    client: &'a SpotifyClient,
    builder: RequestBuilder,
    method: Method,
}

impl AuthenticatedRequest<'_> {
    pub fn query(mut self, params: &[(&str, &str)]) -> Self {
        self.builder = self.builder.query(params);
        self
    }

    pub fn json<T: serde::Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.builder = self.builder.json(body);
        self
    }

    /// Send the request; any non-2xx status becomes [`ApiError::Status`].
    pub async fn send(self) -> Result<Response, ApiError> {
        let builder = self.builder;
        let method = self.method;
        let resp = with_refresh_retry(&self.client.session, |token| {
            let attempt = builder.try_clone();
            async move {
                let builder = attempt.ok_or(ApiError::NotReplayable)?;
                Ok(builder.bearer_auth(token).send().await?)
            }
        })
        .await?;

        tracing::trace!(%method, url = %resp.url().path(), status = %resp.status(), "api response");
        check_status(resp).await
    }
}

/// Send with the cached access token; on 401 refresh exactly once and resend.
///
/// The resent response is returned whatever its status, so a server that
/// keeps answering 401 costs at most two requests and one refresh. A failed
/// refresh logs the session out and yields [`ApiError::TokenRefreshFailed`].
pub async fn with_refresh_retry<F, Fut>(session: &Session, mut send: F) -> Result<Response, ApiError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Response, ApiError>>,
{
    let token = session.access_token().ok_or(ApiError::Unauthenticated)?;
    let resp = send(token.clone()).await?;
    if resp.status() != StatusCode::UNAUTHORIZED {
        return Ok(resp);
    }

    tracing::debug!("access token rejected, refreshing");
    if let Err(e) = session.refresh_rejected(&token).await {
        tracing::warn!(error = %e, "token refresh failed, logging out");
        session.logout().await;
        return Err(ApiError::TokenRefreshFailed);
    }

    let token = session.access_token().ok_or(ApiError::Unauthenticated)?;
    send(token).await
}

pub async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<SpotifyApiError>(&body) {
        Ok(err) => err.to_string(),
        Err(_) if body.is_empty() => status.canonical_reason().unwrap_or("").to_string(),
        Err(_) => body,
    };
    Err(ApiError::Status { status, message })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::tests::memory_session;
    use crate::auth::{AuthPhase, TokenPair};

    async fn client_for(server: &MockServer) -> SpotifyClient {
        let session = memory_session(&server.uri());
        session
            .store()
            .save(&TokenPair {
                access_token: "A1".into(),
                refresh_token: "R1".into(),
            })
            .await;
        session.load().await;
        SpotifyClient::new(Arc::new(session), &format!("{}/v1", server.uri())).unwrap()
    }

    fn profile() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "user-1",
            "display_name": "User One"
        }))
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(profile())
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let user = client.current_user().await.unwrap();

        assert_eq!(user.id, "user-1");
        assert_eq!(client.session().access_token().as_deref(), Some("A2"));
        assert_eq!(client.session().store().refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn second_401_is_returned_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.current_user().await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(!err.is_auth_lost());
        assert_eq!(client.session().access_token().as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn failed_refresh_logs_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.current_user().await.unwrap_err();

        assert!(matches!(err, ApiError::TokenRefreshFailed));
        assert!(err.is_auth_lost());
        assert!(client.session().access_token().is_none());
        assert_eq!(client.session().phase(), AuthPhase::Idle);
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .and(header("authorization", "Bearer A2"))
            .respond_with(profile())
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let (a, b) = tokio::join!(client.current_user(), client.current_user());
        assert_eq!(a.unwrap().id, "user-1");
        assert_eq!(b.unwrap().id, "user-1");
    }

    #[tokio::test]
    async fn no_token_means_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(profile())
            .expect(0)
            .mount(&server)
            .await;

        let session = memory_session(&server.uri());
        let client = SpotifyClient::new(Arc::new(session), &server.uri()).unwrap();
        let err = client.current_user().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    #[tokio::test]
    async fn spotify_error_body_becomes_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/next"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {
                    "status": 404,
                    "message": "Player command failed: No active device found",
                    "reason": "NO_ACTIVE_DEVICE"
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.next().await.unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(message.contains("No active device"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn combinator_sends_at_most_twice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let http = reqwest::Client::new();
        let url = format!("{}/ping", server.uri());
        let mut tokens = Vec::new();

        let resp = with_refresh_retry(client.session(), |token| {
            tokens.push(token.clone());
            let req = http.get(&url).bearer_auth(token);
            async move { Ok(req.send().await?) }
        })
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(tokens, ["A1", "A2"]);
    }
}
