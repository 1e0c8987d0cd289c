use anyhow::Result;
use serde::Deserialize;
use url::Url;

use super::error::AuthError;

pub const SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "streaming",
    "user-read-email",
    "user-read-private",
];

/// Body of a successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub fn token_url(accounts_base: &str) -> String {
    format!("{}/api/token", accounts_base.trim_end_matches('/'))
}

/// Authorization URL for the PKCE flow. The consent dialog is always shown so
/// the user can switch accounts.
pub fn authorization_url(
    accounts_base: &str,
    client_id: &str,
    redirect_uri: &str,
    challenge: &str,
    state: &str,
) -> Result<Url> {
    let scope = SCOPES.join(" ");
    let url = Url::parse_with_params(
        &format!("{}/authorize", accounts_base.trim_end_matches('/')),
        &[
            ("response_type", "code"),
            ("client_id", client_id),
            ("scope", scope.as_str()),
            ("redirect_uri", redirect_uri),
            ("code_challenge_method", "S256"),
            ("code_challenge", challenge),
            ("state", state),
            ("show_dialog", "true"),
        ],
    )?;
    Ok(url)
}

/// POST a form-encoded grant to the token endpoint.
///
/// `basic` switches to confidential-client authentication.
pub async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
    basic: Option<(&str, &str)>,
) -> Result<TokenResponse, AuthError> {
    let mut req = http.post(token_url).form(form);
    if let Some((id, secret)) = basic {
        req = req.basic_auth(id, Some(secret));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::Rejected { status, body });
    }

    Ok(resp.json().await?)
}
