use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no PKCE code verifier available; start the login again")]
    MissingVerifier,
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("no refresh token cached; log in again")]
    NoRefreshToken,
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("failed to contact the token endpoint: {0}")]
    Network(#[from] reqwest::Error),
}
