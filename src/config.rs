use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_REDIRECT_PORT: u16 = 3004;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// How often the player state is polled while authenticated.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait between restarting the last track and applying a transition.
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            restart_settle_ms: default_restart_settle_ms(),
            login_timeout_secs: default_login_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_restart_settle_ms() -> u64 {
    1000
}
fn default_login_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Public client id of the Spotify app.
    #[serde(default)]
    pub client_id: String,
    /// Only used by the confidential-client grant commands.
    pub client_secret: Option<String>,
    /// Port of the loopback bridge; also fixes the redirect URI.
    pub redirect_port: Option<u16>,
    /// Custom path for the persistent token file
    pub token_path: Option<PathBuf>,
}

impl AuthConfig {
    pub fn port(&self) -> u16 {
        self.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT)
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_accounts_base")]
    pub accounts_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            accounts_base: default_accounts_base(),
            api_base: default_api_base(),
        }
    }
}

fn default_accounts_base() -> String {
    "https://accounts.spotify.com".into()
}
fn default_api_base() -> String {
    "https://api.spotify.com/v1".into()
}

/// Client id baked in at build time (see build.rs), if any.
pub fn builtin_client_id() -> Option<&'static str> {
    option_env!("SPOTIFY_CLIENT_ID").filter(|s| !s.is_empty())
}

pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("minispot").join("config.toml"))
}

/// Load the config file, apply environment overrides and validate.
///
/// A missing file at the default location is not an error: everything has a
/// default except the client id, which can come from the environment or the
/// build.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path()?, false),
    };

    let mut config = if explicit || path.exists() {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config file: {}\n\
                 See config/minispot.example.toml for an example.",
                path.display()
            )
        })?;
        parse_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };

    apply_env(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Environment wins over the file; the baked-in id is the last resort.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(id) = lookup("SPOTIFY_CLIENT_ID").filter(|s| !s.is_empty()) {
        config.auth.client_id = id;
    }
    if let Some(secret) = lookup("SPOTIFY_CLIENT_SECRET").filter(|s| !s.is_empty()) {
        config.auth.client_secret = Some(secret);
    }
    if config.auth.client_id.is_empty()
        && let Some(id) = builtin_client_id()
    {
        config.auth.client_id = id.to_string();
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.auth.client_id.trim().is_empty() {
        return Err(crate::auth::AuthError::MissingCredentials(
            "auth.client_id is empty (set it in the config file or SPOTIFY_CLIENT_ID)",
        )
        .into());
    }
    if config.general.poll_interval_ms == 0 {
        anyhow::bail!("general.poll_interval_ms must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_minimal_file() {
        let cfg = parse_config("[auth]\nclient_id = \"abc\"\n").unwrap();
        assert_eq!(cfg.auth.client_id, "abc");
        assert_eq!(cfg.general.poll_interval_ms, 1000);
        assert_eq!(cfg.general.restart_settle_ms, 1000);
        assert_eq!(cfg.api.accounts_base, "https://accounts.spotify.com");
        assert_eq!(cfg.api.api_base, "https://api.spotify.com/v1");
        assert!(cfg.auth.client_secret.is_none());
    }

    #[test]
    fn redirect_uri_follows_port() {
        let mut cfg = Config::default();
        assert_eq!(cfg.auth.redirect_uri(), "http://127.0.0.1:3004/callback");
        cfg.auth.redirect_port = Some(4100);
        assert_eq!(cfg.auth.redirect_uri(), "http://127.0.0.1:4100/callback");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = parse_config("[auth]\nclient_id = \"from-file\"\n").unwrap();
        apply_env(&mut cfg, |key| match key {
            "SPOTIFY_CLIENT_ID" => Some("from-env".into()),
            "SPOTIFY_CLIENT_SECRET" => Some("shh".into()),
            _ => None,
        });
        assert_eq!(cfg.auth.client_id, "from-env");
        assert_eq!(cfg.auth.client_secret.as_deref(), Some("shh"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = parse_config("[auth]\nclient_id = \"from-file\"\n").unwrap();
        apply_env(&mut cfg, |_| Some(String::new()));
        assert_eq!(cfg.auth.client_id, "from-file");
        assert!(cfg.auth.client_secret.is_none());
    }

    #[test]
    fn missing_client_id_fails_validation() {
        let cfg = Config::default();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("client_id"), "{err:#}");
        assert!(matches!(
            err.downcast_ref::<crate::auth::AuthError>(),
            Some(crate::auth::AuthError::MissingCredentials(_))
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut cfg = parse_config("[auth]\nclient_id = \"abc\"\n").unwrap();
        cfg.general.poll_interval_ms = 0;
        assert!(validate(&cfg).is_err());
    }
}
