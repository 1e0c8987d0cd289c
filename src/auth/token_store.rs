use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Access/refresh token pair. Camel-case on the bridge wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// One backing channel of the token store.
#[async_trait]
pub trait TokenChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn load_tokens(&self) -> Result<Option<TokenPair>>;
    async fn save_tokens(&self, tokens: &TokenPair) -> Result<()>;
    async fn clear_tokens(&self) -> Result<()>;

    async fn load_verifier(&self) -> Result<Option<String>>;
    async fn save_verifier(&self, verifier: &str) -> Result<()>;
    async fn clear_verifier(&self) -> Result<()>;

    /// Blocking read for callers that cannot await. Channels that can only be
    /// reached asynchronously return `None`.
    fn load_tokens_sync(&self) -> Option<TokenPair> {
        None
    }
}

#[derive(Debug, Default)]
struct ProcessSlots {
    tokens: Option<TokenPair>,
    verifier: Option<String>,
}

/// In-process channel shared between the session and the loopback bridge.
#[derive(Debug, Clone, Default)]
pub struct ProcessChannel {
    slots: Arc<RwLock<ProcessSlots>>,
}

impl ProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenChannel for ProcessChannel {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn load_tokens(&self) -> Result<Option<TokenPair>> {
        Ok(self.slots.read().await.tokens.clone())
    }

    async fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.slots.write().await.tokens = Some(tokens.clone());
        Ok(())
    }

    async fn clear_tokens(&self) -> Result<()> {
        self.slots.write().await.tokens = None;
        Ok(())
    }

    async fn load_verifier(&self) -> Result<Option<String>> {
        Ok(self.slots.read().await.verifier.clone())
    }

    async fn save_verifier(&self, verifier: &str) -> Result<()> {
        self.slots.write().await.verifier = Some(verifier.to_string());
        Ok(())
    }

    async fn clear_verifier(&self) -> Result<()> {
        self.slots.write().await.verifier = None;
        Ok(())
    }
}

/// On-disk layout of the persistent channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
}

impl PersistedCredentials {
    fn tokens(&self) -> Option<TokenPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some(TokenPair {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            }),
            _ => None,
        }
    }
}

/// Persistent fallback channel: a small JSON file, owner-readable only.
#[derive(Debug, Clone)]
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, f: impl FnOnce(&mut PersistedCredentials)) -> Result<()> {
        let mut creds = read_credentials(&self.path)?;
        f(&mut creds);
        write_credentials(&self.path, &creds)
    }
}

#[async_trait]
impl TokenChannel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load_tokens(&self) -> Result<Option<TokenPair>> {
        Ok(read_credentials(&self.path)?.tokens())
    }

    async fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.update(|c| {
            c.access_token = Some(tokens.access_token.clone());
            c.refresh_token = Some(tokens.refresh_token.clone());
        })
    }

    async fn clear_tokens(&self) -> Result<()> {
        self.update(|c| {
            c.access_token = None;
            c.refresh_token = None;
        })
    }

    async fn load_verifier(&self) -> Result<Option<String>> {
        Ok(read_credentials(&self.path)?.code_verifier)
    }

    async fn save_verifier(&self, verifier: &str) -> Result<()> {
        self.update(|c| c.code_verifier = Some(verifier.to_string()))
    }

    async fn clear_verifier(&self) -> Result<()> {
        self.update(|c| c.code_verifier = None)
    }

    fn load_tokens_sync(&self) -> Option<TokenPair> {
        match read_credentials(&self.path) {
            Ok(c) => c.tokens(),
            Err(e) => {
                tracing::warn!("failed to read token file: {e:#}");
                None
            }
        }
    }
}

pub fn resolve_token_path(custom: Option<&Path>) -> Result<PathBuf> {
    match custom {
        Some(p) => Ok(p.to_path_buf()),
        None => {
            let dir = dirs::data_dir().context("Could not determine data directory")?;
            Ok(dir.join("minispot").join("tokens.json"))
        }
    }
}

/// A missing file reads as empty credentials.
pub fn read_credentials(path: &Path) -> Result<PersistedCredentials> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedCredentials::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read token file: {}", path.display()));
        }
    };
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse token file: {}", path.display()))
}

pub fn write_credentials(path: &Path, creds: &PersistedCredentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(creds)?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write token file: {}", tmp.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to save token file: {}", path.display()))?;

    Ok(())
}

#[derive(Debug, Default)]
struct Cached {
    tokens: Option<TokenPair>,
    verifier: Option<String>,
}

/// Sole owner of the token pair and the PKCE verifier.
///
/// Channels are consulted in priority order on load and all written on save.
/// Writes are best-effort per channel; there is no versioning, the last
/// writer wins.
pub struct TokenStore {
    channels: Vec<Box<dyn TokenChannel>>,
    cache: Mutex<Cached>,
}

impl TokenStore {
    pub fn new(channels: Vec<Box<dyn TokenChannel>>) -> Self {
        Self {
            channels,
            cache: Mutex::new(Cached::default()),
        }
    }

    /// The process channel first, the token file as fallback.
    pub fn desktop(process: ProcessChannel, token_path: PathBuf) -> Self {
        Self::new(vec![Box::new(process), Box::new(FileChannel::new(token_path))])
    }

    pub async fn load(&self) -> Option<TokenPair> {
        for channel in &self.channels {
            match channel.load_tokens().await {
                Ok(Some(tokens)) => {
                    tracing::debug!(channel = channel.name(), "loaded tokens");
                    self.cache.lock().tokens = Some(tokens.clone());
                    return Some(tokens);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(channel = channel.name(), "failed to load tokens: {e:#}");
                }
            }
        }
        tracing::debug!("no tokens in any channel");
        self.cache.lock().tokens = None;
        None
    }

    pub async fn save(&self, tokens: &TokenPair) {
        self.cache.lock().tokens = Some(tokens.clone());
        for channel in &self.channels {
            if let Err(e) = channel.save_tokens(tokens).await {
                tracing::warn!(channel = channel.name(), "failed to store tokens: {e:#}");
            }
        }
    }

    pub async fn clear(&self) {
        self.cache.lock().tokens = None;
        for channel in &self.channels {
            if let Err(e) = channel.clear_tokens().await {
                tracing::warn!(channel = channel.name(), "failed to clear tokens: {e:#}");
            }
        }
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.cache.lock().tokens.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.cache.lock().tokens.as_ref().map(|t| t.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.cache.lock().tokens.as_ref().map(|t| t.refresh_token.clone())
    }

    /// True if a token is cached, or can be read without awaiting.
    ///
    /// Only channels with a blocking read are consulted, so a token that lives
    /// solely in the process channel is not seen until `load()` has run.
    pub fn is_authenticated_sync(&self) -> bool {
        if self.cache.lock().tokens.is_some() {
            return true;
        }
        for channel in &self.channels {
            if let Some(tokens) = channel.load_tokens_sync() {
                tracing::debug!(channel = channel.name(), "loaded tokens synchronously");
                self.cache.lock().tokens = Some(tokens);
                return true;
            }
        }
        false
    }

    pub fn cached_verifier(&self) -> Option<String> {
        self.cache.lock().verifier.clone()
    }

    /// Verifier from the backing channels (not the cache).
    pub async fn load_verifier(&self) -> Option<String> {
        for channel in &self.channels {
            match channel.load_verifier().await {
                Ok(Some(v)) => {
                    self.cache.lock().verifier = Some(v.clone());
                    return Some(v);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(channel = channel.name(), "failed to load verifier: {e:#}");
                }
            }
        }
        None
    }

    pub async fn save_verifier(&self, verifier: &str) {
        self.cache.lock().verifier = Some(verifier.to_string());
        for channel in &self.channels {
            if let Err(e) = channel.save_verifier(verifier).await {
                tracing::warn!(channel = channel.name(), "failed to store verifier: {e:#}");
            }
        }
    }

    pub async fn clear_verifier(&self) {
        self.cache.lock().verifier = None;
        for channel in &self.channels {
            if let Err(e) = channel.clear_verifier().await {
                tracing::warn!(channel = channel.name(), "failed to clear verifier: {e:#}");
            }
        }
    }
}
