use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Notify;

/// Authorization code handed over by the browser, waiting to be exchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PendingAuth {
    pub code: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Single-slot hand-off between the bridge and the login flow.
///
/// There is no way to look at the value without consuming it, so a code can
/// reach at most one exchange attempt. A newer `put` replaces an unread value.
#[derive(Debug, Default)]
pub struct PendingAuthSlot {
    slot: Mutex<Option<PendingAuth>>,
    ready: Notify,
}

impl PendingAuthSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, auth: PendingAuth) {
        if self.slot.lock().replace(auth).is_some() {
            tracing::debug!("replaced unconsumed pending auth");
        }
        self.ready.notify_one();
    }

    pub fn take(&self) -> Option<PendingAuth> {
        self.slot.lock().take()
    }

    /// Wait until a value is staged and consume it.
    pub async fn recv(&self) -> PendingAuth {
        loop {
            let notified = self.ready.notified();
            if let Some(auth) = self.take() {
                return auth;
            }
            notified.await;
        }
    }
}
