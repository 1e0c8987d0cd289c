use crate::spotify::ApiError;
use crate::spotify::types::{PlaybackState, Queue, Track};

pub const DEFAULT_VOLUME: u8 = 50;

/// Result of folding one poll into the reconciled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Updated,
    AuthLost,
}

/// Reconciled view of the remote player.
///
/// `last_known` survives "nothing playing" so the front-end can keep showing
/// the most recent track; only losing the session clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub live: Option<PlaybackState>,
    pub last_known: Option<PlaybackState>,
    pub queue_head: Option<Track>,
    pub volume: u8,
    /// A volume gesture is in flight; polled device volume is ignored.
    pub adjusting_volume: bool,
    pub authenticated: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            live: None,
            last_known: None,
            queue_head: None,
            volume: DEFAULT_VOLUME,
            adjusting_volume: false,
            authenticated: false,
        }
    }
}

impl PlayerState {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            ..Self::default()
        }
    }

    pub fn display(&self) -> Option<&PlaybackState> {
        self.live.as_ref().or(self.last_known.as_ref())
    }

    pub fn is_playing(&self) -> bool {
        self.live.as_ref().is_some_and(|p| p.is_playing)
    }

    /// Fold the concurrent playback and queue fetches of one tick.
    pub fn apply(
        &mut self,
        playback: Result<Option<PlaybackState>, ApiError>,
        queue: Result<Queue, ApiError>,
    ) -> TickOutcome {
        let auth_lost = |r: Option<&ApiError>| r.is_some_and(ApiError::is_auth_lost);
        if auth_lost(playback.as_ref().err()) || auth_lost(queue.as_ref().err()) {
            self.reset_on_auth_loss();
            return TickOutcome::AuthLost;
        }

        match playback {
            Ok(Some(state)) => {
                if !self.adjusting_volume
                    && let Some(volume) = state.device.as_ref().and_then(|d| d.volume_percent)
                {
                    self.volume = volume;
                }
                self.last_known = Some(state.clone());
                self.live = Some(state);
            }
            Ok(None) => self.live = None,
            Err(e) => {
                tracing::debug!(error = %e, "playback fetch failed, treating as idle");
                self.live = None;
            }
        }

        self.queue_head = match queue {
            Ok(queue) => queue.queue.into_iter().next(),
            Err(e) => {
                tracing::debug!(error = %e, "queue fetch failed");
                None
            }
        };

        self.authenticated = true;
        TickOutcome::Updated
    }

    pub fn reset_on_auth_loss(&mut self) {
        self.live = None;
        self.last_known = None;
        self.queue_head = None;
        self.adjusting_volume = false;
        self.authenticated = false;
    }

    /// Drop the displayed track, e.g. to go back to the playlist list.
    pub fn clear_track(&mut self) {
        self.live = None;
        self.last_known = None;
        self.queue_head = None;
    }

    /// URI of the last-known track when nothing is live.
    pub fn restart_uri(&self) -> Option<String> {
        if self.live.is_some() {
            return None;
        }
        self.last_known.as_ref()?.track.as_ref()?.play_uri()
    }
}
