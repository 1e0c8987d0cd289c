//! Playback polling, reconciliation and commands.
//!
//! Commands never wait for the remote player to catch up. Each one issues its
//! request and schedules a delayed re-poll; the poller picks the change up
//! from there.

pub mod poller;
mod state;

pub use state::{PlayerState, TickOutcome};

#[cfg(test)]
pub(crate) use state::tests as fixtures;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::spotify::types::{Paging, Playlist};
use crate::spotify::{ApiError, SpotifyClient};

/// Re-poll delays, roughly how long the remote side takes to reflect a change.
pub mod repoll {
    use std::time::Duration;

    pub const TOGGLE: Duration = Duration::from_millis(500);
    pub const SKIP: Duration = Duration::from_millis(500);
    pub const SEEK: Duration = Duration::from_millis(200);
    pub const SEEK_RELATIVE: Duration = Duration::from_millis(500);
    pub const VOLUME: Duration = Duration::from_millis(500);
    pub const PLAY_CONTEXT: Duration = Duration::from_millis(1000);
    pub const PLAY_TRACK: Duration = Duration::from_millis(500);
    /// After a restart-then-transition.
    pub const AFTER_RESTART: Duration = Duration::from_millis(300);
}

/// How far rewind / fast-forward jump.
pub const SEEK_STEP_MS: i64 = 15_000;

pub struct Player {
    client: Arc<SpotifyClient>,
    state: watch::Sender<PlayerState>,
    repoll_tx: mpsc::UnboundedSender<()>,
    interval: Duration,
    restart_settle: Duration,
}

impl Player {
    /// Returns the player and the receiving end of its delayed re-poll
    /// requests, which belongs to [`poller::run`].
    pub fn new(
        client: Arc<SpotifyClient>,
        interval: Duration,
        restart_settle: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (repoll_tx, repoll_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(PlayerState::new(client.session().is_authenticated()));
        let player = Self {
            client,
            state,
            repoll_tx,
            interval,
            restart_settle,
        };
        (player, repoll_rx)
    }

    pub fn client(&self) -> &SpotifyClient {
        &self.client
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn snapshot(&self) -> PlayerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state.subscribe()
    }

    /// One poll: playback and queue concurrently, then reconcile.
    pub async fn tick(&self) -> TickOutcome {
        let (playback, queue) =
            tokio::join!(self.client.current_playback(), self.client.queue());

        let mut outcome = TickOutcome::Updated;
        self.state.send_modify(|s| outcome = s.apply(playback, queue));
        if outcome == TickOutcome::AuthLost {
            tracing::warn!("session lost while polling");
        }
        outcome
    }

    fn schedule_repoll(&self, delay: Duration) {
        let tx = self.repoll_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // poller gone means nobody is watching
            let _ = tx.send(());
        });
    }

    fn finish(&self, command: &str, result: Result<Duration, ApiError>) -> Result<(), ApiError> {
        match result {
            Ok(delay) => {
                tracing::debug!(command, ?delay, "command sent");
                self.schedule_repoll(delay);
                Ok(())
            }
            Err(e) => {
                if e.is_auth_lost() {
                    self.state.send_modify(PlayerState::reset_on_auth_loss);
                }
                tracing::warn!(command, error = %e, "playback command failed");
                Err(e)
            }
        }
    }

    /// Run `action`, first restarting the last-known track when nothing is
    /// live so the transition has something to act on.
    async fn transition<F, Fut>(
        &self,
        command: &str,
        delay: Duration,
        action: F,
    ) -> Result<(), ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let restart = self.state.borrow().restart_uri();
        let result = async {
            match restart {
                Some(uri) => {
                    tracing::info!(command, %uri, "no active playback, restarting last track");
                    self.client.play_uris(&[uri]).await?;
                    tokio::time::sleep(self.restart_settle).await;
                    action().await?;
                    Ok(repoll::AFTER_RESTART)
                }
                None => {
                    action().await?;
                    Ok(delay)
                }
            }
        }
        .await;
        self.finish(command, result)
    }

    pub async fn toggle_playback(&self) -> Result<(), ApiError> {
        let (restart, playing) = {
            let state = self.state.borrow();
            (state.restart_uri(), state.is_playing())
        };
        let result = match restart {
            Some(uri) => {
                tracing::info!(%uri, "resuming last track");
                self.client.play_uris(&[uri]).await
            }
            None if playing => self.client.pause().await,
            None => self.client.play().await,
        };
        self.finish("toggle", result.map(|()| repoll::TOGGLE))
    }

    pub async fn next(&self) -> Result<(), ApiError> {
        self.transition("next", repoll::SKIP, || self.client.next())
            .await
    }

    pub async fn previous(&self) -> Result<(), ApiError> {
        self.transition("previous", repoll::SKIP, || self.client.previous())
            .await
    }

    pub async fn seek_to(&self, position_ms: u64) -> Result<(), ApiError> {
        self.transition("seek", repoll::SEEK, || self.client.seek(position_ms))
            .await
    }

    /// Jump by `delta_ms` from the displayed position, clamped to the track.
    pub async fn seek_relative(&self, delta_ms: i64) -> Result<(), ApiError> {
        let target = {
            let state = self.state.borrow();
            let shown = state.display();
            let progress = shown.and_then(|p| p.progress_ms).unwrap_or(0);
            let duration = shown
                .and_then(|p| p.track.as_ref())
                .map(|t| t.duration_ms)
                .filter(|d| *d > 0);
            relative_target(progress, duration, delta_ms)
        };
        let result = self.client.seek(target).await;
        self.finish("seek-relative", result.map(|()| repoll::SEEK_RELATIVE))
    }

    pub fn begin_volume_adjust(&self) {
        self.state.send_modify(|s| s.adjusting_volume = true);
    }

    /// Show a volume without sending it.
    pub fn preview_volume(&self, percent: u8) {
        self.state.send_modify(|s| s.volume = percent.min(100));
    }

    /// Send the final volume of a gesture. The gesture ends even if the
    /// request fails.
    pub async fn commit_volume(&self, percent: u8) -> Result<(), ApiError> {
        let percent = percent.min(100);
        self.state.send_modify(|s| s.volume = percent);
        let result = self.client.set_volume(percent).await;
        self.state.send_modify(|s| s.adjusting_volume = false);
        self.finish("volume", result.map(|()| repoll::VOLUME))
    }

    /// Start a playlist (or album / artist) context.
    pub async fn play_playlist(&self, context_uri: &str) -> Result<(), ApiError> {
        let result = self.client.play_context(context_uri).await;
        self.finish("play-playlist", result.map(|()| repoll::PLAY_CONTEXT))
    }

    pub async fn play_track(&self, uri: &str) -> Result<(), ApiError> {
        let result = self.client.play_uris(&[uri.to_string()]).await;
        self.finish("play-track", result.map(|()| repoll::PLAY_TRACK))
    }

    pub fn clear_track(&self) {
        self.state.send_modify(PlayerState::clear_track);
    }

    pub async fn playlists(&self) -> Result<Paging<Playlist>, ApiError> {
        self.client.playlists().await
    }
}

fn relative_target(progress_ms: u64, duration_ms: Option<u64>, delta_ms: i64) -> u64 {
    let target = progress_ms.saturating_add_signed(delta_ms);
    match duration_ms {
        Some(duration) => target.min(duration),
        None => target,
    }
}
