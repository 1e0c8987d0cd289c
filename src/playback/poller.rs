use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{Player, TickOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Cancelled,
    AuthLost,
}

/// Poll on the player's interval and on every delayed re-poll request until
/// cancelled or the session is lost.
pub async fn run(
    player: &Player,
    mut repoll_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) -> PollExit {
    let mut ticker = tokio::time::interval(player.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_ms = player.interval().as_millis() as u64, "playback poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("playback poller cancelled");
                return PollExit::Cancelled;
            }
            _ = ticker.tick() => {}
            Some(()) = repoll_rx.recv() => {
                tracing::trace!("delayed re-poll");
            }
        }

        if player.tick().await == TickOutcome::AuthLost {
            tracing::info!("playback poller stopped: not authenticated");
            return PollExit::AuthLost;
        }
    }
}

/// [`run`] on its own task, so commands sharing the player never hold up
/// polling.
pub fn spawn(
    player: Arc<Player>,
    repoll_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) -> JoinHandle<PollExit> {
    tokio::spawn(async move { run(&player, repoll_rx, cancel).await })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::TokenPair;
    use crate::auth::tests::memory_session;
    use crate::spotify::SpotifyClient;

    async fn player(server: &MockServer, logged_in: bool) -> (Player, mpsc::UnboundedReceiver<()>) {
        let session = memory_session(&server.uri());
        if logged_in {
            session
                .store()
                .save(&TokenPair {
                    access_token: "A1".into(),
                    refresh_token: "R1".into(),
                })
                .await;
        }
        let client = SpotifyClient::new(Arc::new(session), &server.uri()).unwrap();
        Player::new(
            Arc::new(client),
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
    }

    async fn player_polls(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/me/player")
            .count()
    }

    #[tokio::test]
    async fn stops_when_not_authenticated() {
        let server = MockServer::start().await;
        let (player, rx) = player(&server, false).await;

        let exit = tokio::time::timeout(
            Duration::from_secs(2),
            run(&player, rx, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(exit, PollExit::AuthLost);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn polls_until_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/player"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/player/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "queue": [] })))
            .mount(&server)
            .await;

        let (player, rx) = player(&server, true).await;
        let cancel = CancellationToken::new();
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                cancel.cancel();
            })
        };

        let exit = tokio::time::timeout(Duration::from_secs(2), run(&player, rx, cancel))
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(exit, PollExit::Cancelled);
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/me/player")
            .count();
        assert!(polls >= 2, "only {polls} polls");
        assert!(player.snapshot().authenticated);
    }

    #[tokio::test]
    async fn slow_command_does_not_stall_spawned_poller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/player"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/player/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "queue": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/me/player/next"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(800)))
            .mount(&server)
            .await;

        let (player, rx) = player(&server, true).await;
        let player = Arc::new(player);
        let cancel = CancellationToken::new();
        let task = spawn(player.clone(), rx, cancel.clone());

        let before = player_polls(&server).await;
        player.next().await.unwrap();
        let during = player_polls(&server).await - before;

        cancel.cancel();
        assert_eq!(task.await.unwrap(), PollExit::Cancelled);
        assert!(during >= 5, "only {during} polls while the command ran");
    }
}
