use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use url::Url;

use super::Session;
use crate::bridge::{PendingAuth, PendingAuthSlot};

/// How often the token channels are re-read while waiting for a hand-off.
const STORE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What the user pasted on stdin.
#[derive(Debug, PartialEq, Eq)]
pub enum PastedInput {
    Code { code: String, state: Option<String> },
    Denied(String),
}

/// Interactive PKCE login.
///
/// Opens the authorization URL and waits for whichever comes first: a code
/// staged by the bridge, a token pair handed to the bridge directly, or a
/// redirect URL / code pasted on `input` (see [`spawn_stdin_reader`]).
pub async fn run_login_flow(
    session: &Session,
    pending: Option<&PendingAuthSlot>,
    input: &mut mpsc::UnboundedReceiver<String>,
    timeout: Duration,
) -> Result<()> {
    let auth_url = session.build_authorization_url().await?;

    println!("\nOpen this URL in your browser to log in to Spotify:\n");
    println!("  {auth_url}\n");

    if let Err(e) = open::that(auth_url.as_str()) {
        tracing::debug!(error = %e, "could not open browser");
    }

    if pending.is_some() {
        println!("Waiting for authorization...");
        println!("If the browser cannot reach this machine, paste the redirect URL here:");
    } else {
        println!("Paste the redirect URL or authorization code here:");
    }

    await_authorization(session, pending, input, timeout).await?;
    println!("\nLogged in.");
    Ok(())
}

/// Wait for the outcome of an authorization started with
/// `Session::build_authorization_url`.
///
/// Tokens that were already stored when the wait began do not count, so an
/// existing login never completes a new one.
pub async fn await_authorization(
    session: &Session,
    pending: Option<&PendingAuthSlot>,
    input: &mut mpsc::UnboundedReceiver<String>,
    timeout: Duration,
) -> Result<()> {
    let baseline = session.store().load().await;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut stdin_open = true;
    let mut store_poll = tokio::time::interval(STORE_POLL_INTERVAL);
    store_poll.tick().await;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                anyhow::bail!("timed out waiting for authorization");
            }

            auth = wait_pending(pending) => {
                tracing::info!("authorization code received from browser");
                match session.exchange_code(&auth.code, auth.state.as_deref()).await {
                    Ok(()) => return Ok(()),
                    Err(e) => eprintln!("Token exchange failed: {e}. Try again in the browser."),
                }
            }

            line = input.recv(), if stdin_open => {
                let Some(line) = line else {
                    tracing::debug!("stdin closed");
                    stdin_open = false;
                    continue;
                };
                match parse_code_input(&line) {
                    Ok(PastedInput::Code { code, state }) => {
                        match session.exchange_code(&code, state.as_deref()).await {
                            Ok(()) => return Ok(()),
                            Err(e) => eprintln!("Token exchange failed: {e}"),
                        }
                    }
                    Ok(PastedInput::Denied(reason)) => {
                        anyhow::bail!("authorization denied: {reason}");
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }

            _ = store_poll.tick() => {
                // the browser may have posted a pair to the bridge
                if session.adopt_stored_tokens(baseline.as_ref()).await {
                    tracing::info!("tokens handed over through storage");
                    return Ok(());
                }
            }
        }
    }
}

async fn wait_pending(pending: Option<&PendingAuthSlot>) -> PendingAuth {
    match pending {
        Some(slot) => slot.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward stdin lines from a detached thread, so a pending read never keeps
/// the runtime from shutting down. The channel closes on EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Accept a full redirect URL (`?code=…&state=…` or `?error=…`) or a bare code.
pub fn parse_code_input(input: &str) -> Result<PastedInput> {
    let input = input.trim();
    anyhow::ensure!(!input.is_empty(), "Empty input");

    if let Ok(url) = Url::parse(input) {
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        if let Some(error) = params.get("error") {
            return Ok(PastedInput::Denied(error.clone()));
        }
        let code = params
            .get("code")
            .cloned()
            .context("URL has no `code` parameter")?;
        return Ok(PastedInput::Code {
            code,
            state: params.get("state").cloned(),
        });
    }

    Ok(PastedInput::Code {
        code: input.to_string(),
        state: None,
    })
}
