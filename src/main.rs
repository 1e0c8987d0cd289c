use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod auth;
mod bridge;
mod config;
mod playback;
mod spotify;
mod util;

use auth::confidential::ConfidentialClient;
use auth::{AuthSettings, ProcessChannel, Session, TokenStore};
use bridge::{BridgeState, PendingAuthSlot};
use config::Config;
use playback::poller::{self, PollExit};
use playback::{Player, PlayerState, SEEK_STEP_MS, TickOutcome};
use spotify::SpotifyClient;
use util::format::{format_time, progress_bar, progress_percent};

#[derive(Parser)]
#[command(
    name = "minispot",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"),
    about = "Headless Spotify mini-player"
)]
struct Cli {
    /// Path to config file [default: ~/.config/minispot/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to Spotify (opens browser for OAuth)
    Auth,
    /// Forget stored tokens
    Logout,
    /// Show the logged-in user and what is playing
    Status,
    /// Follow playback live; type commands on stdin (`?` for help)
    Watch,
    /// Play or pause
    Toggle,
    /// Skip to the next track
    Next,
    /// Go back to the previous track
    Previous,
    /// Seek to an absolute position in ms, or by +N / -N seconds
    Seek {
        #[arg(allow_hyphen_values = true)]
        position: SeekArg,
    },
    /// Set the device volume
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Play a playlist / album URI, or a single track URI
    Play { uri: String },
    /// List your playlists
    Playlists,
    /// Token grants with the client secret, for server-side integrations
    Confidential {
        #[command(subcommand)]
        action: ConfidentialAction,
    },
}

#[derive(Subcommand)]
enum ConfidentialAction {
    /// Exchange an authorization code
    Exchange {
        #[arg(long)]
        code: String,
        /// Must match the redirect URI used for the authorization request
        #[arg(long)]
        redirect_uri: Option<String>,
    },
    /// Mint a new access token from a refresh token
    Refresh {
        #[arg(long)]
        refresh_token: String,
    },
}

/// `12000` (absolute ms), `+15` or `-15` (relative seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekArg {
    Absolute(u64),
    Relative(i64),
}

impl std::str::FromStr for SeekArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let relative = |digits: &str, sign: i64| {
            digits
                .parse::<i64>()
                .ok()
                .and_then(|secs| secs.checked_mul(1000)?.checked_mul(sign))
                .map(SeekArg::Relative)
                .ok_or_else(|| format!("invalid relative seek: {s}"))
        };
        if let Some(rest) = s.strip_prefix('+') {
            relative(rest, 1)
        } else if let Some(rest) = s.strip_prefix('-') {
            relative(rest, -1)
        } else {
            s.parse()
                .map(SeekArg::Absolute)
                .map_err(|_| format!("invalid seek position: {s}"))
        }
    }
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "minispot=info",
        1 => "minispot=debug",
        2 => "minispot=trace",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config. Logout must work even without a usable config file or
/// client id, so it falls back to the defaults.
fn config_for(command: &Command, path: Option<&Path>) -> Result<Config> {
    match command {
        Command::Logout => Ok(config::load_config(path).unwrap_or_else(|e| {
            tracing::debug!("using default config for logout: {e:#}");
            Config::default()
        })),
        _ => config::load_config(path),
    }
}

/// Session over the process channel and the token file.
fn open_session(cfg: &Config) -> Result<(Arc<Session>, ProcessChannel)> {
    let process = ProcessChannel::new();
    let token_path = auth::resolve_token_path(cfg.auth.token_path.as_deref())?;
    tracing::debug!(path = %token_path.display(), "token file");
    let store = TokenStore::desktop(process.clone(), token_path);
    let session = Session::new(AuthSettings::from_config(cfg), store)?;
    Ok((Arc::new(session), process))
}

/// Bind and serve the loopback bridge. Without it, login falls back to
/// pasting the redirect URL.
async fn start_bridge(
    cfg: &Config,
    process: &ProcessChannel,
    pending: &Arc<PendingAuthSlot>,
    cancel: &CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    match bridge::bind(cfg.auth.port()).await {
        Ok(listener) => {
            let state = BridgeState {
                tokens: process.clone(),
                pending: pending.clone(),
            };
            Some(bridge::spawn(listener, state, cancel.clone()))
        }
        Err(e) => {
            tracing::warn!("loopback bridge unavailable: {e:#}");
            None
        }
    }
}

async fn login(
    cfg: &Config,
    session: &Session,
    pending: Option<&PendingAuthSlot>,
    input: &mut mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let timeout = Duration::from_secs(cfg.general.login_timeout_secs);
    auth::run_login_flow(session, pending, input, timeout).await
}

/// Player for a single command: requires a stored session and polls once so
/// the command sees the current state.
async fn one_shot_player(cfg: &Config, session: Arc<Session>) -> Result<Player> {
    if !session.load().await {
        anyhow::bail!("Not logged in. Run `minispot auth` first.");
    }
    let client = Arc::new(SpotifyClient::new(session, &cfg.api.api_base)?);
    let (player, _repoll_rx) = Player::new(
        client,
        Duration::from_millis(cfg.general.poll_interval_ms),
        Duration::from_millis(cfg.general.restart_settle_ms),
    );
    if player.tick().await == TickOutcome::AuthLost {
        anyhow::bail!("Session expired. Run `minispot auth` to log in again.");
    }
    Ok(player)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config_for(&cli.command, cli.config.as_deref())?;

    match cli.command {
        Command::Logout => {
            let (session, _) = open_session(&cfg)?;
            session.logout().await;
            println!("Logged out.");
        }
        Command::Auth => {
            let (session, process) = open_session(&cfg)?;
            let cancel = CancellationToken::new();
            let pending = Arc::new(PendingAuthSlot::new());
            let bridge = start_bridge(&cfg, &process, &pending, &cancel).await;
            let mut input = auth::spawn_stdin_reader();

            let result = login(&cfg, &session, bridge.is_some().then_some(&*pending), &mut input).await;
            cancel.cancel();
            if let Some(handle) = bridge {
                let _ = handle.await;
            }
            result?;

            let client = SpotifyClient::new(session, &cfg.api.api_base)?;
            match client.current_user().await {
                Ok(user) => println!(
                    "Authenticated as {}",
                    user.display_name.as_deref().unwrap_or(&user.id)
                ),
                Err(e) => tracing::warn!(error = %e, "could not fetch profile"),
            }
        }
        Command::Status => {
            let (session, _) = open_session(&cfg)?;
            let player = one_shot_player(&cfg, session).await?;
            let user = player.client().current_user().await?;
            println!("minispot status");
            println!("===============");
            println!(
                "User:    {} ({})",
                user.display_name.as_deref().unwrap_or("-"),
                user.id
            );
            if let Some(product) = &user.product {
                println!("Plan:    {product}");
            }
            println!("Session: {:?}", player.client().session().phase());
            print_playback(&player.snapshot());
        }
        Command::Watch => {
            let (session, process) = open_session(&cfg)?;
            watch(&cfg, session, process).await?;
        }
        Command::Toggle => {
            let (session, _) = open_session(&cfg)?;
            one_shot_player(&cfg, session).await?.toggle_playback().await?;
        }
        Command::Next => {
            let (session, _) = open_session(&cfg)?;
            one_shot_player(&cfg, session).await?.next().await?;
        }
        Command::Previous => {
            let (session, _) = open_session(&cfg)?;
            one_shot_player(&cfg, session).await?.previous().await?;
        }
        Command::Seek { position } => {
            let (session, _) = open_session(&cfg)?;
            let player = one_shot_player(&cfg, session).await?;
            match position {
                SeekArg::Absolute(ms) => player.seek_to(ms).await?,
                SeekArg::Relative(delta) => player.seek_relative(delta).await?,
            }
        }
        Command::Volume { percent } => {
            let (session, _) = open_session(&cfg)?;
            let player = one_shot_player(&cfg, session).await?;
            player.begin_volume_adjust();
            player.commit_volume(percent).await?;
        }
        Command::Play { uri } => {
            let (session, _) = open_session(&cfg)?;
            let player = one_shot_player(&cfg, session).await?;
            if uri.contains(":track:") {
                player.play_track(&uri).await?;
            } else {
                player.play_playlist(&uri).await?;
            }
        }
        Command::Playlists => {
            let (session, _) = open_session(&cfg)?;
            let player = one_shot_player(&cfg, session).await?;
            print_playlists(&player).await?;
        }
        Command::Confidential { action } => {
            let client = ConfidentialClient::from_config(&cfg)?;
            let grant = match action {
                ConfidentialAction::Exchange { code, redirect_uri } => {
                    let redirect_uri = redirect_uri.unwrap_or_else(|| cfg.auth.redirect_uri());
                    client.exchange_code(&code, &redirect_uri).await?
                }
                ConfidentialAction::Refresh { refresh_token } => {
                    client.refresh(&refresh_token).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&grant)?);
        }
    }

    Ok(())
}

/// Live view: log in when needed, poll, render, and accept commands on stdin.
/// Losing the session goes back to the login prompt.
async fn watch(cfg: &Config, session: Arc<Session>, process: ProcessChannel) -> Result<()> {
    let cancel = CancellationToken::new();
    let pending = Arc::new(PendingAuthSlot::new());
    let bridge = start_bridge(cfg, &process, &pending, &cancel).await;
    let pending = bridge.is_some().then_some(&*pending);
    let client = Arc::new(SpotifyClient::new(session.clone(), &cfg.api.api_base)?);
    let mut input = auth::spawn_stdin_reader();

    // SIGTERM handling (for service managers)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let result: Result<()> = 'session: loop {
        if !session.load().await {
            tokio::select! {
                r = login(cfg, &session, pending, &mut input) => {
                    if let Err(e) = r {
                        break 'session Err(e);
                    }
                }
                _ = tokio::signal::ctrl_c() => break 'session Ok(()),
                _ = sigterm.recv() => break 'session Ok(()),
            }
        }

        let (player, repoll_rx) = Player::new(
            client.clone(),
            Duration::from_millis(cfg.general.poll_interval_ms),
            Duration::from_millis(cfg.general.restart_settle_ms),
        );
        let player = Arc::new(player);
        let mut updates = player.subscribe();
        let poll_cancel = cancel.child_token();
        let mut poll_task = poller::spawn(player.clone(), repoll_rx, poll_cancel.clone());
        // dropped with this session, aborting whatever is still in flight
        let mut commands = JoinSet::new();
        println!("Type `?` for commands.");

        let exit = loop {
            tokio::select! {
                exit = &mut poll_task => {
                    break exit.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "playback poller task failed");
                        PollExit::Cancelled
                    });
                }

                Ok(()) = updates.changed() => {
                    let line = status_line(&updates.borrow_and_update());
                    print!("\r\x1b[2K{line}");
                    let _ = std::io::stdout().flush();
                }

                Some(line) = input.recv() => {
                    let Some(control) = parse_control(&line) else {
                        println!("\n{CONTROLS_HELP}");
                        continue;
                    };
                    if control == Control::Quit {
                        poll_cancel.cancel();
                        continue;
                    }
                    let player = player.clone();
                    commands.spawn(async move {
                        if let Err(e) = run_control(&player, control).await {
                            eprintln!("\n{e:#}");
                        }
                    });
                }

                Some(_) = commands.join_next(), if !commands.is_empty() => {}

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                    poll_cancel.cancel();
                }

                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    poll_cancel.cancel();
                }
            }
        };
        println!();

        match exit {
            PollExit::Cancelled => break 'session Ok(()),
            PollExit::AuthLost => {
                println!("Session lost. Log in again.");
                session.logout().await;
            }
        }
    };

    cancel.cancel();
    if let Some(handle) = bridge {
        let _ = handle.await;
    }
    tracing::info!("minispot stopped");
    result
}

const CONTROLS_HELP: &str = "\
commands: p (play/pause)  n (next)  b (previous)  < / > (-/+15s)
          s SECONDS (seek)  v PERCENT (volume)  l (playlists)
          play URI  c (clear track)  q (quit)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Control {
    Toggle,
    Next,
    Previous,
    Rewind,
    Forward,
    Seek(u64),
    Volume(u8),
    Playlists,
    Play(String),
    Clear,
    Quit,
}

fn parse_control(line: &str) -> Option<Control> {
    let line = line.trim();
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, Some(arg.trim())),
        None => (line, None),
    };
    let control = match (cmd, arg) {
        ("p" | "", None) => Control::Toggle,
        ("n", None) => Control::Next,
        ("b", None) => Control::Previous,
        ("<", None) => Control::Rewind,
        (">", None) => Control::Forward,
        ("s", Some(secs)) => Control::Seek(secs.parse::<u64>().ok()?.checked_mul(1000)?),
        ("v", Some(pct)) => Control::Volume(pct.parse::<u8>().ok().filter(|v| *v <= 100)?),
        ("l", None) => Control::Playlists,
        ("play", Some(uri)) => Control::Play(uri.to_string()),
        ("c", None) => Control::Clear,
        ("q", None) => Control::Quit,
        _ => return None,
    };
    Some(control)
}

async fn run_control(player: &Player, control: Control) -> Result<()> {
    match control {
        Control::Toggle => player.toggle_playback().await?,
        Control::Next => player.next().await?,
        Control::Previous => player.previous().await?,
        Control::Rewind => player.seek_relative(-SEEK_STEP_MS).await?,
        Control::Forward => player.seek_relative(SEEK_STEP_MS).await?,
        Control::Seek(ms) => player.seek_to(ms).await?,
        Control::Volume(pct) => {
            player.begin_volume_adjust();
            player.preview_volume(pct);
            player.commit_volume(pct).await?;
        }
        Control::Playlists => {
            println!();
            print_playlists(player).await?;
        }
        Control::Play(uri) if uri.contains(":track:") => player.play_track(&uri).await?,
        Control::Play(uri) => player.play_playlist(&uri).await?,
        Control::Clear => player.clear_track(),
        Control::Quit => {}
    }
    Ok(())
}

fn status_line(state: &PlayerState) -> String {
    let Some(shown) = state.display() else {
        return if state.authenticated {
            format!("(nothing playing)  vol {}%", state.volume)
        } else {
            "(not logged in)".to_string()
        };
    };
    let Some(track) = &shown.track else {
        return format!("(no track)  vol {}%", state.volume);
    };

    let icon = match (&state.live, shown.is_playing) {
        (None, _) => "■",
        (Some(_), true) => "▶",
        (Some(_), false) => "⏸",
    };
    let mut line = format!(
        "{icon} {} - {}  {} / {} {}  vol {}%",
        track.name,
        track.artist_names(),
        format_time(shown.progress_ms.unwrap_or(0)),
        format_time(track.duration_ms),
        progress_bar(progress_percent(shown), 20),
        state.volume,
    );
    if let Some(next) = &state.queue_head {
        line.push_str(&format!("  next: {}", next.name));
    }
    line
}

fn print_playback(state: &PlayerState) {
    let Some(shown) = state.live.as_ref() else {
        println!("Player:  no active device");
        return;
    };
    if let Some(device) = &shown.device {
        println!("Device:  {}", device.name);
    }
    println!("Now:     {}", status_line(state));
}

async fn print_playlists(player: &Player) -> Result<()> {
    let page = player
        .playlists()
        .await
        .context("Failed to fetch playlists")?;
    for playlist in &page.items {
        let tracks = playlist.tracks.as_ref().map(|t| t.total).unwrap_or(0);
        println!("{:<40} {:>5} tracks  {}", playlist.name, tracks, playlist.uri);
    }
    if page.next.is_some() {
        println!("({} playlists, first {} shown)", page.total, page.items.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::fixtures::playing;

    #[test]
    fn seek_argument_forms() {
        assert_eq!("42000".parse::<SeekArg>().unwrap(), SeekArg::Absolute(42_000));
        assert_eq!("+15".parse::<SeekArg>().unwrap(), SeekArg::Relative(15_000));
        assert_eq!("-5".parse::<SeekArg>().unwrap(), SeekArg::Relative(-5_000));
        assert!("abc".parse::<SeekArg>().is_err());
        assert!("+".parse::<SeekArg>().is_err());
    }

    #[test]
    fn oversized_seek_is_rejected() {
        assert!("+9999999999999999".parse::<SeekArg>().is_err());
        assert!("-9223372036854775807".parse::<SeekArg>().is_err());
        assert_eq!(
            "-9223372036854775".parse::<SeekArg>().unwrap(),
            SeekArg::Relative(-9_223_372_036_854_775_000)
        );
        assert_eq!(parse_control("s 99999999999999999999"), None);
        assert_eq!(parse_control("s 18446744073709552"), None);
    }

    #[test]
    fn logout_tolerates_unreadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");

        assert!(config_for(&Command::Logout, Some(&missing)).is_ok());
        assert!(config_for(&Command::Status, Some(&missing)).is_err());
    }

    #[test]
    fn cli_parses_negative_seek() {
        let cli = Cli::try_parse_from(["minispot", "seek", "-15"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Seek {
                position: SeekArg::Relative(-15_000)
            }
        ));
        assert!(Cli::try_parse_from(["minispot", "volume", "101"]).is_err());
    }

    #[test]
    fn controls() {
        assert_eq!(parse_control(""), Some(Control::Toggle));
        assert_eq!(parse_control(" n "), Some(Control::Next));
        assert_eq!(parse_control("s 90"), Some(Control::Seek(90_000)));
        assert_eq!(parse_control("v 40"), Some(Control::Volume(40)));
        assert_eq!(parse_control("v 140"), None);
        assert_eq!(
            parse_control("play spotify:playlist:p1"),
            Some(Control::Play("spotify:playlist:p1".into()))
        );
        assert_eq!(parse_control("?"), None);
        assert_eq!(parse_control("n 3"), None);
    }

    #[test]
    fn status_line_prefers_live_then_last_known() {
        let mut state = PlayerState::new(true);
        assert_eq!(status_line(&state), "(nothing playing)  vol 50%");

        state.live = Some(playing("t1", Some(40)));
        state.last_known = state.live.clone();
        let live = status_line(&state);
        assert!(live.starts_with("▶ Track t1"), "{live}");
        assert!(live.contains("0:10 / 3:00"), "{live}");

        state.live = None;
        assert!(status_line(&state).starts_with("■ Track t1"));

        state.reset_on_auth_loss();
        assert_eq!(status_line(&state), "(not logged in)");
    }
}
