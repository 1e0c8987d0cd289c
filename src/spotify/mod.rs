//! Spotify Web API: authenticated transport and the player endpoints.

mod client;
mod error;
mod player;
pub mod types;

pub use client::SpotifyClient;
pub use error::ApiError;
