use serde::Deserialize;

/// Snapshot of `GET /me/player`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    /// `item` is null between tracks and for some local files.
    #[serde(rename = "item", default)]
    pub track: Option<Track>,
    #[serde(default)]
    pub device: Option<Device>,
}

/// A track, or a podcast episode (which has no artists or album).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Option<Album>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub uri: Option<String>,
}

impl Track {
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// URI to hand back to `PUT /me/player/play`.
    pub fn play_uri(&self) -> Option<String> {
        self.uri
            .clone()
            .or_else(|| self.id.as_ref().map(|id| format!("spotify:track:{id}")))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub volume_percent: Option<u8>,
    #[serde(default)]
    pub is_active: bool,
}

/// `GET /me/player/queue`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub currently_playing: Option<Track>,
    #[serde(default)]
    pub queue: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub images: Option<Vec<Image>>,
    #[serde(default)]
    pub tracks: Option<TrackCount>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackCount {
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_from_api_json() {
        let state: PlaybackState = serde_json::from_value(serde_json::json!({
            "is_playing": true,
            "progress_ms": 61000,
            "device": { "id": "d1", "name": "Kitchen", "volume_percent": 72, "is_active": true },
            "item": {
                "id": "t1",
                "name": "Song",
                "duration_ms": 200000,
                "uri": "spotify:track:t1",
                "artists": [{ "id": "a1", "name": "First" }, { "id": "a2", "name": "Second" }],
                "album": { "name": "Album", "images": [{ "url": "https://i/1", "width": 640, "height": 640 }] }
            }
        }))
        .unwrap();

        let track = state.track.as_ref().unwrap();
        assert_eq!(track.artist_names(), "First, Second");
        assert_eq!(track.album.as_ref().unwrap().images[0].width, Some(640));
        assert_eq!(state.device.unwrap().volume_percent, Some(72));
    }

    #[test]
    fn null_item_and_volume_are_tolerated() {
        let state: PlaybackState = serde_json::from_value(serde_json::json!({
            "is_playing": false,
            "progress_ms": null,
            "item": null,
            "device": { "id": null, "name": "Web", "volume_percent": null, "is_active": false }
        }))
        .unwrap();
        assert!(state.track.is_none());
        assert_eq!(state.device.unwrap().volume_percent, None);
    }

    #[test]
    fn play_uri_falls_back_to_id() {
        let track = Track {
            id: Some("t9".into()),
            name: "x".into(),
            artists: vec![],
            album: None,
            duration_ms: 0,
            uri: None,
        };
        assert_eq!(track.play_uri().as_deref(), Some("spotify:track:t9"));
    }
}
