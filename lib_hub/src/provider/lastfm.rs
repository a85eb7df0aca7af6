//! # Last.fm Provider
//!
//! Fetches the most recent scrobble of a Last.fm user through
//! `user.getrecenttracks` and normalises it into a [`Track`].
//!
//! ## Error mapping
//! - body with an `error` field → [`ProviderError::Domain`], except the
//!   codes Last.fm documents as temporary (8, 11, 16, 29), which are
//!   [`ProviderError::Transient`];
//! - no track in the answer → [`ProviderError::NoData`];
//! - network failure, non-JSON body, HTTP error without an error body →
//!   [`ProviderError::Transient`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::protocol::{Image, NamedRef, Track};
use crate::provider::{FeedProvider, ProviderError};
use crate::retrieve::ApiClient;

pub const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/";
pub const NO_TRACKS_MESSAGE: &str = "User has no recent tracks";

const API_PATH: &str = "2.0/";
const TEMPORARY_ERROR_CODES: [i64; 4] = [8, 11, 16, 29];

pub struct LastFmProvider {
    client: ApiClient,
    api_key: String,
}

impl LastFmProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, timeout)?,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl FeedProvider for LastFmProvider {
    async fn fetch_snapshot(&self, feed_key: &str) -> Result<Track, ProviderError> {
        let query = [
            ("method", "user.getrecenttracks"),
            ("user", feed_key),
            ("api_key", self.api_key.as_str()),
            ("limit", "1"),
            ("format", "json"),
        ];
        let response = self
            .client
            .get::<Value>(API_PATH, &query)
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let body = match (response.data, response.error_body) {
            (Some(body), _) => body,
            (None, Some(text)) => serde_json::from_str(&text).map_err(|_| {
                ProviderError::Transient(format!("HTTP {} without error body", response.status))
            })?,
            (None, None) => {
                return Err(ProviderError::Transient(format!(
                    "HTTP {} without body",
                    response.status
                )))
            }
        };
        parse_recent_tracks(response.status, &body)
    }
}

/// Turns a `user.getrecenttracks` answer into the newest track.
pub fn parse_recent_tracks(status: u16, body: &Value) -> Result<Track, ProviderError> {
    if let Some(code) = body.get("error") {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Last.fm error")
            .to_string();
        return match code.as_i64() {
            Some(code) if TEMPORARY_ERROR_CODES.contains(&code) => {
                Err(ProviderError::Transient(message))
            }
            _ => Err(ProviderError::Domain(message)),
        };
    }
    if status >= 400 {
        return Err(ProviderError::Transient(format!("HTTP {}", status)));
    }

    let envelope = RawEnvelope::deserialize(body)
        .map_err(|e| ProviderError::Transient(format!("Unexpected response body: {}", e)))?;
    let newest = match envelope.recenttracks.track {
        OneOrMany::Many(tracks) => tracks.into_iter().next(),
        OneOrMany::One(track) => Some(*track),
    };
    newest
        .map(Track::from)
        .ok_or_else(|| ProviderError::NoData(NO_TRACKS_MESSAGE.to_string()))
}

#[derive(Deserialize)]
struct RawEnvelope {
    recenttracks: RawRecentTracks,
}

#[derive(Deserialize)]
struct RawRecentTracks {
    #[serde(default)]
    track: OneOrMany,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RawTrack>),
    One(Box<RawTrack>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawRef {
    mbid: String,
    #[serde(rename = "#text")]
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawImage {
    size: String,
    #[serde(rename = "#text")]
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAttr {
    nowplaying: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawTrack {
    album: RawRef,
    artist: RawRef,
    image: Vec<RawImage>,
    name: String,
    mbid: String,
    url: String,
    #[serde(rename = "@attr")]
    attr: Option<RawAttr>,
}

impl From<RawRef> for NamedRef {
    fn from(raw: RawRef) -> Self {
        NamedRef {
            mbid: raw.mbid,
            name: raw.text,
        }
    }
}

impl From<RawTrack> for Track {
    fn from(raw: RawTrack) -> Self {
        Track {
            album: raw.album.into(),
            artist: raw.artist.into(),
            images: raw
                .image
                .into_iter()
                .map(|image| Image {
                    size: image.size,
                    url: image.text,
                })
                .collect(),
            name: raw.name,
            mbid: raw.mbid,
            url: raw.url,
            now_playing: raw.attr.is_some_and(|attr| attr.nowplaying == "true"),
        }
    }
}
