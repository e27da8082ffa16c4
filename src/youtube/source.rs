//! Watch-page resolution: video id → playable track metadata.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::cipher::CipherResolver;
use super::format::find_best_format;
use super::track::Track;
use crate::common::errors::{Error, Result};
use crate::common::http::HttpClient;

const DEFAULT_WATCH_BASE: &str = "https://www.youtube.com";
const WATCH_URL_PATTERN: &str =
    r"(?:https?://)?(?:www\.)?(?:youtu\.be/|youtube\.com(?:/embed/|/v/|/watch.+v=))([\w-]{10,12})";

/// The slice of `player_response` the resolver needs.
#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(rename = "videoDetails")]
    video_details: VideoDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    title: String,
    author: String,
    #[serde(default)]
    is_live_content: bool,
    #[serde(default)]
    length_seconds: Option<String>,
}

/// Resolves YouTube watch pages into [`Track`] metadata.
pub struct Source {
    client: reqwest::Client,
    watch_base: String,
    cipher: Arc<CipherResolver>,
    watch_url: Regex,
}

impl Source {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            watch_base: DEFAULT_WATCH_BASE.to_string(),
            cipher: Arc::new(CipherResolver::new()?),
            watch_url: Regex::new(WATCH_URL_PATTERN).expect("watch url pattern"),
        })
    }

    /// Overrides the watch-page base URL (tests point this at a mock).
    pub fn with_watch_base(mut self, base: impl Into<String>) -> Self {
        self.watch_base = base.into();
        self
    }

    /// Replaces the cipher resolver (tests inject one with a mock player
    /// host).
    pub fn with_cipher(mut self, cipher: CipherResolver) -> Self {
        self.cipher = Arc::new(cipher);
        self
    }

    /// Fetches the watch page for `video_id` and selects the best
    /// `audio/webm` adaptive format.
    pub async fn play_video(&self, video_id: &str) -> Result<Track> {
        let url = format!("{}/watch?v={}&pbj=1&hl=en", self.watch_base, video_id);
        let response = self
            .client
            .get(&url)
            .header("X-YouTube-Client-Name", "1")
            .header("X-YouTube-Client-Version", "2.20191008.04.01")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "watch page fetch failed with status {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let documents: Vec<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| Error::Unplayable(format!("watch response is not a json array: {e}")))?;

        // The payload is an array of heterogeneous documents; the one we
        // want carries a `player` object.
        let player = documents
            .iter()
            .find_map(|doc| doc.get("player"))
            .ok_or_else(|| Error::Unplayable("no player object in watch response".into()))?;
        let args = player
            .get("args")
            .ok_or_else(|| Error::Unplayable("player object has no args".into()))?;

        let raw_player_response = args
            .get("player_response")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Unplayable("couldn't find the track".into()))?;
        let parsed: PlayerResponse = serde_json::from_str(raw_player_response)
            .map_err(|e| Error::Unplayable(format!("malformed player_response: {e}")))?;
        let details = parsed.video_details;

        let duration = if details.is_live_content {
            Duration::MAX
        } else {
            let seconds = details
                .length_seconds
                .as_deref()
                .unwrap_or("")
                .parse::<u64>()
                .map_err(|e| Error::Unplayable(format!("bad lengthSeconds: {e}")))?;
            Duration::from_secs(seconds)
        };

        let adaptive_fmts = args
            .get("adaptive_fmts")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Unplayable("no adaptive formats in watch response".into()))?;
        let player_script = player
            .get("assets")
            .and_then(|a| a.get("js"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Unplayable("player script path missing".into()))?;

        let format = find_best_format(adaptive_fmts, player_script)
            .ok_or_else(|| Error::Unplayable("no audio/webm format available".into()))?;
        debug!(
            video_id,
            bitrate = format.bitrate,
            "selected adaptive format"
        );

        Ok(Track {
            video_id: video_id.to_string(),
            title: details.title,
            author: details.author,
            duration,
            is_stream: details.is_live_content,
            format,
            cipher: self.cipher.clone(),
        })
    }

    /// Like [`Source::play_video`], taking any recognizable watch URL.
    pub async fn play_video_url(&self, video_url: &str) -> Result<Track> {
        let video_id = self.extract_video_id(video_url)?;
        self.play_video(&video_id).await
    }

    /// Pulls the video id out of a watch/short/embed URL.
    pub fn extract_video_id(&self, video_url: &str) -> Result<String> {
        self.watch_url
            .captures(video_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| Error::Unplayable("unable to extract the video id".into()))
    }

    /// Whether the URL looks like a playable watch URL.
    pub fn check_video_url(&self, video_url: &str) -> bool {
        self.watch_url.is_match(video_url)
    }
}
