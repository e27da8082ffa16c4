//! Adaptive format descriptors and best-format selection.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::debug;

/// One adaptive stream entry chosen from the watch page, plus everything
/// needed to turn it into a fetchable URL. Immutable once selected.
#[derive(Debug, Clone, Default)]
pub struct Format {
    /// MIME type, e.g. `audio/webm; codecs="opus"`.
    pub mime: String,
    /// Bits per second as advertised by the format list.
    pub bitrate: u64,
    /// Content length in bytes; 0 when the descriptor omits it.
    pub content_length: u64,
    /// Base stream URL, valid once the signature (if any) is attached.
    pub url: String,
    /// Obfuscated signature; empty when the stream is served unsigned.
    pub signature: String,
    /// Query key the deciphered signature must be attached under.
    pub signature_key: String,
    /// Path of the player script that defines the cipher.
    pub player_script: String,
}

impl Format {
    /// The codec name out of the MIME `codecs="…"` attribute ("opus").
    pub fn codec(&self) -> String {
        self.mime
            .split('=')
            .nth(1)
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default()
    }

    /// True for the only container/codec family the demuxer accepts.
    pub fn is_webm_audio(&self) -> bool {
        self.mime.starts_with("audio/webm")
    }
}

/// Picks the highest-bitrate `audio/webm` entry out of a comma-separated
/// list of query-string-encoded format descriptors. Undecodable entries are
/// skipped.
pub(crate) fn find_best_format(adaptive_fmts: &str, player_script: &str) -> Option<Format> {
    let mut best: Option<Format> = None;
    for descriptor in adaptive_fmts.split(',') {
        let fields: HashMap<Cow<'_, str>, Cow<'_, str>> =
            url::form_urlencoded::parse(descriptor.as_bytes()).collect();
        let get = |key: &str| fields.get(key).map(|v| v.as_ref()).unwrap_or("");

        let mime = get("type");
        if mime.starts_with("video/") || !mime.contains("webm") {
            continue;
        }
        let bitrate = match get("bitrate").parse::<u64>() {
            Ok(bitrate) => bitrate,
            Err(_) => {
                debug!("skipping format without a usable bitrate: {mime}");
                continue;
            }
        };
        if best.as_ref().is_some_and(|b| b.bitrate >= bitrate) {
            continue;
        }
        let signature_key = match get("sp") {
            "" => "signature".to_string(),
            key => key.to_string(),
        };
        best = Some(Format {
            mime: mime.to_string(),
            bitrate,
            content_length: get("clen").parse().unwrap_or(0),
            url: get("url").to_string(),
            signature: get("s").to_string(),
            signature_key,
            player_script: player_script.to_string(),
        });
    }
    best
}
