//! Resolved track metadata and the lazy open path.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::cipher::CipherResolver;
use super::format::Format;
use crate::common::errors::{Error, Result};
use crate::remote::RangeReader;
use crate::webm;

/// Metadata for one resolved video plus its chosen stream format.
///
/// Lazy: nothing is fetched from the media CDN until [`Track::open`], which
/// is also when the signature (if any) is deciphered.
#[derive(Debug)]
pub struct Track {
    pub video_id: String,
    pub title: String,
    pub author: String,
    /// `Duration::MAX` for live content.
    pub duration: Duration,
    pub is_stream: bool,
    pub format: Format,
    pub(crate) cipher: Arc<CipherResolver>,
}

impl Track {
    /// Codec name from the selected format's MIME type ("opus").
    pub fn codec(&self) -> String {
        self.format.codec()
    }

    pub fn bitrate(&self) -> u64 {
        self.format.bitrate
    }

    /// Resolves the final stream URL and opens the demuxer over it.
    ///
    /// Blocking work (the range reader's probe and the header/segment scan)
    /// runs on the blocking pool; the returned track is ready for
    /// [`webm::Track::play`] on a dedicated task.
    pub async fn open(&self) -> Result<webm::Track<RangeReader>> {
        if !self.format.is_webm_audio() {
            return Err(Error::Unsupported(format!(
                "mime type not supported: {}",
                self.format.mime
            )));
        }

        let url = self.cipher.resolve(&self.format).await?;
        let content_length = match self.format.content_length {
            0 => None,
            len => Some(len),
        };
        let is_stream = self.is_stream;
        info!(video_id = %self.video_id, "opening media stream");

        tokio::task::spawn_blocking(move || {
            let mut reader = RangeReader::new(&url, content_length)?;
            if !is_stream {
                // Verify the resource is reachable and pin down its length
                // so SeekEnd works even when `clen` was absent.
                let size = reader.size()?;
                if size == 0 {
                    return Err(Error::Unplayable("got an empty resource".into()));
                }
                reader.set_length(size);
            }
            webm::Parser::new(reader)?.parse()
        })
        .await
        .map_err(|e| Error::Transport(format!("open task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_mime(mime: &str) -> Track {
        Track {
            video_id: "test".into(),
            title: String::new(),
            author: String::new(),
            duration: Duration::from_secs(1),
            is_stream: false,
            format: Format {
                mime: mime.to_string(),
                ..Format::default()
            },
            cipher: Arc::new(CipherResolver::new().unwrap()),
        }
    }

    #[test]
    fn codec_comes_from_mime() {
        let track = track_with_mime("audio/webm; codecs=\"opus\"");
        assert_eq!(track.codec(), "opus");
    }

    #[tokio::test]
    async fn non_webm_mime_is_unsupported() {
        let track = track_with_mime("audio/mp4; codecs=\"mp4a.40.2\"");
        match track.open().await {
            Err(Error::Unsupported(msg)) => assert!(msg.contains("mime type not supported")),
            Err(e) => panic!("expected unsupported, got {e}"),
            Ok(_) => panic!("expected unsupported, got a track"),
        }
    }
}
