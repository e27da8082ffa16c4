//! Range-aware HTTP byte source.
//!
//! Presents an arbitrary-position `Read + Seek` view over an HTTP resource
//! using `Range: bytes=<offset>-` requests. Connections are opened lazily
//! on the first read after a reposition; small forward seeks are served by
//! discarding buffered bytes so a contiguous parser sweep rides a single
//! connection.

use std::io::{self, Read, Seek, SeekFrom};

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, trace};

use crate::common::errors::{Error, Result};
use crate::common::http::HttpClient;
use crate::common::pool::{self, BufferedReader};

pub struct RangeReader {
    url: reqwest::Url,
    client: Client,
    /// Logical cursor. Always the offset the next `read` serves from.
    offset: u64,
    /// Total resource length; `None` for live streams of unknown length.
    length: Option<u64>,
    body: Option<BufferedReader>,
}

impl RangeReader {
    /// Builds a reader over `url`. No request is issued until the first
    /// read. `length` may come from resolver metadata; pass `None` for
    /// live resources or to defer to [`RangeReader::size`].
    pub fn new(url: &str, length: Option<u64>) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::Transport(format!("invalid media url: {e}")))?;
        let client = HttpClient::new_blocking()?;
        Ok(Self {
            url,
            client,
            offset: 0,
            length,
            body: None,
        })
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn set_length(&mut self, length: u64) {
        self.length = Some(length);
    }

    /// Resource length via a HEAD probe. Fails when the server does not
    /// report a content length.
    pub fn size(&self) -> Result<u64> {
        let response = self.client.head(self.url.clone()).send()?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "size probe failed with status {}",
                response.status()
            )));
        }
        response
            .content_length()
            .ok_or_else(|| Error::Transport("no content length for size()".into()))
    }

    /// Reads from an explicit offset; equivalent to `seek(Start(off))`
    /// followed by `read`.
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> io::Result<usize> {
        self.seek(SeekFrom::Start(off))?;
        self.read(buf)
    }

    fn buffered(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.buffered() as u64)
    }

    fn connect(&mut self) -> io::Result<()> {
        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::RANGE, format!("bytes={}-", self.offset))
            .header(reqwest::header::ACCEPT_ENCODING, "identity")
            .send()
            .map_err(io::Error::other)?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::other(format!(
                "range request for offset {} failed with status {status}",
                self.offset
            )));
        }
        debug!(offset = self.offset, "opened range request");
        self.body = Some(pool::acquire(Box::new(response)));
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(body) = self.body.take() {
            pool::release(body);
        }
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.body.is_none() {
            self.connect()?;
        }
        let body = match self.body.as_mut() {
            Some(body) => body,
            None => return Ok(0),
        };
        let n = body.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for RangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .offset
                .checked_add_signed(delta)
                .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?,
            SeekFrom::End(delta) => match self.length {
                Some(length) => length
                    .checked_add_signed(delta)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "no seek end in a stream",
                    ))
                }
            },
        };

        if target == self.offset {
            return Ok(self.offset);
        }

        let buffered = self.buffered();
        if target > self.offset && target - self.offset <= buffered {
            // Fast path: stay on the open connection and drop the bytes.
            let delta = (target - self.offset) as usize;
            if let Some(body) = self.body.as_mut() {
                body.discard(delta)?;
            }
            trace!(delta, "forward seek served from buffer");
        } else {
            // Backward or far forward: drop the connection, reconnect on
            // the next read.
            self.disconnect();
        }
        self.offset = target;
        Ok(self.offset)
    }
}

impl Drop for RangeReader {
    fn drop(&mut self) {
        self.disconnect();
    }
}
