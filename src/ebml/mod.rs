//! Streaming EBML element reader.
//!
//! Walks the element tree of an EBML document (Matroska/WebM) over any
//! `Read + Seek` source without buffering payloads it is not asked for.
//! Elements are plain descriptors carrying absolute offsets; all reads and
//! repositioning go through the single [`EbmlReader`] that owns the source,
//! so nested iteration (a Cluster inside a Segment) needs no borrow
//! juggling and a region's remaining budget is always `end - position`.

use std::io::{Read, Seek, SeekFrom};

use crate::common::errors::{Error, Result};

/// Descriptor of one parsed element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Element id with the length marker retained, as listed in the
    /// Matroska spec (e.g. Segment = 0x18538067).
    pub id: u32,
    /// Payload size in bytes. `None` for unknown-size elements, which live
    /// streams use for the Segment and open Clusters.
    pub size: Option<u64>,
    /// Absolute offset of the element's first id byte.
    pub offset: u64,
    /// Absolute offset of the first payload byte.
    pub data_offset: u64,
}

impl Element {
    /// Absolute offset one past the payload, when the size is known.
    pub fn end(&self) -> Option<u64> {
        self.size.map(|s| self.data_offset + s)
    }
}

pub struct EbmlReader<R> {
    src: R,
    pos: u64,
}

impl<R: Read + Seek> EbmlReader<R> {
    pub fn new(mut src: R) -> Result<Self> {
        let pos = src.stream_position()?;
        Ok(Self { src, pos })
    }

    /// Current absolute offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Pseudo-element spanning the rest of the stream, used as the parent
    /// region for top-level iteration.
    pub fn root(&self) -> Element {
        Element {
            id: 0,
            size: None,
            offset: self.pos,
            data_offset: self.pos,
        }
    }

    /// Reads the next child element header inside `parent`.
    ///
    /// Returns `None` when the parent's byte budget is exhausted, or at a
    /// clean end-of-stream for unknown-size parents.
    pub fn next_child(&mut self, parent: &Element) -> Result<Option<Element>> {
        if let Some(end) = parent.end() {
            if self.pos >= end {
                return Ok(None);
            }
        }
        let offset = self.pos;
        let id = match self.read_id()? {
            Some(id) => id,
            None => return Ok(None),
        };
        let size = self.read_size()?;
        Ok(Some(Element {
            id,
            size,
            offset,
            data_offset: self.pos,
        }))
    }

    /// Advances to the byte immediately past the element payload.
    pub fn skip(&mut self, el: &Element) -> Result<()> {
        match el.end() {
            Some(end) => self.seek_to(end),
            None => Err(Error::Format(format!(
                "cannot skip unknown-size element {:#x}",
                el.id
            ))),
        }
    }

    /// Absolute reposition of the underlying source.
    pub fn seek_to(&mut self, abs: u64) -> Result<()> {
        if abs != self.pos {
            self.src.seek(SeekFrom::Start(abs))?;
            self.pos = abs;
        }
        Ok(())
    }

    /// Reads the whole payload of `el`. Only valid for known-size elements.
    pub fn read_data(&mut self, el: &Element) -> Result<Vec<u8>> {
        let size = el
            .size
            .ok_or_else(|| Error::Format(format!("unsized payload for {:#x}", el.id)))?;
        self.seek_to(el.data_offset)?;
        let mut data = vec![0u8; size as usize];
        self.src.read_exact(&mut data)?;
        self.pos += size;
        Ok(data)
    }

    /// Big-endian unsigned integer payload, 0–8 bytes.
    pub fn read_uint(&mut self, el: &Element) -> Result<u64> {
        let data = self.read_data(el)?;
        if data.len() > 8 {
            return Err(Error::Format(format!(
                "integer payload of {} bytes in {:#x}",
                data.len(),
                el.id
            )));
        }
        Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// IEEE float payload: 4 or 8 bytes (0 reads as 0.0).
    pub fn read_float(&mut self, el: &Element) -> Result<f64> {
        let data = self.read_data(el)?;
        match data.len() {
            0 => Ok(0.0),
            4 => Ok(f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64),
            8 => Ok(f64::from_be_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ])),
            n => Err(Error::Format(format!(
                "float payload of {n} bytes in {:#x}",
                el.id
            ))),
        }
    }

    /// String payload, interpreted as ISO-8859-1.
    pub fn read_string(&mut self, el: &Element) -> Result<String> {
        let data = self.read_data(el)?;
        Ok(data
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.src.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.src.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Element id: 1–4 byte VINT with the marker bit retained.
    /// `None` at a clean end-of-stream.
    fn read_id(&mut self) -> Result<Option<u32>> {
        let first = match self.read_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        if first == 0 {
            return Err(Error::Format("invalid element id (leading zero byte)".into()));
        }
        let extra = first.leading_zeros() as usize;
        if extra > 3 {
            return Err(Error::Format(format!(
                "element id wider than 4 bytes ({:#04x})",
                first
            )));
        }
        let mut id = u32::from(first);
        let mut rest = [0u8; 3];
        self.read_exact(&mut rest[..extra])?;
        for &b in &rest[..extra] {
            id = (id << 8) | u32::from(b);
        }
        Ok(Some(id))
    }

    /// Element size: 1–8 byte VINT with the marker stripped.
    /// All value bits set means "unknown size" and maps to `None`.
    fn read_size(&mut self) -> Result<Option<u64>> {
        let first = match self.read_byte()? {
            Some(b) => b,
            None => {
                return Err(Error::Format(
                    "end of stream inside an element header".into(),
                ))
            }
        };
        if first == 0 {
            return Err(Error::Format("invalid element size (leading zero byte)".into()));
        }
        let extra = first.leading_zeros() as usize;
        let mut value = u64::from(first) & (0x7F >> extra);
        let mut rest = [0u8; 7];
        self.read_exact(&mut rest[..extra])?;
        let mut all_ones = value == (0x7F >> extra) as u64;
        for &b in &rest[..extra] {
            value = (value << 8) | u64::from(b);
            all_ones = all_ones && b == 0xFF;
        }
        if all_ones {
            return Ok(None);
        }
        Ok(Some(value))
    }
}

/// Parses a VINT from the start of `data`, returning the value with the
/// marker stripped and the total encoded width in bytes. Used for lace
/// sizes, which are VINTs embedded in block payloads.
pub fn parse_vint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }
    let extra = first.leading_zeros() as usize;
    if data.len() < extra + 1 {
        return None;
    }
    let mut value = u64::from(first) & (0x7F >> extra);
    for &b in &data[1..=extra] {
        value = (value << 8) | u64::from(b);
    }
    Some((value, extra + 1))
}
