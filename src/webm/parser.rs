//! Segment-level parsing: header validation, SeekHead resolution, Tracks,
//! and the Cues index.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use super::ids;
use super::track::Track;
use crate::common::errors::{Error, Result};
use crate::ebml::{EbmlReader, Element};

/// One audio track described by the Tracks element. Entries without audio
/// settings are dropped during parsing.
#[derive(Debug, Clone)]
pub struct TrackEntry {
    pub number: u64,
    pub codec_id: String,
    pub sampling_frequency: f64,
    pub channels: u64,
}

/// Seek-index entry: a timestamp and one cluster position per track id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuePoint {
    pub timecode_ms: u64,
    /// Indexed directly by track id; grown on demand when a CueTrack id
    /// exceeds the retained track count.
    pub positions: Vec<u64>,
}

/// Streaming WebM parser. `parse` consumes it and hands the positioned
/// reader to the [`Track`] play loop.
pub struct Parser<R> {
    reader: EbmlReader<R>,
}

impl<R: Read + Seek> Parser<R> {
    pub fn new(src: R) -> Result<Self> {
        Ok(Self {
            reader: EbmlReader::new(src)?,
        })
    }

    /// Validates the EBML header and Segment, scans the Segment's head
    /// elements, and returns a playable track positioned at the first
    /// Cluster. Seeking works when a Cues index is reachable.
    pub fn parse(mut self) -> Result<Track<R>> {
        self.validate_header()?;
        let segment = self.validate_segment()?;
        self.parse_segment(segment)
    }

    fn validate_header(&mut self) -> Result<()> {
        let root = self.reader.root();
        let header = self
            .reader
            .next_child(&root)?
            .ok_or_else(|| Error::Format("empty stream".into()))?;
        if header.id != ids::EBML_HEADER {
            return Err(Error::Format(format!(
                "no ebml header provided: {:#x}",
                header.id
            )));
        }
        self.reader.skip(&header)
    }

    fn validate_segment(&mut self) -> Result<Element> {
        let root = self.reader.root();
        let segment = self
            .reader
            .next_child(&root)?
            .ok_or_else(|| Error::Format("stream ends after the ebml header".into()))?;
        if segment.id != ids::SEGMENT {
            return Err(Error::Format(format!(
                "got something that is not a segment: {:#x}",
                segment.id
            )));
        }
        Ok(segment)
    }

    /// Walks the Segment's children until the first Cluster, collecting the
    /// Cues location, the audio tracks and (when stored up front) the cue
    /// index itself. The reader is left positioned at the Cluster.
    fn parse_segment(mut self, segment: Element) -> Result<Track<R>> {
        let mut cues_offset = 0u64;
        let mut cue_points: Option<Vec<CuePoint>> = None;
        let mut tracks: Vec<TrackEntry> = Vec::new();

        while let Some(el) = self.reader.next_child(&segment)? {
            match el.id {
                ids::SEEK_HEAD => {
                    if let Some(pos) = self.parse_meta_seek(&el)? {
                        cues_offset = segment.data_offset + pos;
                    }
                    self.reader.skip(&el)?;
                }
                ids::TRACKS => {
                    tracks = self.parse_tracks(&el)?;
                    if tracks.is_empty() {
                        return Err(Error::Unplayable("no audio tracks found in segment".into()));
                    }
                    self.reader.skip(&el)?;
                }
                ids::CUES => {
                    cue_points = Some(parse_cues(&mut self.reader, &el, tracks.len())?);
                    self.reader.skip(&el)?;
                }
                ids::CLUSTER => {
                    // Play loop starts here; rewind so it re-reads the
                    // cluster header itself.
                    self.reader.seek_to(el.offset)?;
                    if tracks.is_empty() {
                        return Err(Error::Unplayable("no audio tracks found in segment".into()));
                    }
                    return Ok(Track::new(
                        self.reader,
                        segment,
                        cues_offset,
                        cue_points,
                        tracks,
                    ));
                }
                _ => self.reader.skip(&el)?,
            }
        }
        Err(Error::Format("segment contains no clusters".into()))
    }

    /// Returns the Cues position relative to the Segment payload, taken
    /// from the first Seek entry whose SeekId starts with 0x1C. Malformed
    /// entries are skipped.
    fn parse_meta_seek(&mut self, seekhead: &Element) -> Result<Option<u64>> {
        let mut found = None;
        while let Some(entry) = self.reader.next_child(seekhead)? {
            if entry.id == ids::SEEK && found.is_none() {
                match self.parse_seek_entry(&entry) {
                    Ok(Some((seek_id, position))) => {
                        if seek_id.first() == Some(&0x1C) {
                            found = Some(position);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("skipping malformed seek entry: {e}"),
                }
            }
            self.reader.skip(&entry)?;
        }
        if found.is_none() {
            debug!("seekhead has no cues entry; seeking will be unsupported");
        }
        Ok(found)
    }

    fn parse_seek_entry(&mut self, entry: &Element) -> Result<Option<(Vec<u8>, u64)>> {
        let mut seek_id = None;
        let mut position = None;
        while let Some(field) = self.reader.next_child(entry)? {
            match field.id {
                ids::SEEK_ID => seek_id = Some(self.reader.read_data(&field)?),
                ids::SEEK_POSITION => position = Some(self.reader.read_uint(&field)?),
                _ => self.reader.skip(&field)?,
            }
        }
        Ok(seek_id.zip(position))
    }

    /// Parses every TrackEntry and retains the ones with a non-zero audio
    /// channel count.
    fn parse_tracks(&mut self, tracks_el: &Element) -> Result<Vec<TrackEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.reader.next_child(tracks_el)? {
            if entry.id == ids::TRACK_ENTRY {
                let parsed = self.parse_track_entry(&entry)?;
                if parsed.channels != 0 {
                    entries.push(parsed);
                }
            }
            self.reader.skip(&entry)?;
        }
        Ok(entries)
    }

    fn parse_track_entry(&mut self, entry: &Element) -> Result<TrackEntry> {
        let mut parsed = TrackEntry {
            number: 0,
            codec_id: String::new(),
            sampling_frequency: 0.0,
            channels: 0,
        };
        while let Some(field) = self.reader.next_child(entry)? {
            match field.id {
                ids::TRACK_NUMBER => parsed.number = self.reader.read_uint(&field)?,
                ids::CODEC_ID => parsed.codec_id = self.reader.read_string(&field)?,
                ids::AUDIO => {
                    while let Some(audio_field) = self.reader.next_child(&field)? {
                        match audio_field.id {
                            ids::SAMPLING_FREQUENCY => {
                                parsed.sampling_frequency = self.reader.read_float(&audio_field)?;
                            }
                            ids::CHANNELS => {
                                parsed.channels = self.reader.read_uint(&audio_field)?;
                            }
                            _ => self.reader.skip(&audio_field)?,
                        }
                    }
                }
                _ => self.reader.skip(&field)?,
            }
        }
        Ok(parsed)
    }
}

/// Parses a Cues element into the in-memory index. `track_count` sizes the
/// per-point position vectors; ids beyond it grow the vector instead of
/// failing.
pub(crate) fn parse_cues<R: Read + Seek>(
    reader: &mut EbmlReader<R>,
    cues: &Element,
    track_count: usize,
) -> Result<Vec<CuePoint>> {
    if cues.id != ids::CUES {
        warn!("wrong cues id {:#x}", cues.id);
    }
    let mut points = Vec::new();
    while let Some(point) = reader.next_child(cues)? {
        if point.id != ids::CUE_POINT {
            reader.skip(&point)?;
            continue;
        }
        let mut timecode_ms = 0u64;
        let mut positions = vec![0u64; track_count + 1];
        while let Some(field) = reader.next_child(&point)? {
            match field.id {
                ids::CUE_TIME => timecode_ms = reader.read_uint(&field)?,
                ids::CUE_TRACK_POSITIONS => {
                    let mut track = None;
                    let mut cluster_position = None;
                    while let Some(pos_field) = reader.next_child(&field)? {
                        match pos_field.id {
                            ids::CUE_TRACK => track = Some(reader.read_uint(&pos_field)?),
                            ids::CUE_CLUSTER_POSITION => {
                                cluster_position = Some(reader.read_uint(&pos_field)?);
                            }
                            _ => reader.skip(&pos_field)?,
                        }
                    }
                    if let (Some(track), Some(position)) = (track, cluster_position) {
                        let idx = track as usize;
                        if idx >= positions.len() {
                            positions.resize(idx + 1, 0);
                        }
                        positions[idx] = position;
                    }
                }
                _ => reader.skip(&field)?,
            }
        }
        points.push(CuePoint {
            timecode_ms,
            positions,
        });
        reader.skip(&point)?;
    }
    Ok(points)
}
