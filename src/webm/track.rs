//! The playable side of a parsed WebM stream: the frame-emitting play loop,
//! block lacing, and the cue-driven internal seek.

use std::io::{Read, Seek};
use std::time::Duration;

use tracing::{debug, error, warn};

use super::ids;
use super::parser::{parse_cues, CuePoint, TrackEntry};
use crate::common::errors::{Error, Result};
use crate::common::types::{
    ControlSignal, FramePacket, CONTROL_CHANNEL_CAPACITY, FRAME_CHANNEL_CAPACITY,
};
use crate::ebml::{parse_vint, EbmlReader, Element};

/// Control and consumption side of a playing track. Cheap to clone; all
/// handles feed the same play loop.
#[derive(Clone)]
pub struct TrackHandle {
    frames: flume::Receiver<FramePacket>,
    control: flume::Sender<ControlSignal>,
    sample_rate: u32,
    channels: u32,
    codec: String,
    seekable: bool,
}

impl TrackHandle {
    /// Receiver of demuxed frames. Closed when the play loop exits.
    pub fn frames(&self) -> &flume::Receiver<FramePacket> {
        &self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Codec id, lower-cased with the `A_` prefix stripped ("opus").
    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Asks the play loop to reposition. Takes effect after the current
    /// cluster completes. Fails for live streams without a cue index.
    pub fn seek(&self, position: Duration) -> Result<()> {
        if !self.seekable {
            return Err(Error::Unsupported(
                "seeks are not supported in streams".into(),
            ));
        }
        let _ = self.control.send(ControlSignal::Seek(position));
        Ok(())
    }

    pub fn pause(&self) {
        let _ = self.control.send(ControlSignal::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(ControlSignal::Resume);
    }

    /// Stops the play loop. The frame channel closes once the loop exits.
    pub fn close(&self) {
        let _ = self.control.send(ControlSignal::Shutdown);
    }
}

/// A playable audio track inside a WebM Segment. Owns the byte source for
/// the whole play session; [`Track::play`] runs the demux loop to
/// completion and is meant for a dedicated (blocking) task.
pub struct Track<R> {
    reader: EbmlReader<R>,
    segment: Element,
    /// Absolute offset of the Cues element; 0 when unknown (live stream).
    cues_offset: u64,
    cue_points: Option<Vec<CuePoint>>,
    tracks: Vec<TrackEntry>,
    track_id: u64,
    sample_rate: u32,
    channels: u32,
    codec: String,
    frames: flume::Sender<FramePacket>,
    control: flume::Receiver<ControlSignal>,
    handle: Option<TrackHandle>,
}

impl<R: Read + Seek> Track<R> {
    pub(crate) fn new(
        reader: EbmlReader<R>,
        segment: Element,
        cues_offset: u64,
        cue_points: Option<Vec<CuePoint>>,
        tracks: Vec<TrackEntry>,
    ) -> Self {
        let active = &tracks[0];
        let track_id = active.number;
        let sample_rate = active.sampling_frequency as u32;
        let channels = active.channels as u32;
        let codec = active
            .codec_id
            .strip_prefix("A_")
            .unwrap_or(&active.codec_id)
            .to_lowercase();

        let (frames_tx, frames_rx) = flume::bounded(FRAME_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = flume::bounded(CONTROL_CHANNEL_CAPACITY);
        let handle = TrackHandle {
            frames: frames_rx,
            control: control_tx,
            sample_rate,
            channels,
            codec: codec.clone(),
            seekable: cues_offset != 0,
        };

        Self {
            reader,
            segment,
            cues_offset,
            cue_points,
            tracks,
            track_id,
            sample_rate,
            channels,
            codec,
            frames: frames_tx,
            control: control_rx,
            handle: Some(handle),
        }
    }

    /// Takes the control/consumption handle. Available exactly once: the
    /// track must not keep a frame receiver of its own, or a consumer
    /// dropping theirs would never close the channel. Clone the handle for
    /// additional controllers.
    pub fn handle(&mut self) -> Option<TrackHandle> {
        self.handle.take()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn is_seekable(&self) -> bool {
        self.cues_offset != 0
    }

    /// Runs the demux loop until shutdown, end of stream, or a fatal error,
    /// then closes the frame channel.
    pub fn play(mut self) {
        // An unclaimed handle would keep the frame channel's receiver side
        // alive from inside this task; drop it so consumer-side drops are
        // observable as send errors.
        self.handle = None;
        match self.run() {
            Ok(()) => debug!("play loop finished"),
            Err(e) => error!("play error: {e}"),
        }
    }

    fn run(&mut self) -> Result<()> {
        'play: loop {
            let el = match self.reader.next_child(&self.segment)? {
                Some(el) => el,
                None => break,
            };

            let mut pending = None;
            if el.id == ids::CLUSTER {
                match self.handle_cluster(&el)? {
                    ClusterOutcome::Completed(signal) => pending = signal,
                    ClusterOutcome::Disconnected | ClusterOutcome::Shutdown => break,
                }
            } else {
                self.reader.skip(&el)?;
            }

            // Coalesce at the cluster boundary: latest signal wins, except
            // that any observed Shutdown is final.
            let mut shutdown = false;
            let mut latest = pending;
            while let Ok(signal) = self.control.try_recv() {
                shutdown |= signal == ControlSignal::Shutdown;
                latest = Some(signal);
            }
            if shutdown {
                break;
            }

            match latest {
                Some(ControlSignal::Pause) => loop {
                    match self.control.recv() {
                        Ok(ControlSignal::Resume) => break,
                        Ok(ControlSignal::Shutdown) | Err(_) => break 'play,
                        Ok(_) => {}
                    }
                },
                Some(ControlSignal::Seek(position)) => {
                    match self.internal_seek(position) {
                        // playback continues; only the seek is refused
                        Err(Error::Unsupported(msg)) => warn!("seek rejected: {msg}"),
                        Err(fatal) => return Err(fatal),
                        Ok(()) => {}
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Decodes one cluster, emitting a packet per frame. Between blocks the
    /// control channel depth is checked: a Shutdown acts immediately, any
    /// other signal is deferred to the cluster boundary.
    fn handle_cluster(&mut self, cluster: &Element) -> Result<ClusterOutcome> {
        let mut pending = None;
        let mut timecode_ms = 0u64;

        loop {
            while let Ok(signal) = self.control.try_recv() {
                if signal == ControlSignal::Shutdown {
                    return Ok(ClusterOutcome::Shutdown);
                }
                pending = Some(signal);
            }

            let child = match self.reader.next_child(cluster)? {
                Some(child) => child,
                None => break,
            };

            // Unknown-size clusters (live) end where the next one begins.
            if cluster.size.is_none() && child.id == ids::CLUSTER {
                self.reader.seek_to(child.offset)?;
                break;
            }

            match child.id {
                ids::TIMECODE => timecode_ms = self.reader.read_uint(&child)?,
                ids::SIMPLE_BLOCK => {
                    let block = self.reader.read_data(&child)?;
                    if !self.send_block(&block, timecode_ms) {
                        return Ok(ClusterOutcome::Disconnected);
                    }
                }
                ids::BLOCK_GROUP => {
                    let mut block = None;
                    while let Some(grandchild) = self.reader.next_child(&child)? {
                        if grandchild.id == ids::BLOCK && block.is_none() {
                            block = Some(self.reader.read_data(&grandchild)?);
                        } else {
                            self.reader.skip(&grandchild)?;
                        }
                    }
                    if let Some(block) = block {
                        if !self.send_block(&block, timecode_ms) {
                            return Ok(ClusterOutcome::Disconnected);
                        }
                    }
                }
                _ => self.reader.skip(&child)?,
            }
        }
        Ok(ClusterOutcome::Completed(pending))
    }

    /// Splits a block into frames and emits them. Returns `false` when the
    /// consumer is gone.
    fn send_block(&mut self, block: &[u8], cluster_ms: u64) -> bool {
        if block.len() <= 4 {
            return true;
        }
        let delta = i16::from_be_bytes([block[1], block[2]]);
        let position_ms = (cluster_ms as i64 + i64::from(delta)).max(0) as u64;
        let timecode = Duration::from_millis(position_ms);

        let frames = match block_frames(block) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("skipping undecodable block: {e}");
                return true;
            }
        };
        for frame in frames {
            if frame.is_empty() {
                continue;
            }
            let packet = FramePacket {
                timecode,
                data: frame.to_vec(),
            };
            if self.frames.send(packet).is_err() {
                return false;
            }
        }
        true
    }

    /// Repositions to the cluster indexed just at or before `position`,
    /// resolving the cue index on demand.
    fn internal_seek(&mut self, position: Duration) -> Result<()> {
        if self.cues_offset == 0 {
            return Err(Error::Unsupported(
                "seeks are not supported in streams".into(),
            ));
        }
        if self.cue_points.is_none() {
            self.reader.seek_to(self.cues_offset)?;
            let cues = self
                .reader
                .next_child(&self.segment)?
                .ok_or_else(|| Error::Format("cues not found at indexed offset".into()))?;
            self.cue_points = Some(parse_cues(&mut self.reader, &cues, self.tracks.len())?);
        }

        let target_ms = position.as_millis() as u64;
        let track_idx = self.track_id as usize;
        let mut last_position = 0u64;
        if let Some(points) = &self.cue_points {
            for point in points {
                if point.timecode_ms > target_ms {
                    break;
                }
                last_position = point.positions.get(track_idx).copied().unwrap_or(0);
            }
        }
        self.reader.seek_to(self.segment.data_offset + last_position)
    }
}

enum ClusterOutcome {
    /// Cluster fully decoded; carries a signal seen between blocks.
    Completed(Option<ControlSignal>),
    Shutdown,
    /// The frame receiver was dropped.
    Disconnected,
}

/// Splits a block (header included) into its laced frames. The caller has
/// verified `block.len() > 4`.
pub(crate) fn block_frames(block: &[u8]) -> Result<Vec<&[u8]>> {
    let lacing = (block[3] >> 1) & 3;
    if lacing == 0 {
        return Ok(vec![&block[4..]]);
    }
    let (sizes, payload_start) = match lacing {
        1 => parse_xiph_sizes(block)?,
        2 => parse_fixed_sizes(block)?,
        _ => parse_ebml_sizes(block)?,
    };
    let payload = block
        .get(payload_start..)
        .ok_or_else(|| Error::Format("laced block shorter than its size table".into()))?;

    let mut frames = Vec::with_capacity(sizes.len() + 1);
    let mut at = 0usize;
    for size in sizes {
        let frame = payload
            .get(at..at + size)
            .ok_or_else(|| Error::Format("lace overruns its block".into()))?;
        frames.push(frame);
        at += size;
    }
    // The final lace is the remainder of the payload.
    frames.push(
        payload
            .get(at..)
            .ok_or_else(|| Error::Format("lace overruns its block".into()))?,
    );
    Ok(frames)
}

fn lace_count(block: &[u8]) -> Result<usize> {
    block
        .get(4)
        .map(|&b| b as usize)
        .ok_or_else(|| Error::Format("truncated laced block".into()))
}

/// Xiph lacing: each of the `laces - 1` leading sizes is a run of 0xFF
/// bytes plus a terminator byte.
fn parse_xiph_sizes(block: &[u8]) -> Result<(Vec<usize>, usize)> {
    let extra = lace_count(block)?;
    let mut sizes = vec![0usize; extra];
    let mut at = 5usize;
    for size in sizes.iter_mut() {
        loop {
            let byte = *block
                .get(at)
                .ok_or_else(|| Error::Format("truncated xiph size table".into()))?;
            at += 1;
            *size += byte as usize;
            if byte != 255 {
                break;
            }
        }
    }
    Ok((sizes, at))
}

/// Fixed-size lacing: the payload divides evenly across the laces.
fn parse_fixed_sizes(block: &[u8]) -> Result<(Vec<usize>, usize)> {
    let extra = lace_count(block)?;
    let at = 5usize;
    let payload_len = block.len() - at;
    let size = payload_len / (extra + 1);
    Ok((vec![size; extra], at))
}

/// EBML lacing: the first size is a VINT, each following size is the
/// previous plus a signed VINT delta (bias `2^(7w-1) - 1`).
fn parse_ebml_sizes(block: &[u8]) -> Result<(Vec<usize>, usize)> {
    let extra = lace_count(block)?;
    let mut sizes = vec![0usize; extra];
    let mut at = 5usize;
    if extra > 0 {
        let (first, width) = parse_vint(&block[at.min(block.len())..])
            .ok_or_else(|| Error::Format("truncated ebml size table".into()))?;
        sizes[0] = first as usize;
        at += width;
        for i in 1..extra {
            let (raw, width) = parse_vint(&block[at.min(block.len())..])
                .ok_or_else(|| Error::Format("truncated ebml size table".into()))?;
            let bias = (1i64 << (7 * width as u32 - 1)) - 1;
            let delta = raw as i64 - bias;
            let size = sizes[i - 1] as i64 + delta;
            if size < 0 {
                return Err(Error::Format("negative lace size".into()));
            }
            sizes[i] = size as usize;
            at += width;
        }
    }
    Ok((sizes, at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_header(lacing: u8, laces: usize) -> Vec<u8> {
        // track 1, delta 0, lacing flags, lace count
        let mut out = vec![0x81, 0x00, 0x00, lacing << 1];
        if lacing != 0 {
            out.push((laces - 1) as u8);
        }
        out
    }

    #[test]
    fn unlaced_block_is_one_frame() {
        let mut block = block_header(0, 1);
        block.extend_from_slice(&[9, 8, 7]);
        let frames = block_frames(&block).unwrap();
        assert_eq!(frames, vec![&[9u8, 8, 7][..]]);
    }

    #[test]
    fn xiph_lacing_round_trip() {
        let parts: Vec<Vec<u8>> = vec![vec![1u8; 300], vec![2u8; 255], vec![3u8; 40]];
        let mut block = block_header(1, parts.len());
        // sizes for all but the last lace, 255-run encoded
        for part in &parts[..parts.len() - 1] {
            let mut n = part.len();
            while n >= 255 {
                block.push(255);
                n -= 255;
            }
            block.push(n as u8);
        }
        for part in &parts {
            block.extend_from_slice(part);
        }
        let frames = block_frames(&block).unwrap();
        assert_eq!(frames.len(), parts.len());
        for (frame, part) in frames.iter().zip(&parts) {
            assert_eq!(*frame, part.as_slice());
        }
    }

    #[test]
    fn fixed_lacing_round_trip() {
        let parts: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 120]).collect();
        let mut block = block_header(2, parts.len());
        for part in &parts {
            block.extend_from_slice(part);
        }
        let frames = block_frames(&block).unwrap();
        assert_eq!(frames.len(), 4);
        for (frame, part) in frames.iter().zip(&parts) {
            assert_eq!(*frame, part.as_slice());
        }
    }

    #[test]
    fn ebml_lacing_round_trip() {
        let parts: Vec<Vec<u8>> = vec![vec![1u8; 500], vec![2u8; 410], vec![3u8; 700]];
        let mut block = block_header(3, parts.len());
        // first size: 2-byte VINT (500 = 0x1F4)
        block.extend_from_slice(&[0x41, 0xF4]);
        // delta -90 as 2-byte signed VINT: bias 0x1FFF
        let raw = (0x1FFFi64 - 90) as u16;
        block.extend_from_slice(&[0x40 | (raw >> 8) as u8, (raw & 0xFF) as u8]);
        for part in &parts {
            block.extend_from_slice(part);
        }
        let frames = block_frames(&block).unwrap();
        assert_eq!(frames.len(), 3);
        for (frame, part) in frames.iter().zip(&parts) {
            assert_eq!(*frame, part.as_slice());
        }
    }

    #[test]
    fn truncated_lace_table_is_a_format_error() {
        let block = vec![0x81, 0x00, 0x00, 1 << 1, 2, 255];
        assert!(matches!(block_frames(&block), Err(Error::Format(_))));
    }

    #[test]
    fn lace_overrun_is_a_format_error() {
        // one leading lace of 200 bytes, but only 10 payload bytes present
        let mut block = vec![0x81, 0x00, 0x00, 1 << 1, 1, 200];
        block.extend_from_slice(&[0u8; 10]);
        assert!(matches!(block_frames(&block), Err(Error::Format(_))));
    }
}
