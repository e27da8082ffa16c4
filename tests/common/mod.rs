//! Shared test support: tracing setup plus a minimal EBML writer used to
//! synthesize WebM streams in memory.

#![allow(dead_code)]

/// Installs a fmt subscriber once per test binary so the pipeline's
/// `tracing` output (reader reconnects, tolerated parse skips, play-loop
/// termination) is visible under `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Encodes an element with its id bytes and an 8-byte size field. The
/// fixed-width size keeps every offset in a fixture independent of the
/// values stored, which makes cue positions straightforward to compute.
pub fn el(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    if id > 0xFF_FFFF {
        out.extend_from_slice(&id.to_be_bytes());
    } else if id > 0xFFFF {
        out.extend_from_slice(&id.to_be_bytes()[1..]);
    } else if id > 0xFF {
        out.extend_from_slice(&id.to_be_bytes()[2..]);
    } else {
        out.push(id as u8);
    }
    out.push(0x01);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

/// Unsigned integer element, 8-byte payload.
pub fn uint(id: u32, value: u64) -> Vec<u8> {
    el(id, &value.to_be_bytes())
}

/// 8-byte float element.
pub fn float(id: u32, value: f64) -> Vec<u8> {
    el(id, &value.to_be_bytes())
}

/// A SimpleBlock for track 1 with a relative timestamp and no lacing.
/// The payload is the frame's global index, so tests can assert exactly
/// which frame arrived.
pub fn simple_block(delta_ms: i16, frame_index: u32) -> Vec<u8> {
    let mut block = vec![0x81];
    block.extend_from_slice(&delta_ms.to_be_bytes());
    block.push(0x00);
    block.extend_from_slice(&frame_index.to_be_bytes());
    el(0xA3, &block)
}

pub const FRAME_INTERVAL_MS: u64 = 20;

/// Where the Cues element sits relative to the clusters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CuesLayout {
    /// The usual shape: Cues after the last cluster, reached via SeekHead.
    Trailing,
    /// Cues stored up front, parsed eagerly during the segment scan.
    UpFront,
    /// No Cues at all; the SeekHead points elsewhere (live-stream shape).
    None,
}

/// Builds a playable WebM stream: one Opus track (id 1, 48 kHz, stereo),
/// one cluster per second with `frames_per_cluster` 20 ms frames, a
/// SeekHead, and a Cues element per `layout`.
pub fn build_webm_layout(
    cluster_count: usize,
    frames_per_cluster: usize,
    layout: CuesLayout,
) -> Vec<u8> {
    let with_cues = layout != CuesLayout::None;
    let audio = [float(0xB5, 48_000.0), uint(0x9F, 2)].concat();
    let entry = [
        uint(0xD7, 1),
        el(0x86, b"A_OPUS"),
        el(0xE1, &audio),
    ]
    .concat();
    let tracks = el(0x1654AE6B, &el(0xAE, &entry));

    let mut clusters = Vec::with_capacity(cluster_count);
    let mut frame_index = 0u32;
    for k in 0..cluster_count {
        let mut payload = uint(0xE7, (k as u64) * 1000);
        for f in 0..frames_per_cluster {
            let delta = (f as u64 * FRAME_INTERVAL_MS) as i16;
            payload.extend(simple_block(delta, frame_index));
            frame_index += 1;
        }
        clusters.push(el(0x1F43B675, &payload));
    }

    let seekhead = |position: u64| -> Vec<u8> {
        // a live fixture's SeekHead points at Tracks instead of Cues
        let seek_id: &[u8] = if with_cues {
            &[0x1C, 0x53, 0xBB, 0x6B]
        } else {
            &[0x16, 0x54, 0xAE, 0x6B]
        };
        let seek = [el(0x53AB, seek_id), uint(0x53AC, position)].concat();
        el(0x114D9B74, &el(0x4DBB, &seek))
    };

    // the 8-byte integer encoding makes every element's size independent of
    // the values stored, so the cues block can be measured with zeroed
    // positions and rebuilt once the real offsets are known
    let build_cues = |first_cluster_at: u64| -> Vec<u8> {
        let mut payload = Vec::new();
        let mut cluster_position = first_cluster_at;
        for (k, cluster) in clusters.iter().enumerate() {
            let positions = [uint(0xF7, 1), uint(0xF1, cluster_position)].concat();
            let point = [uint(0xB3, (k as u64) * 1000), el(0xB7, &positions)].concat();
            payload.extend(el(0xBB, &point));
            cluster_position += cluster.len() as u64;
        }
        el(0x1C53BB6B, &payload)
    };

    let head_len = (seekhead(0).len() + tracks.len()) as u64;
    let clusters_len: u64 = clusters.iter().map(|c| c.len() as u64).sum();

    let (cues_position, cues) = match layout {
        CuesLayout::UpFront => {
            let cues_len = build_cues(0).len() as u64;
            (head_len, build_cues(head_len + cues_len))
        }
        _ => (head_len + clusters_len, build_cues(head_len)),
    };

    let mut segment_payload = seekhead(cues_position);
    segment_payload.extend(tracks);
    if layout == CuesLayout::UpFront {
        segment_payload.extend_from_slice(&cues);
    }
    for cluster in &clusters {
        segment_payload.extend_from_slice(cluster);
    }
    if layout == CuesLayout::Trailing {
        segment_payload.extend_from_slice(&cues);
    }

    let mut out = el(0x1A45DFA3, &[]);
    out.extend(el(0x18538067, &segment_payload));
    out
}

/// The common shape: trailing cues when `with_cues`, live otherwise.
pub fn build_webm(cluster_count: usize, frames_per_cluster: usize, with_cues: bool) -> Vec<u8> {
    let layout = if with_cues {
        CuesLayout::Trailing
    } else {
        CuesLayout::None
    };
    build_webm_layout(cluster_count, frames_per_cluster, layout)
}
