use std::time::Duration;

/// Control channel depth. Lets a consumer enqueue `Pause`, `Seek` and
/// `Shutdown` in quick succession without blocking; the demuxer drains to
/// the latest signal at cluster boundaries.
pub const CONTROL_CHANNEL_CAPACITY: usize = 3;

/// Frame channel depth. Small on purpose: the consumer's pace is the
/// pipeline's pace.
pub const FRAME_CHANNEL_CAPACITY: usize = 16;

/// A single encoded audio frame (or one lace of a laced block).
///
/// `timecode` is the cluster's absolute timestamp plus the block's relative
/// offset, in milliseconds of stream time. `data` is the raw codec payload,
/// forwarded without inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub timecode: Duration,
    pub data: Vec<u8>,
}

/// Out-of-band signals accepted by the demuxer play loop.
///
/// Signals are coalesced at cluster boundaries: in a burst only the latest
/// one takes effect, except that an observed `Shutdown` always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Reposition to the cluster covering the given stream time.
    Seek(Duration),
    /// Park the play loop until `Resume` or `Shutdown`.
    Pause,
    Resume,
    /// Exit the play loop and close the frame channel.
    Shutdown,
}
