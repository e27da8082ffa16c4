//! riffle — the core media pipeline of a voice-streaming engine.
//!
//! Resolves a YouTube watch page into a direct `audio/webm` stream URL
//! (deciphering the signature when the stream is signed), reads the resource
//! through a range-aware HTTP reader, demuxes the WebM container on the fly
//! and emits timecoded raw Opus frames over a channel, ready for a voice
//! transport. Seek, pause and shutdown are serviced out-of-band through a
//! control channel while the demuxer runs.
//!
//! The demuxer forwards already-encoded Opus; there is no decode or
//! transcode path here.

pub mod common;
pub mod ebml;
pub mod player;
pub mod remote;
pub mod webm;
pub mod youtube;

pub use common::errors::{Error, Result};
pub use common::types::{ControlSignal, FramePacket};
pub use player::Player;
pub use remote::RangeReader;
pub use youtube::Source;
