//! Player orchestration: owns the demuxer task and bridges the control
//! plane (seek/pause/close) to the data plane (the frame channel).

use std::io::{Read, Seek};
use std::time::Duration;

use tracing::debug;

use crate::common::errors::{Error, Result};
use crate::common::types::FramePacket;
use crate::webm;
use crate::webm::TrackHandle;

/// A playing track. Spawns the demux loop on the blocking pool and hands
/// frames to the consumer, tracking the last emitted position.
pub struct Player {
    handle: TrackHandle,
    position: Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Player {
    /// Starts playback of a parsed track.
    pub fn spawn<R>(mut track: webm::Track<R>) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let handle = track
            .handle()
            .ok_or_else(|| Error::Unplayable("track handle already claimed".into()))?;
        let task = tokio::task::spawn_blocking(move || track.play());
        Ok(Self {
            handle,
            position: Duration::ZERO,
            task: Some(task),
        })
    }

    /// Next demuxed frame, or `None` once the play loop has exited and the
    /// channel drained.
    pub async fn next_frame(&mut self) -> Option<FramePacket> {
        match self.handle.frames().recv_async().await {
            Ok(packet) => {
                self.position = packet.timecode;
                Some(packet)
            }
            Err(_) => None,
        }
    }

    /// Timecode of the most recently consumed frame.
    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn sample_rate(&self) -> u32 {
        self.handle.sample_rate()
    }

    pub fn channels(&self) -> u32 {
        self.handle.channels()
    }

    pub fn codec(&self) -> &str {
        self.handle.codec()
    }

    pub fn is_seekable(&self) -> bool {
        self.handle.is_seekable()
    }

    /// Requests a reposition; applied after the current cluster.
    pub fn seek(&self, position: Duration) -> Result<()> {
        self.handle.seek(position)
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn resume(&self) {
        self.handle.resume();
    }

    /// Signals shutdown without waiting for the demux task.
    pub fn stop(&self) {
        self.handle.close();
    }

    /// Stops playback and waits for the demux task to wind down.
    pub async fn close(mut self) {
        self.handle.close();
        if let Some(task) = self.task.take() {
            // The loop may be blocked on a frame send; draining is not
            // needed because dropping our receiver unblocks it.
            drop(self.handle);
            if task.await.is_err() {
                debug!("demux task aborted");
            }
        }
    }
}
