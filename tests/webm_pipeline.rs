//! End-to-end demuxing over in-memory WebM fixtures: frame cadence,
//! mid-track seeks, live-stream seek rejection, and shutdown ordering.

mod common;

use std::io::Cursor;
use std::time::Duration;

use riffle::webm::Parser;
use riffle::{Error, Player};

use common::{build_webm, build_webm_layout, CuesLayout, FRAME_INTERVAL_MS};

fn parse(bytes: Vec<u8>) -> riffle::webm::Track<Cursor<Vec<u8>>> {
    common::init_tracing();
    Parser::new(Cursor::new(bytes)).unwrap().parse().unwrap()
}

fn frame_index(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_emits_every_frame_in_order() {
    // 6 clusters x 50 frames = 300 packets at 20 ms cadence
    let track = parse(build_webm(6, 50, true));
    assert_eq!(track.codec(), "opus");
    assert_eq!(track.sample_rate(), 48_000);
    assert_eq!(track.channels(), 2);
    assert!(track.is_seekable());

    let mut player = Player::spawn(track).unwrap();
    let mut packets = Vec::new();
    while let Some(packet) = player.next_frame().await {
        packets.push(packet);
    }

    assert_eq!(packets.len(), 300);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(
            packet.timecode,
            Duration::from_millis(i as u64 * FRAME_INTERVAL_MS)
        );
        assert_eq!(frame_index(&packet.data), i as u32);
    }
    assert_eq!(player.position(), Duration::from_millis(5980));
    player.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timecodes_are_non_decreasing_without_seeks() {
    let track = parse(build_webm(4, 25, true));
    let mut player = Player::spawn(track).unwrap();
    let mut last = Duration::ZERO;
    while let Some(packet) = player.next_frame().await {
        assert!(packet.timecode >= last);
        last = packet.timecode;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn seek_jumps_to_the_cue_at_or_below_the_target() {
    // 20 seconds, cue per cluster per second
    let track = parse(build_webm(20, 50, true));
    let mut player = Player::spawn(track).unwrap();

    for _ in 0..50 {
        player.next_frame().await.unwrap();
    }
    player.seek(Duration::from_secs(10)).unwrap();

    // Frames from clusters already in flight may still arrive; the seek
    // lands on the cluster indexed at 10s, and from there on no earlier
    // timecode appears again.
    let cue_target = Duration::from_millis(10_000);
    let mut jumped = false;
    let mut last = Duration::ZERO;
    let mut frames_after_jump = 0usize;
    let mut total = 50usize;
    while let Some(packet) = player.next_frame().await {
        total += 1;
        if jumped {
            assert!(
                packet.timecode >= cue_target,
                "timecode went backward after the seek took effect"
            );
            assert!(packet.timecode >= last);
            frames_after_jump += 1;
        } else if packet.timecode == cue_target && frame_index(&packet.data) == 500 {
            // first frame of the cluster the cue points at
            jumped = true;
            frames_after_jump = 1;
        }
        last = packet.timecode;
    }
    assert!(jumped, "seek never took effect");
    // clusters 10..20: 500 frames
    assert_eq!(frames_after_jump, 500);
    // the seek must actually have skipped ahead, not played through
    assert!(total < 1000, "seek did not skip any content ({total} frames)");
}

#[tokio::test(flavor = "multi_thread")]
async fn eagerly_parsed_cues_serve_seeks_too() {
    // cues stored ahead of the clusters are parsed during the segment scan
    let track = parse(build_webm_layout(8, 10, CuesLayout::UpFront));
    assert!(track.is_seekable());

    let mut player = Player::spawn(track).unwrap();
    player.seek(Duration::from_secs(6)).unwrap();

    let mut reached_target_cluster = false;
    while let Some(packet) = player.next_frame().await {
        if packet.timecode >= Duration::from_millis(6000) {
            reached_target_cluster = true;
        }
    }
    assert!(reached_target_cluster);
}

#[tokio::test(flavor = "multi_thread")]
async fn seek_past_the_end_uses_the_last_cue() {
    let track = parse(build_webm(5, 10, true));
    let mut player = Player::spawn(track).unwrap();
    player.seek(Duration::from_secs(60)).unwrap();

    let mut saw_last_cluster = false;
    while let Some(packet) = player.next_frame().await {
        if packet.timecode >= Duration::from_millis(4000) {
            saw_last_cluster = true;
        }
    }
    assert!(saw_last_cluster, "last cluster never played after the seek");
}

#[tokio::test(flavor = "multi_thread")]
async fn live_streams_reject_seeks_and_keep_playing() {
    let track = parse(build_webm(6, 50, false));
    assert!(!track.is_seekable());

    let mut player = Player::spawn(track).unwrap();
    match player.seek(Duration::from_secs(5)) {
        Err(Error::Unsupported(msg)) => assert!(msg.contains("streams")),
        Err(e) => panic!("expected unsupported, got {e}"),
        Ok(()) => panic!("seek on a live stream must fail"),
    }

    // playback is uninterrupted
    let mut count = 0usize;
    while player.next_frame().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 300);
}

#[test]
fn pause_then_shutdown_emits_no_further_frames() {
    // small enough that even a regression cannot fill the frame channel
    let mut track = parse(build_webm(1, 5, true));
    let handle = track.handle().unwrap();

    handle.pause();
    handle.close();
    track.play();

    assert!(handle.frames().try_recv().is_err());
}

#[test]
fn dropping_the_consumer_stops_the_play_loop() {
    let mut track = parse(build_webm(10, 50, true));
    let handle = track.handle().unwrap();
    drop(handle);
    // would block forever on the bounded frame channel if the send error
    // were not treated as shutdown
    track.play();
}
