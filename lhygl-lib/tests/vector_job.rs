//! End-to-end vector job encoding and the persisted job-file format.

mod common;

use common::*;
use lhygl_lib::egv::write_job_file;

fn seg(x0: i64, y0: i64, x1: i64, y1: i64, loop_id: u32, feed: f64, laser_on: bool) -> Segment {
    Segment {
        x0,
        y0,
        x1,
        y1,
        loop_id,
        feed,
        laser_on,
    }
}

#[test]
fn continuous_stroke_cuts_without_rapids() {
    let segments = [
        seg(0, 0, 100, 0, 1, 30.0, true),
        seg(100, 0, 100, 50, 1, 30.0, true),
        seg(100, 50, 0, 0, 1, 30.0, true),
    ];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let sim = simulate(&enc.into_stream());

    assert_eq!((sim.x, sim.y), (0, 0), "closed loop returns to origin");
    // Every move after the prologue cuts; the diagonal leg decomposes into
    // several runs but all of them carry the laser.
    let cut_dx: i64 = sim.cuts.iter().map(|c| c.dx).sum();
    let cut_dy: i64 = sim.cuts.iter().map(|c| c.dy).sum();
    assert_eq!((cut_dx, cut_dy), (0, 0));
    assert!(sim.cuts.iter().any(|c| c.dx == 100 && c.dy == 0));
}

#[test]
fn loop_discontinuity_forces_a_rapid_move() {
    let segments = [
        seg(0, 0, 100, 0, 1, 30.0, true),
        seg(200, 80, 250, 80, 2, 30.0, true),
    ];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let sim = simulate(&enc.into_stream());

    assert_eq!((sim.x, sim.y), (250, 80));
    // The (100,80) gap is travelled laser-off: cuts are the two strokes only.
    assert_eq!(sim.cuts.iter().map(|c| c.dx).sum::<i64>(), 150);
    assert!(sim.cuts.iter().all(|c| c.dy == 0));
}

#[test]
fn position_gap_within_a_loop_also_rapids() {
    let segments = [
        seg(0, 0, 10, 0, 1, 30.0, true),
        seg(50, 0, 60, 0, 1, 30.0, true),
    ];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let sim = simulate(&enc.into_stream());
    assert_eq!(sim.cuts.iter().map(|c| c.dx).sum::<i64>(), 20);
    assert_eq!(sim.x, 60);
}

#[test]
fn feed_change_mid_job_reissues_the_speed_token() {
    let segments = [
        seg(0, 0, 100, 0, 1, 30.0, true),
        seg(100, 0, 200, 0, 2, 50.0, true),
    ];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let stream = enc.into_stream();
    let text = String::from_utf8_lossy(&stream);

    assert!(text.contains('@'), "pause marker missing: {text}");
    let slow = lhygl_lib::speed::make_speed_code(30.0, 0, Board::M2, 0.0, None);
    let fast = lhygl_lib::speed::make_speed_code(50.0, 0, Board::M2, 0.0, None);
    assert!(text.contains(&slow));
    assert!(text.contains(&fast));
    // The pause must come after the first token and before the second.
    assert!(text.find('@').unwrap() > text.find(&slow).unwrap());
    assert!(text.find('@').unwrap() < text.find(&fast).unwrap());

    // The dodge pad and the second stroke still land the head at x=200.
    let sim = simulate(&stream);
    assert_eq!((sim.x, sim.y), (200, 0));
}

#[test]
fn laser_never_fires_during_speed_change() {
    let segments = [
        seg(0, 0, 100, 0, 1, 30.0, true),
        seg(100, 0, 200, 0, 1, 50.0, true),
    ];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let sim = simulate(&enc.into_stream());
    // Only the two strokes cut; the away-and-back dodge does not.
    assert_eq!(sim.cuts.iter().map(|c| c.dx.abs()).sum::<i64>(), 200);
}

#[test]
fn empty_segment_list_encodes_nothing() {
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&[]).unwrap();
    assert!(enc.into_stream().is_empty());
}

#[test]
fn job_stream_brackets() {
    let segments = [seg(0, 0, 10, 0, 1, 25.4, true)];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let stream = enc.into_stream();
    let text = String::from_utf8_lossy(&stream);
    assert!(text.starts_with("ICV1881681NRBS1E"), "{text}");
    assert!(text.ends_with("FNSE"), "{text}");
}

#[test]
fn segments_round_trip_through_json() {
    let segments = vec![seg(0, 0, 100, 0, 1, 30.0, true), seg(100, 0, 0, 50, 1, 30.0, false)];
    let json = serde_json::to_string(&segments).unwrap();
    let back: Vec<Segment> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, segments);
}

#[test]
fn job_file_newlines_follow_n_and_precede_e() {
    let mut out = Vec::new();
    write_job_file(b"INSE", &mut out).unwrap();
    assert_eq!(out, b"IN\nS\nE");

    // Stripping the newlines recovers the wire stream exactly.
    let segments = [seg(0, 0, 40, 25, 1, 30.0, true)];
    let mut enc = EgvEncoder::new(JobConfig::default());
    enc.encode_vector(&segments).unwrap();
    let stream = enc.into_stream();
    let mut filed = Vec::new();
    write_job_file(&stream, &mut filed).unwrap();
    let stripped: Vec<u8> = filed.into_iter().filter(|b| *b != b'\n').collect();
    assert_eq!(stripped, stream.as_ref());
}
