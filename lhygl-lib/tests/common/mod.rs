//! Common test utilities: a scripted mock transport for link-layer tests and
//! a small EGV stream interpreter that replays encoder output into motion.

// Shared across multiple test files; not every item is used in every file.
#[allow(unused_imports)]
pub use lhygl_lib::board::Board;
#[allow(unused_imports)]
pub use lhygl_lib::constants::*;
#[allow(unused_imports)]
pub use lhygl_lib::egv::{EgvEncoder, JobConfig, Scanline, Segment};
#[allow(unused_imports)]
pub use lhygl_lib::error::LhyError;
#[allow(unused_imports)]
pub use lhygl_lib::frame::Frame;
#[allow(unused_imports)]
pub use lhygl_lib::link::{Link, LinkConfig, LinkStatus, Transport};

use std::collections::VecDeque;
use std::time::Duration;

/// Scripted stand-in for the USB transport. Status reads are answered from
/// `statuses` (falling back to `default_status`); non-hello writes are
/// recorded in `frames`; the first `write_timeouts` frame writes time out.
#[allow(dead_code)]
pub struct MockTransport {
    pub statuses: VecDeque<u8>,
    pub default_status: u8,
    pub frames: Vec<Vec<u8>>,
    pub write_timeouts: u32,
    pub reinit_count: u32,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            statuses: VecDeque::new(),
            default_status: 206,
            frames: Vec::new(),
            write_timeouts: 0,
            reinit_count: 0,
        }
    }

    pub fn with_statuses(codes: &[u8]) -> Self {
        let mut t = Self::new();
        t.statuses = codes.iter().copied().collect();
        t
    }
}

/// Manufacture a real `Elapsed` so the mock can surface genuine timeouts.
async fn elapsed() -> tokio::time::error::Elapsed {
    tokio::time::timeout(Duration::from_millis(0), std::future::pending::<()>())
        .await
        .unwrap_err()
}

impl Transport for MockTransport {
    async fn write_bulk(&mut self, data: &[u8]) -> Result<usize, LhyError> {
        if data == [STATUS_QUERY] {
            return Ok(1);
        }
        if self.write_timeouts > 0 {
            self.write_timeouts -= 1;
            return Err(LhyError::Timeout(elapsed().await));
        }
        self.frames.push(data.to_vec());
        Ok(data.len())
    }

    async fn read_bulk(&mut self, len: usize) -> Result<Vec<u8>, LhyError> {
        let code = self.statuses.pop_front().unwrap_or(self.default_status);
        let mut response = vec![0xFF; len];
        response[1] = code;
        Ok(response)
    }

    async fn reinitialize(&mut self) -> Result<(), LhyError> {
        self.reinit_count += 1;
        Ok(())
    }
}

/// One laser-on move replayed from a stream: net displacement in ticks.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cut {
    pub dx: i64,
    pub dy: i64,
}

/// Result of replaying an EGV stream.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct Sim {
    pub x: i64,
    pub y: i64,
    /// Rightmost head position reached during the replay.
    pub max_x: i64,
    pub cuts: Vec<Cut>,
}

/// Replay an EGV stream the way the controller would: direction bytes with a
/// following distance move the head, direction bytes without one only assert
/// the axis sub-direction, `M` steps both axes, `D`/`U` toggle the laser.
/// Control and token bytes that carry no motion are skipped.
#[allow(dead_code)]
pub fn simulate(stream: &[u8]) -> Sim {
    let mut sim = Sim::default();
    let (mut h, mut v) = (1i64, 1i64);
    let mut laser = false;
    let mut i = 0;
    while i < stream.len() {
        let (dx, dy) = match stream[i] {
            LASER_ON => {
                laser = true;
                i += 1;
                continue;
            }
            LASER_OFF => {
                laser = false;
                i += 1;
                continue;
            }
            DIR_RIGHT => {
                let (d, ni) = parse_distance(stream, i + 1);
                h = 1;
                i = ni;
                (d, 0)
            }
            DIR_LEFT => {
                let (d, ni) = parse_distance(stream, i + 1);
                h = -1;
                i = ni;
                (-d, 0)
            }
            DIR_DOWN => {
                let (d, ni) = parse_distance(stream, i + 1);
                v = 1;
                i = ni;
                (0, d)
            }
            DIR_UP => {
                let (d, ni) = parse_distance(stream, i + 1);
                v = -1;
                i = ni;
                (0, -d)
            }
            DIR_ANGLE => {
                let (d, ni) = parse_distance(stream, i + 1);
                i = ni;
                (h * d, v * d)
            }
            _ => {
                i += 1;
                continue;
            }
        };
        sim.x += dx;
        sim.y += dy;
        sim.max_x = sim.max_x.max(sim.x);
        if laser && (dx, dy) != (0, 0) {
            sim.cuts.push(Cut { dx, dy });
        }
    }
    sim
}

/// Inverse of the distance alphabet. Returns (ticks, next index).
#[allow(dead_code)]
pub fn parse_distance(stream: &[u8], mut i: usize) -> (i64, usize) {
    let mut ticks = 0i64;
    while i < stream.len() {
        match stream[i] {
            DIST_255 => {
                ticks += 255;
                i += 1;
            }
            DIST_ESCAPE => {
                ticks += i64::from(stream[i + 1] - 96 + 25);
                i += 2;
            }
            c @ 97..=121 => {
                ticks += i64::from(c - 96);
                i += 1;
            }
            b'0'..=b'9' if i + 2 < stream.len() => {
                let hundreds = i64::from(stream[i] - b'0') * 100
                    + i64::from(stream[i + 1] - b'0') * 10
                    + i64::from(stream[i + 2] - b'0');
                ticks += hundreds;
                i += 3;
            }
            _ => break,
        }
    }
    (ticks, i)
}
