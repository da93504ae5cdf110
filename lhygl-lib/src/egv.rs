//! EGV motion encoder.
//!
//! Turns line segments into the controller's directional byte stream. The
//! encoder is modal: it tracks the last direction, laser state and diagonal
//! sub-directions, and merges consecutive collinear same-state moves into a
//! single run before any bytes are emitted. All distances are integer device
//! ticks (one stepper step, 1/1000 unit).

use crate::board::Board;
use crate::constants::*;
use crate::error::LhyError;
use crate::speed::make_speed_code;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// A single cut/move primitive in integer device ticks.
///
/// `loop_id` groups segments of one continuous stroke; a change of loop id
/// (or a positional gap) between consecutive segments forces a laser-off
/// repositioning move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
    pub loop_id: u32,
    pub feed: f64,
    pub laser_on: bool,
}

/// One horizontal raster scanline: laser-on spans `(x_start, x_end)` at a
/// fixed Y, in device ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scanline {
    pub y: i64,
    pub runs: Vec<(i64, i64)>,
}

impl Scanline {
    /// Regroup horizontal cutting segments into scanlines ordered by Y.
    /// Non-horizontal and laser-off segments are dropped; overlapping spans
    /// on one line are merged.
    pub fn from_segments(segments: &[Segment]) -> Vec<Scanline> {
        let mut lines: Vec<Scanline> = Vec::new();
        for seg in segments {
            if !seg.laser_on || seg.y0 != seg.y1 || seg.x0 == seg.x1 {
                continue;
            }
            let run = (seg.x0.min(seg.x1), seg.x0.max(seg.x1));
            match lines.iter_mut().find(|l| l.y == seg.y0) {
                Some(line) => line.runs.push(run),
                None => lines.push(Scanline {
                    y: seg.y0,
                    runs: vec![run],
                }),
            }
        }
        lines.sort_by_key(|l| l.y);
        for line in &mut lines {
            line.runs.sort_unstable();
            let mut merged: Vec<(i64, i64)> = Vec::with_capacity(line.runs.len());
            for &(lo, hi) in &line.runs {
                match merged.last_mut() {
                    Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
                    _ => merged.push((lo, hi)),
                }
            }
            line.runs = merged;
        }
        lines
    }
}

/// Per-job encoder settings.
#[derive(Debug, Clone, Copy)]
pub struct JobConfig {
    pub board: Board,
    /// Diagonal-compensation ratio for the speed token, 0 to disable.
    pub d_ratio: f64,
    pub forced_gear: Option<u8>,
    /// Pad distance in ticks for speed-change dodges and raster overscan.
    pub pad: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            board: Board::M2,
            d_ratio: 0.0,
            forced_gear: None,
            pad: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Angle,
}

impl Direction {
    fn byte(self) -> u8 {
        match self {
            Direction::Up => DIR_UP,
            Direction::Down => DIR_DOWN,
            Direction::Left => DIR_LEFT,
            Direction::Right => DIR_RIGHT,
            Direction::Angle => DIR_ANGLE,
        }
    }
}

/// Modal state: the last-emitted direction, the distance accumulated for the
/// current run, laser state, and the per-axis sub-directions that qualify
/// diagonal moves. Reset at job start, discarded after.
#[derive(Debug, Clone, Copy, Default)]
struct EncoderState {
    direction: Option<Direction>,
    distance: u64,
    laser: bool,
    h: Option<u8>,
    v: Option<u8>,
}

pub struct EgvEncoder {
    out: Vec<u8>,
    state: EncoderState,
    config: JobConfig,
    cur_feed: f64,
    raster_step: u16,
}

impl EgvEncoder {
    pub fn new(config: JobConfig) -> Self {
        EgvEncoder {
            out: Vec::new(),
            state: EncoderState::default(),
            config,
            cur_feed: 0.0,
            raster_step: 0,
        }
    }

    /// Emit the job prologue: begin marker, speed token, buffer start and
    /// the ready handshake. Resets the modal state.
    pub fn begin_job(&mut self, feed: f64, raster_step: u16) {
        self.raster_step = raster_step;
        self.cur_feed = feed;
        self.state = EncoderState {
            h: Some(DIR_RIGHT),
            v: Some(DIR_DOWN),
            ..EncoderState::default()
        };
        self.out.push(CMD_BEGIN);
        self.out.extend_from_slice(self.speed_token().as_bytes());
        self.out.push(CMD_NEXT);
        self.out.push(DIR_DOWN);
        self.out.push(CMD_BEGIN_BUFFER);
        self.out.extend_from_slice(READY_SEQUENCE);
    }

    fn speed_token(&self) -> String {
        make_speed_code(
            self.cur_feed,
            self.raster_step,
            self.config.board,
            self.config.d_ratio,
            self.config.forced_gear,
        )
    }

    /// Flush the pending run, if any. Idempotent.
    pub fn flush(&mut self) {
        if let Some(dir) = self.state.direction {
            if self.state.distance > 0 {
                self.out.push(dir.byte());
                encode_distance(&mut self.out, self.state.distance);
            }
        }
        self.state.distance = 0;
    }

    /// The core modal move. Identical (direction, laser, sub-direction)
    /// triples accumulate distance without emitting anything; a change
    /// flushes the pending run, toggles the laser byte if needed, asserts
    /// changed sub-directions, and starts a new run.
    fn move_modal(&mut self, dir: Direction, dist: u64, laser: bool, subdirs: Option<(u8, u8)>) {
        let same_subdirs = match subdirs {
            Some((h, v)) => self.state.h == Some(h) && self.state.v == Some(v),
            None => true,
        };
        if self.state.direction == Some(dir) && self.state.laser == laser && same_subdirs {
            self.state.distance += dist;
            return;
        }
        self.flush();
        if laser != self.state.laser {
            self.out.push(if laser { LASER_ON } else { LASER_OFF });
            self.state.laser = laser;
        }
        if let Some((h, v)) = subdirs {
            if self.state.h != Some(h) {
                self.out.push(h);
                self.state.h = Some(h);
            }
            if self.state.v != Some(v) {
                self.out.push(v);
                self.state.v = Some(v);
            }
        }
        match dir {
            Direction::Right => self.state.h = Some(DIR_RIGHT),
            Direction::Left => self.state.h = Some(DIR_LEFT),
            Direction::Down => self.state.v = Some(DIR_DOWN),
            Direction::Up => self.state.v = Some(DIR_UP),
            Direction::Angle => {}
        }
        self.state.direction = Some(dir);
        self.state.distance = dist;
    }

    /// Encode one line of `(dx, dy)` ticks. Orthogonal and 45-degree moves
    /// become a single run; anything else is decomposed into batched
    /// axis/diagonal runs by a fixed-point integer line walk, then verified
    /// to reconstruct `(dx, dy)` exactly.
    pub fn line(&mut self, dx: i64, dy: i64, laser: bool) -> Result<(), LhyError> {
        if dx == 0 && dy == 0 {
            return Ok(());
        }
        let h_dir = if dx >= 0 { Direction::Right } else { Direction::Left };
        let v_dir = if dy >= 0 { Direction::Down } else { Direction::Up };
        let (adx, ady) = (dx.unsigned_abs(), dy.unsigned_abs());
        if dy == 0 {
            self.move_modal(h_dir, adx, laser, None);
            return Ok(());
        }
        if dx == 0 {
            self.move_modal(v_dir, ady, laser, None);
            return Ok(());
        }
        let subdirs = Some((h_dir.byte(), v_dir.byte()));
        if adx == ady {
            self.move_modal(Direction::Angle, adx, laser, subdirs);
            return Ok(());
        }

        let (major, minor, primary) = if adx > ady {
            (adx, ady, h_dir)
        } else {
            (ady, adx, v_dir)
        };
        let slope = minor as f64 / major as f64;
        let mut prev = 0u64;
        let mut run_len = 0u64;
        let mut run_diag = false;
        let mut primary_only = 0u64;
        let mut diagonal = 0u64;
        let mut emit = |enc: &mut Self, len: u64, diag: bool| {
            if diag {
                enc.move_modal(Direction::Angle, len, laser, subdirs);
                diagonal += len;
            } else {
                enc.move_modal(primary, len, laser, None);
                primary_only += len;
            }
        };
        for i in 1..=major {
            let cur = (i as f64 * slope).round() as u64;
            let diag = cur != prev;
            prev = cur;
            if run_len > 0 && diag != run_diag {
                emit(self, run_len, run_diag);
                run_len = 0;
            }
            run_diag = diag;
            run_len += 1;
        }
        if run_len > 0 {
            emit(self, run_len, run_diag);
        }
        drop(emit);

        let (got_adx, got_ady) = if adx > ady {
            (primary_only + diagonal, diagonal)
        } else {
            (diagonal, primary_only + diagonal)
        };
        if got_adx != adx || got_ady != ady {
            return Err(LhyError::LineMismatch {
                dx,
                dy,
                got_dx: got_adx as i64 * dx.signum(),
                got_dy: got_ady as i64 * dy.signum(),
            });
        }
        Ok(())
    }

    /// Re-transmit the speed token mid-job. The laser is forced off and the
    /// head dodges away and back so the idle pause does not leave a burn
    /// spot, then the pause marker, the new token and the ready handshake go
    /// out before cutting resumes.
    pub fn change_speed(&mut self, feed: f64) {
        self.flush();
        if self.state.laser {
            self.out.push(LASER_OFF);
            self.state.laser = false;
        }
        let pad = self.config.pad;
        if pad > 0 {
            self.out.push(DIR_RIGHT);
            encode_distance(&mut self.out, pad);
            self.out.push(DIR_LEFT);
            encode_distance(&mut self.out, pad);
        }
        self.cur_feed = feed;
        self.out.push(CMD_PAUSE_SPEED);
        self.out.push(CMD_NEXT);
        self.out.push(b'S');
        self.out.push(b'E');
        self.out.extend_from_slice(self.speed_token().as_bytes());
        self.out.push(CMD_NEXT);
        self.out.push(DIR_DOWN);
        self.out.push(CMD_BEGIN_BUFFER);
        self.out.extend_from_slice(READY_SEQUENCE);
        self.state = EncoderState {
            h: Some(DIR_RIGHT),
            v: Some(DIR_DOWN),
            laser: false,
            ..EncoderState::default()
        };
    }

    /// Emit the job epilogue and flush any pending run.
    pub fn finish(&mut self) {
        self.flush();
        if self.state.laser {
            self.out.push(LASER_OFF);
            self.state.laser = false;
        }
        self.out.push(CMD_FINISH);
        self.out.push(CMD_NEXT);
        self.out.push(b'S');
        self.out.push(b'E');
    }

    /// Encode a complete vector job: prologue, segments (with rapid moves on
    /// stroke discontinuities and mid-job speed changes), epilogue.
    pub fn encode_vector(&mut self, segments: &[Segment]) -> Result<(), LhyError> {
        let Some(first) = segments.first() else {
            return Ok(());
        };
        self.begin_job(first.feed, 0);
        let (mut x, mut y) = (0i64, 0i64);
        let mut cur_loop = first.loop_id;
        for seg in segments {
            if seg.feed != self.cur_feed {
                self.change_speed(seg.feed);
            }
            if seg.loop_id != cur_loop || (seg.x0, seg.y0) != (x, y) {
                self.line(seg.x0 - x, seg.y0 - y, false)?;
                (x, y) = (seg.x0, seg.y0);
            }
            self.line(seg.x1 - x, seg.y1 - y, seg.laser_on)?;
            (x, y) = (seg.x1, seg.y1);
            cur_loop = seg.loop_id;
        }
        self.finish();
        Ok(())
    }

    /// Encode a complete raster job. Scanlines are swept boustrophedon,
    /// ordered by Y, with a laser-off vertical reposition between lines and
    /// overscan padding at line boundaries. The fly-back overscan widens to
    /// three raster steps when the next line's span starts on the opposite
    /// side of the head.
    pub fn encode_raster(
        &mut self,
        lines: &[Scanline],
        feed: f64,
        step: u16,
    ) -> Result<(), LhyError> {
        if step == 0 {
            return Err(LhyError::Protocol("raster step must be nonzero".into()));
        }
        let mut lines: Vec<&Scanline> = lines.iter().filter(|l| !l.runs.is_empty()).collect();
        lines.sort_by_key(|l| l.y);
        self.begin_job(feed, step);
        let pad = self.config.pad as i64;
        let step = i64::from(step);
        let (mut x, mut y) = (0i64, 0i64);
        for (idx, line) in lines.iter().enumerate() {
            let ltr = idx % 2 == 0;
            let span_lo = line.runs.first().map(|r| r.0).unwrap_or(0);
            let span_hi = line.runs.last().map(|r| r.1).unwrap_or(0);

            // Laser-off reposition: vertical step first, then horizontal entry.
            self.line(0, line.y - y, false)?;
            y = line.y;
            let entry = if ltr { span_lo - pad } else { span_hi + pad };
            self.line(entry - x, 0, false)?;
            x = entry;

            if ltr {
                for &(lo, hi) in &line.runs {
                    self.line(lo - x, 0, false)?;
                    self.line(hi - lo, 0, true)?;
                    x = hi;
                }
            } else {
                for &(lo, hi) in line.runs.iter().rev() {
                    self.line(hi - x, 0, false)?;
                    self.line(lo - hi, 0, true)?;
                    x = lo;
                }
            }

            let fly_back = match lines.get(idx + 1) {
                Some(next) => {
                    let next_lo = next.runs.first().map(|r| r.0).unwrap_or(0);
                    let next_hi = next.runs.last().map(|r| r.1).unwrap_or(0);
                    let opposite = if ltr { next_hi < x } else { next_lo > x };
                    if opposite { 3 * step } else { pad }
                }
                None => pad,
            };
            let exit = if ltr { x + fly_back } else { x - fly_back };
            self.line(exit - x, 0, false)?;
            x = exit;
        }
        self.finish();
        Ok(())
    }

    pub fn stream(&self) -> &[u8] {
        &self.out
    }

    pub fn into_stream(mut self) -> Bytes {
        self.flush();
        Bytes::from(self.out)
    }
}

/// Encode an integer tick count in the restricted distance alphabet.
///
/// Full 255-tick chunks each become one `z` byte; the remainder is a single
/// letter (1..=25), an escaped letter (26..=51), or three ASCII digits
/// (52..=254). A remainder of zero emits nothing.
pub fn encode_distance(out: &mut Vec<u8>, mut ticks: u64) {
    while ticks >= 255 {
        out.push(DIST_255);
        ticks -= 255;
    }
    let r = ticks as u8;
    match r {
        0 => {}
        1..=25 => out.push(96 + r),
        26..=51 => {
            out.push(DIST_ESCAPE);
            out.push(96 + r - 25);
        }
        _ => {
            let mut buf = [0u8; 3];
            buf[0] = b'0' + r / 100;
            buf[1] = b'0' + (r / 10) % 10;
            buf[2] = b'0' + r % 10;
            out.extend_from_slice(&buf);
        }
    }
}

/// Convert a possibly-fractional distance into whole device ticks.
/// Fractional input is a contract violation: distances must already be in
/// integer ticks by the time they reach the encoder.
pub fn to_ticks(value: f64) -> Result<i64, LhyError> {
    if (value - value.round()).abs() > 1e-6 {
        return Err(LhyError::InvalidDistance(value));
    }
    Ok(value.round() as i64)
}

/// Persist a raw EGV stream as a plain-text job file: a newline after every
/// `N` and before every `E`, matching the artifact format the control
/// software writes alongside live transmission.
pub fn write_job_file<W: Write>(stream: &[u8], mut w: W) -> io::Result<()> {
    for &b in stream {
        if b == b'E' {
            w.write_all(b"\n")?;
        }
        w.write_all(std::slice::from_ref(&b))?;
        if b == b'N' {
            w.write_all(b"\n")?;
        }
    }
    Ok(())
}
