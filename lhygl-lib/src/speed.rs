//! Feed-rate codec for the LHYMICRO-GL speed token.
//!
//! The controller takes its timing from a 16-bit register value encoded as
//! ASCII decimal, wrapped in a short textual token (`CV1881681`). The
//! register tracks the stepper period linearly within a gear band, so the
//! codec is a pair of linear maps plus a text grammar. The text grammar
//! carries a deliberate firmware quirk: negative register values are printed
//! through a 24-bit unsigned shift, producing 8-digit high groups in the
//! 16-million range. Recorded job files depend on that quirk bit-for-bit.

use crate::board::{Board, GearBand, resolve};
use crate::error::LhyError;

/// Feed rates above this (vector mode) are clamped to [`DEFAULT_FEED`].
const MAX_VECTOR_FEED: f64 = 240.0;
const DEFAULT_FEED: f64 = 19.05;

/// Stepper period in milliseconds for a feed rate in units/s.
pub fn period_ms(feed: f64) -> f64 {
    if feed == 0.0 { 0.0 } else { 25.4 / feed }
}

/// Linear map from feed rate to register value. Zero feed yields the
/// intercept rather than dividing by zero.
pub fn speed_to_value(feed: f64, band: GearBand) -> f64 {
    if feed == 0.0 {
        return band.b;
    }
    band.m * period_ms(feed) + band.b
}

/// Inverse of [`speed_to_value`]. Degenerate bands (zero slope) and zero
/// periods yield a speed of 0 rather than dividing by zero.
pub fn value_to_speed(value: f64, band: GearBand) -> f64 {
    if band.m == 0.0 {
        return 0.0;
    }
    let period = (value - band.b) / band.m;
    if period == 0.0 { 0.0 } else { 25.4 / period }
}

/// Round half-up with the firmware's 0.005 ceiling bias.
fn round_register(value: f64) -> i64 {
    (value + 0.505).floor() as i64
}

/// Print a register value as two decimal groups.
///
/// The high group is `(value >> 8) & 0xFFFFFF`: the mask deliberately keeps
/// the original firmware's 24-bit unsigned-shift behavior for negative
/// values, which hardware and recorded jobs both expect. Do not normalize.
pub fn encode_16bit(value: i64) -> String {
    let lo = value & 0xFF;
    let hi = (value >> 8) & 0xFF_FFFF;
    format!("{hi:03}{lo:03}")
}

/// A decoded speed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedInfo {
    /// Raw register value, negative when the token used the wrap encoding.
    pub value: i64,
    pub gear: u8,
    /// Diagonal-compensation step count, 0 when absent.
    pub step: u16,
    /// Diagonal-compensation register value, 0 when absent.
    pub diagonal: i64,
    /// Raster scanline spacing in ticks, 0 for vector tokens.
    pub raster_step: u16,
}

impl SpeedInfo {
    pub fn is_raster(&self) -> bool {
        self.raster_step != 0
    }

    /// Recover the feed rate this token encodes on the given board.
    pub fn feed_rate(&self, board: Board) -> f64 {
        value_to_speed(self.value as f64, board.band(self.gear))
    }
}

/// Encode a feed rate as the device speed token.
///
/// `raster_step` of 0 means vector mode. `d_ratio` > 0 appends the
/// diagonal-compensation suffix on boards that accept one; it is ignored in
/// raster mode. `forced_gear` bypasses band selection entirely.
pub fn make_speed_code(
    feed: f64,
    raster_step: u16,
    board: Board,
    d_ratio: f64,
    forced_gear: Option<u8>,
) -> String {
    let raster = raster_step != 0;
    let feed = if !raster && feed > MAX_VECTOR_FEED {
        DEFAULT_FEED
    } else {
        feed
    };
    let (gear, band) = resolve(board, feed, raster, forced_gear);
    let value = round_register(speed_to_value(feed, band));
    let encoded = encode_16bit(value);

    if raster {
        format!("V{encoded}{gear}G{raster_step:03}")
    } else if d_ratio > 0.0 && !board.no_diagonal() {
        let step = (feed.floor() as i64 + 1).min(128);
        let d = d_ratio * -band.m * period_ms(feed) / step as f64;
        format!(
            "CV{encoded}{gear}{step:03}{}",
            encode_16bit(round_register(d))
        )
    } else {
        format!("CV{encoded}{gear}")
    }
}

/// Parse a speed token back into its components.
///
/// Strict fixed grammar: a marker prefix (`CV` for vector, `V` for raster),
/// a value group of 6 or 11 digits, one gear digit, then either a `G`-prefixed
/// 3-digit raster step or an optional 9-digit diagonal suffix. 11-digit value
/// groups carry an 8-digit high group in the reserved 16-million range and
/// decode to a negative register value.
pub fn parse_speed_code(code: &str) -> Result<SpeedInfo, LhyError> {
    let bytes = code.trim().as_bytes();
    let mut pos = 0;

    let vector = bytes.first() == Some(&b'C');
    if vector {
        pos += 1;
    }
    if bytes.get(pos) != Some(&b'V') {
        return Err(LhyError::bad_code(pos, "expected 'V' value marker"));
    }
    pos += 1;

    let rest = &bytes[pos..];
    let digits_len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits_len == rest.len() && vector {
        // Vector form: value group + gear [+ step + diagonal].
        let (value, gear) = match digits_len {
            7 => (parse_value(rest, pos, 3)?, rest[6]),
            12 => (parse_value(rest, pos, 8)?, rest[11]),
            16 => (parse_value(rest, pos, 3)?, rest[6]),
            21 => (parse_value(rest, pos, 8)?, rest[11]),
            n => {
                return Err(LhyError::bad_code(
                    pos + n,
                    format!("vector token has {n} digits, expected 7, 12, 16 or 21"),
                ));
            }
        };
        let (step, diagonal) = match digits_len {
            16 => (
                parse_group(&rest[7..10], pos + 7)? as u16,
                decode_value(parse_group(&rest[10..13], pos + 10)?, parse_group(&rest[13..16], pos + 13)?),
            ),
            21 => (
                parse_group(&rest[12..15], pos + 12)? as u16,
                decode_value(parse_group(&rest[15..18], pos + 15)?, parse_group(&rest[18..21], pos + 18)?),
            ),
            _ => (0, 0),
        };
        Ok(SpeedInfo {
            value,
            gear: gear - b'0',
            step,
            diagonal,
            raster_step: 0,
        })
    } else if !vector {
        // Raster form: value group + gear + 'G' + 3-digit step.
        let (value, gear, g_at) = match digits_len {
            7 => (parse_value(rest, pos, 3)?, rest[6], 7),
            12 => (parse_value(rest, pos, 8)?, rest[11], 12),
            n => {
                return Err(LhyError::bad_code(
                    pos + n,
                    format!("raster token value group has {n} digits, expected 7 or 12"),
                ));
            }
        };
        if rest.get(g_at) != Some(&b'G') {
            return Err(LhyError::bad_code(pos + g_at, "expected 'G' raster-step marker"));
        }
        let tail = rest
            .get(g_at + 1..g_at + 4)
            .ok_or_else(|| LhyError::bad_code(pos + g_at + 1, "truncated raster step"))?;
        if rest.len() != g_at + 4 {
            return Err(LhyError::bad_code(pos + g_at + 4, "trailing bytes after raster step"));
        }
        Ok(SpeedInfo {
            value,
            gear: gear - b'0',
            step: 0,
            diagonal: 0,
            raster_step: parse_group(tail, pos + g_at + 1)? as u16,
        })
    } else {
        let bad = pos + digits_len;
        Err(LhyError::bad_code(bad, "unexpected byte in vector token"))
    }
}

/// Parse the leading `hi_len + 3` digits of `rest` as a register value.
fn parse_value(rest: &[u8], base: usize, hi_len: usize) -> Result<i64, LhyError> {
    let hi = parse_group(&rest[..hi_len], base)?;
    let lo = parse_group(&rest[hi_len..hi_len + 3], base + hi_len)?;
    if hi_len == 8 && hi <= 16_000_000 {
        return Err(LhyError::bad_code(
            base,
            "8-digit high group outside the reserved wrap range",
        ));
    }
    Ok(decode_value(hi, lo))
}

/// Undo [`encode_16bit`], including the 24-bit wrap for negative values.
fn decode_value(hi: i64, lo: i64) -> i64 {
    let hi = if hi > 16_000_000 { hi - (1 << 24) } else { hi };
    (hi << 8) | lo
}

fn parse_group(digits: &[u8], at: usize) -> Result<i64, LhyError> {
    if digits.iter().any(|b| !b.is_ascii_digit()) {
        return Err(LhyError::bad_code(at, "expected decimal digits"));
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LhyError::bad_code(at, "unparseable digit group"))
}
