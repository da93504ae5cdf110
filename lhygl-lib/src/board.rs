use crate::error::LhyError;
use std::str::FromStr;
use strum_macros::Display;

/// Controller board variants of the LHYMICRO-GL family.
///
/// Two families exist: the newer M-series (M, M1, M2) and the older
/// A/B-series (A, B, B1, B2). They carry different gear equation tables
/// and different low-speed cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Board {
    M,
    M1,
    M2,
    A,
    B,
    B1,
    B2,
}

impl FromStr for Board {
    type Err = LhyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M" => Ok(Board::M),
            "M1" => Ok(Board::M1),
            "M2" => Ok(Board::M2),
            "A" => Ok(Board::A),
            "B" => Ok(Board::B),
            "B1" => Ok(Board::B1),
            "B2" => Ok(Board::B2),
            other => Err(LhyError::UnknownBoard(other.to_string())),
        }
    }
}

/// One piecewise-linear gear band: `register = b + m * period_ms`.
///
/// Slopes are negative on all known boards (faster feed, shorter period,
/// larger register value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearBand {
    pub b: f64,
    pub m: f64,
}

// Intercepts per gear, index 0..=4. Gear 0 is only reachable through the
// low-speed overrides below. These are calibration constants taken from the
// vendor boards; they follow no stated formula and must not be generalized.
const M_INTERCEPTS: [f64; 5] = [65536.0, 58880.0, 58880.0, 59392.0, 59904.0];
const M1_INTERCEPTS: [f64; 5] = [65536.0, 59392.0, 59392.0, 59904.0, 60416.0];
const M2_INTERCEPTS: [f64; 5] = [65536.0, 60416.0, 60416.0, 60928.0, 61440.0];
const AB_INTERCEPTS: [f64; 5] = [1024.0, 784.0, 784.0, 896.0, 1024.0];
const B2_INTERCEPTS: [f64; 5] = [131072.0, 120832.0, 120832.0, 121856.0, 122880.0];

const M_SLOPE: f64 = -10752.0;
const M1_SLOPE: f64 = -11148.0;
const M2_SLOPE: f64 = -12120.0;
const AB_SLOPE: f64 = -2020.0;
const B2_SLOPE: f64 = -24240.0;

impl Board {
    pub fn is_m_series(self) -> bool {
        matches!(self, Board::M | Board::M1 | Board::M2)
    }

    /// Boards whose firmware rejects the diagonal-compensation suffix.
    pub fn no_diagonal(self) -> bool {
        matches!(self, Board::A | Board::B | Board::M)
    }

    /// Feed rate below which the board drops to its gear-0 constants.
    // M-series: <6 units/s. A/B-series: <7 units/s. Hard per-board
    // thresholds observed on hardware, not derived.
    pub fn low_speed_cutoff(self) -> f64 {
        if self.is_m_series() { 6.0 } else { 7.0 }
    }

    /// Look up the `(b, m)` equation for a resolved gear (0..=4).
    pub fn band(self, gear: u8) -> GearBand {
        let gear = usize::from(gear.min(4));
        let (intercepts, m) = match self {
            Board::M => (&M_INTERCEPTS, M_SLOPE),
            Board::M1 => (&M1_INTERCEPTS, M1_SLOPE),
            Board::M2 => (&M2_INTERCEPTS, M2_SLOPE),
            Board::A | Board::B | Board::B1 => (&AB_INTERCEPTS, AB_SLOPE),
            Board::B2 => (&B2_INTERCEPTS, B2_SLOPE),
        };
        GearBand {
            b: intercepts[gear],
            m,
        }
    }
}

/// Pick the gear band for a target feed rate.
///
/// Raster moves shift the upper thresholds: the middle band stretches to
/// 127 units/s and gear 4 only engages from 320 units/s.
pub fn select_gear(feed: f64, raster: bool) -> u8 {
    if feed <= 25.4 {
        1
    } else if feed <= 60.0 {
        2
    } else if !raster {
        if feed < 127.0 { 3 } else { 4 }
    } else if feed < 127.0 {
        2
    } else if feed <= 320.0 {
        3
    } else {
        4
    }
}

/// Resolve gear and band for a feed rate, applying the per-board low-speed
/// overrides unless the caller forced a gear.
pub fn resolve(board: Board, feed: f64, raster: bool, forced_gear: Option<u8>) -> (u8, GearBand) {
    let gear = match forced_gear {
        Some(g) => g.min(4),
        None if feed < board.low_speed_cutoff() => 0,
        None => select_gear(feed, raster),
    };
    (gear, board.band(gear))
}
