//! Winning Ticket Derivation
//!
//! Maps a committed server seed and an external random seed onto a ticket in
//! `[0, 1]` with exactly 8 decimal digits.
//!
//! ```text
//! combined = server_seed + "-" + random_seed
//! rng      = MT19937(seed_from_str(combined))
//! units    = floor(rng.next_f64() * (10^8 + 1))
//! ticket   = units / 10^8
//! ```
//!
//! This is `new Chance(combined).floating({ min: 0, max: 1, fixed: 8 })`.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Deserialize};

use super::rng::{DeterministicRng, MAX_SEED_UNITS, seed_units};
use crate::error::{Result, RoundError};

/// Separator between server seed and random seed.
pub const SEED_SEPARATOR: char = '-';

/// Decimal digits carried by a ticket.
pub const TICKET_DIGITS: usize = 8;

/// Ticket resolution: one unit is 10^-8.
pub const TICKET_SCALE: u32 = 100_000_000;

/// A winning ticket, stored as an integer count of 10^-8 units.
///
/// Integer storage keeps comparison and formatting exact; the float form is
/// only produced at the edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Ticket(u32);

impl Ticket {
    /// Lowest possible ticket.
    pub const ZERO: Ticket = Ticket(0);

    /// Highest possible ticket (reachable with probability 1 / (10^8 + 1)).
    pub const MAX: Ticket = Ticket(TICKET_SCALE);

    /// Create from raw units. Returns None above [`TICKET_SCALE`].
    pub const fn from_units(units: u32) -> Option<Self> {
        if units <= TICKET_SCALE {
            Some(Self(units))
        } else {
            None
        }
    }

    /// Create from a float, rounding to the nearest unit.
    pub fn from_value(value: f64) -> Option<Self> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return None;
        }
        Self::from_units((value * TICKET_SCALE as f64).round() as u32)
    }

    /// Raw units (10^-8).
    #[inline]
    pub fn units(self) -> u32 {
        self.0
    }

    /// Float value, the nearest double to `units / 10^8`.
    #[inline]
    pub fn value(self) -> f64 {
        self.0 as f64 / TICKET_SCALE as f64
    }
}

impl From<Ticket> for f64 {
    fn from(ticket: Ticket) -> Self {
        ticket.value()
    }
}

impl TryFrom<f64> for Ticket {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        Ticket::from_value(value).ok_or_else(|| format!("ticket out of range: {}", value))
    }
}

impl fmt::Display for Ticket {
    /// Canonical form: `0.83495634`, always 8 fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / TICKET_SCALE, self.0 % TICKET_SCALE)
    }
}

impl FromStr for Ticket {
    type Err = String;

    /// Parse a decimal with at most 8 fractional digits, e.g. `0.25` or `0.83495634`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));

        if int_part.is_empty()
            || frac_part.len() > TICKET_DIGITS
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("malformed ticket: {:?}", s));
        }

        let whole: u64 = int_part.parse().map_err(|_| format!("malformed ticket: {:?}", s))?;
        let mut frac: u64 = 0;
        for (i, digit) in frac_part.bytes().enumerate() {
            frac += (digit - b'0') as u64 * 10u64.pow((TICKET_DIGITS - 1 - i) as u32);
        }

        let units = whole
            .checked_mul(TICKET_SCALE as u64)
            .and_then(|w| w.checked_add(frac))
            .filter(|u| *u <= TICKET_SCALE as u64)
            .ok_or_else(|| format!("ticket out of range: {:?}", s))?;

        Ok(Ticket(units as u32))
    }
}

/// Build the combined seed string. Server seed first, fixed separator.
pub fn combined_seed(server_seed: &str, random_seed: &str) -> String {
    let mut combined = String::with_capacity(server_seed.len() + random_seed.len() + 1);
    combined.push_str(server_seed);
    combined.push(SEED_SEPARATOR);
    combined.push_str(random_seed);
    combined
}

/// Draw the ticket for a combined seed string.
pub fn draw_ticket(combined: &str) -> Result<Ticket> {
    let units = seed_units(combined);
    if units > MAX_SEED_UNITS {
        return Err(RoundError::InvalidSeed(format!(
            "combined seed is {} UTF-16 units, limit is {}",
            units, MAX_SEED_UNITS
        )));
    }

    let mut rng = DeterministicRng::from_seed_str(combined);
    let drawn = rng.next_int_inclusive(0, TICKET_SCALE as u64);

    // next_int_inclusive never exceeds its upper bound
    Ok(Ticket(drawn as u32))
}

/// Derive the ticket for a seed pair.
///
/// Both seeds must be non-empty.
pub fn compute_ticket(server_seed: &str, random_seed: &str) -> Result<Ticket> {
    if server_seed.is_empty() {
        return Err(RoundError::InvalidSeed("server seed is empty".to_string()));
    }
    if random_seed.is_empty() {
        return Err(RoundError::InvalidSeed("random seed is empty".to_string()));
    }

    draw_ticket(&combined_seed(server_seed, random_seed))
}
