//! Core deterministic primitives.
//!
//! Everything here is a pure function of its string inputs, so any client
//! can recompute a round's ticket from the revealed seeds.

pub mod rng;
pub mod hash;
pub mod ticket;

// Re-export core types
pub use rng::{DeterministicRng, MAX_SEED_UNITS};
pub use hash::{matches_commitment, sha256_hex, SeedHash};
pub use ticket::{combined_seed, compute_ticket, draw_ticket, Ticket, TICKET_DIGITS, TICKET_SCALE};
