//! # Fairpot Server
//!
//! Provably-fair jackpot rounds: participants stake items, one winner takes
//! the pot with probability proportional to stake value, and anyone can
//! check the draw after the fact.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FAIRPOT SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives               │
//! │  ├── rng.rs        - MT19937 seeded from a string           │
//! │  ├── hash.rs       - SHA-256 seed commitments               │
//! │  └── ticket.rs     - Winning ticket in [0, 1]               │
//! │                                                             │
//! │  round/            - Round engine (deterministic)           │
//! │  ├── state.rs      - Rounds, stakes, participants           │
//! │  ├── ledger.rs     - Stake ledger and snapshots             │
//! │  ├── resolver.rs   - Weighted winner selection              │
//! │  ├── history.rs    - Settled round log and stats            │
//! │  └── events.rs     - Round lifecycle events                 │
//! │                                                             │
//! │  proof/            - Fairness proofs                        │
//! │  ├── commitment.rs - Commit-before, reveal-after seeds      │
//! │  └── verify.rs     - Ticket and round replay                │
//! │                                                             │
//! │  table/            - Lifecycle (non-deterministic)          │
//! │  ├── controller.rs - OPEN → LOCKED → RESOLVING → SETTLED    │
//! │  ├── runner.rs     - Countdown loop and resolution          │
//! │  ├── randomness.rs - Random seed beacon with fallback       │
//! │  └── manager.rs    - Independent tables                     │
//! │                                                             │
//! │  network/          - Networking (non-deterministic)         │
//! │  ├── server.rs     - WebSocket feed server                  │
//! │  └── protocol.rs   - Message types                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! The server seed's SHA-256 hash is published when a round opens. The
//! stake snapshot is fixed before the random seed is fetched, and the
//! ticket is a pure function of `server_seed-random_seed`. Given the two
//! seeds and the snapshot, [`proof::verify_record`] reproduces the winner
//! on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod proof;
pub mod round;
pub mod table;

// Re-export commonly used types
pub use config::{FairpotConfig, RandomnessConfig, ServerConfig, TableConfig};
pub use core::ticket::{compute_ticket, Ticket};
pub use error::{Result, RoundError};
pub use round::state::{Item, ParticipantId, RoundId, RoundStatus, Stake};
pub use table::{TableManager, TableRunner};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
