//! Provable Fairness
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FAIRNESS PROOFS                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs - Server seed + SHA-256 hash, gated reveal   │
//! │  verify.rs     - Ticket recomputation and round replay      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod verify;

pub use commitment::{CommitmentManager, SeedCommitment};
pub use verify::{verify, verify_record, verify_round, RoundVerification};
