//! Round Errors
//!
//! One taxonomy for the whole round engine. Local conditions (a bad stake)
//! are rejected at the boundary and leave the round untouched. Systemic
//! conditions halt settlement of the affected round.

use thiserror::Error;

use crate::round::state::{RoundId, RoundStatus};

/// Result alias used across the round engine.
pub type Result<T> = std::result::Result<T, RoundError>;

/// Errors raised by the ledger, resolver, commitment manager and controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoundError {
    /// Malformed or non-positive contribution. Rejected, round unaffected.
    #[error("invalid stake: {0}")]
    InvalidStake(String),

    /// Stake arrived after the round stopped accepting contributions.
    #[error("round {round_id} is not open (status: {status})")]
    RoundNotOpen {
        /// Round the stake was addressed to.
        round_id: RoundId,
        /// Status at the time of the attempt.
        status: RoundStatus,
    },

    /// Accepting the stake would push the pot past its item cap.
    #[error("pot is full: {current} items + {incoming} exceeds cap of {max}")]
    PotFull {
        /// Items already in the pot.
        current: usize,
        /// Items in the rejected stake.
        incoming: usize,
        /// Configured cap.
        max: usize,
    },

    /// Resolution attempted on a round without participants.
    #[error("no participants to resolve")]
    NoParticipants,

    /// External random seed could not be obtained.
    #[error("random seed unavailable: {0}")]
    RandomSeedUnavailable(String),

    /// Server seed requested before the round was resolved.
    #[error("server seed for round {0} requested before resolution")]
    PrematureReveal(RoundId),

    /// Recomputed ticket or winner disagrees with the stored record.
    #[error("fairness mismatch in round {round_id}: recorded {recorded}, recomputed {recomputed}")]
    FairnessMismatch {
        /// Round under verification.
        round_id: RoundId,
        /// Value from the history record.
        recorded: String,
        /// Value from independent recomputation.
        recomputed: String,
    },

    /// Stake data failed validation at snapshot time.
    #[error("malformed stake data: {0}")]
    MalformedStake(String),

    /// Seed string cannot be used to derive a ticket.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// No such round is known.
    #[error("unknown round {0}")]
    UnknownRound(RoundId),

    /// Requested state change is not allowed from the current status.
    #[error("invalid transition from {from}: {reason}")]
    InvalidTransition {
        /// Status at the time of the request.
        from: RoundStatus,
        /// What was attempted.
        reason: String,
    },
}

impl RoundError {
    /// Invariant violations that must never occur in correct control flow.
    ///
    /// These are logged at error level and halt settlement of the round.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::NoParticipants | Self::PrematureReveal(_) | Self::FairnessMismatch { .. }
        )
    }

    /// Conditions that reject one request and leave the round as it was.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidStake(_) | Self::RoundNotOpen { .. } | Self::PotFull { .. } | Self::InvalidSeed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(RoundError::NoParticipants.is_invariant_violation());
        assert!(RoundError::PrematureReveal(RoundId::nil()).is_invariant_violation());
        assert!(!RoundError::NoParticipants.is_rejection());

        assert!(RoundError::InvalidStake("empty".to_string()).is_rejection());
        assert!(RoundError::PotFull { current: 199, incoming: 2, max: 200 }.is_rejection());
        assert!(!RoundError::RandomSeedUnavailable("timeout".to_string()).is_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = RoundError::RoundNotOpen {
            round_id: RoundId::nil(),
            status: RoundStatus::Resolving,
        };
        let text = err.to_string();
        assert!(text.contains("not open"));
        assert!(text.contains("resolving"));
    }
}
