//! Round Events
//!
//! Lifecycle notifications published by a table to its subscribers.

use serde::{Serialize, Deserialize};

use crate::core::ticket::Ticket;
use crate::round::state::{Assurance, ParticipantId, RoundId, Stake};

/// Why a round was locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Countdown reached zero with enough participants.
    Timer,
    /// Operator requested immediate resolution.
    ForceResolve,
}

/// Public result of a settled round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementInfo {
    /// Settled round.
    pub round_id: RoundId,
    /// Winner.
    pub winner_id: ParticipantId,
    /// Pot awarded.
    pub amount: f64,
    /// Winner's chance in percent.
    pub win_chance: f64,
    /// Drawn ticket.
    pub winning_ticket: Ticket,
    /// Revealed server seed.
    pub server_seed: String,
    /// Hash published at round start.
    pub server_hash: String,
    /// Random seed used.
    pub random_seed: String,
    /// Where the random seed came from.
    pub random_source: String,
    /// Assurance of the random seed.
    pub assurance: Assurance,
}

/// Events emitted during a round's life.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// New round accepting stakes.
    RoundOpened {
        round_id: RoundId,
        server_hash: String,
    },

    /// Stake accepted.
    StakeAdded {
        round_id: RoundId,
        participant_id: ParticipantId,
        stake_value: f64,
        item_count: usize,
        pot_total: f64,
        total_items: usize,
    },

    /// Enough participants joined; countdown running.
    CountdownStarted {
        round_id: RoundId,
        seconds: u32,
    },

    /// One second elapsed.
    CountdownTick {
        round_id: RoundId,
        remaining: u32,
    },

    /// Participants dropped below the minimum; countdown cancelled.
    CountdownReset {
        round_id: RoundId,
    },

    /// Stakes frozen.
    RoundLocked {
        round_id: RoundId,
        reason: LockReason,
        participants: usize,
        pot_total: f64,
    },

    /// External randomness failed; a local seed is used instead.
    SeedFallbackUsed {
        round_id: RoundId,
        reason: String,
    },

    /// Winner recorded.
    RoundSettled(SettlementInfo),

    /// Round cancelled; every stake is returned.
    RoundVoided {
        round_id: RoundId,
        reason: String,
        refunds: Vec<Stake>,
    },
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            Self::RoundOpened { round_id, .. }
            | Self::StakeAdded { round_id, .. }
            | Self::CountdownStarted { round_id, .. }
            | Self::CountdownTick { round_id, .. }
            | Self::CountdownReset { round_id }
            | Self::RoundLocked { round_id, .. }
            | Self::SeedFallbackUsed { round_id, .. }
            | Self::RoundVoided { round_id, .. } => *round_id,
            Self::RoundSettled(info) => info.round_id,
        }
    }
}
