//! Round State Definitions
//!
//! Identifiers, stakes, participants and the round record itself.
//! Uses BTreeMap/Vec for deterministic iteration order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ticket::Ticket;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique round identifier (UUID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub uuid::Uuid);

impl RoundId {
    /// Fresh random identifier.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// All-zero identifier (tests and placeholders).
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Parse from UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Participant identifier as supplied by the deposit collaborator (e.g. a Steam ID).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// STAKES
// =============================================================================

/// One deposited item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Trading-bot asset identifier.
    pub asset_id: String,
    /// Display / market name.
    pub name: String,
    /// Unit price at deposit time.
    pub price: f64,
}

impl Item {
    /// Create a new item.
    pub fn new(asset_id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            name: name.into(),
            price,
        }
    }
}

/// One deposit contribution to a round. Immutable once accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    /// Position in the round's stake sequence (0-based).
    pub sequence: u32,
    /// Contributor.
    pub participant_id: ParticipantId,
    /// Deposited items, in deposit order.
    pub items: Vec<Item>,
    /// Sum of item prices.
    pub stake_value: f64,
    /// When the stake was accepted.
    pub deposited_at: DateTime<Utc>,
}

/// A participant's aggregate position in a round (derived, not stored).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Sum of this participant's stakes.
    pub total_stake_value: f64,
    /// Items contributed.
    pub item_count: usize,
    /// `total_stake_value / pot_total`, 0 when the pot is empty.
    pub win_weight: f64,
}

impl Participant {
    /// Win chance as a percentage.
    pub fn chance_percent(&self) -> f64 {
        self.win_weight * 100.0
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// Round lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Accepting stakes.
    Open,
    /// Stakes frozen, snapshot taken.
    Locked,
    /// Waiting for the random seed / computing the outcome.
    Resolving,
    /// Winner and ticket recorded. Terminal.
    Settled,
    /// Cancelled with all stakes refunded. Terminal.
    Voided,
}

impl RoundStatus {
    /// No further transitions possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Voided)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Locked => "locked",
            Self::Resolving => "resolving",
            Self::Settled => "settled",
            Self::Voided => "voided",
        };
        f.write_str(name)
    }
}

/// How much the random seed can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assurance {
    /// Seed came from the external randomness source.
    Full,
    /// Seed was generated locally after the external source failed.
    /// The operator controlled both seeds for this round.
    Reduced,
}

/// The external random seed used to resolve a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomSeed {
    /// Opaque seed string.
    pub value: String,
    /// Name of the source that produced it.
    pub source: String,
    /// Assurance level.
    pub assurance: Assurance,
}

impl RandomSeed {
    /// Seed obtained from an external source.
    pub fn external(value: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: source.into(),
            assurance: Assurance::Full,
        }
    }

    /// Locally generated fallback seed.
    pub fn local_fallback(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: "local".to_string(),
            assurance: Assurance::Reduced,
        }
    }
}

/// Outcome fields. All set together at settlement, never individually.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Random seed combined with the server seed.
    pub random_seed: RandomSeed,
    /// Winning ticket.
    pub winning_ticket: Ticket,
    /// Selected participant.
    pub winner_id: ParticipantId,
}

/// A round record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Published SHA-256 commitment of the server seed (hex).
    pub server_hash: String,
    /// When the round opened.
    pub opened_at: DateTime<Utc>,
    /// Outcome (settled rounds only).
    outcome: Option<RoundOutcome>,
}

impl Round {
    /// Open a round with its published commitment.
    pub fn open(id: RoundId, server_hash: String) -> Self {
        Self {
            id,
            status: RoundStatus::Open,
            server_hash,
            opened_at: Utc::now(),
            outcome: None,
        }
    }

    /// Outcome, present only once settled.
    pub fn outcome(&self) -> Option<&RoundOutcome> {
        self.outcome.as_ref()
    }

    /// Record the outcome and move to Settled in one step.
    ///
    /// Only valid while Resolving.
    pub(crate) fn settle(&mut self, outcome: RoundOutcome) -> bool {
        if self.status != RoundStatus::Resolving || self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        self.status = RoundStatus::Settled;
        true
    }
}
