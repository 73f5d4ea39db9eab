//! Protocol Messages
//!
//! Wire format for the table feed over WebSocket. All messages are JSON,
//! tagged by `"type"`.

use serde::{Serialize, Deserialize};

use crate::core::ticket::Ticket;
use crate::error::RoundError;
use crate::proof::verify::RoundVerification;
use crate::round::events::RoundEvent;
use crate::round::history::{HistoryRecord, ParticipantStats};
use crate::round::state::{Item, ParticipantId, RoundId, Stake};
use crate::table::controller::RoundView;

/// History records returned when a request gives no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 30;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Receive the table's state, then its events.
    Subscribe { table_id: String },

    /// Stop receiving events.
    Unsubscribe,

    /// Confirmed deposit from the trading collaborator (operator only).
    Deposit(DepositRequest),

    /// Lock and resolve the current round now (operator only).
    ForceResolve { token: String, table_id: String },

    /// Cancel the current round and refund stakes (operator only).
    Void {
        token: String,
        table_id: String,
        reason: String,
    },

    /// Recompute a ticket from a seed pair.
    Verify {
        server_seed: String,
        random_seed: String,
    },

    /// Replay a settled round from history.
    VerifyRound { table_id: String, round_id: RoundId },

    /// Recent settled rounds.
    History {
        table_id: String,
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Statistics for one participant.
    Stats {
        table_id: String,
        participant_id: ParticipantId,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// Deposit forwarded by the trading collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Operator token.
    pub token: String,
    /// Target table.
    pub table_id: String,
    /// Target round. `None` means the currently open round.
    #[serde(default)]
    pub round_id: Option<RoundId>,
    /// Depositor.
    pub participant_id: ParticipantId,
    /// Deposited items.
    pub items: Vec<Item>,
    /// Declared total value.
    pub total_value: f64,
}

impl ClientMessage {
    /// Operator token carried by privileged messages.
    pub fn operator_token(&self) -> Option<&str> {
        match self {
            Self::Deposit(req) => Some(&req.token),
            Self::ForceResolve { token, .. } | Self::Void { token, .. } => Some(token),
            _ => None,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect.
    Welcome {
        server_version: String,
        tables: Vec<String>,
    },

    /// Current round state.
    State(RoundView),

    /// Round event on a subscribed table.
    Event { table_id: String, event: RoundEvent },

    /// Deposit accepted as a stake.
    DepositAccepted { table_id: String, stake: Stake },

    /// Force-resolve accepted. `round_id` is `None` if a resolution was
    /// already in flight.
    ForceResolveAccepted {
        table_id: String,
        round_id: Option<RoundId>,
    },

    /// Round voided; these stakes are refunded.
    Voided { table_id: String, refunds: Vec<Stake> },

    /// Recomputed ticket.
    VerifyResult(VerifyResult),

    /// Stored round replayed successfully.
    RoundVerified(RoundVerification),

    /// Recent settled rounds, newest first.
    History {
        table_id: String,
        records: Vec<HistoryRecord>,
    },

    /// Participant statistics.
    Stats {
        participant_id: ParticipantId,
        stats: ParticipantStats,
    },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ErrorReply),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Result of a public ticket recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// Server seed as supplied.
    pub server_seed: String,
    /// Random seed as supplied.
    pub random_seed: String,
    /// `server_seed-random_seed`.
    pub combined_seed: String,
    /// Ticket as a number.
    pub ticket: Ticket,
    /// Ticket with exactly 8 decimals.
    pub ticket_text: String,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorReply {
    /// Build an error reply.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&RoundError> for ErrorReply {
    fn from(err: &RoundError) -> Self {
        let code = match err {
            RoundError::InvalidStake(_) | RoundError::InvalidSeed(_) => ErrorCode::InvalidInput,
            RoundError::RoundNotOpen { .. } => ErrorCode::RoundNotOpen,
            RoundError::PotFull { .. } => ErrorCode::PotFull,
            RoundError::UnknownRound(_) => ErrorCode::NotFound,
            RoundError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            RoundError::FairnessMismatch { .. } => ErrorCode::FairnessMismatch,
            RoundError::NoParticipants
            | RoundError::RandomSeedUnavailable(_)
            | RoundError::PrematureReveal(_)
            | RoundError::MalformedStake(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or wrong operator token.
    Unauthorized,
    /// Malformed message or arguments.
    InvalidInput,
    /// Table does not exist.
    UnknownTable,
    /// Round or record not found.
    NotFound,
    /// Round no longer accepts stakes.
    RoundNotOpen,
    /// Item cap reached.
    PotFull,
    /// Operation not allowed in the current round state.
    InvalidTransition,
    /// Stored round failed verification.
    FairnessMismatch,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error reply shorthand.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorReply::new(code, message))
    }
}
