//! Round engine: state, stake ledger, outcome resolver, history.

pub mod state;
pub mod ledger;
pub mod resolver;
pub mod history;
pub mod events;

pub use state::{
    Assurance, Item, Participant, ParticipantId, RandomSeed, Round, RoundId, RoundOutcome,
    RoundStatus, Stake,
};
pub use ledger::{StakeLedger, StakeSnapshot};
pub use resolver::{resolve, select_winner, Resolution};
pub use history::{HistoryLog, HistoryRecord, ParticipantStats};
pub use events::{LockReason, RoundEvent, SettlementInfo};
