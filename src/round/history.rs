//! Round History
//!
//! Append-only log of settled rounds, newest first, capped to a retention
//! window. Each record carries everything needed to re-verify the round.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ticket::Ticket;
use crate::round::state::{Assurance, Participant, ParticipantId, RandomSeed, RoundId, Stake};

/// Default number of records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 30;

/// Snapshot of one settled round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Round identifier.
    pub round_id: RoundId,
    /// Winning participant.
    pub winner_id: ParticipantId,
    /// Pot total awarded to the winner.
    pub amount: f64,
    /// Winner's chance at resolution time, in percent.
    pub win_chance: f64,
    /// Revealed server seed.
    pub server_seed: String,
    /// Hash that was published when the round opened.
    pub server_hash: String,
    /// Random seed combined with the server seed.
    pub random_seed: RandomSeed,
    /// Drawn ticket.
    pub winning_ticket: Ticket,
    /// Participants in first-deposit order with their weights.
    pub participants: Vec<Participant>,
    /// Frozen stakes.
    pub stakes: Vec<Stake>,
    /// When the round opened.
    pub opened_at: DateTime<Utc>,
    /// When the round settled.
    pub settled_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Was the round resolved with a locally generated random seed?
    pub fn is_reduced_assurance(&self) -> bool {
        self.random_seed.assurance == Assurance::Reduced
    }

    /// Sum of one participant's stakes in this round.
    pub fn wagered_by(&self, id: &ParticipantId) -> f64 {
        self.participants
            .iter()
            .find(|p| &p.participant_id == id)
            .map_or(0.0, |p| p.total_stake_value)
    }
}

/// Aggregate statistics for one participant across retained history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStats {
    /// Rounds the participant staked in.
    pub matches: u32,
    /// Rounds the participant won.
    pub wins: u32,
    /// Value staked across those rounds.
    pub total_wagered: f64,
    /// Pot value won.
    pub total_won: f64,
    /// Largest single pot won.
    pub best_win: f64,
}

/// Bounded newest-first log of settled rounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryLog {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    /// Create an empty log holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record. Evicts the oldest when over capacity and returns it.
    pub fn push(&mut self, record: HistoryRecord) -> Option<HistoryRecord> {
        self.records.push_front(record);
        if self.records.len() > self.capacity {
            self.records.pop_back()
        } else {
            None
        }
    }

    /// Find a retained round.
    pub fn get(&self, round_id: RoundId) -> Option<&HistoryRecord> {
        self.records.iter().find(|r| r.round_id == round_id)
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.records.front()
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    /// Up to `limit` newest records.
    pub fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records.iter().take(limit).cloned().collect()
    }

    /// Retained record count.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No records retained?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retention cap.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Statistics for one participant over retained rounds.
    pub fn participant_stats(&self, id: &ParticipantId) -> ParticipantStats {
        let mut stats = ParticipantStats::default();

        for record in &self.records {
            let wagered = record.wagered_by(id);
            if wagered <= 0.0 {
                continue;
            }

            stats.matches += 1;
            stats.total_wagered += wagered;

            if &record.winner_id == id {
                stats.wins += 1;
                stats.total_won += record.amount;
                stats.best_win = stats.best_win.max(record.amount);
            }
        }

        stats
    }

    /// Binary snapshot.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Restore from a binary snapshot.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// JSON export.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// JSON import.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
