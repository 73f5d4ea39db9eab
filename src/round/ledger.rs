//! Stake Ledger
//!
//! Accumulates a round's contributions while it is open and produces the
//! single immutable snapshot that resolution runs against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::error::{Result, RoundError};
use crate::round::state::{Item, Participant, ParticipantId, RoundId, RoundStatus, Stake};

/// Relative tolerance between a declared stake value and its item prices.
const VALUE_TOLERANCE: f64 = 1e-6;

/// Per-round stake accumulator.
#[derive(Debug, Clone)]
pub struct StakeLedger {
    round_id: RoundId,
    max_items: usize,
    stakes: Vec<Stake>,
    total_items: usize,
    closed: bool,
}

impl StakeLedger {
    /// Create an empty, open ledger for a round.
    pub fn new(round_id: RoundId, max_items: usize) -> Self {
        Self {
            round_id,
            max_items,
            stakes: Vec::new(),
            total_items: 0,
            closed: false,
        }
    }

    /// Round this ledger belongs to.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Add a stake.
    ///
    /// Rejects with `RoundNotOpen` once the snapshot has been taken, with
    /// `InvalidStake` for empty or non-positive contributions, and with
    /// `PotFull` when the item cap would be exceeded. A rejected stake
    /// leaves the ledger unchanged.
    pub fn add_stake(
        &mut self,
        round_id: RoundId,
        participant_id: ParticipantId,
        items: Vec<Item>,
        stake_value: f64,
    ) -> Result<Stake> {
        if round_id != self.round_id {
            return Err(RoundError::UnknownRound(round_id));
        }

        if self.closed {
            return Err(RoundError::RoundNotOpen {
                round_id,
                status: RoundStatus::Locked,
            });
        }

        validate_stake(&participant_id, &items, stake_value).map_err(RoundError::InvalidStake)?;

        if self.total_items + items.len() > self.max_items {
            return Err(RoundError::PotFull {
                current: self.total_items,
                incoming: items.len(),
                max: self.max_items,
            });
        }

        let stake = Stake {
            sequence: self.stakes.len() as u32,
            participant_id,
            items,
            stake_value,
            deposited_at: Utc::now(),
        };

        self.total_items += stake.items.len();
        self.stakes.push(stake.clone());

        debug!(
            "Stake #{} from {} accepted: {} items, value {:.2}",
            stake.sequence, stake.participant_id, stake.items.len(), stake.stake_value
        );

        Ok(stake)
    }

    /// Freeze the ledger and produce the resolution snapshot.
    ///
    /// Succeeds at most once per round. The ledger is closed to writes even
    /// if validation fails, so malformed data can never reach resolution.
    pub fn snapshot(&mut self, round_id: RoundId) -> Result<StakeSnapshot> {
        if round_id != self.round_id {
            return Err(RoundError::UnknownRound(round_id));
        }

        if self.closed {
            return Err(RoundError::RoundNotOpen {
                round_id,
                status: RoundStatus::Locked,
            });
        }
        self.closed = true;

        if self.stakes.is_empty() {
            return Err(RoundError::NoParticipants);
        }

        for stake in &self.stakes {
            validate_stake(&stake.participant_id, &stake.items, stake.stake_value)
                .map_err(|reason| {
                    RoundError::MalformedStake(format!("stake #{}: {}", stake.sequence, reason))
                })?;
        }

        let (participants, pot_total) = derive_participants(&self.stakes);
        if !pot_total.is_finite() || pot_total <= 0.0 {
            return Err(RoundError::MalformedStake(format!(
                "pot total is not a positive number: {}",
                pot_total
            )));
        }

        Ok(StakeSnapshot {
            round_id,
            stakes: self.stakes.clone(),
            participants,
            pot_total,
            total_items: self.total_items,
            taken_at: Utc::now(),
        })
    }

    /// Has the snapshot been taken?
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Accepted stakes in order.
    pub fn stakes(&self) -> &[Stake] {
        &self.stakes
    }

    /// Items in the pot.
    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// Configured item cap.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Current pot value.
    pub fn pot_total(&self) -> f64 {
        self.stakes.iter().map(|s| s.stake_value).sum()
    }

    /// Live participant weights (display only, not used for resolution).
    pub fn participants(&self) -> Vec<Participant> {
        derive_participants(&self.stakes).0
    }

    /// Distinct contributors so far.
    pub fn participant_count(&self) -> usize {
        let mut seen: Vec<&ParticipantId> = Vec::new();
        for stake in &self.stakes {
            if !seen.contains(&&stake.participant_id) {
                seen.push(&stake.participant_id);
            }
        }
        seen.len()
    }
}

/// Immutable stake state captured at the lock transition.
///
/// Handed by value (or behind an `Arc`) to the resolver and to any display
/// layer; nothing can mutate it after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StakeSnapshot {
    round_id: RoundId,
    stakes: Vec<Stake>,
    participants: Vec<Participant>,
    pot_total: f64,
    total_items: usize,
    taken_at: DateTime<Utc>,
}

impl StakeSnapshot {
    /// Round the snapshot belongs to.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Frozen stakes, in deposit order.
    pub fn stakes(&self) -> &[Stake] {
        &self.stakes
    }

    /// Participants in first-deposit order with their weights.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Pot value at lock time.
    pub fn pot_total(&self) -> f64 {
        self.pot_total
    }

    /// Items in the pot.
    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// When the snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Look up one participant.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.participant_id == id)
    }
}

/// Aggregate stakes into participants ordered by first deposit.
///
/// Returns the participants and the pot total. Weights are 0 when the pot
/// is empty.
pub fn derive_participants(stakes: &[Stake]) -> (Vec<Participant>, f64) {
    let mut order: BTreeMap<&ParticipantId, usize> = BTreeMap::new();
    let mut participants: Vec<Participant> = Vec::new();
    let mut pot_total = 0.0;

    for stake in stakes {
        pot_total += stake.stake_value;

        let idx = *order.entry(&stake.participant_id).or_insert_with(|| {
            participants.push(Participant {
                participant_id: stake.participant_id.clone(),
                total_stake_value: 0.0,
                item_count: 0,
                win_weight: 0.0,
            });
            participants.len() - 1
        });

        let participant = &mut participants[idx];
        participant.total_stake_value += stake.stake_value;
        participant.item_count += stake.items.len();
    }

    if pot_total > 0.0 {
        for participant in &mut participants {
            participant.win_weight = participant.total_stake_value / pot_total;
        }
    }

    (participants, pot_total)
}

/// Check a contribution. Returns the rejection reason.
fn validate_stake(participant_id: &ParticipantId, items: &[Item], stake_value: f64) -> std::result::Result<(), String> {
    if participant_id.as_str().trim().is_empty() {
        return Err("participant id is empty".to_string());
    }

    if items.is_empty() {
        return Err("no items".to_string());
    }

    if !stake_value.is_finite() || stake_value <= 0.0 {
        return Err(format!("stake value must be positive, got {}", stake_value));
    }

    let mut item_sum = 0.0;
    for item in items {
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(format!("item {} has invalid price {}", item.asset_id, item.price));
        }
        item_sum += item.price;
    }

    if (item_sum - stake_value).abs() > VALUE_TOLERANCE * stake_value.max(1.0) {
        return Err(format!(
            "stake value {} does not match item prices {}",
            stake_value, item_sum
        ));
    }

    Ok(())
}
