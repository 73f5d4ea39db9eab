//! Round Lifecycle Controller
//!
//! Owns one table's state machine:
//!
//! ```text
//! OPEN ──(≥min participants + countdown, or force-resolve)──► LOCKED
//!   │                                                          │ snapshot taken
//!   │ void                                                     ▼
//!   ▼                                                      RESOLVING ──► SETTLED
//! VOIDED ◄──────────── malformed data / resolver failure ──────┘
//! ```
//!
//! Synchronous; the async [`TableRunner`](super::runner::TableRunner) drives
//! the countdown and fetches random seeds without holding the lock.

use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{TableConfig, MIN_TIMER_PARTICIPANTS};
use crate::error::{Result, RoundError};
use crate::proof::commitment::CommitmentManager;
use crate::proof::verify::{verify_round, RoundVerification};
use crate::round::events::{LockReason, RoundEvent, SettlementInfo};
use crate::round::history::{HistoryLog, HistoryRecord, ParticipantStats};
use crate::round::ledger::{StakeLedger, StakeSnapshot};
use crate::round::resolver::resolve_snapshot;
use crate::round::state::{
    Item, Participant, ParticipantId, RandomSeed, Round, RoundId, RoundOutcome, RoundStatus,
    Stake,
};

/// Event channel capacity per table.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A locked round waiting for its random seed.
#[derive(Clone, Debug)]
pub struct PendingResolution {
    /// Locked round.
    pub round_id: RoundId,
    /// What triggered the lock.
    pub reason: LockReason,
    /// Frozen stakes.
    pub snapshot: Arc<StakeSnapshot>,
}

/// Participant line in the presentation view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Value staked.
    pub total_stake_value: f64,
    /// Items staked.
    pub item_count: usize,
    /// Chance to win, in percent.
    pub chance_percent: f64,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        Self {
            participant_id: p.participant_id.clone(),
            total_stake_value: p.total_stake_value,
            item_count: p.item_count,
            chance_percent: p.chance_percent(),
        }
    }
}

/// Current round state for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    /// Table the round runs on.
    pub table_id: String,
    /// Current round.
    pub round_id: RoundId,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Published commitment.
    pub server_hash: String,
    /// Pot value.
    pub pot_total: f64,
    /// Items in the pot.
    pub total_items: usize,
    /// Item cap.
    pub max_items: usize,
    /// Participants in first-deposit order.
    pub participants: Vec<ParticipantView>,
    /// Seconds left, when the countdown runs.
    pub countdown_remaining: Option<u32>,
    /// Most recent settlement on this table.
    pub last_settlement: Option<SettlementInfo>,
}

/// One table's round state machine.
pub struct RoundController {
    table_id: String,
    config: TableConfig,
    commitments: CommitmentManager,
    round: Round,
    ledger: StakeLedger,
    countdown: Option<u32>,
    snapshot: Option<Arc<StakeSnapshot>>,
    history: HistoryLog,
    events: broadcast::Sender<RoundEvent>,
}

impl RoundController {
    /// Create a controller with its first round open.
    ///
    /// `min_participants` is raised to [`MIN_TIMER_PARTICIPANTS`] if set lower.
    pub fn new(table_id: impl Into<String>, mut config: TableConfig) -> Self {
        config.min_participants = config.min_participants.max(MIN_TIMER_PARTICIPANTS);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut commitments = CommitmentManager::default();

        let round_id = RoundId::new_v4();
        let commitment = commitments.commit(round_id);

        let controller = Self {
            table_id: table_id.into(),
            ledger: StakeLedger::new(round_id, config.max_items),
            history: HistoryLog::new(config.history_capacity),
            round: Round::open(round_id, commitment.server_hash),
            config,
            commitments,
            countdown: None,
            snapshot: None,
            events,
        };

        info!(
            "Table {} opened round {} (hash {})",
            controller.table_id, round_id, controller.round.server_hash
        );
        controller
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Table identifier.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Current round.
    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Current round id.
    pub fn current_round_id(&self) -> RoundId {
        self.round.id
    }

    /// Current status.
    pub fn status(&self) -> RoundStatus {
        self.round.status
    }

    /// Seconds left on the countdown, if running.
    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown
    }

    /// Snapshot of the locked round, if any.
    pub fn snapshot(&self) -> Option<Arc<StakeSnapshot>> {
        self.snapshot.clone()
    }

    /// Settled-round history.
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Table configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Subscribe to round events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    /// Statistics for one participant over retained history.
    pub fn participant_stats(&self, id: &ParticipantId) -> ParticipantStats {
        self.history.participant_stats(id)
    }

    /// Replay a settled round from history.
    pub fn verify_round(&self, round_id: RoundId) -> Result<RoundVerification> {
        verify_round(&self.history, round_id)
    }

    // =========================================================================
    // STAKES
    // =========================================================================

    /// Add a stake to `round_id`.
    ///
    /// Starts the countdown once the participant minimum is reached.
    pub fn add_stake(
        &mut self,
        round_id: RoundId,
        participant_id: ParticipantId,
        items: Vec<Item>,
        stake_value: f64,
    ) -> Result<Stake> {
        if round_id != self.round.id {
            return Err(match self.history.get(round_id) {
                Some(_) => RoundError::RoundNotOpen {
                    round_id,
                    status: RoundStatus::Settled,
                },
                None => RoundError::UnknownRound(round_id),
            });
        }

        if self.round.status != RoundStatus::Open {
            return Err(RoundError::RoundNotOpen {
                round_id,
                status: self.round.status,
            });
        }

        let stake = match self.ledger.add_stake(round_id, participant_id, items, stake_value) {
            Ok(stake) => stake,
            Err(e) if e.is_rejection() => {
                debug!("Table {} rejected stake for round {}: {}", self.table_id, round_id, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Table {} could not stake round {}: {}", self.table_id, round_id, e);
                return Err(e);
            }
        };

        self.emit(RoundEvent::StakeAdded {
            round_id,
            participant_id: stake.participant_id.clone(),
            stake_value: stake.stake_value,
            item_count: stake.items.len(),
            pot_total: self.ledger.pot_total(),
            total_items: self.ledger.total_items(),
        });

        if self.countdown.is_none() && self.ledger.participant_count() >= self.config.min_participants {
            self.countdown = Some(self.config.countdown_secs);
            info!(
                "Table {} round {}: countdown started ({}s)",
                self.table_id, round_id, self.config.countdown_secs
            );
            self.emit(RoundEvent::CountdownStarted {
                round_id,
                seconds: self.config.countdown_secs,
            });
        }

        Ok(stake)
    }

    /// Add a stake to whatever round is currently open.
    pub fn deposit(
        &mut self,
        participant_id: ParticipantId,
        items: Vec<Item>,
        stake_value: f64,
    ) -> Result<Stake> {
        self.add_stake(self.round.id, participant_id, items, stake_value)
    }

    // =========================================================================
    // LOCKING
    // =========================================================================

    /// Advance the countdown by one second.
    ///
    /// Returns the pending resolution when the countdown reaches zero.
    pub fn tick(&mut self) -> Option<PendingResolution> {
        if self.round.status != RoundStatus::Open {
            return None;
        }
        let remaining = self.countdown?;
        let round_id = self.round.id;

        if self.ledger.participant_count() < self.config.min_participants {
            self.countdown = None;
            info!("Table {} round {}: countdown reset", self.table_id, round_id);
            self.emit(RoundEvent::CountdownReset { round_id });
            return None;
        }

        let remaining = remaining.saturating_sub(1);
        self.countdown = Some(remaining);
        self.emit(RoundEvent::CountdownTick { round_id, remaining });

        if remaining > 0 {
            return None;
        }

        match self.lock(LockReason::Timer) {
            Ok(pending) => pending,
            Err(e) => {
                error!("Table {} round {} failed to lock: {}", self.table_id, round_id, e);
                None
            }
        }
    }

    /// Lock the open round immediately. Needs at least one participant.
    ///
    /// Returns `Ok(None)` when the round is already locked or resolving.
    pub fn force_resolve(&mut self) -> Result<Option<PendingResolution>> {
        match self.round.status {
            RoundStatus::Open => {}
            RoundStatus::Locked | RoundStatus::Resolving => return Ok(None),
            status => {
                return Err(RoundError::InvalidTransition {
                    from: status,
                    reason: "force-resolve on a finished round".to_string(),
                })
            }
        }

        if self.ledger.participant_count() == 0 {
            return Err(RoundError::InvalidTransition {
                from: RoundStatus::Open,
                reason: "force-resolve needs at least one participant".to_string(),
            });
        }

        self.lock(LockReason::ForceResolve)
    }

    /// OPEN → LOCKED → RESOLVING. Cancels the countdown and takes the
    /// snapshot in the same step. A no-op unless OPEN.
    fn lock(&mut self, reason: LockReason) -> Result<Option<PendingResolution>> {
        if self.round.status != RoundStatus::Open {
            return Ok(None);
        }

        let round_id = self.round.id;
        self.countdown = None;
        self.round.status = RoundStatus::Locked;

        let snapshot = match self.ledger.snapshot(round_id) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                error!("Table {} round {}: snapshot rejected: {}", self.table_id, round_id, e);
                self.void_round(format!("snapshot rejected: {}", e));
                return Err(e);
            }
        };

        info!(
            "Table {} round {} locked ({:?}): {} participants, pot {:.2}",
            self.table_id,
            round_id,
            reason,
            snapshot.participants().len(),
            snapshot.pot_total()
        );
        self.emit(RoundEvent::RoundLocked {
            round_id,
            reason,
            participants: snapshot.participants().len(),
            pot_total: snapshot.pot_total(),
        });

        self.snapshot = Some(snapshot.clone());
        self.round.status = RoundStatus::Resolving;

        Ok(Some(PendingResolution {
            round_id,
            reason,
            snapshot,
        }))
    }

    // =========================================================================
    // SETTLEMENT
    // =========================================================================

    /// Record that the random seed came from the local fallback.
    pub fn note_seed_fallback(&mut self, round_id: RoundId, reason: String) {
        self.emit(RoundEvent::SeedFallbackUsed { round_id, reason });
    }

    /// RESOLVING → SETTLED with the given random seed.
    ///
    /// Records the outcome, reveals the server seed, archives the round and
    /// opens the next one. If resolution fails the round is voided with
    /// every stake refunded and the error is returned.
    pub fn settle(&mut self, round_id: RoundId, random_seed: RandomSeed) -> Result<SettlementInfo> {
        if round_id != self.round.id {
            return Err(RoundError::UnknownRound(round_id));
        }
        if self.round.status != RoundStatus::Resolving {
            return Err(RoundError::InvalidTransition {
                from: self.round.status,
                reason: "settle requires a resolving round".to_string(),
            });
        }

        let snapshot = match self.snapshot.clone() {
            Some(snapshot) => snapshot,
            None => return Err(self.fail_closed(RoundError::NoParticipants)),
        };

        let commitment = match self.commitments.commitment(round_id).cloned() {
            Some(commitment) => commitment,
            None => return Err(self.fail_closed(RoundError::UnknownRound(round_id))),
        };

        let resolution = match resolve_snapshot(&commitment, &random_seed.value, &snapshot) {
            Ok(resolution) => resolution,
            Err(e) => return Err(self.fail_closed(e)),
        };

        // Reveal before the round leaves Resolving so a failure can still void it
        let server_seed = match self
            .commitments
            .mark_resolved(round_id)
            .and_then(|_| self.commitments.reveal(round_id))
        {
            Ok(seed) => seed,
            Err(e) => return Err(self.fail_closed(e)),
        };

        let outcome = RoundOutcome {
            random_seed: random_seed.clone(),
            winning_ticket: resolution.winning_ticket,
            winner_id: resolution.winner_id.clone(),
        };
        if !self.round.settle(outcome) {
            return Err(self.fail_closed(RoundError::InvalidTransition {
                from: self.round.status,
                reason: "outcome already recorded".to_string(),
            }));
        }

        let info = SettlementInfo {
            round_id,
            winner_id: resolution.winner_id.clone(),
            amount: snapshot.pot_total(),
            win_chance: resolution.win_weight * 100.0,
            winning_ticket: resolution.winning_ticket,
            server_seed: server_seed.clone(),
            server_hash: self.round.server_hash.clone(),
            random_seed: random_seed.value.clone(),
            random_source: random_seed.source.clone(),
            assurance: random_seed.assurance,
        };

        self.history.push(HistoryRecord {
            round_id,
            winner_id: resolution.winner_id,
            amount: snapshot.pot_total(),
            win_chance: info.win_chance,
            server_seed,
            server_hash: self.round.server_hash.clone(),
            random_seed,
            winning_ticket: resolution.winning_ticket,
            participants: snapshot.participants().to_vec(),
            stakes: snapshot.stakes().to_vec(),
            opened_at: self.round.opened_at,
            settled_at: Utc::now(),
        });

        info!(
            "Table {} round {} settled: ticket {} -> {} ({:.2}%) wins {:.2}",
            self.table_id, round_id, info.winning_ticket, info.winner_id, info.win_chance, info.amount
        );
        self.emit(RoundEvent::RoundSettled(info.clone()));

        self.open_next_round();
        Ok(info)
    }

    // =========================================================================
    // VOIDING
    // =========================================================================

    /// Cancel the current round while OPEN or LOCKED and refund every stake.
    pub fn void(&mut self, reason: impl Into<String>) -> Result<Vec<Stake>> {
        match self.round.status {
            RoundStatus::Open | RoundStatus::Locked => Ok(self.void_round(reason.into())),
            status => Err(RoundError::InvalidTransition {
                from: status,
                reason: "void is only allowed while open or locked".to_string(),
            }),
        }
    }

    /// Void a round whose resolution will never complete, e.g. on shutdown.
    ///
    /// Returns the refunds, or `None` if no round was locked or resolving.
    pub fn abandon(&mut self, reason: &str) -> Option<Vec<Stake>> {
        match self.round.status {
            RoundStatus::Locked | RoundStatus::Resolving => {
                warn!(
                    "Table {} round {} abandoned while {}: {}",
                    self.table_id, self.round.id, self.round.status, reason
                );
                Some(self.void_round(format!("abandoned: {}", reason)))
            }
            _ => None,
        }
    }

    /// Void after a resolution failure; no winner has been drawn.
    fn fail_closed(&mut self, err: RoundError) -> RoundError {
        if err.is_invariant_violation() {
            error!(
                "Table {} round {}: invariant violated during resolution, voiding: {}",
                self.table_id, self.round.id, err
            );
        } else {
            warn!(
                "Table {} round {}: resolution failed, voiding: {}",
                self.table_id, self.round.id, err
            );
        }
        self.void_round(format!("resolution failed: {}", err));
        err
    }

    fn void_round(&mut self, reason: String) -> Vec<Stake> {
        let round_id = self.round.id;
        let refunds = self.ledger.stakes().to_vec();

        self.countdown = None;
        self.round.status = RoundStatus::Voided;
        self.commitments.discard(round_id);

        warn!(
            "Table {} round {} voided ({}), refunding {} stakes",
            self.table_id,
            round_id,
            reason,
            refunds.len()
        );
        self.emit(RoundEvent::RoundVoided {
            round_id,
            reason,
            refunds: refunds.clone(),
        });

        self.open_next_round();
        refunds
    }

    fn open_next_round(&mut self) {
        let round_id = RoundId::new_v4();
        let commitment = self.commitments.commit(round_id);

        self.round = Round::open(round_id, commitment.server_hash.clone());
        self.ledger = StakeLedger::new(round_id, self.config.max_items);
        self.countdown = None;
        self.snapshot = None;

        info!("Table {} opened round {} (hash {})", self.table_id, round_id, commitment.server_hash);
        self.emit(RoundEvent::RoundOpened {
            round_id,
            server_hash: commitment.server_hash,
        });
    }

    // =========================================================================
    // VIEW
    // =========================================================================

    /// Presentation snapshot of the current round.
    pub fn view(&self) -> RoundView {
        let (participants, pot_total, total_items) = match &self.snapshot {
            Some(snapshot) => (
                snapshot.participants().to_vec(),
                snapshot.pot_total(),
                snapshot.total_items(),
            ),
            None => (
                self.ledger.participants(),
                self.ledger.pot_total(),
                self.ledger.total_items(),
            ),
        };

        RoundView {
            table_id: self.table_id.clone(),
            round_id: self.round.id,
            status: self.round.status,
            server_hash: self.round.server_hash.clone(),
            pot_total,
            total_items,
            max_items: self.config.max_items,
            participants: participants.iter().map(ParticipantView::from).collect(),
            countdown_remaining: self.countdown,
            last_settlement: self.history.latest().map(settlement_from_record),
        }
    }

    fn emit(&self, event: RoundEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn settlement_from_record(record: &HistoryRecord) -> SettlementInfo {
    SettlementInfo {
        round_id: record.round_id,
        winner_id: record.winner_id.clone(),
        amount: record.amount,
        win_chance: record.win_chance,
        winning_ticket: record.winning_ticket,
        server_seed: record.server_seed.clone(),
        server_hash: record.server_hash.clone(),
        random_seed: record.random_seed.value.clone(),
        random_source: record.random_seed.source.clone(),
        assurance: record.random_seed.assurance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::sha256_hex;
    use crate::proof::verify::verify;
    use crate::round::state::Assurance;

    fn config(countdown_secs: u32) -> TableConfig {
        TableConfig {
            countdown_secs,
            ..TableConfig::default()
        }
    }

    fn item(price: f64) -> Vec<Item> {
        vec![Item::new("asset", "AK-47 | Redline", price)]
    }

    fn drain(rx: &mut broadcast::Receiver<RoundEvent>) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_new_round_is_open_with_hash() {
        let controller = RoundController::new("main", TableConfig::default());
        let view = controller.view();
        assert_eq!(view.status, RoundStatus::Open);
        assert_eq!(view.server_hash.len(), 64);
        assert!(view.participants.is_empty());
        assert_eq!(view.countdown_remaining, None);
        assert_eq!(view.max_items, 200);
    }

    #[test]
    fn test_single_participant_never_auto_locks() {
        let mut controller = RoundController::new("main", config(3));
        controller.deposit("A".into(), item(10.0), 10.0).unwrap();
        assert_eq!(controller.countdown_remaining(), None);

        for _ in 0..500 {
            assert!(controller.tick().is_none());
        }
        assert_eq!(controller.status(), RoundStatus::Open);

        // Force-resolve does lock it
        let pending = controller.force_resolve().unwrap().unwrap();
        assert_eq!(pending.reason, LockReason::ForceResolve);
        assert_eq!(controller.status(), RoundStatus::Resolving);

        let info = controller
            .settle(pending.round_id, RandomSeed::external("r1", "test"))
            .unwrap();
        assert_eq!(info.winner_id, "A".into());
        assert_eq!(info.win_chance, 100.0);
    }

    #[test]
    fn test_low_min_participants_is_raised() {
        for min_participants in [0, 1] {
            let config = TableConfig {
                countdown_secs: 1,
                min_participants,
                ..TableConfig::default()
            };
            let mut controller = RoundController::new("main", config);
            assert_eq!(controller.config().min_participants, MIN_TIMER_PARTICIPANTS);

            controller.deposit("A".into(), item(10.0), 10.0).unwrap();
            assert_eq!(controller.countdown_remaining(), None);
            for _ in 0..5 {
                assert!(controller.tick().is_none());
            }
            assert_eq!(controller.status(), RoundStatus::Open);
        }
    }

    #[test]
    fn test_force_resolve_needs_participant() {
        let mut controller = RoundController::new("main", TableConfig::default());
        assert!(matches!(
            controller.force_resolve(),
            Err(RoundError::InvalidTransition { .. })
        ));
        assert_eq!(controller.status(), RoundStatus::Open);
    }

    #[test]
    fn test_timer_locks_with_two_participants() {
        let mut controller = RoundController::new("main", config(3));
        let mut rx = controller.subscribe();

        controller.deposit("A".into(), item(30.0), 30.0).unwrap();
        assert_eq!(controller.countdown_remaining(), None);
        controller.deposit("B".into(), item(70.0), 70.0).unwrap();
        assert_eq!(controller.countdown_remaining(), Some(3));

        assert!(controller.tick().is_none());
        assert!(controller.tick().is_none());
        let pending = controller.tick().unwrap();
        assert_eq!(pending.reason, LockReason::Timer);
        assert_eq!(pending.snapshot.participants().len(), 2);
        assert_eq!(pending.snapshot.pot_total(), 100.0);
        assert_eq!(controller.countdown_remaining(), None);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, RoundEvent::CountdownStarted { seconds: 3, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::RoundLocked { reason: LockReason::Timer, .. })));
    }

    #[test]
    fn test_duplicate_triggers_are_noops() {
        let mut controller = RoundController::new("main", config(1));
        controller.deposit("A".into(), item(1.0), 1.0).unwrap();
        controller.deposit("B".into(), item(1.0), 1.0).unwrap();

        let pending = controller.tick().unwrap();

        // Second timer firing and duplicate force-resolve do nothing
        assert!(controller.tick().is_none());
        assert!(controller.force_resolve().unwrap().is_none());
        assert_eq!(controller.status(), RoundStatus::Resolving);

        controller
            .settle(pending.round_id, RandomSeed::external("r", "test"))
            .unwrap();

        // Settling again is rejected; the round is already archived
        assert!(controller
            .settle(pending.round_id, RandomSeed::external("r", "test"))
            .is_err());
        assert_eq!(controller.history().len(), 1);
    }

    #[test]
    fn test_stake_after_lock_rejected() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(5.0), 5.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();

        let err = controller
            .add_stake(pending.round_id, "B".into(), item(5.0), 5.0)
            .unwrap_err();
        assert_eq!(
            err,
            RoundError::RoundNotOpen {
                round_id: pending.round_id,
                status: RoundStatus::Resolving,
            }
        );

        // Snapshot unaffected
        assert_eq!(pending.snapshot.participants().len(), 1);
    }

    #[test]
    fn test_stake_to_settled_round_rejected() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(5.0), 5.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();
        controller
            .settle(pending.round_id, RandomSeed::external("r", "test"))
            .unwrap();

        assert!(matches!(
            controller.add_stake(pending.round_id, "B".into(), item(5.0), 5.0),
            Err(RoundError::RoundNotOpen { status: RoundStatus::Settled, .. })
        ));
        assert_eq!(
            controller.add_stake(RoundId::nil(), "B".into(), item(5.0), 5.0),
            Err(RoundError::UnknownRound(RoundId::nil()))
        );
    }

    #[test]
    fn test_invalid_stake_leaves_round_unaffected() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(5.0), 5.0).unwrap();

        assert!(matches!(
            controller.deposit("B".into(), vec![], 5.0),
            Err(RoundError::InvalidStake(_))
        ));
        assert!(matches!(
            controller.deposit("B".into(), item(0.0), 0.0),
            Err(RoundError::InvalidStake(_))
        ));

        let view = controller.view();
        assert_eq!(view.participants.len(), 1);
        assert_eq!(view.pot_total, 5.0);
    }

    #[test]
    fn test_pot_full() {
        let mut controller = RoundController::new(
            "main",
            TableConfig {
                max_items: 3,
                ..TableConfig::default()
            },
        );
        let two = vec![Item::new("1", "a", 1.0), Item::new("2", "b", 1.0)];
        controller.deposit("A".into(), two.clone(), 2.0).unwrap();
        assert_eq!(
            controller.deposit("B".into(), two, 2.0),
            Err(RoundError::PotFull { current: 2, incoming: 2, max: 3 })
        );
        controller.deposit("B".into(), item(1.0), 1.0).unwrap();
        assert_eq!(controller.view().total_items, 3);
    }

    #[test]
    fn test_settlement_reveals_and_verifies() {
        let mut controller = RoundController::new("main", TableConfig::default());
        let first_hash = controller.round().server_hash.clone();
        controller.deposit("A".into(), item(30.0), 30.0).unwrap();
        controller.deposit("B".into(), item(70.0), 70.0).unwrap();

        let pending = controller.force_resolve().unwrap().unwrap();
        let info = controller
            .settle(pending.round_id, RandomSeed::external("xyz789", "test"))
            .unwrap();

        assert_eq!(sha256_hex(&info.server_seed), first_hash);
        assert_eq!(info.server_hash, first_hash);
        assert_eq!(info.amount, 100.0);
        assert_eq!(verify(&info.server_seed, "xyz789").unwrap(), info.winning_ticket);

        let record = controller.history().get(pending.round_id).unwrap();
        assert_eq!(record.winning_ticket, info.winning_ticket);
        assert_eq!(record.stakes.len(), 2);
        assert!(controller.verify_round(pending.round_id).is_ok());

        // Fresh round with a fresh commitment
        assert_eq!(controller.status(), RoundStatus::Open);
        assert_ne!(controller.current_round_id(), pending.round_id);
        assert_ne!(controller.round().server_hash, first_hash);
        assert_eq!(controller.view().last_settlement, Some(info));
    }

    #[test]
    fn test_fallback_seed_recorded_as_reduced() {
        let mut controller = RoundController::new("main", TableConfig::default());
        let mut rx = controller.subscribe();
        controller.deposit("A".into(), item(1.0), 1.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();

        controller.note_seed_fallback(pending.round_id, "beacon down".to_string());
        let info = controller
            .settle(pending.round_id, RandomSeed::local_fallback("k3j2h1l0"))
            .unwrap();

        assert_eq!(info.assurance, Assurance::Reduced);
        assert!(controller.history().get(pending.round_id).unwrap().is_reduced_assurance());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, RoundEvent::SeedFallbackUsed { .. })));
    }

    #[test]
    fn test_resolution_failure_fails_closed() {
        let mut controller = RoundController::new("main", TableConfig::default());
        let mut rx = controller.subscribe();
        controller.deposit("A".into(), item(3.0), 3.0).unwrap();
        controller.deposit("B".into(), item(4.0), 4.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();

        // Empty random seed cannot be resolved
        let err = controller
            .settle(pending.round_id, RandomSeed::external("", "test"))
            .unwrap_err();
        assert!(matches!(err, RoundError::InvalidSeed(_)));

        assert!(controller.history().is_empty());
        assert_eq!(controller.status(), RoundStatus::Open);
        assert_ne!(controller.current_round_id(), pending.round_id);

        let refunds = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                RoundEvent::RoundVoided { refunds, .. } => Some(refunds),
                _ => None,
            })
            .unwrap();
        assert_eq!(refunds.len(), 2);
    }

    #[test]
    fn test_missing_commitment_voids_instead_of_settling() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(3.0), 3.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();
        controller.commitments.discard(pending.round_id);

        let err = controller
            .settle(pending.round_id, RandomSeed::external("r1", "test"))
            .unwrap_err();
        assert!(matches!(err, RoundError::UnknownRound(_)));

        // Nothing half-settled: no record, fresh open round
        assert!(controller.history().is_empty());
        assert_eq!(controller.status(), RoundStatus::Open);
        assert_ne!(controller.current_round_id(), pending.round_id);
        assert!(controller.deposit("B".into(), item(1.0), 1.0).is_ok());
    }

    #[test]
    fn test_abandon_refunds_resolving_round() {
        let mut controller = RoundController::new("main", TableConfig::default());
        assert!(controller.abandon("shutdown").is_none());

        controller.deposit("A".into(), item(3.0), 3.0).unwrap();
        controller.deposit("B".into(), item(4.0), 4.0).unwrap();
        let pending = controller.force_resolve().unwrap().unwrap();

        let refunds = controller.abandon("shutdown").unwrap();
        assert_eq!(refunds.len(), 2);
        assert_eq!(controller.status(), RoundStatus::Open);
        assert!(controller.history().is_empty());
        assert!(controller
            .settle(pending.round_id, RandomSeed::external("r1", "test"))
            .is_err());
    }

    #[test]
    fn test_void_refunds_stakes() {
        let mut controller = RoundController::new("main", TableConfig::default());
        let round_id = controller.current_round_id();
        controller.deposit("A".into(), item(3.0), 3.0).unwrap();
        controller.deposit("A".into(), item(2.0), 2.0).unwrap();

        let refunds = controller.void("operator request").unwrap();
        assert_eq!(refunds.len(), 2);
        assert_eq!(controller.status(), RoundStatus::Open);
        assert_ne!(controller.current_round_id(), round_id);
        assert!(controller.history().is_empty());
    }

    #[test]
    fn test_void_rejected_while_resolving() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(3.0), 3.0).unwrap();
        controller.force_resolve().unwrap();

        assert!(matches!(
            controller.void("too late"),
            Err(RoundError::InvalidTransition { from: RoundStatus::Resolving, .. })
        ));
    }

    #[test]
    fn test_history_cap_after_many_settlements() {
        let mut controller = RoundController::new(
            "main",
            TableConfig {
                history_capacity: 5,
                ..TableConfig::default()
            },
        );

        for i in 0..12 {
            controller.deposit("A".into(), item(1.0), 1.0).unwrap();
            controller.deposit("B".into(), item(2.0), 2.0).unwrap();
            let pending = controller.force_resolve().unwrap().unwrap();
            controller
                .settle(pending.round_id, RandomSeed::external(format!("seed{}", i), "test"))
                .unwrap();
            assert!(controller.history().len() <= 5);
        }
        assert_eq!(controller.history().len(), 5);

        let a = controller.participant_stats(&"A".into());
        let b = controller.participant_stats(&"B".into());
        assert_eq!(a.matches, 5);
        assert_eq!(a.wins + b.wins, 5);
    }

    #[test]
    fn test_view_reports_chances() {
        let mut controller = RoundController::new("main", TableConfig::default());
        controller.deposit("A".into(), item(30.0), 30.0).unwrap();
        controller.deposit("B".into(), item(70.0), 70.0).unwrap();

        let view = controller.view();
        assert_eq!(view.countdown_remaining, Some(120));
        assert_eq!(view.participants[0].participant_id, "A".into());
        assert!((view.participants[0].chance_percent - 30.0).abs() < 1e-9);
        assert!((view.participants[1].chance_percent - 70.0).abs() < 1e-9);
    }
}
