//! Table Runner
//!
//! Async driver around one [`RoundController`]: a one-second countdown
//! loop and the resolution path. The random seed is fetched with no lock
//! held; the ledger is already closed, so nothing can change meanwhile.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::config::TableConfig;
use crate::error::Result;
use crate::proof::verify::RoundVerification;
use crate::round::events::{RoundEvent, SettlementInfo};
use crate::round::history::{HistoryRecord, ParticipantStats};
use crate::round::state::{Item, ParticipantId, RoundId, Stake};
use crate::table::controller::{PendingResolution, RoundController, RoundView};
use crate::table::randomness::SeedFetcher;

/// Shared handle to one running table.
#[derive(Clone)]
pub struct TableRunner {
    controller: Arc<RwLock<RoundController>>,
    fetcher: SeedFetcher,
    /// Background resolution started by force-resolve.
    resolution: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TableRunner {
    /// Create a runner with a fresh controller.
    pub fn new(table_id: impl Into<String>, config: TableConfig, fetcher: SeedFetcher) -> Self {
        Self {
            controller: Arc::new(RwLock::new(RoundController::new(table_id, config))),
            fetcher,
            resolution: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the countdown loop.
    pub fn start(&self) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_countdown_loop().await })
    }

    /// Tick the countdown every second; resolve when it locks.
    async fn run_countdown_loop(self) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let pending = self.controller.write().await.tick();
            if let Some(pending) = pending {
                if let Err(e) = self.resolve_pending(pending).await {
                    error!("Timer resolution failed: {}", e);
                }
            }
        }
    }

    /// Fetch the random seed and settle a locked round.
    #[instrument(skip(self, pending), fields(round = %pending.round_id))]
    pub async fn resolve_pending(&self, pending: PendingResolution) -> Result<SettlementInfo> {
        let fetch = self.fetcher.fetch().await;

        let mut controller = self.controller.write().await;
        if let Some(reason) = fetch.fallback_reason {
            controller.note_seed_fallback(pending.round_id, reason);
        }
        controller.settle(pending.round_id, fetch.seed)
    }

    /// Lock the open round now and resolve it in the background.
    ///
    /// Returns the locked round id, or `None` when a resolution is already
    /// in flight.
    pub async fn force_resolve(&self) -> Result<Option<RoundId>> {
        let pending = match self.controller.write().await.force_resolve()? {
            Some(pending) => pending,
            None => return Ok(None),
        };

        let round_id = pending.round_id;
        let runner = self.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = runner.resolve_pending(pending).await {
                error!("Forced resolution of {} failed: {}", round_id, e);
            }
        });
        *self.resolution.lock().await = Some(task);

        info!("Force-resolve accepted for round {}", round_id);
        Ok(Some(round_id))
    }

    /// Stop any in-flight resolution. A round left locked or resolving is
    /// voided and its refunds returned.
    pub async fn shutdown(&self) -> Option<Vec<Stake>> {
        if let Some(task) = self.resolution.lock().await.take() {
            if !task.is_finished() {
                warn!("Aborting in-flight resolution");
            }
            task.abort();
        }
        self.controller.write().await.abandon("server shutdown")
    }

    /// Forward a confirmed deposit to the open round.
    pub async fn deposit(
        &self,
        participant_id: ParticipantId,
        items: Vec<Item>,
        stake_value: f64,
    ) -> Result<Stake> {
        self.controller.write().await.deposit(participant_id, items, stake_value)
    }

    /// Add a stake to a specific round.
    pub async fn add_stake(
        &self,
        round_id: RoundId,
        participant_id: ParticipantId,
        items: Vec<Item>,
        stake_value: f64,
    ) -> Result<Stake> {
        self.controller
            .write()
            .await
            .add_stake(round_id, participant_id, items, stake_value)
    }

    /// Void the current round.
    pub async fn void(&self, reason: impl Into<String>) -> Result<Vec<Stake>> {
        self.controller.write().await.void(reason)
    }

    /// Current round view.
    pub async fn view(&self) -> RoundView {
        self.controller.read().await.view()
    }

    /// Subscribe to round events.
    pub async fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.controller.read().await.subscribe()
    }

    /// View plus a receiver, taken under one lock so no event is missed.
    pub async fn subscribe_with_view(&self) -> (RoundView, broadcast::Receiver<RoundEvent>) {
        let controller = self.controller.read().await;
        (controller.view(), controller.subscribe())
    }

    /// Up to `limit` newest history records.
    pub async fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.controller.read().await.history().recent(limit)
    }

    /// Participant statistics.
    pub async fn participant_stats(&self, id: &ParticipantId) -> ParticipantStats {
        self.controller.read().await.participant_stats(id)
    }

    /// Replay a settled round.
    pub async fn verify_round(&self, round_id: RoundId) -> Result<RoundVerification> {
        self.controller.read().await.verify_round(round_id)
    }

    /// Table identifier.
    pub async fn table_id(&self) -> String {
        self.controller.read().await.table_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RandomnessConfig;
    use crate::round::state::{Assurance, RoundStatus};
    use crate::table::randomness::{RandomSeedSource, RandomnessError};
    use futures_util::future::BoxFuture;

    struct FixedSource(&'static str);

    impl RandomSeedSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self) -> BoxFuture<'_, std::result::Result<String, RandomnessError>> {
            let seed = self.0.to_string();
            Box::pin(async move { Ok(seed) })
        }
    }

    fn runner(countdown_secs: u32) -> TableRunner {
        let config = TableConfig {
            countdown_secs,
            ..TableConfig::default()
        };
        let fetcher = SeedFetcher::with_source(Arc::new(FixedSource("xyz789")), RandomnessConfig::default());
        TableRunner::new("main", config, fetcher)
    }

    fn item(price: f64) -> Vec<Item> {
        vec![Item::new("asset", "Item", price)]
    }

    #[tokio::test]
    async fn test_force_resolve_settles_in_background() {
        let runner = runner(120);
        let mut rx = runner.subscribe().await;
        runner.deposit("A".into(), item(10.0), 10.0).await.unwrap();

        let round_id = runner.force_resolve().await.unwrap().unwrap();

        let settled = loop {
            match rx.recv().await.unwrap() {
                RoundEvent::RoundSettled(info) => break info,
                _ => continue,
            }
        };
        assert_eq!(settled.round_id, round_id);
        assert_eq!(settled.winner_id, "A".into());
        assert_eq!(settled.random_seed, "xyz789");
        assert_eq!(settled.assurance, Assurance::Full);
        assert!(runner.verify_round(round_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_force_resolve_is_noop() {
        let runner = runner(120);
        runner.deposit("A".into(), item(10.0), 10.0).await.unwrap();

        let pending = runner.controller.write().await.force_resolve().unwrap().unwrap();
        assert_eq!(runner.force_resolve().await.unwrap(), None);

        let info = runner.resolve_pending(pending).await.unwrap();
        assert_eq!(runner.history(10).await.len(), 1);
        assert_eq!(runner.history(10).await[0].round_id, info.round_id);
    }

    /// Never answers.
    struct HangingSource;

    impl RandomSeedSource for HangingSource {
        fn name(&self) -> &str {
            "hanging"
        }

        fn fetch(&self) -> BoxFuture<'_, std::result::Result<String, RandomnessError>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_inflight_resolution() {
        let randomness = RandomnessConfig {
            fetch_timeout: Duration::from_secs(60),
            ..RandomnessConfig::default()
        };
        let runner = TableRunner::new(
            "main",
            TableConfig::default(),
            SeedFetcher::with_source(Arc::new(HangingSource), randomness),
        );
        runner.deposit("A".into(), item(10.0), 10.0).await.unwrap();
        runner.deposit("B".into(), item(5.0), 5.0).await.unwrap();

        let round_id = runner.force_resolve().await.unwrap().unwrap();
        assert_eq!(runner.view().await.status, RoundStatus::Resolving);

        let refunds = runner.shutdown().await.unwrap();
        assert_eq!(refunds.len(), 2);

        let view = runner.view().await;
        assert_eq!(view.status, RoundStatus::Open);
        assert_ne!(view.round_id, round_id);
        assert!(runner.history(10).await.is_empty());

        // Nothing left to abandon
        assert!(runner.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_countdown_loop_resolves() {
        let runner = runner(1);
        let mut rx = runner.subscribe().await;
        let handle = runner.start();

        runner.deposit("A".into(), item(30.0), 30.0).await.unwrap();
        runner.deposit("B".into(), item(70.0), 70.0).await.unwrap();

        let settled = loop {
            match rx.recv().await.unwrap() {
                RoundEvent::RoundSettled(info) => break info,
                _ => continue,
            }
        };
        handle.abort();

        let view = runner.view().await;
        assert_eq!(view.status, RoundStatus::Open);
        assert_ne!(view.round_id, settled.round_id);
        assert_eq!(view.last_settlement, Some(settled));
    }

    #[tokio::test]
    async fn test_local_only_fetcher_marks_reduced() {
        let runner = TableRunner::new(
            "main",
            TableConfig::default(),
            SeedFetcher::local_only(RandomnessConfig::default()),
        );
        runner.deposit("A".into(), item(1.0), 1.0).await.unwrap();
        let pending = runner.controller.write().await.force_resolve().unwrap().unwrap();

        let info = runner.resolve_pending(pending).await.unwrap();
        assert_eq!(info.assurance, Assurance::Reduced);
        assert_eq!(info.random_source, "local");
    }
}
