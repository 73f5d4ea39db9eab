//! Table Manager
//!
//! Hosts independent tables keyed by id. Each table has its own controller,
//! commitment chain, history and countdown task.

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{RandomnessConfig, TableConfig};
use crate::table::randomness::SeedFetcher;
use crate::table::runner::TableRunner;

/// Registry of running tables.
pub struct TableManager {
    config: TableConfig,
    fetcher: SeedFetcher,
    tables: RwLock<BTreeMap<String, TableRunner>>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl TableManager {
    /// Create an empty manager. Tables share the round rules and seed source.
    pub fn new(config: TableConfig, randomness: RandomnessConfig) -> Self {
        Self::with_fetcher(config, SeedFetcher::from_config(randomness))
    }

    /// Create with an explicit seed fetcher.
    pub fn with_fetcher(config: TableConfig, fetcher: SeedFetcher) -> Self {
        Self {
            config,
            fetcher,
            tables: RwLock::new(BTreeMap::new()),
            tasks: RwLock::new(Vec::new()),
        }
    }

    /// Create and start a table. Returns the existing one if the id is taken.
    pub async fn create_table(&self, table_id: &str) -> TableRunner {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.get(table_id) {
            return existing.clone();
        }

        let runner = TableRunner::new(table_id, self.config.clone(), self.fetcher.clone());
        self.tasks.write().await.push(runner.start());
        tables.insert(table_id.to_string(), runner.clone());

        info!("Table {} started", table_id);
        runner
    }

    /// Look up a table.
    pub async fn get(&self, table_id: &str) -> Option<TableRunner> {
        self.tables.read().await.get(table_id).cloned()
    }

    /// Hosted table ids, sorted.
    pub async fn table_ids(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    /// Number of hosted tables.
    pub async fn table_count(&self) -> usize {
        self.tables.read().await.len()
    }

    /// Stop every countdown loop, then void any round still resolving.
    pub async fn shutdown(&self) {
        for task in self.tasks.write().await.drain(..) {
            task.abort();
        }
        for (table_id, runner) in self.tables.read().await.iter() {
            if let Some(refunds) = runner.shutdown().await {
                warn!("Table {} voided its in-flight round, {} stakes to refund", table_id, refunds.len());
            }
        }
        info!("All tables stopped");
    }
}
