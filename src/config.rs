//! Configuration
//!
//! Plain structs with defaults. Each has a `from_env()` constructor that
//! starts from the defaults and applies `FAIRPOT_*` overrides.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FAIRPOT_";

/// Default random.org plain-text string endpoint.
pub const DEFAULT_BEACON_URL: &str = "https://www.random.org/strings/?num=1&len=16&digits=on&upperalpha=on&loweralpha=on&unique=on&format=plain&rnd=new";

/// Fewest participants that let the countdown lock a round.
pub const MIN_TIMER_PARTICIPANTS: usize = 2;

/// Read and parse `FAIRPOT_<name>`. Unparseable values are logged and ignored.
fn env_var<T: FromStr>(name: &str) -> Option<T> {
    let key = format!("{}{}", ENV_PREFIX, name);
    let raw = std::env::var(&key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

// =============================================================================
// TABLE
// =============================================================================

/// Per-table round rules.
#[derive(Clone, Debug, PartialEq)]
pub struct TableConfig {
    /// Countdown length once enough participants joined.
    pub countdown_secs: u32,
    /// Participants needed before the countdown starts.
    pub min_participants: usize,
    /// Maximum items in one pot.
    pub max_items: usize,
    /// Settled rounds kept in history.
    pub history_capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 120,
            min_participants: MIN_TIMER_PARTICIPANTS,
            max_items: 200,
            history_capacity: 30,
        }
    }
}

impl TableConfig {
    /// Defaults with environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            countdown_secs: env_var("COUNTDOWN_SECS").unwrap_or(defaults.countdown_secs),
            min_participants: env_var::<usize>("MIN_PARTICIPANTS")
                .unwrap_or(defaults.min_participants)
                .max(MIN_TIMER_PARTICIPANTS),
            max_items: env_var("MAX_ITEMS").unwrap_or(defaults.max_items),
            history_capacity: env_var("HISTORY_CAPACITY").unwrap_or(defaults.history_capacity),
        }
    }
}

// =============================================================================
// RANDOMNESS
// =============================================================================

/// External random seed fetching.
#[derive(Clone, Debug, PartialEq)]
pub struct RandomnessConfig {
    /// Beacon endpoint returning a plain-text seed. `None` always uses the local fallback.
    pub beacon_url: Option<String>,
    /// Bound on each fetch attempt.
    pub fetch_timeout: Duration,
    /// Attempts before falling back.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff: Duration,
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            beacon_url: Some(DEFAULT_BEACON_URL.to_string()),
            fetch_timeout: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RandomnessConfig {
    /// Defaults with environment overrides. `FAIRPOT_BEACON_URL=off` disables the beacon.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let beacon_url = match std::env::var(format!("{}BEACON_URL", ENV_PREFIX)) {
            Ok(url) if url.is_empty() || url == "off" || url == "none" => None,
            Ok(url) => Some(url),
            Err(_) => defaults.beacon_url,
        };

        Self {
            beacon_url,
            fetch_timeout: env_var("FETCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            max_retries: env_var("MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_backoff: env_var("INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << shift)
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// WebSocket feed settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Shared secret for deposit, force-resolve and void messages.
    /// `None` disables those messages entirely.
    pub operator_token: Option<String>,
    /// Table ids to host.
    pub tables: Vec<String>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            operator_token: None,
            tables: vec!["main".to_string()],
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults with environment overrides. `FAIRPOT_TABLES` is comma-separated.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tables = std::env::var(format!("{}TABLES", ENV_PREFIX))
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|t| !t.is_empty())
            .unwrap_or(defaults.tables);

        Self {
            bind_addr: env_var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_var("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            operator_token: std::env::var(format!("{}OPERATOR_TOKEN", ENV_PREFIX))
                .ok()
                .filter(|t| !t.is_empty()),
            tables,
            version: defaults.version,
        }
    }

    /// Is the operator channel enabled?
    pub fn operator_enabled(&self) -> bool {
        self.operator_token.is_some()
    }
}

// =============================================================================
// AGGREGATE
// =============================================================================

/// Full process configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FairpotConfig {
    /// Round rules, shared by every table.
    pub table: TableConfig,
    /// Random seed source.
    pub randomness: RandomnessConfig,
    /// Network feed.
    pub server: ServerConfig,
}

impl FairpotConfig {
    /// Load every section from the environment.
    pub fn from_env() -> Self {
        Self {
            table: TableConfig::from_env(),
            randomness: RandomnessConfig::from_env(),
            server: ServerConfig::from_env(),
        }
    }
}
