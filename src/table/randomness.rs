//! Random Seed Sources
//!
//! The external random seed is an opaque string from a third-party beacon.
//! Fetches are retried with exponential backoff, each attempt bounded by a
//! timeout. When the beacon stays unavailable a locally generated seed is
//! used and flagged as reduced assurance.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RandomnessConfig;
use crate::error::RoundError;
use crate::round::state::RandomSeed;

/// Longest seed accepted from a beacon.
pub const MAX_BEACON_SEED_LEN: usize = 256;

/// Length of a locally generated fallback seed.
pub const LOCAL_SEED_LEN: usize = 16;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random seed fetch errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RandomnessError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Beacon answered with a non-success status.
    #[error("beacon returned status {0}")]
    Status(u16),

    /// Attempt exceeded its time bound.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Body was empty or not a usable seed.
    #[error("invalid seed from beacon: {0}")]
    InvalidSeed(String),

    /// No beacon configured.
    #[error("no beacon configured")]
    Disabled,
}

impl From<RandomnessError> for RoundError {
    fn from(err: RandomnessError) -> Self {
        RoundError::RandomSeedUnavailable(err.to_string())
    }
}

/// Anything that can produce an external random seed.
pub trait RandomSeedSource: Send + Sync {
    /// Source name recorded alongside the seed.
    fn name(&self) -> &str;

    /// Fetch one seed.
    fn fetch(&self) -> BoxFuture<'_, Result<String, RandomnessError>>;
}

// =============================================================================
// BEACON
// =============================================================================

/// HTTP beacon returning the seed as a plain-text body (random.org strings API).
pub struct BeaconSeedSource {
    client: reqwest::Client,
    url: String,
}

impl BeaconSeedSource {
    /// Create a beacon client for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RandomnessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fairpot-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RandomnessError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl RandomSeedSource for BeaconSeedSource {
    fn name(&self) -> &str {
        "random.org"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<String, RandomnessError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| RandomnessError::Http(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(RandomnessError::Status(status.as_u16()));
            }

            let body = response
                .text()
                .await
                .map_err(|e| RandomnessError::Http(e.to_string()))?;

            parse_beacon_body(&body)
        })
    }
}

/// Extract the seed from a plain-text beacon body (first non-empty line).
pub fn parse_beacon_body(body: &str) -> Result<String, RandomnessError> {
    let seed = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| RandomnessError::InvalidSeed("empty body".to_string()))?;

    if seed.len() > MAX_BEACON_SEED_LEN {
        return Err(RandomnessError::InvalidSeed(format!("{} bytes", seed.len())));
    }
    if !seed.chars().all(|c| c.is_ascii_graphic()) {
        return Err(RandomnessError::InvalidSeed(format!("{:?}", seed)));
    }
    // random.org reports quota/usage errors as plain text starting with "Error:"
    if seed.starts_with("Error") {
        return Err(RandomnessError::InvalidSeed(seed.to_string()));
    }

    Ok(seed.to_string())
}

// =============================================================================
// LOCAL FALLBACK
// =============================================================================

/// Locally generated base36 seed from the thread CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSeedSource;

impl LocalSeedSource {
    /// Generate one seed synchronously.
    pub fn generate() -> String {
        let mut rng = rand::thread_rng();
        (0..LOCAL_SEED_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect()
    }
}

impl RandomSeedSource for LocalSeedSource {
    fn name(&self) -> &str {
        "local"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<String, RandomnessError>> {
        Box::pin(async { Ok(Self::generate()) })
    }
}

// =============================================================================
// FETCH POLICY
// =============================================================================

/// Seed fetch result, including why the fallback was used.
#[derive(Clone, Debug, PartialEq)]
pub struct SeedFetch {
    /// Seed to resolve with.
    pub seed: RandomSeed,
    /// Last error if the fallback was used.
    pub fallback_reason: Option<String>,
}

/// Retrying fetcher with local fallback. Never fails.
#[derive(Clone)]
pub struct SeedFetcher {
    source: Option<Arc<dyn RandomSeedSource>>,
    config: RandomnessConfig,
}

impl SeedFetcher {
    /// Build from configuration. A beacon that cannot be constructed is
    /// treated as absent.
    pub fn from_config(config: RandomnessConfig) -> Self {
        let source: Option<Arc<dyn RandomSeedSource>> = match &config.beacon_url {
            Some(url) => match BeaconSeedSource::new(url.clone(), config.fetch_timeout) {
                Ok(beacon) => Some(Arc::new(beacon)),
                Err(e) => {
                    warn!("Beacon unavailable, using local seeds only: {}", e);
                    None
                }
            },
            None => None,
        };

        Self { source, config }
    }

    /// Use a specific source.
    pub fn with_source(source: Arc<dyn RandomSeedSource>, config: RandomnessConfig) -> Self {
        Self {
            source: Some(source),
            config,
        }
    }

    /// Local seeds only.
    pub fn local_only(config: RandomnessConfig) -> Self {
        Self { source: None, config }
    }

    /// Fetch a seed, retrying the external source then falling back locally.
    pub async fn fetch(&self) -> SeedFetch {
        let err = match &self.source {
            Some(source) => match fetch_with_retry(source.as_ref(), &self.config).await {
                Ok(value) => {
                    return SeedFetch {
                        seed: RandomSeed::external(value, source.name()),
                        fallback_reason: None,
                    };
                }
                Err(e) => e,
            },
            None => RandomnessError::Disabled,
        };

        let reason = RoundError::from(err).to_string();
        warn!("Using local random seed (reduced assurance): {}", reason);

        SeedFetch {
            seed: RandomSeed::local_fallback(LocalSeedSource::generate()),
            fallback_reason: Some(reason),
        }
    }
}

/// Try `source` up to `max_retries` times with a timeout per attempt and
/// doubling backoff between attempts. Returns the last error.
pub async fn fetch_with_retry(
    source: &dyn RandomSeedSource,
    config: &RandomnessConfig,
) -> Result<String, RandomnessError> {
    let attempts = config.max_retries.max(1);
    let mut last_err = RandomnessError::Disabled;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(config.backoff_for(attempt - 1)).await;
        }

        let result = match tokio::time::timeout(config.fetch_timeout, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(RandomnessError::Timeout(config.fetch_timeout)),
        };

        match result {
            Ok(seed) => {
                debug!("Random seed from {} on attempt {}", source.name(), attempt);
                return Ok(seed);
            }
            Err(e) => {
                warn!("Random seed attempt {}/{} from {} failed: {}", attempt, attempts, source.name(), e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}
