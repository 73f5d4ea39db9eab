//! Server Seed Commitment
//!
//! Each round gets an independent secret server seed. Only its SHA-256 hash
//! is published while the round runs; the seed itself is revealed once the
//! round has been resolved.

use std::collections::BTreeMap;
use std::fmt;

use rand::RngCore;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::hash::sha256_hex;
use crate::error::{Result, RoundError};
use crate::round::state::RoundId;

/// Entropy per server seed (256 bits).
pub const SERVER_SEED_BYTES: usize = 32;

/// Commitments retained by default before the oldest resolved ones are pruned.
pub const DEFAULT_RETAINED_COMMITMENTS: usize = 64;

/// A server seed and its published hash.
///
/// The seed is private to the crate. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedCommitment {
    server_seed: String,
    /// Hex SHA-256 of the server seed. Safe to publish.
    pub server_hash: String,
}

impl SeedCommitment {
    /// Generate a fresh commitment from the OS-seeded CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SERVER_SEED_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_seed(hex::encode(bytes))
    }

    /// Build a commitment around a known seed.
    pub fn from_seed(server_seed: impl Into<String>) -> Self {
        let server_seed = server_seed.into();
        let server_hash = sha256_hex(&server_seed);
        Self { server_seed, server_hash }
    }

    /// The secret seed. Only the resolver and the reveal path read it.
    pub(crate) fn server_seed(&self) -> &str {
        &self.server_seed
    }
}

impl fmt::Debug for SeedCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedCommitment")
            .field("server_seed", &"<hidden>")
            .field("server_hash", &self.server_hash)
            .finish()
    }
}

#[derive(Clone, Debug)]
struct CommitmentEntry {
    commitment: SeedCommitment,
    resolved: bool,
}

/// Tracks commitments per round and gates reveals on resolution.
#[derive(Debug)]
pub struct CommitmentManager {
    entries: BTreeMap<RoundId, CommitmentEntry>,
    /// Insertion order, for pruning.
    order: Vec<RoundId>,
    capacity: usize,
}

impl Default for CommitmentManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_COMMITMENTS)
    }
}

impl CommitmentManager {
    /// Create a manager keeping at most `capacity` resolved commitments.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            order: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Mint a fresh commitment for a round. Committing twice for the same
    /// round returns the existing commitment.
    pub fn commit(&mut self, round_id: RoundId) -> SeedCommitment {
        self.commit_with(round_id, SeedCommitment::generate())
    }

    /// Register an externally built commitment (tests and replays).
    pub fn commit_with(&mut self, round_id: RoundId, commitment: SeedCommitment) -> SeedCommitment {
        if let Some(existing) = self.entries.get(&round_id) {
            return existing.commitment.clone();
        }

        debug!("Committed server hash {} for round {}", commitment.server_hash, round_id);

        self.entries.insert(
            round_id,
            CommitmentEntry {
                commitment: commitment.clone(),
                resolved: false,
            },
        );
        self.order.push(round_id);
        self.prune();

        commitment
    }

    /// Look up a round's commitment.
    pub fn commitment(&self, round_id: RoundId) -> Option<&SeedCommitment> {
        self.entries.get(&round_id).map(|e| &e.commitment)
    }

    /// Published hash for a round.
    pub fn server_hash(&self, round_id: RoundId) -> Option<&str> {
        self.commitment(round_id).map(|c| c.server_hash.as_str())
    }

    /// Mark a round as resolved, unlocking its reveal.
    pub fn mark_resolved(&mut self, round_id: RoundId) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&round_id)
            .ok_or(RoundError::UnknownRound(round_id))?;
        entry.resolved = true;
        Ok(())
    }

    /// Reveal the server seed of a resolved round.
    ///
    /// Idempotent. Fails with `PrematureReveal` before resolution.
    pub fn reveal(&self, round_id: RoundId) -> Result<String> {
        let entry = self
            .entries
            .get(&round_id)
            .ok_or(RoundError::UnknownRound(round_id))?;

        if !entry.resolved {
            return Err(RoundError::PrematureReveal(round_id));
        }

        Ok(entry.commitment.server_seed.clone())
    }

    /// Forget a round's commitment (voided rounds never reveal).
    pub fn discard(&mut self, round_id: RoundId) {
        if self.entries.remove(&round_id).is_some() {
            self.order.retain(|id| *id != round_id);
        }
    }

    /// Number of tracked commitments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No commitments tracked?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest resolved commitments beyond capacity. Unresolved ones
    /// are always kept.
    fn prune(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .order
                .iter()
                .position(|id| self.entries.get(id).map_or(true, |e| e.resolved));

            match victim {
                Some(pos) => {
                    let id = self.order.remove(pos);
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_seed_shape() {
        let commitment = SeedCommitment::generate();
        assert_eq!(commitment.server_seed().len(), SERVER_SEED_BYTES * 2);
        assert!(commitment.server_seed().bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(commitment.server_hash, sha256_hex(commitment.server_seed()));
    }

    #[test]
    fn test_fresh_seed_per_round() {
        let mut manager = CommitmentManager::default();
        let a = manager.commit(RoundId::new_v4());
        let b = manager.commit(RoundId::new_v4());
        assert_ne!(a.server_seed(), b.server_seed());
        assert_ne!(a.server_hash, b.server_hash);
    }

    #[test]
    fn test_debug_hides_seed() {
        let commitment = SeedCommitment::from_seed("super-secret");
        let printed = format!("{:?}", commitment);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains(&commitment.server_hash));
    }

    #[test]
    fn test_s1_commit_reveal() {
        let mut manager = CommitmentManager::default();
        let round_id = RoundId::new_v4();
        let published = manager.commit_with(round_id, SeedCommitment::from_seed("s1")).server_hash;
        assert_eq!(published, sha256_hex("s1"));

        assert_eq!(manager.reveal(round_id), Err(RoundError::PrematureReveal(round_id)));

        manager.mark_resolved(round_id).unwrap();
        let revealed = manager.reveal(round_id).unwrap();
        assert_eq!(revealed, "s1");

        // Hash unchanged by reveal and independent of any random seed
        assert_eq!(manager.server_hash(round_id), Some(published.as_str()));
        assert_eq!(sha256_hex(&revealed), published);

        // Idempotent
        assert_eq!(manager.reveal(round_id).unwrap(), "s1");
    }

    #[test]
    fn test_commit_is_stable_per_round() {
        let mut manager = CommitmentManager::default();
        let round_id = RoundId::new_v4();
        let first = manager.commit(round_id);
        let second = manager.commit(round_id);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_round() {
        let mut manager = CommitmentManager::default();
        let round_id = RoundId::new_v4();
        assert_eq!(manager.reveal(round_id), Err(RoundError::UnknownRound(round_id)));
        assert_eq!(manager.mark_resolved(round_id), Err(RoundError::UnknownRound(round_id)));
    }

    #[test]
    fn test_prune_keeps_unresolved() {
        let mut manager = CommitmentManager::new(2);
        let ids: Vec<RoundId> = (0..4).map(|_| RoundId::new_v4()).collect();

        manager.commit(ids[0]);
        manager.mark_resolved(ids[0]).unwrap();
        manager.commit(ids[1]);
        manager.commit(ids[2]);

        // ids[0] was resolved and oldest
        assert!(manager.commitment(ids[0]).is_none());
        assert_eq!(manager.len(), 2);

        // Nothing resolved: grows past capacity rather than drop a live seed
        manager.commit(ids[3]);
        assert_eq!(manager.len(), 3);
        assert!(manager.commitment(ids[1]).is_some());
    }

    #[test]
    fn test_discard() {
        let mut manager = CommitmentManager::default();
        let round_id = RoundId::new_v4();
        manager.commit(round_id);
        manager.discard(round_id);
        assert!(manager.is_empty());
    }
}
