//! Game tables: lifecycle controller, async runner, random seed sources.

pub mod controller;
pub mod randomness;
pub mod runner;
pub mod manager;

pub use controller::{PendingResolution, ParticipantView, RoundController, RoundView};
pub use randomness::{
    BeaconSeedSource, LocalSeedSource, RandomSeedSource, RandomnessError, SeedFetch, SeedFetcher,
};
pub use runner::TableRunner;
pub use manager::TableManager;
