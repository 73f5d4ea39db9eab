//! Outcome Resolver
//!
//! Pure mapping from (server seed, random seed, participants) to
//! (winning ticket, winner). Single authoritative implementation; the
//! verification service replays exactly this code.
//!
//! ## Interval Semantics
//!
//! Participants are walked in first-deposit order. Participant `i` owns the
//! half-open interval `[cum_i, cum_i + weight_i)`. If accumulated rounding
//! leaves the ticket past every upper bound (including ticket = 1.0), the
//! last participant wins.

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::ticket::{compute_ticket, Ticket};
use crate::error::{Result, RoundError};
use crate::proof::commitment::SeedCommitment;
use crate::round::ledger::StakeSnapshot;
use crate::round::state::{Participant, ParticipantId};

/// Allowed drift of the weight sum away from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Result of resolving a round.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Ticket drawn from the combined seed.
    pub winning_ticket: Ticket,
    /// Selected participant.
    pub winner_id: ParticipantId,
    /// Index of the winner in the participant ordering.
    pub winner_index: usize,
    /// Winner's weight at resolution time.
    pub win_weight: f64,
}

/// Resolve using the round's commitment.
pub fn resolve(
    commitment: &SeedCommitment,
    random_seed: &str,
    participants: &[Participant],
    pot_total: f64,
) -> Result<Resolution> {
    resolve_with_seeds(commitment.server_seed(), random_seed, participants, pot_total)
}

/// Resolve against a locked stake snapshot.
pub fn resolve_snapshot(
    commitment: &SeedCommitment,
    random_seed: &str,
    snapshot: &StakeSnapshot,
) -> Result<Resolution> {
    resolve(commitment, random_seed, snapshot.participants(), snapshot.pot_total())
}

/// Resolve from raw seeds. Used by settlement and by replay verification.
pub fn resolve_with_seeds(
    server_seed: &str,
    random_seed: &str,
    participants: &[Participant],
    pot_total: f64,
) -> Result<Resolution> {
    if participants.is_empty() {
        return Err(RoundError::NoParticipants);
    }

    if !pot_total.is_finite() || pot_total <= 0.0 {
        return Err(RoundError::MalformedStake(format!("pot total {} is not positive", pot_total)));
    }

    check_weights(participants)?;

    let winning_ticket = compute_ticket(server_seed, random_seed)?;
    let winner_index = select_winner(winning_ticket.value(), participants)?;
    let winner = &participants[winner_index];

    Ok(Resolution {
        winning_ticket,
        winner_id: winner.participant_id.clone(),
        winner_index,
        win_weight: winner.win_weight,
    })
}

/// Select the participant whose interval contains `ticket`.
///
/// Lower bound inclusive, upper bound exclusive, last participant as
/// fallback. Fails only for an empty participant list.
pub fn select_winner(ticket: f64, participants: &[Participant]) -> Result<usize> {
    let last = participants.len().checked_sub(1).ok_or(RoundError::NoParticipants)?;

    let mut cumulative = 0.0;
    for (i, participant) in participants.iter().enumerate() {
        let upper = cumulative + participant.win_weight;

        #[cfg(feature = "debug-tracing")]
        trace!("interval {} [{}, {}) vs ticket {}", i, cumulative, upper, ticket);

        if ticket >= cumulative && ticket < upper {
            return Ok(i);
        }
        cumulative = upper;
    }

    Ok(last)
}

/// Interval bounds `[lower, upper)` for each participant, accumulated the same
/// way [`select_winner`] walks them.
pub fn intervals(participants: &[Participant]) -> Vec<(f64, f64)> {
    let mut cumulative = 0.0;
    participants
        .iter()
        .map(|p| {
            let lower = cumulative;
            cumulative += p.win_weight;
            (lower, cumulative)
        })
        .collect()
}

/// Weights must be finite, non-negative and sum to 1.
fn check_weights(participants: &[Participant]) -> Result<()> {
    let mut sum = 0.0;
    for p in participants {
        if !p.win_weight.is_finite() || p.win_weight < 0.0 {
            return Err(RoundError::MalformedStake(format!(
                "participant {} has weight {}",
                p.participant_id, p.win_weight
            )));
        }
        sum += p.win_weight;
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(RoundError::MalformedStake(format!("weights sum to {}", sum)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::ledger::derive_participants;
    use crate::round::state::{Item, Stake};
    use chrono::Utc;
    use proptest::prelude::*;

    fn participant(id: &str, weight: f64) -> Participant {
        Participant {
            participant_id: id.into(),
            total_stake_value: weight * 100.0,
            item_count: 1,
            win_weight: weight,
        }
    }

    fn a30_b70() -> Vec<Participant> {
        vec![participant("A", 0.3), participant("B", 0.7)]
    }

    fn stakes_from_values(values: &[f64]) -> Vec<Stake> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Stake {
                sequence: i as u32,
                participant_id: format!("p{}", i).as_str().into(),
                items: vec![Item::new(format!("asset-{}", i), "Item", *v)],
                stake_value: *v,
                deposited_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_scenario_a30_b70() {
        let participants = a30_b70();
        assert_eq!(select_winner(0.25, &participants).unwrap(), 0);
        assert_eq!(select_winner(0.65, &participants).unwrap(), 1);
        assert_eq!(select_winner(0.95, &participants).unwrap(), 1);
    }

    #[test]
    fn test_scenario_abc123_xyz789() {
        // abc123-xyz789 draws 0.83495634, inside B's interval [0.3, 1.0).
        let resolution = resolve_with_seeds("abc123", "xyz789", &a30_b70(), 100.0).unwrap();
        assert_eq!(resolution.winning_ticket.units(), 83495634);
        assert_eq!(resolution.winner_id, "B".into());
        assert_eq!(resolution.winner_index, 1);
        assert_eq!(resolution.win_weight, 0.7);
    }

    #[test]
    fn test_boundary_semantics() {
        let participants = vec![
            participant("A", 0.25),
            participant("B", 0.25),
            participant("C", 0.5),
        ];
        let bounds = intervals(&participants);

        // Lower bound inclusive
        assert_eq!(select_winner(bounds[1].0, &participants).unwrap(), 1);
        assert_eq!(select_winner(bounds[2].0, &participants).unwrap(), 2);
        assert_eq!(select_winner(0.0, &participants).unwrap(), 0);

        // Upper bound exclusive: selects the next participant
        assert_eq!(select_winner(bounds[0].1, &participants).unwrap(), 1);
        assert_eq!(select_winner(bounds[1].1, &participants).unwrap(), 2);

        // Last participant also wins on its own upper bound via fallback
        assert_eq!(select_winner(bounds[2].1, &participants).unwrap(), 2);
        assert_eq!(select_winner(1.0, &participants).unwrap(), 2);
    }

    #[test]
    fn test_single_participant_always_wins() {
        let participants = vec![participant("solo", 1.0)];
        for ticket in [0.0, 0.5, 0.99999999, 1.0] {
            assert_eq!(select_winner(ticket, &participants).unwrap(), 0);
        }

        let resolution = resolve_with_seeds("s1", "r1", &participants, 42.0).unwrap();
        assert_eq!(resolution.winner_id, "solo".into());
    }

    #[test]
    fn test_fallback_on_rounding_shortfall() {
        // Weights sum to just under 1; a ticket in the gap goes to the last participant.
        let participants = vec![participant("A", 0.5), participant("B", 0.4999999999999)];
        assert_eq!(select_winner(0.99999999, &participants).unwrap(), 1);
    }

    #[test]
    fn test_no_participants() {
        assert_eq!(select_winner(0.5, &[]), Err(RoundError::NoParticipants));
        assert_eq!(
            resolve_with_seeds("s", "r", &[], 10.0),
            Err(RoundError::NoParticipants)
        );
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let participants = a30_b70();
        assert!(matches!(
            resolve_with_seeds("s", "r", &participants, 0.0),
            Err(RoundError::MalformedStake(_))
        ));
        assert!(matches!(
            resolve_with_seeds("s", "r", &participants, f64::NAN),
            Err(RoundError::MalformedStake(_))
        ));

        let lopsided = vec![participant("A", 0.3), participant("B", 0.3)];
        assert!(matches!(
            resolve_with_seeds("s", "r", &lopsided, 60.0),
            Err(RoundError::MalformedStake(_))
        ));
    }

    #[test]
    fn test_resolve_is_pure() {
        let participants = a30_b70();
        let r1 = resolve_with_seeds("server-seed", "random", &participants, 100.0).unwrap();
        let r2 = resolve_with_seeds("server-seed", "random", &participants, 100.0).unwrap();
        assert_eq!(r1, r2);
    }

    proptest! {
        #[test]
        fn prop_resolve_deterministic(
            server in "[0-9a-f]{1,64}",
            random in "[0-9a-zA-Z]{1,16}",
            values in prop::collection::vec(0.01f64..10_000.0, 1..12),
        ) {
            let (participants, pot) = derive_participants(&stakes_from_values(&values));
            let r1 = resolve_with_seeds(&server, &random, &participants, pot).unwrap();
            let r2 = resolve_with_seeds(&server, &random, &participants, pot).unwrap();
            prop_assert_eq!(r1, r2);
        }

        #[test]
        fn prop_weights_sum_to_one(values in prop::collection::vec(0.01f64..10_000.0, 1..50)) {
            let (participants, _) = derive_participants(&stakes_from_values(&values));
            let sum: f64 = participants.iter().map(|p| p.win_weight).sum();
            prop_assert!((sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE);
        }

        #[test]
        fn prop_exactly_one_winner(
            values in prop::collection::vec(0.01f64..10_000.0, 1..20),
            units in 0u32..100_000_000,
        ) {
            let (participants, _) = derive_participants(&stakes_from_values(&values));
            let ticket = Ticket::from_units(units).unwrap().value();
            let winner = select_winner(ticket, &participants).unwrap();
            prop_assert!(winner < participants.len());

            // The ticket lies in the winner's interval, or the winner is the
            // last participant and the ticket is past every interval.
            let bounds = intervals(&participants);
            let containing: Vec<usize> = bounds
                .iter()
                .enumerate()
                .filter(|(_, (lo, hi))| ticket >= *lo && ticket < *hi)
                .map(|(i, _)| i)
                .collect();
            prop_assert!(containing.len() <= 1);
            match containing.first() {
                Some(&i) => prop_assert_eq!(winner, i),
                None => prop_assert_eq!(winner, participants.len() - 1),
            }
        }
    }
}
