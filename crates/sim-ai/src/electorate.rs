//! Simulated electorate: the non-player share of an election's votes.

use rand::Rng;
use sim_core::DemographicSlice;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ElectorateError {
    /// Variance must lie in [0, 1).
    #[error("invalid electorate variance: {0}")]
    InvalidVariance(f64),
    #[error("invalid turnout: {0}")]
    InvalidTurnout(f64),
}

/// Vote weight of the simulated electorate: the eligible population of the
/// province (every province when `province` is None), scaled by turnout and
/// rounded.
pub fn electorate_weight(
    slices: &[DemographicSlice],
    province: Option<&str>,
    turnout: f64,
) -> Result<u64, ElectorateError> {
    if !(0.0..=1.0).contains(&turnout) {
        return Err(ElectorateError::InvalidTurnout(turnout));
    }
    let eligible: u64 = slices
        .iter()
        .filter(|s| s.can_vote)
        .filter(|s| province.map_or(true, |p| s.province == p))
        .map(|s| s.population)
        .sum();
    Ok((eligible as f64 * turnout).round() as u64)
}

/// Split `weight` evenly across `candidates`, then scale each share by an
/// independent factor drawn uniformly from `[1 - variance, 1 + variance]`.
///
/// The randomness is intentional: tallies are only reproducible when the
/// caller seeds `rng` deterministically. Two candidates splitting 1000 at
/// variance 0.2 each land between 400 and 600.
pub fn simulate_votes<R: Rng + ?Sized>(
    candidates: usize,
    weight: u64,
    variance: f64,
    rng: &mut R,
) -> Result<Vec<u64>, ElectorateError> {
    if !(0.0..1.0).contains(&variance) {
        return Err(ElectorateError::InvalidVariance(variance));
    }
    if candidates == 0 {
        return Ok(Vec::new());
    }
    let share = weight as f64 / candidates as f64;
    let votes = (0..candidates)
        .map(|_| {
            let factor = if variance == 0.0 {
                1.0
            } else {
                1.0 + rng.gen_range(-variance..=variance)
            };
            (share * factor).floor().max(0.0) as u64
        })
        .collect();
    Ok(votes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sim_core::SliceId;

    fn slice(id: u64, province: &str, can_vote: bool, population: u64) -> DemographicSlice {
        DemographicSlice {
            id: SliceId(id),
            occupation: "miner".into(),
            class: "working".into(),
            ethnicity: "hill".into(),
            religion: "old".into(),
            province: province.into(),
            settlement: "town".into(),
            can_vote,
            population,
        }
    }

    #[test]
    fn weight_counts_only_eligible_province_population() {
        let slices = vec![
            slice(1, "Avel", true, 600),
            slice(2, "Avel", false, 900),
            slice(3, "Brem", true, 400),
        ];
        assert_eq!(electorate_weight(&slices, Some("Avel"), 1.0).unwrap(), 600);
        assert_eq!(electorate_weight(&slices, None, 1.0).unwrap(), 1_000);
        assert_eq!(electorate_weight(&slices, None, 0.5).unwrap(), 500);
        assert!(electorate_weight(&slices, None, 1.5).is_err());
    }

    #[test]
    fn zero_variance_splits_evenly() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(simulate_votes(4, 1_000, 0.0, &mut rng).unwrap(), vec![250; 4]);
        assert!(simulate_votes(0, 1_000, 0.2, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn seeded_votes_reproduce() {
        let a = simulate_votes(3, 9_000, 0.2, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        let b = simulate_votes(3, 9_000, 0.2, &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_variance_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            simulate_votes(2, 10, 1.0, &mut rng),
            Err(ElectorateError::InvalidVariance(1.0))
        );
    }

    proptest! {
        #[test]
        fn votes_stay_within_variance(seed in 0u64..10_000, n in 1usize..8, weight in 0u64..1_000_000) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let votes = simulate_votes(n, weight, 0.2, &mut rng).unwrap();
            let share = weight as f64 / n as f64;
            for v in votes {
                prop_assert!(v as f64 >= (share * 0.8).floor() - 1.0);
                prop_assert!(v as f64 <= share * 1.2);
            }
        }
    }
}
