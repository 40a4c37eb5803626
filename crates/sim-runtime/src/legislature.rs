//! Seat apportionment for the two legislative houses.

use serde::{Deserialize, Serialize};
use sim_core::config::LegislatureConfig;
use sim_core::{DemographicSlice, House, IdAllocator, Office, OfficeId};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProvinceSeats {
    pub province: String,
    pub population: u64,
    pub lower: u32,
    pub upper: u32,
}

/// Per-province seat counts for one session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Legislature {
    pub provinces: Vec<ProvinceSeats>,
}

impl Legislature {
    /// Lower house seats follow population: one per `population_per_lower_seat`,
    /// floored. When the floors do not add up to `lower_house_seats`, the
    /// house is re-apportioned by largest remainder so the total is exact.
    /// The upper house gives every province the same number of seats, so
    /// seven provinces of about 4 000 people get 35 lower and 14 upper seats
    /// under the default config.
    pub fn apportion(slices: &[DemographicSlice], cfg: &LegislatureConfig) -> Self {
        let mut populations: BTreeMap<&str, u64> = BTreeMap::new();
        for s in slices {
            *populations.entry(s.province.as_str()).or_default() += s.population;
        }
        if populations.is_empty() {
            return Self::default();
        }

        let per_seat = cfg.population_per_lower_seat.max(1);
        let target = u64::from(cfg.lower_house_seats);
        let floors: Vec<u64> = populations.values().map(|p| p / per_seat).collect();
        let lower = if floors.iter().sum::<u64>() == target {
            floors
        } else {
            largest_remainder(&populations.values().copied().collect::<Vec<_>>(), target)
        };

        let provinces = populations
            .iter()
            .zip(lower)
            .map(|((name, population), lower)| ProvinceSeats {
                province: name.to_string(),
                population: *population,
                lower: u32::try_from(lower).unwrap_or(u32::MAX),
                upper: cfg.upper_seats_per_province,
            })
            .collect();
        Self { provinces }
    }

    pub fn seats(&self, house: House) -> u32 {
        self.provinces
            .iter()
            .map(|p| match house {
                House::Lower => p.lower,
                House::Upper => p.upper,
            })
            .sum()
    }

    /// Strict majority of the house's seats.
    pub fn majority(&self, house: House) -> u32 {
        self.seats(house) / 2 + 1
    }

    /// One vacant office per seat, titled by house and province.
    pub fn seat_offices(&self, ids: &mut IdAllocator) -> Vec<Office> {
        let mut out = Vec::new();
        for p in &self.provinces {
            for (house, count, label) in [
                (House::Lower, p.lower, "Deputy"),
                (House::Upper, p.upper, "Senator"),
            ] {
                for n in 1..=count {
                    out.push(Office {
                        id: OfficeId(ids.next_raw()),
                        title: format!("{label} for {} #{n}", p.province),
                        chamber: Some(house),
                        province: Some(p.province.clone()),
                        holder: None,
                        term_started: None,
                        term_ends: None,
                    });
                }
            }
        }
        out
    }
}

/// Hamilton method: floor of each exact quota, then one extra seat for the
/// largest remainders. Ties go to the earlier entry. With zero total weight
/// every entry weighs the same.
fn largest_remainder(weights: &[u64], seats: u64) -> Vec<u64> {
    let total: u128 = weights.iter().map(|w| u128::from(*w)).sum();
    let (weights, total): (Vec<u128>, u128) = if total == 0 {
        (vec![1; weights.len()], weights.len() as u128)
    } else {
        (weights.iter().map(|w| u128::from(*w)).collect(), total)
    };
    let seats128 = u128::from(seats);
    let mut alloc: Vec<u64> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(u128, usize)> = Vec::with_capacity(weights.len());
    for (i, w) in weights.iter().enumerate() {
        let numer = w * seats128;
        alloc.push(u64::try_from(numer / total).unwrap_or(u64::MAX));
        remainders.push((numer % total, i));
    }
    let given: u64 = alloc.iter().sum();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders
        .into_iter()
        .take(usize::try_from(seats.saturating_sub(given)).unwrap_or(usize::MAX))
    {
        alloc[i] += 1;
    }
    alloc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sim_core::SliceId;

    fn slices(pops: &[(&str, u64)]) -> Vec<DemographicSlice> {
        pops.iter()
            .enumerate()
            .map(|(i, (province, population))| DemographicSlice {
                id: SliceId(i as u64 + 1),
                occupation: "farmer".into(),
                class: "working".into(),
                ethnicity: "plains".into(),
                religion: "none".into(),
                province: province.to_string(),
                settlement: "rural".into(),
                can_vote: true,
                population: *population,
            })
            .collect()
    }

    #[test]
    fn default_ratio_fills_thirty_five_seats() {
        let registry = slices(&[
            ("A", 4_075),
            ("B", 4_075),
            ("C", 4_075),
            ("D", 4_075),
            ("E", 4_075),
            ("F", 4_075),
            ("G", 4_075),
        ]);
        let leg = Legislature::apportion(&registry, &LegislatureConfig::default());
        assert_eq!(leg.seats(House::Lower), 35);
        assert_eq!(leg.seats(House::Upper), 14);
        assert!(leg.provinces.iter().all(|p| p.lower == 5));
        assert_eq!(leg.majority(House::Lower), 18);
        assert_eq!(leg.majority(House::Upper), 8);
    }

    #[test]
    fn uneven_population_is_corrected_by_remainder() {
        let registry = slices(&[("A", 10_000), ("B", 5_000), ("C", 1_000), ("A", 500)]);
        let leg = Legislature::apportion(&registry, &LegislatureConfig::default());
        assert_eq!(leg.seats(House::Lower), 35);
        let a = &leg.provinces[0];
        assert_eq!(a.province, "A");
        assert_eq!(a.population, 10_500);
        assert!(a.lower > leg.provinces[1].lower);
        assert_eq!(leg.seats(House::Upper), 6);
    }

    #[test]
    fn seat_offices_cover_every_seat() {
        let registry = slices(&[("A", 815 * 20), ("B", 815 * 15)]);
        let leg = Legislature::apportion(&registry, &LegislatureConfig::default());
        let mut ids = IdAllocator::starting_after(100);
        let offices = leg.seat_offices(&mut ids);
        assert_eq!(offices.len(), 35 + 4);
        assert_eq!(offices[0].id, OfficeId(101));
        assert_eq!(
            offices.iter().filter(|o| o.chamber == Some(House::Upper)).count(),
            4
        );
    }

    #[test]
    fn empty_registry_has_no_seats() {
        let leg = Legislature::apportion(&[], &LegislatureConfig::default());
        assert_eq!(leg.seats(House::Lower), 0);
        assert_eq!(leg.majority(House::Lower), 1);
    }

    proptest! {
        #[test]
        fn lower_house_total_is_exact(pops in proptest::collection::vec(0u64..50_000, 1..12)) {
            let named: Vec<(String, u64)> = pops.iter().enumerate().map(|(i, p)| (format!("P{i}"), *p)).collect();
            let refs: Vec<(&str, u64)> = named.iter().map(|(n, p)| (n.as_str(), *p)).collect();
            let leg = Legislature::apportion(&slices(&refs), &LegislatureConfig::default());
            prop_assert_eq!(leg.seats(House::Lower), 35);
        }
    }
}
