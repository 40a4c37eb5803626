#![deny(warnings)]

//! Simulated actors: the non-player electorate and the text-analysis
//! collaborator used by policy submission and news publishing.

pub mod analysis;
pub mod electorate;

pub use analysis::{
    analyze_with_timeout, reputation_impacts, Analysis, AnalysisError, KeywordAnalyzer,
    TextAnalyzer,
};
pub use electorate::{electorate_weight, simulate_votes, ElectorateError};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded RNG used for every random draw of a session.
pub fn session_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn session_rng_is_deterministic() {
        let a: u64 = session_rng(9).gen();
        let b: u64 = session_rng(9).gen();
        assert_eq!(a, b);
    }
}
