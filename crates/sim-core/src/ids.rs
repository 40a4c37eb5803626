//! Strongly typed identifiers. Every entity is scoped by its session, so ids
//! only need to be unique within one session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete simulation time unit.
pub type Turn = u64;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

id_type!(
    /// One independent game instance.
    SessionId
);
id_type!(
    /// A human player (the gamemaster is a player too).
    PlayerId
);
id_type!(
    /// A demographic slice in the session registry.
    SliceId
);
id_type!(CampaignId);
id_type!(PolicyId);
id_type!(ElectionId);
id_type!(OfficeId);
id_type!(PartyId);
id_type!(EndorsementId);
id_type!(ArticleId);

/// Monotonic id allocator, one counter shared by every entity kind of a
/// session so that provenance ids never collide across kinds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Start allocating after `floor`, so ids supplied at setup stay unique.
    pub fn starting_after(floor: u64) -> Self {
        Self { next: floor + 1 }
    }

    pub fn next_raw(&mut self) -> u64 {
        let id = self.next.max(1);
        self.next = id + 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic_and_skips_setup_range() {
        let mut ids = IdAllocator::starting_after(10);
        assert_eq!(ids.next_raw(), 11);
        assert_eq!(ids.next_raw(), 12);
        let mut fresh = IdAllocator::default();
        assert_eq!(fresh.next_raw(), 1);
    }

    #[test]
    fn ids_serialize_transparently() {
        let s = serde_json::to_string(&PlayerId(7)).unwrap();
        assert_eq!(s, "7");
    }
}
