#![deny(warnings)]

//! Session runtime for the Polity simulation.
//!
//! Each session is a [`SessionState`] owned by a [`SessionHandle`], which
//! serializes every mutation, runs the turn boundary (manually or from its
//! auto-advance timer) and writes snapshots through to a
//! [`persistence::Store`]. Player actions are plain methods on
//! [`SessionState`], grouped by concern:
//!
//! - `ledger`: action points
//! - `campaign`: demographic campaigns
//! - `policy`: proposals, votes and enactment
//! - `election`: candidacy, funding and tallies
//! - `actions`: endorsements, news, prospecting and parties
//! - `turn`: scheduler transitions and the end-of-turn pipeline
//!
//! A session comes from `SessionRegistry::create` and starts once its
//! gamemaster calls `SessionHandle::initialize`.

mod actions;
mod campaign;
pub mod clock;
mod election;
mod ledger;
pub mod legislature;
mod policy;
mod registry;
mod session;
mod state;
mod timer;
mod turn;

pub use actions::ANALYSIS_REPUTATION_SCALE;
pub use clock::{Clock, ManualClock, SystemClock};
pub use legislature::Legislature;
pub use policy::{PolicyDraft, PolicyOutcomes};
pub use registry::SessionRegistry;
pub use session::SessionHandle;
pub use state::{SessionSetup, SessionState};
pub use turn::TurnReport;
