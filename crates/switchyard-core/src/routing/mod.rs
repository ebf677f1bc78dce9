//! Adaptive request routing
//!
//! The router learns which agent handles which kind of work item best.
//! Incoming contexts are collapsed into a small discrete state space
//! ([`StateKey`]), a Q-learning policy keeps value estimates per
//! (state, agent) pair, and every decision is logged so later feedback
//! can close the learning loop.

mod decisions;
mod policy;
mod router;
mod state;

pub use decisions::{DecisionLog, DecisionRecord};
pub use policy::{
    PolicySnapshot, PolicyStatistics, QEntry, QLearningPolicy, RankedAction, Selection,
    SnapshotEntry,
};
pub use router::{Router, RouterBuilder, RoutingStrategy, SystemSnapshot};
pub use state::{RoutingContext, StateKey, COMPLEXITY_CUTOFF};
