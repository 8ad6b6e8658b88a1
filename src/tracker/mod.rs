pub mod assignment;
pub mod identity;
pub mod similarity;
pub mod state;

pub use assignment::{Assignment, AssignmentMap, AssignmentSummary, Correction};
pub use identity::{select_candidate_at_point, IdentityTracker};
pub use state::TrackState;
