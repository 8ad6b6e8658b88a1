pub mod bbox;
pub mod keypoint;
pub mod source;

pub use bbox::BBox;
pub use keypoint::{JointIndex, Keypoint, Pose};
pub use source::{collect_candidates, FrameCandidates, PoseSource, PresenceDetector, StaticPresence};
