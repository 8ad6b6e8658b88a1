use super::bbox::BBox;
use super::keypoint::Pose;

/// 姿勢検出器（フレーム→候補スケルトン列）
///
/// どの推論バックエンドが候補を出したかはトラッカーの契約に影響しない。
pub trait PoseSource {
    fn frame_count(&self) -> usize;

    /// frame の候補を順序付きで返す。範囲外は空。
    fn candidates(&self, frame: usize) -> Vec<Pose>;
}

/// スケルトン検出とは独立した粗い人物検出器
///
/// RecoverableGap と NoSubjectAuto の区別にのみ使う。
pub trait PresenceDetector: Send + Sync {
    fn boxes(&self, frame: usize) -> Vec<BBox>;
}

/// 事前計算済みの候補列
#[derive(Debug, Clone, Default)]
pub struct FrameCandidates {
    frames: Vec<Vec<Pose>>,
}

impl FrameCandidates {
    pub fn new(frames: Vec<Vec<Pose>>) -> Self {
        Self { frames }
    }
}

impl PoseSource for FrameCandidates {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn candidates(&self, frame: usize) -> Vec<Pose> {
        self.frames.get(frame).cloned().unwrap_or_default()
    }
}

/// 事前計算済みの人物BBox列
#[derive(Debug, Clone, Default)]
pub struct StaticPresence {
    frames: Vec<Vec<BBox>>,
}

impl StaticPresence {
    pub fn new(frames: Vec<Vec<BBox>>) -> Self {
        Self { frames }
    }
}

impl PresenceDetector for StaticPresence {
    fn boxes(&self, frame: usize) -> Vec<BBox> {
        self.frames.get(frame).cloned().unwrap_or_default()
    }
}

/// 検出器を全フレームに対して実行し、トラッカー入力を作る
pub fn collect_candidates(source: &dyn PoseSource) -> Vec<Vec<Pose>> {
    (0..source.frame_count())
        .map(|frame| source.candidates(frame))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{JointIndex, Keypoint};

    #[test]
    fn test_frame_candidates_out_of_range_is_empty() {
        let pose = Pose::new(0, 0.0, [(JointIndex::Nose, Keypoint::new(0.5, 0.5, 0.9))]);
        let source = FrameCandidates::new(vec![vec![pose], vec![]]);
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.candidates(0).len(), 1);
        assert!(source.candidates(1).is_empty());
        assert!(source.candidates(5).is_empty());
        assert_eq!(collect_candidates(&source).len(), 2);
    }

    #[test]
    fn test_static_presence() {
        let presence = StaticPresence::new(vec![vec![BBox::full()]]);
        assert_eq!(presence.boxes(0).len(), 1);
        assert!(presence.boxes(1).is_empty());
    }
}
