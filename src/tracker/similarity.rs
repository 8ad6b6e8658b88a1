use nalgebra::Point2;

use crate::pose::{JointIndex, Pose};

/// 重心間距離の指数減衰 exp(-d*k)
///
/// 閾値で切らないので近い外れ候補も競争に残る。
pub fn proximity_score(a: Point2<f32>, b: Point2<f32>, decay: f32) -> f32 {
    (-(a - b).norm() * decay).exp()
}

/// 候補重心と速度外挿した予測重心の整合度
pub fn velocity_score(candidate: Point2<f32>, predicted: Point2<f32>, decay: f32) -> f32 {
    (-(candidate - predicted).norm() * decay).exp()
}

/// 位置不変の形状類似度 (0.0〜1.0)
///
/// 各関節の重心からのオフセットを各自のBBox対角で正規化して比較する。
/// 両方で信頼できる関節が min_joints 未満なら 0。
pub fn shape_similarity(a: &Pose, b: &Pose, threshold: f32, min_joints: usize) -> f32 {
    let Some(frame_a) = ShapeFrame::of(a, threshold) else {
        return 0.0;
    };
    let Some(frame_b) = ShapeFrame::of(b, threshold) else {
        return 0.0;
    };

    let mut total = 0.0f32;
    let mut count = 0usize;
    for joint in JointIndex::SHAPE_JOINTS {
        let (Some(ja), Some(jb)) = (a.confident(joint, threshold), b.confident(joint, threshold))
        else {
            continue;
        };
        let offset_a = (ja.position() - frame_a.center) / frame_a.diagonal;
        let offset_b = (jb.position() - frame_b.center) / frame_b.diagonal;
        let delta = (offset_a - offset_b).norm();
        total += (1.0 - 2.0 * delta).max(0.0);
        count += 1;
    }

    if count < min_joints.max(1) {
        return 0.0;
    }
    total / count as f32
}

struct ShapeFrame {
    center: Point2<f32>,
    diagonal: f32,
}

impl ShapeFrame {
    fn of(pose: &Pose, threshold: f32) -> Option<Self> {
        let center = pose.center_of_mass(threshold)?;
        let diagonal = pose.bounding_box(threshold)?.diagonal();
        if diagonal <= f32::EPSILON {
            return None;
        }
        Some(Self { center, diagonal })
    }
}
