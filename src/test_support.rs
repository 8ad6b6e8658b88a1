use crate::pose::{JointIndex, Keypoint, Pose};

fn pose_from_offsets(
    frame: usize,
    cx: f32,
    cy: f32,
    scale: f32,
    offsets: &[(JointIndex, f32, f32)],
) -> Pose {
    Pose::new(
        frame,
        frame as f64 / 30.0,
        offsets
            .iter()
            .map(|&(j, dx, dy)| (j, Keypoint::new(cx + dx * scale, cy + dy * scale, 0.9))),
    )
}

/// 腰中点が (cx, cy) の立位姿勢
pub fn standing_pose(frame: usize, cx: f32, cy: f32) -> Pose {
    scaled_standing_pose(frame, cx, cy, 1.0)
}

/// 体格を scale 倍した立位姿勢
pub fn scaled_standing_pose(frame: usize, cx: f32, cy: f32, scale: f32) -> Pose {
    use JointIndex::*;
    pose_from_offsets(
        frame,
        cx,
        cy,
        scale,
        &[
            (Nose, 0.0, -0.30),
            (LeftShoulder, -0.06, -0.20),
            (RightShoulder, 0.06, -0.20),
            (LeftElbow, -0.09, -0.10),
            (RightElbow, 0.09, -0.10),
            (LeftWrist, -0.10, 0.0),
            (RightWrist, 0.10, 0.0),
            (LeftHip, -0.04, 0.0),
            (RightHip, 0.04, 0.0),
            (LeftKnee, -0.04, 0.12),
            (RightKnee, 0.04, 0.12),
            (LeftAnkle, -0.04, 0.24),
            (RightAnkle, 0.04, 0.24),
            (LeftHeel, -0.05, 0.25),
            (RightHeel, 0.03, 0.25),
        ],
    )
}

/// 両腕を上げ脚を開いた姿勢（立位とは形状が大きく異なる）
pub fn arms_up_pose(frame: usize, cx: f32, cy: f32) -> Pose {
    use JointIndex::*;
    pose_from_offsets(
        frame,
        cx,
        cy,
        1.0,
        &[
            (LeftShoulder, -0.06, -0.20),
            (RightShoulder, 0.06, -0.20),
            (LeftElbow, -0.12, -0.30),
            (RightElbow, 0.12, -0.30),
            (LeftWrist, -0.15, -0.42),
            (RightWrist, 0.15, -0.42),
            (LeftHip, -0.04, 0.0),
            (RightHip, 0.04, 0.0),
            (LeftKnee, -0.12, 0.05),
            (RightKnee, 0.12, 0.05),
            (LeftAnkle, -0.2, 0.0),
            (RightAnkle, 0.2, 0.0),
        ],
    )
}
