use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use super::bbox::BBox;

/// BlazePose の 33 ランドマーク + 派生関節 (Neck, Root)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum JointIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
    /// 左右肩の信頼度加重中点
    Neck = 33,
    /// 左右ヒップの中点
    Root = 34,
}

impl JointIndex {
    pub const COUNT: usize = 35;

    pub const ALL: [JointIndex; Self::COUNT] = {
        use JointIndex::*;
        [
            Nose, LeftEyeInner, LeftEye, LeftEyeOuter, RightEyeInner, RightEye, RightEyeOuter,
            LeftEar, RightEar, MouthLeft, MouthRight, LeftShoulder, RightShoulder, LeftElbow,
            RightElbow, LeftWrist, RightWrist, LeftPinky, RightPinky, LeftIndex, RightIndex,
            LeftThumb, RightThumb, LeftHip, RightHip, LeftKnee, RightKnee, LeftAnkle, RightAnkle,
            LeftHeel, RightHeel, LeftFootIndex, RightFootIndex, Neck, Root,
        ]
    };

    /// 形状比較に使う主要関節
    pub const SHAPE_JOINTS: [JointIndex; 12] = {
        use JointIndex::*;
        [
            LeftShoulder, RightShoulder, LeftHip, RightHip, LeftKnee, RightKnee,
            LeftAnkle, RightAnkle, LeftElbow, RightElbow, LeftWrist, RightWrist,
        ]
    };

    /// 接地判定に使う足部関節
    pub const FOOT_JOINTS: [JointIndex; 6] = {
        use JointIndex::*;
        [LeftAnkle, RightAnkle, LeftHeel, RightHeel, LeftFootIndex, RightFootIndex]
    };

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_derived(self) -> bool {
        matches!(self, JointIndex::Neck | JointIndex::Root)
    }
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0, 下が正)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.x, self.y)
    }
}

/// 1フレーム・1人分の姿勢。構築後は不変。
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub frame_index: usize,
    /// 秒
    pub timestamp: f64,
    joints: [Option<Keypoint>; JointIndex::COUNT],
}

impl Pose {
    /// 検出結果から姿勢を構築し、Neck / Root を派生させる
    ///
    /// 派生関節を直接渡しても上書きされる。
    pub fn new<I>(frame_index: usize, timestamp: f64, joints: I) -> Self
    where
        I: IntoIterator<Item = (JointIndex, Keypoint)>,
    {
        let mut slots = [None; JointIndex::COUNT];
        for (index, kp) in joints {
            if !index.is_derived() {
                slots[index as usize] = Some(kp);
            }
        }

        slots[JointIndex::Neck as usize] = weighted_midpoint(
            slots[JointIndex::LeftShoulder as usize],
            slots[JointIndex::RightShoulder as usize],
        );
        slots[JointIndex::Root as usize] = midpoint(
            slots[JointIndex::LeftHip as usize],
            slots[JointIndex::RightHip as usize],
        );

        Self {
            frame_index,
            timestamp,
            joints: slots,
        }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: JointIndex) -> Option<&Keypoint> {
        self.joints[index as usize].as_ref()
    }

    /// 閾値以上の信頼度を持つキーポイントのみ返す
    pub fn confident(&self, index: JointIndex, threshold: f32) -> Option<&Keypoint> {
        self.get(index).filter(|kp| kp.is_valid(threshold))
    }

    pub fn joints(&self) -> impl Iterator<Item = (JointIndex, &Keypoint)> {
        JointIndex::ALL
            .iter()
            .zip(self.joints.iter())
            .filter_map(|(&index, kp)| kp.as_ref().map(|kp| (index, kp)))
    }

    /// 重心（代表点）
    ///
    /// Root を優先し、なければ信頼できる体幹関節の平均。
    pub fn center_of_mass(&self, threshold: f32) -> Option<Point2<f32>> {
        if let Some(root) = self.confident(JointIndex::Root, threshold) {
            return Some(root.position());
        }

        use JointIndex::*;
        let torso = [LeftShoulder, RightShoulder, LeftHip, RightHip, Neck];
        let mut sum = Vector2::zeros();
        let mut count = 0usize;
        for index in torso {
            if let Some(kp) = self.confident(index, threshold) {
                sum += kp.position().coords;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        Some(Point2::from(sum / count as f32))
    }

    /// 信頼できるキーポイントの外接矩形。2点未満ならNone。
    pub fn bounding_box(&self, threshold: f32) -> Option<BBox> {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        let mut count = 0u32;

        for (_, kp) in self.joints().filter(|(_, kp)| kp.is_valid(threshold)) {
            min_x = min_x.min(kp.x);
            min_y = min_y.min(kp.y);
            max_x = max_x.max(kp.x);
            max_y = max_y.max(kp.y);
            count += 1;
        }

        if count < 2 {
            return None;
        }

        Some(BBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    /// 足部関節のうち最も低い（yが最大の）位置
    pub fn lowest_foot_y(&self, threshold: f32) -> Option<f32> {
        JointIndex::FOOT_JOINTS
            .iter()
            .filter_map(|&index| self.confident(index, threshold))
            .map(|kp| kp.y)
            .reduce(f32::max)
    }

    /// 全関節を剛体平行移動した姿勢
    pub fn translated(&self, delta: Vector2<f32>) -> Pose {
        let mut moved = self.clone();
        for kp in moved.joints.iter_mut().flatten() {
            kp.x += delta.x;
            kp.y += delta.y;
        }
        moved
    }
}

fn midpoint(a: Option<Keypoint>, b: Option<Keypoint>) -> Option<Keypoint> {
    let (a, b) = (a?, b?);
    Some(Keypoint::new(
        (a.x + b.x) / 2.0,
        (a.y + b.y) / 2.0,
        a.confidence.min(b.confidence),
    ))
}

fn weighted_midpoint(a: Option<Keypoint>, b: Option<Keypoint>) -> Option<Keypoint> {
    let (a, b) = (a?, b?);
    let total = a.confidence + b.confidence;
    if total <= f32::EPSILON {
        return midpoint(Some(a), Some(b));
    }
    let wa = a.confidence / total;
    let wb = b.confidence / total;
    Some(Keypoint::new(
        a.x * wa + b.x * wb,
        a.y * wa + b.y * wb,
        a.confidence.min(b.confidence),
    ))
}
