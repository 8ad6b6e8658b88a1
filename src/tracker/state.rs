use nalgebra::{Point2, Vector2};

use crate::config::TrackerConfig;
use crate::pose::Pose;

/// 方向別パスが専有する追跡状態
///
/// パスごとに独立したコピーを持ち、スレッド間で共有しない。
#[derive(Debug, Clone)]
pub struct TrackState {
    last_pose: Pose,
    last_center: Point2<f32>,
    /// フレームあたりの重心変位（平滑化済み）
    velocity: Vector2<f32>,
    speed: f32,
    has_motion_sample: bool,
    miss_count: usize,
    locked: bool,
    frames_since_established: usize,
}

impl TrackState {
    /// アンカー姿勢から開始。重心が求まらなければNone。
    pub fn new(anchor: &Pose, joint_confidence: f32) -> Option<Self> {
        let last_center = anchor.center_of_mass(joint_confidence)?;
        Some(Self {
            last_pose: anchor.clone(),
            last_center,
            velocity: Vector2::zeros(),
            speed: 0.0,
            has_motion_sample: false,
            miss_count: 0,
            locked: false,
            frames_since_established: 0,
        })
    }

    pub fn velocity(&self) -> Vector2<f32> {
        self.velocity
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// 速度サンプルを1つ以上取り込んだか
    pub fn has_motion_sample(&self) -> bool {
        self.has_motion_sample
    }

    pub fn miss_count(&self) -> usize {
        self.miss_count
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn last_center(&self) -> Point2<f32> {
        self.last_center
    }

    /// 外挿に使う速度。ロック前は信用しない。
    fn extrapolation_velocity(&self) -> Vector2<f32> {
        if self.locked {
            self.velocity
        } else {
            Vector2::zeros()
        }
    }

    /// frames 先の重心予測
    pub fn predict_center(&self, frames: usize) -> Point2<f32> {
        self.last_center + self.extrapolation_velocity() * frames as f32
    }

    /// 照合基準の姿勢と重心
    ///
    /// 欠損明けは最後の姿勢を予測位置まで剛体移動する（形状比較は絶対位置を使うため）。
    pub fn match_reference(&self) -> (Pose, Point2<f32>) {
        if self.miss_count == 0 {
            return (self.last_pose.clone(), self.last_center);
        }
        let shift = self.extrapolation_velocity() * self.miss_count as f32;
        (self.last_pose.translated(shift), self.last_center + shift)
    }

    /// 現フレームでの速度外挿予測
    pub fn predicted_center(&self) -> Point2<f32> {
        self.predict_center(self.miss_count + 1)
    }

    /// 欠損を記録。ロックは欠損区間の外挿のため維持する。
    pub fn record_miss(&mut self) {
        self.miss_count += 1;
        self.frames_since_established = 0;
    }

    /// 採用した候補で状態を更新
    pub fn accept(&mut self, pose: &Pose, center: Point2<f32>, confident: bool, config: &TrackerConfig) {
        let elapsed = (self.miss_count + 1) as f32;
        let sample = (center - self.last_center) / elapsed;
        let sample_speed = sample.norm();

        if self.has_motion_sample {
            let a = config.velocity_alpha;
            self.velocity = sample * a + self.velocity * (1.0 - a);
            let s = config.speed_alpha;
            self.speed = sample_speed * s + self.speed * (1.0 - s);
        } else {
            self.velocity = sample;
            self.speed = sample_speed;
            self.has_motion_sample = true;
        }

        self.last_pose = pose.clone();
        self.last_center = center;
        self.miss_count = 0;

        if confident {
            self.frames_since_established += 1;
            if self.frames_since_established >= config.lock_after_frames {
                self.locked = true;
            }
        } else {
            self.frames_since_established = 0;
            self.locked = false;
        }
    }
}
