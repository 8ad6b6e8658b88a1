//! Physics-based trajectory validation.
//!
//! Fits near-constant horizontal velocity and a gravity-consistent vertical
//! parabola to trusted track samples, then uses the model to reject drifted
//! assignments and to bound recovery searches.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::Serialize;
use tracing::debug;

use crate::config::TrajectoryConfig;
use crate::pose::{BBox, Pose};
use crate::tracker::AssignmentMap;

/// フィットに必要な絶対最小サンプル数
pub const MIN_FIT_SAMPLES: usize = 3;

const SINGULAR_EPS: f64 = 1e-12;

/// 信頼できる追跡点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorSample {
    pub frame_index: usize,
    pub position: Point2<f32>,
}

/// 検証対象の追跡BBox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedBox {
    pub frame_index: usize,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub rejected_frames: Vec<usize>,
}

/// x = a0 + a1·t, y = b0 + b1·t + b2·t²  (t は正規化フレーム番号)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryModel {
    x_coeffs: [f64; 2],
    y_coeffs: [f64; 3],
    r_squared: f64,
    frame_offset: f64,
    frame_scale: f64,
    anchor_count: usize,
}

impl TrajectoryModel {
    /// 最小二乗フィット
    ///
    /// サンプル不足、特異な系、または決定係数が閾値未満なら None。
    pub fn fit(samples: &[AnchorSample], config: &TrajectoryConfig) -> Option<Self> {
        let min_samples = config.min_samples.max(MIN_FIT_SAMPLES);
        if samples.len() < min_samples {
            debug!(samples = samples.len(), min_samples, "too few anchor samples");
            return None;
        }

        let n = samples.len() as f64;
        let frame_offset = samples.iter().map(|s| s.frame_index as f64).sum::<f64>() / n;
        let (min_f, max_f) = samples.iter().fold((usize::MAX, 0usize), |(lo, hi), s| {
            (lo.min(s.frame_index), hi.max(s.frame_index))
        });
        let frame_scale = (max_f - min_f) as f64;
        if frame_scale <= 0.0 {
            return None;
        }

        let points: Vec<(f64, f64, f64)> = samples
            .iter()
            .map(|s| {
                (
                    (s.frame_index as f64 - frame_offset) / frame_scale,
                    s.position.x as f64,
                    s.position.y as f64,
                )
            })
            .collect();

        let x_coeffs = fit_linear(points.iter().map(|&(t, x, _)| (t, x)))?;
        let y_coeffs = fit_quadratic(&points).or_else(|| {
            debug!("vertical normal equations singular, falling back to linear");
            fit_linear(points.iter().map(|&(t, _, y)| (t, y))).map(|[b0, b1]| [b0, b1, 0.0])
        })?;

        if !x_coeffs.iter().chain(y_coeffs.iter()).all(|c| c.is_finite()) {
            return None;
        }

        let mut model = Self {
            x_coeffs,
            y_coeffs,
            r_squared: 0.0,
            frame_offset,
            frame_scale,
            anchor_count: samples.len(),
        };
        model.r_squared = model.combined_r_squared(&points);

        if !model.r_squared.is_finite() || model.r_squared < config.min_r_squared {
            debug!(r_squared = model.r_squared, "trajectory fit rejected");
            return None;
        }
        Some(model)
    }

    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    pub fn anchor_count(&self) -> usize {
        self.anchor_count
    }

    pub fn x_coefficients(&self) -> [f64; 2] {
        self.x_coeffs
    }

    pub fn y_coefficients(&self) -> [f64; 3] {
        self.y_coeffs
    }

    fn normalize(&self, frame: f64) -> f64 {
        (frame - self.frame_offset) / self.frame_scale
    }

    fn eval(&self, t: f64) -> (f64, f64) {
        let [a0, a1] = self.x_coeffs;
        let [b0, b1, b2] = self.y_coeffs;
        (a0 + a1 * t, b0 + b1 * t + b2 * t * t)
    }

    pub fn predict_center(&self, frame: usize) -> Point2<f32> {
        let (x, y) = self.eval(self.normalize(frame as f64));
        Point2::new(x as f32, y as f32)
    }

    /// 予測中心から max_deviation 以上離れたBBoxのフレームを棄却
    pub fn validate(&self, boxes: &[TrackedBox], max_deviation: f32) -> ValidationReport {
        let rejected_frames: Vec<usize> = boxes
            .iter()
            .filter(|b| (b.bbox.center() - self.predict_center(b.frame_index)).norm() > max_deviation)
            .map(|b| b.frame_index)
            .collect();
        ValidationReport {
            valid: rejected_frames.is_empty(),
            rejected_frames,
        }
    }

    /// 再検出用の探索領域（単位正方形にクリップ）
    pub fn predict_search_region(
        &self,
        frame: usize,
        typical_size: (f32, f32),
        expansion: f32,
    ) -> BBox {
        let (w, h) = typical_size;
        BBox::from_center_size(self.predict_center(frame), w * expansion, h * expansion)
            .clamped_to_unit()
    }

    /// X+Y 残差の合計と X+Y 分散の合計による決定係数
    fn combined_r_squared(&self, points: &[(f64, f64, f64)]) -> f64 {
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.1).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.2).sum::<f64>() / n;

        let (ss_res, ss_tot) = points.iter().fold((0.0, 0.0), |(res, tot), &(t, x, y)| {
            let (px, py) = self.eval(t);
            (
                res + (x - px).powi(2) + (y - py).powi(2),
                tot + (x - mean_x).powi(2) + (y - mean_y).powi(2),
            )
        });

        if ss_tot <= SINGULAR_EPS {
            // 静止点: 残差もなければ完全一致
            return if ss_res <= SINGULAR_EPS { 1.0 } else { 0.0 };
        }
        (1.0 - ss_res / ss_tot).max(0.0)
    }
}

fn fit_linear<I: Iterator<Item = (f64, f64)>>(points: I) -> Option<[f64; 2]> {
    let (mut n, mut st, mut stt, mut sv, mut stv) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (t, v) in points {
        n += 1.0;
        st += t;
        stt += t * t;
        sv += v;
        stv += t * v;
    }
    let det = n * stt - st * st;
    if n < 2.0 || det.abs() < SINGULAR_EPS {
        return None;
    }
    let slope = (n * stv - st * sv) / det;
    let intercept = (sv - slope * st) / n;
    Some([intercept, slope])
}

/// 3x3 正規方程式をクラメルの公式で解く
fn fit_quadratic(points: &[(f64, f64, f64)]) -> Option<[f64; 3]> {
    let mut s = [0.0f64; 5];
    let mut rhs = Vector3::<f64>::zeros();
    for &(t, _, y) in points {
        let mut tp = 1.0;
        for (k, sk) in s.iter_mut().enumerate() {
            *sk += tp;
            if k < 3 {
                rhs[k] += tp * y;
            }
            tp *= t;
        }
    }

    let m = Matrix3::new(
        s[0], s[1], s[2], //
        s[1], s[2], s[3], //
        s[2], s[3], s[4],
    );
    let det = m.determinant();
    if det.abs() < SINGULAR_EPS {
        return None;
    }

    let mut coeffs = [0.0; 3];
    for (i, c) in coeffs.iter_mut().enumerate() {
        let mut mi = m;
        mi.set_column(i, &rhs);
        *c = mi.determinant() / det;
    }
    Some(coeffs)
}

/// 信頼できる割り当て（Confirmed / 高信頼Auto）のBBox中心をサンプル化
pub fn samples_from_assignments(
    assignments: &AssignmentMap,
    frames: &[Vec<Pose>],
    min_confidence: f32,
    joint_confidence: f32,
) -> Vec<AnchorSample> {
    assignments
        .iter()
        .filter(|(_, a)| a.is_trusted(min_confidence))
        .filter_map(|(frame, a)| {
            let pose = frames.get(frame)?.get(a.candidate_index()?)?;
            let bbox = pose.bounding_box(joint_confidence)?;
            Some(AnchorSample {
                frame_index: frame,
                position: bbox.center(),
            })
        })
        .collect()
}

/// 候補が割り当てられた全フレームのBBox
pub fn tracked_boxes(
    assignments: &AssignmentMap,
    frames: &[Vec<Pose>],
    joint_confidence: f32,
) -> Vec<TrackedBox> {
    assignments
        .iter()
        .filter_map(|(frame, a)| {
            let pose = frames.get(frame)?.get(a.candidate_index()?)?;
            Some(TrackedBox {
                frame_index: frame,
                bbox: pose.bounding_box(joint_confidence)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::standing_pose;
    use crate::tracker::Assignment;

    fn sample(frame: usize, x: f32, y: f32) -> AnchorSample {
        AnchorSample {
            frame_index: frame,
            position: Point2::new(x, y),
        }
    }

    fn ballistic(frame: usize) -> (f32, f32) {
        let f = frame as f64;
        ((0.1 + 0.02 * f) as f32, (0.8 - 0.04 * f + 0.001 * f * f) as f32)
    }

    fn ballistic_samples() -> Vec<AnchorSample> {
        (0..=30)
            .step_by(3)
            .map(|f| {
                let (x, y) = ballistic(f);
                sample(f, x, y)
            })
            .collect()
    }

    fn config() -> TrajectoryConfig {
        TrajectoryConfig::default()
    }

    #[test]
    fn test_fit_requires_three_samples() {
        let relaxed = TrajectoryConfig {
            min_samples: 0,
            ..config()
        };
        let two = [sample(0, 0.1, 0.5), sample(5, 0.2, 0.6)];
        assert!(TrajectoryModel::fit(&two, &relaxed).is_none());
        assert!(TrajectoryModel::fit(&[], &relaxed).is_none());

        let three = [sample(0, 0.1, 0.5), sample(5, 0.2, 0.4), sample(10, 0.3, 0.5)];
        assert!(TrajectoryModel::fit(&three, &relaxed).is_some());
        // 既定設定は5サンプル必要
        assert!(TrajectoryModel::fit(&three, &config()).is_none());
    }

    #[test]
    fn test_exact_parabola_round_trip() {
        let samples = ballistic_samples();
        let model = TrajectoryModel::fit(&samples, &config()).unwrap();

        assert!((model.r_squared() - 1.0).abs() < 1e-6, "r2 = {}", model.r_squared());
        assert_eq!(model.anchor_count(), samples.len());
        for f in 0..=30 {
            let (x, y) = ballistic(f);
            let p = model.predict_center(f);
            assert!((p.x - x).abs() < 1e-4, "frame {} x {} vs {}", f, p.x, x);
            assert!((p.y - y).abs() < 1e-4, "frame {} y {} vs {}", f, p.y, y);
        }
    }

    #[test]
    fn test_unfittable_returns_none() {
        let samples: Vec<AnchorSample> = (0..8)
            .map(|f| {
                if f % 2 == 0 {
                    sample(f, 0.1, 0.9)
                } else {
                    sample(f, 0.9, 0.1)
                }
            })
            .collect();
        assert!(TrajectoryModel::fit(&samples, &config()).is_none());
    }

    #[test]
    fn test_stationary_samples_fit_perfectly() {
        let samples: Vec<AnchorSample> = (0..6).map(|f| sample(f * 2, 0.5, 0.5)).collect();
        let model = TrajectoryModel::fit(&samples, &config()).unwrap();
        assert_eq!(model.r_squared(), 1.0);
        let p = model.predict_center(40);
        assert!((p.x - 0.5).abs() < 1e-6 && (p.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_frame_samples_rejected() {
        let samples: Vec<AnchorSample> = (0..6).map(|_| sample(7, 0.5, 0.5)).collect();
        assert!(TrajectoryModel::fit(&samples, &config()).is_none());
    }

    #[test]
    fn test_two_distinct_frames_fall_back_to_linear() {
        let samples = [
            sample(0, 0.1, 0.5),
            sample(0, 0.1, 0.5),
            sample(10, 0.3, 0.7),
            sample(10, 0.3, 0.7),
            sample(10, 0.3, 0.7),
        ];
        let model = TrajectoryModel::fit(&samples, &config()).unwrap();
        assert_eq!(model.y_coefficients()[2], 0.0);
        let p = model.predict_center(5);
        assert!((p.x - 0.2).abs() < 1e-5);
        assert!((p.y - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_coefficients_are_finite() {
        let model = TrajectoryModel::fit(&ballistic_samples(), &config()).unwrap();
        assert!(model.x_coefficients().iter().all(|c| c.is_finite()));
        assert!(model.y_coefficients().iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_validate_rejects_drift() {
        let model = TrajectoryModel::fit(&ballistic_samples(), &config()).unwrap();
        let on_track = |f: usize| {
            let (x, y) = ballistic(f);
            TrackedBox {
                frame_index: f,
                bbox: BBox::from_center_size(Point2::new(x, y), 0.1, 0.3),
            }
        };
        let mut boxes: Vec<TrackedBox> = (0..30).map(on_track).collect();
        assert!(model.validate(&boxes, 0.12).valid);

        boxes[12].bbox = BBox::from_center_size(Point2::new(0.9, 0.9), 0.1, 0.3);
        let report = model.validate(&boxes, 0.12);
        assert!(!report.valid);
        assert_eq!(report.rejected_frames, vec![12]);
    }

    #[test]
    fn test_search_region_is_clamped() {
        let model = TrajectoryModel::fit(&ballistic_samples(), &config()).unwrap();
        let region = model.predict_search_region(15, (0.1, 0.3), 1.5);
        let center = model.predict_center(15);
        assert!((region.center().x - center.x).abs() < 1e-5);
        assert!((region.width - 0.15).abs() < 1e-5);

        // 画面外に外挿された点でも単位正方形内に収まる
        let outside = model.predict_search_region(200, (0.1, 0.3), 2.0);
        assert!(outside.x >= 0.0 && outside.y >= 0.0);
        assert!(outside.x + outside.width <= 1.0 + 1e-6);
        assert!(outside.y + outside.height <= 1.0 + 1e-6);
    }

    #[test]
    fn test_samples_only_from_trusted_frames() {
        let frames: Vec<Vec<Pose>> = (0..4).map(|f| vec![standing_pose(f, 0.5, 0.5)]).collect();
        let mut map = AssignmentMap::unresolved(4);
        map.set(0, Assignment::Confirmed { candidate: 0 });
        map.set(1, Assignment::Auto { candidate: 0, confidence: 0.95 });
        map.set(2, Assignment::Auto { candidate: 0, confidence: 0.5 });
        map.set(3, Assignment::Uncertain { candidate: 0, confidence: 0.9 });

        let samples = samples_from_assignments(&map, &frames, 0.8, 0.3);
        let frames_used: Vec<usize> = samples.iter().map(|s| s.frame_index).collect();
        assert_eq!(frames_used, vec![0, 1]);

        assert_eq!(tracked_boxes(&map, &frames, 0.3).len(), 4);
    }
}
