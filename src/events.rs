//! Kinematic event detection and per-frame phase labels.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EventConfig;
use crate::pose::{JointIndex, Pose};

/// フレームごとの跳躍フェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Approach,
    Penultimate,
    Takeoff,
    Flight,
    Landing,
    NoSubject,
}

/// 主要イベントのフレーム番号（検出できなければNone）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventIndices {
    pub first_subject_frame: Option<usize>,
    pub last_subject_frame: Option<usize>,
    /// 最高到達点
    pub peak: Option<usize>,
    pub toe_off: Option<usize>,
    pub plant: Option<usize>,
    pub landing: Option<usize>,
    /// 最後から2歩目の最下点
    pub penultimate: Option<usize>,
}

impl EventIndices {
    /// 滞空時間（秒）
    pub fn flight_time(&self, fps: f32) -> Option<f32> {
        seconds_between(self.toe_off?, self.landing?, fps)
    }

    /// 踏切接地時間（秒）
    pub fn takeoff_contact_time(&self, fps: f32) -> Option<f32> {
        seconds_between(self.plant?, self.toe_off?, fps)
    }

    fn flight_window(&self) -> Option<(usize, usize)> {
        let peak = self.peak?;
        let start = self.toe_off.map_or(peak, |t| t + 1);
        let end = self.landing.map_or(peak, |l| l.saturating_sub(1));
        (start <= end).then_some((start, end))
    }

    fn in_flight(&self, frame: usize) -> bool {
        self.flight_window()
            .is_some_and(|(start, end)| (start..=end).contains(&frame))
    }
}

fn seconds_between(from: usize, to: usize, fps: f32) -> Option<f32> {
    if fps <= 0.0 || to < from {
        return None;
    }
    Some((to - from) as f32 / fps)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventReport {
    pub indices: EventIndices,
    pub phases: Vec<Phase>,
}

/// 解決済み姿勢列からイベントとフェーズを求める
pub fn detect_events(poses: &[Option<Pose>], fps: f32, config: &EventConfig) -> EventReport {
    let jc = config.joint_confidence;
    let com_y: Vec<Option<f32>> = poses
        .iter()
        .map(|p| p.as_ref().and_then(|p| p.center_of_mass(jc)).map(|c| c.y))
        .collect();

    let first = com_y.iter().position(Option::is_some);
    let last = com_y.iter().rposition(Option::is_some);
    let (first, last) = match (first, last) {
        (Some(f), Some(l)) if f < l => (f, l),
        _ => {
            debug!("not enough subject frames for event detection");
            return EventReport {
                indices: EventIndices::default(),
                phases: vec![Phase::NoSubject; poses.len()],
            };
        }
    };

    let series: Vec<(usize, f32)> = (first..=last)
        .filter_map(|f| com_y[f].map(|y| (f, y)))
        .collect();

    let mut indices = EventIndices {
        first_subject_frame: Some(first),
        last_subject_frame: Some(last),
        ..EventIndices::default()
    };

    // 最小y = 最高点。同値は先のフレーム。
    let (peak, peak_y) = series
        .iter()
        .copied()
        .fold(None::<(usize, f32)>, |best, (f, y)| match best {
            Some((_, by)) if by <= y => best,
            _ => Some((f, y)),
        })
        .unwrap_or((first, f32::MAX));
    indices.peak = Some(peak);

    let span = last - first + 1;
    if span < config.min_frames {
        let offset = |fraction: f32| first + ((span - 1) as f32 * fraction).round() as usize;
        // 頂点より後ろには置かない
        let toe_off = offset(config.fallback_toe_off_fraction).min(peak);
        indices.toe_off = Some(toe_off);
        indices.plant = Some(offset(config.fallback_plant_fraction).min(toe_off));
        debug!(span, "short clip, using fixed-fraction takeoff estimate");
    } else {
        indices.toe_off = find_toe_off(poses, first, peak, config);
        let window = ((config.plant_window_secs * fps).round() as usize).max(1);
        indices.plant = indices
            .toe_off
            .and_then(|toe_off| find_plant(poses, toe_off.saturating_sub(window).max(first), toe_off, jc));
        indices.penultimate = indices.plant.and_then(|plant| {
            let start = plant.saturating_sub(config.penultimate_window).max(first);
            deepest(series.iter().copied().filter(|&(f, _)| f >= start && f < plant))
        });
    }

    indices.landing = series
        .iter()
        .find(|&&(f, y)| f > peak && y > peak_y + config.landing_drop)
        .map(|&(f, _)| f);

    debug!(?indices, "events detected");

    let phases = (0..poses.len())
        .map(|f| phase_at(&indices, f, com_y[f].is_some()))
        .collect();

    EventReport { indices, phases }
}

/// ピークから遡って、それまでの最大足位置の許容幅内にある最後のフレーム
fn find_toe_off(poses: &[Option<Pose>], first: usize, peak: usize, config: &EventConfig) -> Option<usize> {
    let mut running_max = f32::MIN;
    let mut toe_off = None;
    for f in first..=peak {
        let Some(foot_y) = poses[f]
            .as_ref()
            .and_then(|p| p.lowest_foot_y(config.joint_confidence))
        else {
            continue;
        };
        running_max = running_max.max(foot_y);
        if foot_y >= running_max - config.ground_margin {
            toe_off = Some(f);
        }
    }
    toe_off
}

fn find_plant(poses: &[Option<Pose>], start: usize, toe_off: usize, jc: f32) -> Option<usize> {
    deepest((start..=toe_off).filter_map(|f| poses[f].as_ref().and_then(|p| heel_y(p, jc)).map(|y| (f, y))))
}

/// 踵の最下点。踵がなければ足首。
fn heel_y(pose: &Pose, jc: f32) -> Option<f32> {
    use JointIndex::*;
    let lowest = |joints: [JointIndex; 2]| {
        joints
            .iter()
            .filter_map(|&j| pose.confident(j, jc))
            .map(|kp| kp.y)
            .reduce(f32::max)
    };
    lowest([LeftHeel, RightHeel]).or_else(|| lowest([LeftAnkle, RightAnkle]))
}

/// 最大y（最も低い位置）のフレーム。同値は先のフレーム。
fn deepest<I: Iterator<Item = (usize, f32)>>(values: I) -> Option<usize> {
    values
        .fold(None::<(usize, f32)>, |best, (f, y)| match best {
            Some((_, by)) if by >= y => best,
            _ => Some((f, y)),
        })
        .map(|(f, _)| f)
}

fn phase_at(indices: &EventIndices, frame: usize, has_pose: bool) -> Phase {
    let in_flight = indices.in_flight(frame);
    if !has_pose {
        // 空中での検出欠落は滞空扱い
        return if in_flight { Phase::Flight } else { Phase::NoSubject };
    }

    if indices.landing.is_some_and(|l| frame >= l) {
        return Phase::Landing;
    }
    if in_flight {
        return Phase::Flight;
    }
    if let (Some(plant), Some(toe_off)) = (indices.plant, indices.toe_off) {
        if (plant..=toe_off).contains(&frame) {
            return Phase::Takeoff;
        }
    }
    if let (Some(penultimate), Some(plant)) = (indices.penultimate, indices.plant) {
        if (penultimate..plant).contains(&frame) {
            return Phase::Penultimate;
        }
    }

    let approach_end = [
        indices.penultimate,
        indices.plant,
        indices.flight_window().map(|(start, _)| start),
    ]
    .into_iter()
    .flatten()
    .min();
    match (indices.first_subject_frame, approach_end) {
        (Some(first), Some(end)) if frame >= first && frame < end => Phase::Approach,
        (Some(first), None) if frame >= first => Phase::Approach,
        _ => Phase::NoSubject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::standing_pose;

    /// 助走 → 踏切 → 放物線 → 着地 の合成ジャンプ（頂点はフレーム30）
    fn hip_height(frame: usize) -> f32 {
        match frame {
            8 => 0.705,
            17 => 0.71,
            f if f > 20 && f < 40 => {
                let f = f as f64;
                (0.7 - 0.003 * (f - 20.0) * (40.0 - f)) as f32
            }
            _ => 0.7,
        }
    }

    fn jump_poses() -> Vec<Option<Pose>> {
        (0..=60)
            .map(|f| Some(standing_pose(f, 0.2 + 0.01 * f as f32, hip_height(f))))
            .collect()
    }

    fn detect(poses: &[Option<Pose>]) -> EventReport {
        detect_events(poses, 30.0, &EventConfig::default())
    }

    #[test]
    fn test_peak_frame_exact() {
        let report = detect(&jump_poses());
        assert_eq!(report.indices.peak, Some(30));
    }

    #[test]
    fn test_jump_events() {
        let report = detect(&jump_poses());
        let idx = report.indices;
        assert_eq!(idx.first_subject_frame, Some(0));
        assert_eq!(idx.last_subject_frame, Some(60));
        assert_eq!(idx.toe_off, Some(20));
        assert_eq!(idx.plant, Some(17));
        assert_eq!(idx.landing, Some(36));
        assert_eq!(idx.penultimate, Some(8));
    }

    #[test]
    fn test_event_ordering() {
        let idx = detect(&jump_poses()).indices;
        let (plant, toe_off, peak, landing) = (
            idx.plant.unwrap(),
            idx.toe_off.unwrap(),
            idx.peak.unwrap(),
            idx.landing.unwrap(),
        );
        assert!(plant <= toe_off && toe_off <= peak && peak <= landing);
    }

    #[test]
    fn test_phases() {
        let report = detect(&jump_poses());
        assert_eq!(report.phases.len(), 61);
        assert_eq!(report.phases[0], Phase::Approach);
        assert_eq!(report.phases[7], Phase::Approach);
        assert_eq!(report.phases[8], Phase::Penultimate);
        assert_eq!(report.phases[16], Phase::Penultimate);
        assert_eq!(report.phases[17], Phase::Takeoff);
        assert_eq!(report.phases[20], Phase::Takeoff);
        assert_eq!(report.phases[21], Phase::Flight);
        assert_eq!(report.phases[35], Phase::Flight);
        assert_eq!(report.phases[36], Phase::Landing);
        assert_eq!(report.phases[60], Phase::Landing);
    }

    #[test]
    fn test_gap_in_flight_keeps_flight() {
        let mut poses = jump_poses();
        for p in &mut poses[25..=27] {
            *p = None;
        }
        poses[50] = None;
        let report = detect(&poses);
        assert_eq!(report.indices.peak, Some(30));
        assert!(report.phases[25..=27].iter().all(|&p| p == Phase::Flight));
        assert_eq!(report.phases[50], Phase::NoSubject);
    }

    #[test]
    fn test_times() {
        let idx = detect(&jump_poses()).indices;
        assert!((idx.flight_time(30.0).unwrap() - 16.0 / 30.0).abs() < 1e-6);
        assert!((idx.takeoff_contact_time(30.0).unwrap() - 0.1).abs() < 1e-6);
        assert!(idx.flight_time(0.0).is_none());
    }

    #[test]
    fn test_empty_input() {
        let report = detect(&[]);
        assert_eq!(report.indices, EventIndices::default());
        assert!(report.phases.is_empty());

        let report = detect(&[None, None, None]);
        assert_eq!(report.phases, vec![Phase::NoSubject; 3]);
    }

    #[test]
    fn test_single_subject_frame() {
        let poses = vec![None, Some(standing_pose(1, 0.5, 0.5)), None];
        let report = detect(&poses);
        assert_eq!(report.indices.peak, None);
        assert!(report.phases.iter().all(|&p| p == Phase::NoSubject));
    }

    #[test]
    fn test_short_clip_fallback() {
        let poses: Vec<Option<Pose>> = (0..8)
            .map(|f| Some(standing_pose(f, 0.5, 0.7 - 0.01 * f as f32)))
            .collect();
        let idx = detect(&poses).indices;
        assert_eq!(idx.peak, Some(7));
        assert_eq!(idx.plant, Some(2));
        assert_eq!(idx.toe_off, Some(3));
        assert_eq!(idx.penultimate, None);
        assert_eq!(idx.landing, None);
    }

    #[test]
    fn test_short_clip_fallback_stays_before_early_peak() {
        let poses: Vec<Option<Pose>> = (0..8)
            .map(|f| Some(standing_pose(f, 0.5, if f == 1 { 0.5 } else { 0.7 })))
            .collect();
        let idx = detect(&poses).indices;
        assert_eq!(idx.peak, Some(1));
        assert_eq!(idx.landing, Some(2));
        let (plant, toe_off) = (idx.plant.unwrap(), idx.toe_off.unwrap());
        assert!(plant <= toe_off && toe_off <= 1, "plant {} toe_off {}", plant, toe_off);
    }

    #[test]
    fn test_no_landing_degrades() {
        let poses: Vec<Option<Pose>> = jump_poses().into_iter().take(33).collect();
        let report = detect(&poses);
        assert_eq!(report.indices.landing, None);
        assert_eq!(report.indices.peak, Some(30));
        assert_eq!(report.phases[25], Phase::Flight);
        // 頂点以降は判定不能
        assert_eq!(report.phases[32], Phase::NoSubject);
    }
}
