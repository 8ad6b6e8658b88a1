//! Tracker → trajectory validator → event classifier.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, TrajectoryConfig};
use crate::error::TrackResult;
use crate::events::{detect_events, EventReport};
use crate::pose::{collect_candidates, Pose, PoseSource, PresenceDetector};
use crate::tracker::{Assignment, AssignmentMap, IdentityTracker};
use crate::trajectory::{samples_from_assignments, tracked_boxes, TrajectoryModel};

/// 1クリップの解析結果
#[derive(Debug, Clone, Serialize)]
pub struct ClipAnalysis {
    pub assignments: AssignmentMap,
    pub trajectory: Option<TrajectoryModel>,
    /// ドリフト修復で書き換えたフレーム
    pub repaired_frames: Vec<usize>,
    pub events: EventReport,
}

/// anchor = (フレーム, 候補番号)
pub fn analyze(
    anchor: (usize, usize),
    source: &dyn PoseSource,
    fps: f32,
    config: &Config,
    presence: Option<Arc<dyn PresenceDetector>>,
) -> TrackResult<ClipAnalysis> {
    let candidates = collect_candidates(source);
    let frames = &candidates[..];
    let mut tracker = IdentityTracker::new(config.tracker.clone());
    if let Some(presence) = presence {
        tracker = tracker.with_presence_detector(presence);
    }
    let (anchor_frame, anchor_candidate) = anchor;
    let mut assignments = tracker.propagate(anchor_frame, anchor_candidate, frames)?;

    let jc = config.tracker.joint_confidence;
    let samples = samples_from_assignments(
        &assignments,
        frames,
        config.trajectory.sample_min_confidence,
        jc,
    );
    let trajectory = TrajectoryModel::fit(&samples, &config.trajectory);
    match &trajectory {
        Some(model) => info!(
            r_squared = model.r_squared(),
            anchors = model.anchor_count(),
            "trajectory fitted"
        ),
        None => debug!(samples = samples.len(), "no trajectory model"),
    }

    let mut repaired_frames = Vec::new();
    if let (Some(model), true) = (&trajectory, config.trajectory.repair_drift) {
        let (repaired, changed) = repair_drift(&assignments, frames, model, &config.trajectory, jc);
        assignments = repaired;
        repaired_frames = changed;
    }

    let poses = resolve_poses(&assignments, frames);
    let events = detect_events(&poses, fps, &config.events);

    Ok(ClipAnalysis {
        assignments,
        trajectory,
        repaired_frames,
        events,
    })
}

/// 軌道から外れた未確認フレームを探索領域内の候補で置き換える
///
/// 見つからなければ NoSubjectAuto。ユーザー確認済みフレームは変更しない。
pub fn repair_drift(
    assignments: &AssignmentMap,
    frames: &[Vec<Pose>],
    model: &TrajectoryModel,
    config: &TrajectoryConfig,
    joint_confidence: f32,
) -> (AssignmentMap, Vec<usize>) {
    let boxes = tracked_boxes(assignments, frames, joint_confidence);
    let report = model.validate(&boxes, config.max_deviation);
    let mut repaired = assignments.clone();
    if report.valid {
        return (repaired, Vec::new());
    }

    let typical_size = (
        median(boxes.iter().map(|b| b.bbox.width).collect()),
        median(boxes.iter().map(|b| b.bbox.height).collect()),
    );

    let mut changed = Vec::new();
    for frame in report.rejected_frames {
        if assignments.get(frame).is_some_and(Assignment::is_user_verified) {
            continue;
        }

        let region = model.predict_search_region(frame, typical_size, config.search_expansion);
        let predicted = model.predict_center(frame);
        let replacement = frames
            .get(frame)
            .into_iter()
            .flatten()
            .enumerate()
            .filter_map(|(index, pose)| {
                let center = pose.bounding_box(joint_confidence)?.center();
                let distance = (center - predicted).norm();
                (region.contains(center) && distance <= config.max_deviation)
                    .then_some((index, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let assignment = match replacement {
            Some((candidate, distance)) => Assignment::Uncertain {
                candidate,
                confidence: (1.0 - distance / config.max_deviation).clamp(0.0, 1.0),
            },
            None => Assignment::NoSubjectAuto,
        };
        debug!(frame, ?assignment, "drift repaired");
        repaired.set(frame, assignment);
        changed.push(frame);
    }

    (repaired, changed)
}

/// 割り当てから各フレームの被写体姿勢を取り出す
pub fn resolve_poses(assignments: &AssignmentMap, frames: &[Vec<Pose>]) -> Vec<Option<Pose>> {
    frames
        .iter()
        .enumerate()
        .map(|(frame, candidates)| {
            let index = assignments.get(frame)?.candidate_index()?;
            candidates.get(index).cloned()
        })
        .collect()
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    values[values.len() / 2]
}
