use nalgebra::Point2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::assignment::{Assignment, AssignmentMap, Correction};
use super::similarity::{proximity_score, shape_similarity, velocity_score};
use super::state::TrackState;
use crate::config::TrackerConfig;
use crate::error::{TrackError, TrackResult};
use crate::pose::{Pose, PresenceDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// 候補1件の採点結果
#[derive(Debug, Clone, Copy)]
struct Scored {
    index: usize,
    score: f32,
    center: Point2<f32>,
}

/// このフレームで使う重み
struct Weights {
    proximity: f32,
    shape: f32,
    velocity: f32,
    anchor_blend: f32,
}

/// アンカーからの双方向伝播で全フレームに被写体を割り当てる
///
/// 入力は不変で、呼び出しごとに新しい `AssignmentMap` を返す。
pub struct IdentityTracker {
    config: TrackerConfig,
    presence: Option<Arc<dyn PresenceDetector>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            presence: None,
            cancel: None,
        }
    }

    /// 欠損フレームで RecoverableGap を判定する粗い人物検出器を注入
    pub fn with_presence_detector(mut self, presence: Arc<dyn PresenceDetector>) -> Self {
        self.presence = Some(presence);
        self
    }

    /// フレーム間でチェックされるキャンセルフラグ
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// anchor_frame の anchor_candidate を起点に前後へ伝播
    pub fn propagate(
        &self,
        anchor_frame: usize,
        anchor_candidate: usize,
        frames: &[Vec<Pose>],
    ) -> TrackResult<AssignmentMap> {
        let anchor = Self::anchor_pose(anchor_frame, anchor_candidate, frames)?;

        let mut map = AssignmentMap::unresolved(frames.len());
        map.set(anchor_frame, Assignment::Confirmed { candidate: anchor_candidate });
        map.extend(self.run_passes(anchor_frame, anchor, frames, &|_: usize| false)?);

        let summary = map.summary();
        info!(
            anchor_frame,
            anchor_candidate,
            auto = summary.auto,
            uncertain = summary.uncertain,
            gaps = summary.recoverable_gap,
            "propagation complete"
        );
        Ok(map)
    }

    /// 1フレームを修正して再伝播する
    ///
    /// 既にユーザー確認済みのフレームに到達した方向はそこで止まる。
    pub fn re_propagate(
        &self,
        correction: Correction,
        at_frame: usize,
        frames: &[Vec<Pose>],
        existing: &AssignmentMap,
    ) -> TrackResult<AssignmentMap> {
        if at_frame >= frames.len() {
            return Err(TrackError::FrameOutOfRange {
                frame: at_frame,
                total: frames.len(),
            });
        }

        let mut map = existing.clone();
        for frame in 0..frames.len() {
            if map.get(frame).is_none() {
                map.set(frame, Assignment::NoSubjectAuto);
            }
        }

        let Correction::Candidate(candidate) = correction else {
            // 伝播元となる姿勢がない
            map.set(at_frame, correction.to_assignment());
            return Ok(map);
        };

        let anchor = Self::anchor_pose(at_frame, candidate, frames)?;
        map.set(at_frame, correction.to_assignment());

        let is_stop = |frame: usize| {
            frame != at_frame && existing.get(frame).is_some_and(Assignment::is_user_verified)
        };
        map.extend(self.run_passes(at_frame, anchor, frames, &is_stop)?);

        debug!(at_frame, candidate, "re-propagation complete");
        Ok(map)
    }

    /// 複数アンカーからの伝播
    ///
    /// 先頭アンカーで全体を伝播し、以降のアンカーは再伝播として適用する。
    pub fn propagate_from_anchors(
        &self,
        anchors: &[(usize, usize)],
        frames: &[Vec<Pose>],
    ) -> TrackResult<AssignmentMap> {
        let Some((&(first_frame, first_candidate), rest)) = anchors.split_first() else {
            return Ok(AssignmentMap::unresolved(frames.len()));
        };

        let mut map = self.propagate(first_frame, first_candidate, frames)?;
        for &(frame, candidate) in rest {
            map = self.re_propagate(Correction::Candidate(candidate), frame, frames, &map)?;
        }
        Ok(map)
    }

    /// 指定点に最も合う候補を新しいアンカーとして再伝播（手動指定）
    pub fn override_at_point(
        &self,
        frame: usize,
        point: Point2<f32>,
        frames: &[Vec<Pose>],
        existing: &AssignmentMap,
    ) -> TrackResult<AssignmentMap> {
        let candidates = frames.get(frame).ok_or(TrackError::FrameOutOfRange {
            frame,
            total: frames.len(),
        })?;
        let index = select_candidate_at_point(
            candidates,
            point,
            self.config.joint_confidence,
            self.config.override_box_expansion,
        )
        .ok_or(TrackError::InvalidAnchorCandidate {
            frame,
            index: 0,
            count: candidates.len(),
        })?;
        self.re_propagate(Correction::Candidate(index), frame, frames, existing)
    }

    fn anchor_pose(frame: usize, candidate: usize, frames: &[Vec<Pose>]) -> TrackResult<&Pose> {
        let candidates = frames.get(frame).ok_or(TrackError::InvalidAnchorFrame {
            frame,
            total: frames.len(),
        })?;
        candidates.get(candidate).ok_or(TrackError::InvalidAnchorCandidate {
            frame,
            index: candidate,
            count: candidates.len(),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// 前方・後方の2パスを実行して結果を連結
    fn run_passes(
        &self,
        anchor_frame: usize,
        anchor: &Pose,
        frames: &[Vec<Pose>],
        is_stop: &(dyn Fn(usize) -> bool + Sync),
    ) -> TrackResult<Vec<(usize, Assignment)>> {
        let (forward, backward) = if self.config.parallel_passes {
            thread::scope(|s| {
                let forward = s.spawn(|| {
                    self.run_pass(Direction::Forward, anchor_frame, anchor, frames, is_stop)
                });
                let backward =
                    self.run_pass(Direction::Backward, anchor_frame, anchor, frames, is_stop);
                let forward = forward
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                (forward, backward)
            })
        } else {
            (
                self.run_pass(Direction::Forward, anchor_frame, anchor, frames, is_stop),
                self.run_pass(Direction::Backward, anchor_frame, anchor, frames, is_stop),
            )
        };

        let mut entries = forward?;
        entries.extend(backward?);
        Ok(entries)
    }

    fn run_pass(
        &self,
        direction: Direction,
        anchor_frame: usize,
        anchor: &Pose,
        frames: &[Vec<Pose>],
        is_stop: &(dyn Fn(usize) -> bool + Sync),
    ) -> TrackResult<Vec<(usize, Assignment)>> {
        let order: Box<dyn Iterator<Item = usize>> = match direction {
            Direction::Forward => Box::new(anchor_frame + 1..frames.len()),
            Direction::Backward => Box::new((0..anchor_frame).rev()),
        };

        let mut entries = Vec::new();
        let Some(mut state) = TrackState::new(anchor, self.config.joint_confidence) else {
            warn!(anchor_frame, "anchor pose has no center of mass, nothing to propagate");
            return Ok(entries);
        };
        let mut departed = false;

        for frame in order {
            if self.is_cancelled() {
                return Err(TrackError::Cancelled);
            }
            if is_stop(frame) {
                debug!(?direction, frame, "reached verified frame");
                break;
            }
            if departed {
                entries.push((frame, Assignment::NoSubjectAuto));
                continue;
            }

            let next = match direction {
                Direction::Forward => frames.get(frame + 1),
                Direction::Backward => frame.checked_sub(1).and_then(|f| frames.get(f)),
            };
            let assignment = match self.match_frame(
                &mut state,
                anchor,
                &frames[frame],
                next.map(Vec::as_slice),
            ) {
                Some(assignment) => assignment,
                None => {
                    state.record_miss();
                    if state.miss_count() > self.config.miss_ceiling {
                        info!(?direction, frame, "miss ceiling exceeded, subject presumed gone");
                        departed = true;
                        Assignment::NoSubjectAuto
                    } else {
                        self.classify_gap(frame, &state)
                    }
                }
            };
            entries.push((frame, assignment));
        }

        debug!(?direction, anchor_frame, frames = entries.len(), "pass complete");
        Ok(entries)
    }

    /// 候補のないフレームを RecoverableGap / NoSubjectAuto に分類
    fn classify_gap(&self, frame: usize, state: &TrackState) -> Assignment {
        let Some(presence) = &self.presence else {
            return Assignment::NoSubjectAuto;
        };

        let c = &self.config;
        let progress = (state.miss_count() as f32 / c.miss_ceiling.max(1) as f32).min(1.0);
        let radius =
            (c.gap_radius_min + (c.gap_radius_max - c.gap_radius_min) * progress) * std::f32::consts::SQRT_2;
        let predicted = state.predict_center(state.miss_count());

        let nearby = presence
            .boxes(frame)
            .iter()
            .any(|b| b.contains(predicted) || (b.center() - predicted).norm() <= radius);
        if nearby {
            Assignment::RecoverableGap
        } else {
            Assignment::NoSubjectAuto
        }
    }

    fn weights(&self, fast: bool) -> Weights {
        let c = &self.config;
        if fast {
            // 跳躍中は形状が急変するので速度を重視し、立位アンカーとのずれも許容
            let boost = c.velocity_boost.min(c.shape_weight);
            Weights {
                proximity: c.proximity_weight,
                shape: c.shape_weight - boost,
                velocity: c.velocity_weight + boost,
                anchor_blend: c.anchor_blend / 2.0,
            }
        } else {
            Weights {
                proximity: c.proximity_weight,
                shape: c.shape_weight,
                velocity: c.velocity_weight,
                anchor_blend: c.anchor_blend,
            }
        }
    }

    /// 候補を採点して降順に並べる。同点は候補順。
    fn score_candidates(&self, state: &TrackState, anchor: &Pose, candidates: &[Pose]) -> Vec<Scored> {
        let c = &self.config;
        let (reference, reference_center) = state.match_reference();
        let predicted = reference_center + state.velocity();
        let fast = state.speed() > c.fast_motion_speed;
        let w = self.weights(fast);
        let elapsed = (state.miss_count() + 1) as f32;
        let stationary_speed = state.speed() * c.stationary_ratio;

        let mut scored: Vec<Scored> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                let center = candidate.center_of_mass(c.joint_confidence)?;

                let anchor_similarity =
                    shape_similarity(candidate, anchor, c.joint_confidence, c.min_shape_joints);
                if anchor_similarity < c.anchor_floor {
                    return None;
                }

                let proximity = proximity_score(center, reference_center, c.proximity_decay);
                let shape =
                    shape_similarity(candidate, &reference, c.joint_confidence, c.min_shape_joints);
                let velocity = velocity_score(center, predicted, c.velocity_decay);

                let rolling = proximity * w.proximity + shape * w.shape + velocity * w.velocity;
                let mut score = (1.0 - w.anchor_blend) * rolling + w.anchor_blend * anchor_similarity;

                if fast && stationary_speed > 0.0 {
                    let implied = (center - state.last_center()).norm() / elapsed;
                    if implied < stationary_speed {
                        score -= 0.5 * c.velocity_boost * (1.0 - implied / stationary_speed);
                    }
                }

                Some(Scored {
                    index,
                    score: score.clamp(0.0, 1.0),
                    center,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        scored
    }

    /// 速度サンプルがまだない曖昧なフレームで、次フレームとの等速整合で候補を選ぶ
    ///
    /// 各候補の `center + (center - last_center)` に最も近い次フレーム重心までの距離が
    /// 最小のもの。同距離は先の候補。
    fn resolve_by_motion(&self, state: &TrackState, contenders: &[Scored], next: &[Pose]) -> Option<Scored> {
        let jc = self.config.joint_confidence;
        let elapsed = (state.miss_count() + 1) as f32;
        let next_centers: Vec<Point2<f32>> = next.iter().filter_map(|p| p.center_of_mass(jc)).collect();
        if next_centers.is_empty() {
            return None;
        }

        contenders
            .iter()
            .map(|s| {
                let projected = s.center + (s.center - state.last_center()) / elapsed;
                let residual = next_centers
                    .iter()
                    .map(|&n| (n - projected).norm())
                    .fold(f32::MAX, f32::min);
                (*s, residual)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
    }

    /// 1フレームの候補を採点し、採用すれば状態を更新して割り当てを返す
    fn match_frame(
        &self,
        state: &mut TrackState,
        anchor: &Pose,
        candidates: &[Pose],
        next: Option<&[Pose]>,
    ) -> Option<Assignment> {
        if candidates.is_empty() {
            return None;
        }

        let c = &self.config;
        let scored = self.score_candidates(state, anchor, candidates);

        let mut best = *scored.first()?;
        if best.score < c.min_match_score {
            return None;
        }
        let runner_up = scored.get(1).map_or(0.0, |s| s.score);
        let confident = best.score >= c.high_confidence && best.score - runner_up > c.ambiguity_margin;

        // 初回の速度サンプル前は静止した近傍の別人に吸われやすい
        if !confident && !state.has_motion_sample() {
            let contenders: Vec<Scored> = scored
                .iter()
                .copied()
                .take_while(|s| s.score >= c.min_match_score && best.score - s.score <= c.ambiguity_margin)
                .collect();
            if let Some(next) = next.filter(|_| contenders.len() > 1) {
                if let Some(resolved) = self.resolve_by_motion(state, &contenders, next) {
                    if resolved.index != best.index {
                        debug!(from = best.index, to = resolved.index, "ambiguous frame resolved by motion");
                    }
                    best = resolved;
                }
            }
        }

        state.accept(&candidates[best.index], best.center, confident, c);

        Some(if confident {
            Assignment::Auto {
                candidate: best.index,
                confidence: best.score,
            }
        } else {
            Assignment::Uncertain {
                candidate: best.index,
                confidence: best.score,
            }
        })
    }
}

/// 指定点を最もよく説明する候補
///
/// 拡張BBoxが点を含む候補のうち重心が最も近いもの。含む候補がなければ重心最近傍。
pub fn select_candidate_at_point(
    candidates: &[Pose],
    point: Point2<f32>,
    joint_confidence: f32,
    expansion: f32,
) -> Option<usize> {
    let nearest = |containing_only: bool| {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, pose)| {
                !containing_only
                    || pose
                        .bounding_box(joint_confidence)
                        .is_some_and(|b| b.expanded(expansion).contains(point))
            })
            .filter_map(|(index, pose)| {
                pose.center_of_mass(joint_confidence)
                    .map(|center| (index, (center - point).norm()))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    };
    nearest(true).or_else(|| nearest(false))
}
