use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub trajectory: TrajectoryConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// 同一人物追跡のパラメータ
///
/// 既定値は特定の撮影条件（カメラ距離・フレームレート）で調整したもの。
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// 関節を「見えている」とみなす信頼度
    #[serde(default = "default_joint_confidence")]
    pub joint_confidence: f32,
    /// 形状比較に必要な共通関節数
    #[serde(default = "default_min_shape_joints")]
    pub min_shape_joints: usize,
    /// 近接スコアの減衰係数 exp(-d*k)
    #[serde(default = "default_proximity_decay")]
    pub proximity_decay: f32,
    /// 速度整合スコアの減衰係数
    #[serde(default = "default_velocity_decay")]
    pub velocity_decay: f32,
    #[serde(default = "default_proximity_weight")]
    pub proximity_weight: f32,
    #[serde(default = "default_shape_weight")]
    pub shape_weight: f32,
    #[serde(default = "default_velocity_weight")]
    pub velocity_weight: f32,
    /// アンカー類似度のブレンド比
    #[serde(default = "default_anchor_blend")]
    pub anchor_blend: f32,
    /// これ未満のアンカー類似度の候補は棄却
    #[serde(default = "default_anchor_floor")]
    pub anchor_floor: f32,
    /// 高速移動とみなす平滑化速度（正規化座標/フレーム）
    #[serde(default = "default_fast_motion_speed")]
    pub fast_motion_speed: f32,
    /// 高速移動時に形状から速度へ移す重み
    #[serde(default = "default_velocity_boost")]
    pub velocity_boost: f32,
    /// 期待速度に対してこの比率未満の変位は静止した別人とみなす
    #[serde(default = "default_stationary_ratio")]
    pub stationary_ratio: f32,
    #[serde(default = "default_min_match_score")]
    pub min_match_score: f32,
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f32,
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f32,
    /// 連続欠損の上限（超えたら被写体は退場したとみなす）
    #[serde(default = "default_miss_ceiling")]
    pub miss_ceiling: usize,
    /// 欠損時の近傍判定半径（フレーム対角比, 欠損1フレーム目）
    #[serde(default = "default_gap_radius_min")]
    pub gap_radius_min: f32,
    /// 欠損時の近傍判定半径（フレーム対角比, 上限到達時）
    #[serde(default = "default_gap_radius_max")]
    pub gap_radius_max: f32,
    #[serde(default = "default_velocity_alpha")]
    pub velocity_alpha: f32,
    #[serde(default = "default_speed_alpha")]
    pub speed_alpha: f32,
    /// 連続でAuto判定されたらロックするフレーム数
    #[serde(default = "default_lock_after_frames")]
    pub lock_after_frames: usize,
    /// 手動指定点の包含判定に使うBBox拡張率
    #[serde(default = "default_override_box_expansion")]
    pub override_box_expansion: f32,
    /// 前方・後方パスを別スレッドで実行
    #[serde(default = "default_parallel_passes")]
    pub parallel_passes: bool,
}

fn default_joint_confidence() -> f32 { 0.3 }
fn default_min_shape_joints() -> usize { 4 }
fn default_proximity_decay() -> f32 { 5.0 }
fn default_velocity_decay() -> f32 { 8.0 }
fn default_proximity_weight() -> f32 { 0.40 }
fn default_shape_weight() -> f32 { 0.35 }
fn default_velocity_weight() -> f32 { 0.25 }
fn default_anchor_blend() -> f32 { 0.30 }
fn default_anchor_floor() -> f32 { 0.25 }
fn default_fast_motion_speed() -> f32 { 0.008 }
fn default_velocity_boost() -> f32 { 0.20 }
fn default_stationary_ratio() -> f32 { 0.20 }
fn default_min_match_score() -> f32 { 0.35 }
fn default_high_confidence() -> f32 { 0.70 }
fn default_ambiguity_margin() -> f32 { 0.15 }
fn default_miss_ceiling() -> usize { 30 }
fn default_gap_radius_min() -> f32 { 0.20 }
fn default_gap_radius_max() -> f32 { 0.45 }
fn default_velocity_alpha() -> f32 { 0.5 }
fn default_speed_alpha() -> f32 { 0.3 }
fn default_lock_after_frames() -> usize { 3 }
fn default_override_box_expansion() -> f32 { 1.2 }
fn default_parallel_passes() -> bool { true }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            joint_confidence: default_joint_confidence(),
            min_shape_joints: default_min_shape_joints(),
            proximity_decay: default_proximity_decay(),
            velocity_decay: default_velocity_decay(),
            proximity_weight: default_proximity_weight(),
            shape_weight: default_shape_weight(),
            velocity_weight: default_velocity_weight(),
            anchor_blend: default_anchor_blend(),
            anchor_floor: default_anchor_floor(),
            fast_motion_speed: default_fast_motion_speed(),
            velocity_boost: default_velocity_boost(),
            stationary_ratio: default_stationary_ratio(),
            min_match_score: default_min_match_score(),
            high_confidence: default_high_confidence(),
            ambiguity_margin: default_ambiguity_margin(),
            miss_ceiling: default_miss_ceiling(),
            gap_radius_min: default_gap_radius_min(),
            gap_radius_max: default_gap_radius_max(),
            velocity_alpha: default_velocity_alpha(),
            speed_alpha: default_speed_alpha(),
            lock_after_frames: default_lock_after_frames(),
            override_box_expansion: default_override_box_expansion(),
            parallel_passes: default_parallel_passes(),
        }
    }
}

/// 軌道モデル（物理検証）のパラメータ
#[derive(Debug, Clone, Deserialize)]
pub struct TrajectoryConfig {
    /// フィットに使う最小サンプル数（3未満は3として扱う）
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_min_r_squared")]
    pub min_r_squared: f64,
    /// 予測中心からの許容ずれ（正規化座標）
    #[serde(default = "default_max_deviation")]
    pub max_deviation: f32,
    /// アンカーサンプルとして採用するAuto信頼度
    #[serde(default = "default_sample_min_confidence")]
    pub sample_min_confidence: f32,
    #[serde(default = "default_search_expansion")]
    pub search_expansion: f32,
    /// ドリフト修復を行うか
    #[serde(default = "default_repair_drift")]
    pub repair_drift: bool,
}

fn default_min_samples() -> usize { 5 }
fn default_min_r_squared() -> f64 { 0.3 }
fn default_max_deviation() -> f32 { 0.12 }
fn default_sample_min_confidence() -> f32 { 0.8 }
fn default_search_expansion() -> f32 { 1.5 }
fn default_repair_drift() -> bool { false }

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            min_r_squared: default_min_r_squared(),
            max_deviation: default_max_deviation(),
            sample_min_confidence: default_sample_min_confidence(),
            search_expansion: default_search_expansion(),
            repair_drift: default_repair_drift(),
        }
    }
}

/// キーイベント検出のパラメータ
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_joint_confidence")]
    pub joint_confidence: f32,
    /// 接地とみなす足の高さの許容幅
    #[serde(default = "default_ground_margin")]
    pub ground_margin: f32,
    /// 踏切前の踏み込み探索窓（秒）
    #[serde(default = "default_plant_window_secs")]
    pub plant_window_secs: f32,
    /// 着地とみなす頂点からの落下量（フレーム高さ比）
    #[serde(default = "default_landing_drop")]
    pub landing_drop: f32,
    /// 踏み込み前の最後から2歩目の探索窓（フレーム）
    #[serde(default = "default_penultimate_window")]
    pub penultimate_window: usize,
    /// これ未満のフレーム数は固定比率でフォールバック
    #[serde(default = "default_min_event_frames")]
    pub min_frames: usize,
    #[serde(default = "default_fallback_plant_fraction")]
    pub fallback_plant_fraction: f32,
    #[serde(default = "default_fallback_toe_off_fraction")]
    pub fallback_toe_off_fraction: f32,
}

fn default_ground_margin() -> f32 { 0.02 }
fn default_plant_window_secs() -> f32 { 0.20 }
fn default_landing_drop() -> f32 { 0.08 }
fn default_penultimate_window() -> usize { 30 }
fn default_min_event_frames() -> usize { 10 }
fn default_fallback_plant_fraction() -> f32 { 0.35 }
fn default_fallback_toe_off_fraction() -> f32 { 0.45 }

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            joint_confidence: default_joint_confidence(),
            ground_margin: default_ground_margin(),
            plant_window_secs: default_plant_window_secs(),
            landing_drop: default_landing_drop(),
            penultimate_window: default_penultimate_window(),
            min_frames: default_min_event_frames(),
            fallback_plant_fraction: default_fallback_plant_fraction(),
            fallback_toe_off_fraction: default_fallback_toe_off_fraction(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid config")?;
        Ok(config)
    }

    /// 読み込みに失敗したら既定値
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config not loaded ({e:#}), using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.tracker.miss_ceiling, 30);
        assert!((config.tracker.high_confidence - 0.70).abs() < 1e-6);
        assert!((config.trajectory.max_deviation - 0.12).abs() < 1e-6);
        assert_eq!(config.events.penultimate_window, 30);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            [tracker]
            miss_ceiling = 12
            parallel_passes = false

            [events]
            landing_drop = 0.05
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker.miss_ceiling, 12);
        assert!(!config.tracker.parallel_passes);
        assert!((config.tracker.anchor_floor - 0.25).abs() < 1e-6);
        assert!((config.events.landing_drop - 0.05).abs() < 1e-6);
        assert_eq!(config.trajectory.min_samples, 5);
    }

    #[test]
    fn test_scoring_weights_sum_to_one() {
        let t = TrackerConfig::default();
        let sum = t.proximity_weight + t.shape_weight + t.velocity_weight;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = Config::load_or_default("/nonexistent/highjump.toml");
        assert_eq!(config.tracker.lock_after_frames, 3);
    }
}
