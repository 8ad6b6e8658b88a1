//! JSON clip input.
//!
//! ```json
//! {
//!   "fps": 30.0,
//!   "frames": [
//!     {
//!       "candidates": [{ "joints": { "left_hip": [0.48, 0.62, 0.9] } }],
//!       "boxes": [[0.40, 0.30, 0.20, 0.55]]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::pose::{BBox, FrameCandidates, JointIndex, Keypoint, Pose, PoseSource, StaticPresence};

#[derive(Debug, Deserialize)]
struct ClipFile {
    fps: f32,
    #[serde(default)]
    frames: Vec<FrameEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FrameEntry {
    #[serde(default)]
    candidates: Vec<CandidateEntry>,
    /// 粗い人物検出器の出力 [x, y, w, h]
    #[serde(default)]
    boxes: Vec<[f32; 4]>,
}

#[derive(Debug, Deserialize)]
struct CandidateEntry {
    /// 関節名 → [x, y, confidence]
    joints: HashMap<JointIndex, [f32; 3]>,
}

/// 読み込んだクリップ
#[derive(Debug, Clone)]
pub struct Clip {
    pub fps: f32,
    pub candidates: FrameCandidates,
    pub boxes: Vec<Vec<BBox>>,
}

impl Clip {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read clip {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid clip {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClipFile = serde_json::from_str(content)?;
        if !(file.fps.is_finite() && file.fps > 0.0) {
            bail!("fps must be positive, got {}", file.fps);
        }

        let mut frames = Vec::with_capacity(file.frames.len());
        let mut boxes = Vec::with_capacity(file.frames.len());
        for (frame_index, entry) in file.frames.into_iter().enumerate() {
            let timestamp = frame_index as f64 / file.fps as f64;
            frames.push(
                entry
                    .candidates
                    .into_iter()
                    .map(|c| {
                        Pose::new(
                            frame_index,
                            timestamp,
                            c.joints
                                .into_iter()
                                .map(|(joint, [x, y, conf])| (joint, Keypoint::new(x, y, conf))),
                        )
                    })
                    .collect(),
            );
            boxes.push(
                entry
                    .boxes
                    .into_iter()
                    .map(|[x, y, w, h]| BBox::new(x, y, w, h))
                    .collect(),
            );
        }

        Ok(Self {
            fps: file.fps,
            candidates: FrameCandidates::new(frames),
            boxes,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.candidates.frame_count()
    }

    /// 人物BBoxが1つでもあれば粗検出器として使う
    pub fn presence(&self) -> Option<StaticPresence> {
        self.boxes
            .iter()
            .any(|b| !b.is_empty())
            .then(|| StaticPresence::new(self.boxes.clone()))
    }
}
