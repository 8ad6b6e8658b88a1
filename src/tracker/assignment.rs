use serde::Serialize;
use std::collections::BTreeMap;

/// 1フレームの被写体割り当て
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    /// ユーザー確認済み
    Confirmed { candidate: usize },
    /// 自動追跡（高信頼）
    Auto { candidate: usize, confidence: f32 },
    /// 曖昧だが最良候補はある
    Uncertain { candidate: usize, confidence: f32 },
    /// ユーザーが「被写体なし」と確認
    NoSubjectConfirmed,
    NoSubjectAuto,
    /// 姿勢検出は失敗したが被写体はいる（ユーザー確認）
    SubjectPresentNoPose,
    /// 候補なしだが粗い人物検出が予測位置付近で反応
    RecoverableGap,
}

impl Assignment {
    pub fn candidate_index(&self) -> Option<usize> {
        match *self {
            Assignment::Confirmed { candidate }
            | Assignment::Auto { candidate, .. }
            | Assignment::Uncertain { candidate, .. } => Some(candidate),
            Assignment::NoSubjectConfirmed
            | Assignment::NoSubjectAuto
            | Assignment::SubjectPresentNoPose
            | Assignment::RecoverableGap => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match *self {
            Assignment::Confirmed { .. } => Some(1.0),
            Assignment::Auto { confidence, .. } | Assignment::Uncertain { confidence, .. } => {
                Some(confidence)
            }
            Assignment::NoSubjectConfirmed
            | Assignment::NoSubjectAuto
            | Assignment::SubjectPresentNoPose
            | Assignment::RecoverableGap => None,
        }
    }

    /// 再伝播で上書きしてはいけない割り当て
    pub fn is_user_verified(&self) -> bool {
        match self {
            Assignment::Confirmed { .. }
            | Assignment::NoSubjectConfirmed
            | Assignment::SubjectPresentNoPose => true,
            Assignment::Auto { .. }
            | Assignment::Uncertain { .. }
            | Assignment::NoSubjectAuto
            | Assignment::RecoverableGap => false,
        }
    }

    /// 軌道フィットのアンカーに使える割り当て
    pub fn is_trusted(&self, min_confidence: f32) -> bool {
        match *self {
            Assignment::Confirmed { .. } => true,
            Assignment::Auto { confidence, .. } => confidence >= min_confidence,
            Assignment::Uncertain { .. }
            | Assignment::NoSubjectConfirmed
            | Assignment::NoSubjectAuto
            | Assignment::SubjectPresentNoPose
            | Assignment::RecoverableGap => false,
        }
    }
}

/// ユーザーによる修正
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Candidate(usize),
    NoSubject,
    SubjectPresentNoPose,
}

impl Correction {
    pub fn to_assignment(self) -> Assignment {
        match self {
            Correction::Candidate(candidate) => Assignment::Confirmed { candidate },
            Correction::NoSubject => Assignment::NoSubjectConfirmed,
            Correction::SubjectPresentNoPose => Assignment::SubjectPresentNoPose,
        }
    }
}

/// フレーム番号 → 割り当て
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentMap {
    frames: BTreeMap<usize, Assignment>,
}

/// 割り当て種別ごとの件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentSummary {
    pub confirmed: usize,
    pub auto: usize,
    pub uncertain: usize,
    pub no_subject: usize,
    pub subject_present_no_pose: usize,
    pub recoverable_gap: usize,
}

impl AssignmentMap {
    /// 全フレームを NoSubjectAuto で初期化
    pub fn unresolved(total_frames: usize) -> Self {
        Self {
            frames: (0..total_frames).map(|f| (f, Assignment::NoSubjectAuto)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&Assignment> {
        self.frames.get(&frame)
    }

    pub fn set(&mut self, frame: usize, assignment: Assignment) {
        self.frames.insert(frame, assignment);
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Assignment)> {
        self.frames.iter().map(|(&f, a)| (f, a))
    }

    /// 別パスの結果をマージ（互いに素なフレーム範囲を前提）
    pub fn extend<I: IntoIterator<Item = (usize, Assignment)>>(&mut self, entries: I) {
        self.frames.extend(entries);
    }

    pub fn summary(&self) -> AssignmentSummary {
        let mut s = AssignmentSummary::default();
        for assignment in self.frames.values() {
            match assignment {
                Assignment::Confirmed { .. } => s.confirmed += 1,
                Assignment::Auto { .. } => s.auto += 1,
                Assignment::Uncertain { .. } => s.uncertain += 1,
                Assignment::NoSubjectConfirmed | Assignment::NoSubjectAuto => s.no_subject += 1,
                Assignment::SubjectPresentNoPose => s.subject_present_no_pose += 1,
                Assignment::RecoverableGap => s.recoverable_gap += 1,
            }
        }
        s
    }
}
