use thiserror::Error;

/// 呼び出し側の契約違反、またはキャンセル
///
/// 「一致なし」はエラーではなく `Assignment` で表現する。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("anchor frame {frame} out of range (total {total})")]
    InvalidAnchorFrame { frame: usize, total: usize },

    #[error("anchor candidate {index} out of range at frame {frame} ({count} candidates)")]
    InvalidAnchorCandidate { frame: usize, index: usize, count: usize },

    #[error("frame {frame} out of range (total {total})")]
    FrameOutOfRange { frame: usize, total: usize },

    #[error("propagation cancelled")]
    Cancelled,
}

pub type TrackResult<T> = std::result::Result<T, TrackError>;
