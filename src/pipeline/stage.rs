//! The stage state machine.
//!
//! Stages form a strict linear order. The even-indexed `Pending*` stages are
//! quiescent checkpoints: every artifact produced so far is on disk and
//! recorded on the row, no worker is active, and the process may be killed
//! there safely. The odd-indexed stages mean a worker is (or was, before a
//! crash) producing the next artifact.

use serde::{Deserialize, Serialize};

/// Position of a job in the linear pipeline.
///
/// The numeric priority of a stage is its distance along the pipeline; the
/// dispatcher always picks the furthest-along job first, so a near-complete
/// job releases its disk artifacts before new downloads begin.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Stage {
    Pending,
    DownloadingVod,
    PendingDownloadChat,
    DownloadingChat,
    PendingRenderingChat,
    RenderingChat,
    PendingCombining,
    Combining,
    PendingUpload,
    Uploading,
    Uploaded,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 11] = [
        Self::Pending,
        Self::DownloadingVod,
        Self::PendingDownloadChat,
        Self::DownloadingChat,
        Self::PendingRenderingChat,
        Self::RenderingChat,
        Self::PendingCombining,
        Self::Combining,
        Self::PendingUpload,
        Self::Uploading,
        Self::Uploaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::DownloadingVod => "DownloadingVod",
            Self::PendingDownloadChat => "PendingDownloadChat",
            Self::DownloadingChat => "DownloadingChat",
            Self::PendingRenderingChat => "PendingRenderingChat",
            Self::RenderingChat => "RenderingChat",
            Self::PendingCombining => "PendingCombining",
            Self::Combining => "Combining",
            Self::PendingUpload => "PendingUpload",
            Self::Uploading => "Uploading",
            Self::Uploaded => "Uploaded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|stage| stage.as_str() == s)
    }

    /// Selection priority: the furthest-along stage wins.
    pub fn priority(&self) -> i64 {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) as i64
    }

    /// Terminal success stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Uploaded)
    }

    /// Quiescent checkpoint (`Pending*`) stage.
    pub fn is_checkpoint(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::PendingDownloadChat | Self::PendingRenderingChat
                | Self::PendingCombining
                | Self::PendingUpload
        )
    }

    /// A worker is (or was) active in this stage.
    pub fn is_active(&self) -> bool {
        !self.is_checkpoint() && !self.is_terminal()
    }

    /// The active stage a checkpoint transitions to when work begins.
    pub fn active_form(&self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Self::DownloadingVod),
            Self::PendingDownloadChat => Some(Self::DownloadingChat),
            Self::PendingRenderingChat => Some(Self::RenderingChat),
            Self::PendingCombining => Some(Self::Combining),
            Self::PendingUpload => Some(Self::Uploading),
            _ => None,
        }
    }

    /// The checkpoint this stage is resumed from after a crash.
    ///
    /// An active stage re-runs from its paired `Pending*` checkpoint;
    /// checkpoints resume from themselves.
    pub fn resume_checkpoint(&self) -> Option<Stage> {
        match self {
            Self::Uploaded => None,
            Self::DownloadingVod => Some(Self::Pending),
            Self::DownloadingChat => Some(Self::PendingDownloadChat),
            Self::RenderingChat => Some(Self::PendingRenderingChat),
            Self::Combining => Some(Self::PendingCombining),
            Self::Uploading => Some(Self::PendingUpload),
            checkpoint => Some(*checkpoint),
        }
    }

    /// The checkpoint an active stage transitions to once its worker stream
    /// has drained successfully and the artifact path is recorded.
    pub fn next_checkpoint(&self) -> Option<Stage> {
        match self {
            Self::DownloadingVod => Some(Self::PendingDownloadChat),
            Self::DownloadingChat => Some(Self::PendingRenderingChat),
            Self::RenderingChat => Some(Self::PendingCombining),
            Self::Combining => Some(Self::PendingUpload),
            Self::Uploading => Some(Self::Uploaded),
            _ => None,
        }
    }
}
