/// Pipeline state definitions for tracking run progress
///
/// A run moves `Init → Stage1 → Stage2 → Stage3 → [Stage4] → Merge → Done`;
/// `Failed` is reachable from every non-terminal state.
use std::fmt;

/// Represents the current state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Run created, nothing dispatched yet
    Init,

    /// Fetching the category list (serial, single fetch)
    Stage1,

    /// Fetching subcategories, one unit per category
    Stage2,

    /// Fetching listings, one unit per subcategory
    Stage3,

    /// Fetching item details, one unit per listing batch
    Stage4,

    /// Consolidating per-unit outputs of the final stage
    Merge,

    /// Run finished
    Done,

    /// Run aborted
    Failed,
}

impl PipelineState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Checks whether moving to `next` is a legal transition
    ///
    /// Standalone stage runs enter the machine at any stage straight from
    /// `Init`, so `Init` may move to every working state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }

        match (self, next) {
            (Self::Init, Self::Stage1 | Self::Stage2 | Self::Stage3 | Self::Stage4) => true,
            (Self::Stage1, Self::Stage2 | Self::Done) => true,
            (Self::Stage2, Self::Stage3 | Self::Done) => true,
            (Self::Stage3, Self::Stage4 | Self::Merge | Self::Done) => true,
            (Self::Stage4, Self::Merge | Self::Done) => true,
            (Self::Merge, Self::Done) => true,
            _ => false,
        }
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
            Self::Stage3 => "stage3",
            Self::Stage4 => "stage4",
            Self::Merge => "merge",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
