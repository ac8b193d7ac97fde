pub mod analysis;
pub mod chat;
pub mod config_pipeline;
pub mod context;
pub mod extraction;

pub use analysis::*;
pub use chat::*;
pub use config_pipeline::*;
pub use context::*;
pub use extraction::*;

use serde::{Deserialize, Serialize};

/// Terminal/running status shared by every pipeline run.
///
/// Invariant: `completed_at` on a run row is non-null iff the status is
/// terminal (completed, failed, or cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled]
        {
            assert_eq!(RunStatus::parse_status(s.as_str()), s);
        }
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
