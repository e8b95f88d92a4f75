use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::platform::VideoItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Moved,
    Skipped,
    Failed,
    /// Never tried because the run was cancelled or aborted first
    NotAttempted,
}

impl MoveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moved => "moved",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotAttempted => "not_attempted",
        }
    }
}

/// Final disposition of one enumerated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub video_id: u64,
    pub bvid: String,
    pub title: String,
    pub source_collection_id: u64,
    pub target_collection_id: Option<u64>,
    pub target_title: Option<String>,
    pub status: MoveStatus,
    pub reason: Option<String>,
}

impl MoveOutcome {
    pub fn new(item: &VideoItem, status: MoveStatus) -> Self {
        Self {
            video_id: item.video_id,
            bvid: item.bvid.clone(),
            title: item.title.clone(),
            source_collection_id: item.source_collection_id,
            target_collection_id: None,
            target_title: None,
            status,
            reason: None,
        }
    }

    pub fn with_target(mut self, id: u64, title: impl Into<String>) -> Self {
        self.target_collection_id = Some(id);
        self.target_title = Some(title.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub moved: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Items the classifier could not place (counted among skipped or moved-to-fallback)
    pub unresolved: usize,
    pub not_attempted: usize,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[MoveOutcome], unresolved: usize) -> Self {
        let count = |status: MoveStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            total: outcomes.len(),
            moved: count(MoveStatus::Moved),
            skipped: count(MoveStatus::Skipped),
            failed: count(MoveStatus::Failed),
            unresolved,
            not_attempted: count(MoveStatus::NotAttempted),
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    /// Source collection title
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One per enumerated item, in listing order
    pub outcomes: Vec<MoveOutcome>,
    pub summary: RunSummary,
    pub cancelled: bool,
    /// Set when the run stopped early because the session could not be recovered
    pub aborted: Option<String>,
}

impl RunReport {
    /// Completed without abort (per-item failures do not count)
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::item;

    #[test]
    fn test_summary_counts() {
        let a = item(1, "a", 9);
        let b = item(2, "b", 9);
        let c = item(3, "c", 9);
        let outcomes = vec![
            MoveOutcome::new(&a, MoveStatus::Moved).with_target(2, "Music"),
            MoveOutcome::new(&b, MoveStatus::Skipped).with_reason("unresolved classification"),
            MoveOutcome::new(&c, MoveStatus::NotAttempted),
        ];
        let summary = RunSummary::from_outcomes(&outcomes, 1);
        assert_eq!(
            summary,
            RunSummary {
                total: 3,
                moved: 1,
                skipped: 1,
                failed: 0,
                unresolved: 1,
                not_attempted: 1,
            }
        );
    }

    #[test]
    fn test_outcome_serializes_snake_case_status() {
        let outcome = MoveOutcome::new(&item(1, "a", 9), MoveStatus::NotAttempted);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "not_attempted");
        assert_eq!(json["videoId"], 1);
    }
}
