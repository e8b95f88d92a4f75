use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::report::RunSummary;

/// Progress emitted while a run executes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        source: String,
        total: usize,
    },
    /// Classification of an item began
    ItemStarted {
        video_id: u64,
        title: String,
    },
    ItemClassified {
        video_id: u64,
        category: Option<String>,
    },
    ItemMoved {
        video_id: u64,
        target: String,
    },
    ItemSkipped {
        video_id: u64,
        reason: String,
    },
    ItemFailed {
        video_id: u64,
        error: String,
    },
    RunFinished {
        summary: RunSummary,
    },
}

/// Optional event sink; sending never fails the run
#[derive(Clone, Default)]
pub struct ProgressSink(Option<UnboundedSender<ProgressEvent>>);

impl ProgressSink {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self(Some(sender))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.0 {
            // Receiver gone means nobody is watching
            let _ = sender.send(event);
        }
    }
}
