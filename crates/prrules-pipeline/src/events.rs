//! Progress events of a checklist run, fanned out over a broadcast channel.
//!
//! Observers that fall behind lose the oldest events; the run never waits
//! for them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChecklistEvent {
    RunStarted {
        run_id: String,
        item_count: usize,
        topology: String,
    },
    RunCompleted {
        run_id: String,
        evaluated: usize,
        skipped: usize,
        stopped_early: bool,
        duration_ms: u64,
    },
    /// The deadline fired; `committed` entries were already final.
    RunCancelled {
        run_id: String,
        committed: usize,
    },
    ItemStarted {
        index: usize,
        rule: String,
    },
    ItemCompleted {
        index: usize,
        /// [`crate::Outcome::label`] of the result.
        outcome: String,
        duration_ms: u64,
    },
    StageStarted {
        index: usize,
        stage: String,
    },
    StageFailed {
        index: usize,
        stage: String,
        error: String,
    },
    ConsultantsSelected {
        index: usize,
        consultants: Vec<String>,
    },
    ItemsSkipped {
        from_index: usize,
        count: usize,
    },
}

#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<ChecklistEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Dropped when nobody is subscribed.
    pub fn emit(&self, event: ChecklistEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChecklistEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
