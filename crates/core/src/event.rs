//! Assembly progress events.
//!
//! The assembler publishes one event per manifest entry plus start/finish
//! markers. The CLI (or any other observer) subscribes to render progress
//! without the assembler knowing about terminals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::manifest::Strategy;

/// All progress events emitted during assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssemblyEvent {
    /// Assembly of a story began
    Started {
        run_id: Uuid,
        story_id: String,
        entries: usize,
        timestamp: DateTime<Utc>,
    },

    /// A manifest entry finished resolving (successfully or not)
    EntryResolved {
        run_id: Uuid,
        index: usize,
        label: String,
        strategy: Strategy,
        success: bool,
        detail: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// All sessions of a run were released
    SessionsClosed {
        run_id: Uuid,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Assembly finished and metadata was stamped
    Completed {
        run_id: Uuid,
        story_id: String,
        failures: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for assembly events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AssemblyEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AssemblyEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AssemblyEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
