//! Per-document ingestion progress: a pollable in-memory map plus a
//! broadcast stream of stage events.
//!
//! Progress is ephemeral by design; a process restart loses in-flight
//! state. Entries are removed once a terminal stage is reached, after
//! the terminal event has been published.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Validation,
    Parsing,
    Chunking,
    Embedding,
    Storage,
    Indexing,
    Completed,
    Failed,
}

impl IngestionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn default_percent(&self) -> u8 {
        match self {
            Self::Validation => 5,
            Self::Parsing => 15,
            Self::Chunking => 30,
            Self::Embedding => 55,
            Self::Storage => 75,
            Self::Indexing => 90,
            Self::Completed => 100,
            Self::Failed => 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionProgress {
    pub document_id: String,
    pub stage: IngestionStage,
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared progress state keyed by document id. Mutation goes through
/// the dashmap entry API, so concurrent calls for different documents
/// never contend and calls for the same document serialize.
pub struct ProgressTracker {
    states: DashMap<String, IngestionProgress>,
    events: broadcast::Sender<IngestionProgress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProgressTracker {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            states: DashMap::new(),
            events,
        }
    }

    /// Record a stage transition and publish it before returning.
    pub fn transition(&self, document_id: &str, stage: IngestionStage, message: impl Into<String>) {
        let progress = IngestionProgress {
            document_id: document_id.to_string(),
            stage,
            percent: stage.default_percent(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        tracing::debug!(
            document_id,
            stage = ?stage,
            percent = progress.percent,
            "ingestion stage"
        );

        if stage.is_terminal() {
            self.states.remove(document_id);
        } else {
            self.states
                .insert(document_id.to_string(), progress.clone());
        }
        // Publish after the map write so pollers never observe a stage
        // older than the one already broadcast. Send only fails with no
        // subscribers, which is fine.
        let _ = self.events.send(progress);
    }

    pub fn fail(&self, document_id: &str, error: impl Into<String>) {
        self.transition(document_id, IngestionStage::Failed, error);
    }

    pub fn get(&self, document_id: &str) -> Option<IngestionProgress> {
        self.states.get(document_id).map(|entry| entry.clone())
    }

    pub fn all(&self) -> Vec<IngestionProgress> {
        self.states
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestionProgress> {
        self.events.subscribe()
    }

    pub fn clear(&self, document_id: &str) {
        self.states.remove(document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGES: [IngestionStage; 7] = [
        IngestionStage::Validation,
        IngestionStage::Parsing,
        IngestionStage::Chunking,
        IngestionStage::Embedding,
        IngestionStage::Storage,
        IngestionStage::Indexing,
        IngestionStage::Completed,
    ];

    #[tokio::test]
    async fn subscribers_observe_stage_sequence_in_order() {
        let tracker = ProgressTracker::default();
        let mut receiver = tracker.subscribe();

        for stage in STAGES {
            tracker.transition("doc-1", stage, "working");
        }

        for expected in STAGES {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.stage, expected);
            assert_eq!(event.document_id, "doc-1");
        }
    }

    #[test]
    fn terminal_stage_removes_pollable_entry() {
        let tracker = ProgressTracker::default();
        tracker.transition("doc-1", IngestionStage::Chunking, "chunking");
        assert!(tracker.get("doc-1").is_some());

        tracker.transition("doc-1", IngestionStage::Completed, "done");
        assert!(tracker.get("doc-1").is_none());
    }

    #[test]
    fn failure_is_terminal() {
        let tracker = ProgressTracker::default();
        tracker.transition("doc-1", IngestionStage::Embedding, "embedding");
        tracker.fail("doc-1", "provider unreachable");
        assert!(tracker.get("doc-1").is_none());
    }

    #[test]
    fn documents_track_independently() {
        let tracker = ProgressTracker::default();
        tracker.transition("doc-1", IngestionStage::Chunking, "chunking");
        tracker.transition("doc-2", IngestionStage::Storage, "storing");

        assert_eq!(tracker.get("doc-1").unwrap().stage, IngestionStage::Chunking);
        assert_eq!(tracker.get("doc-2").unwrap().stage, IngestionStage::Storage);
        assert_eq!(tracker.all().len(), 2);
    }

    #[test]
    fn percent_is_monotonic_across_the_sequence() {
        let mut last = 0;
        for stage in STAGES {
            assert!(stage.default_percent() >= last);
            last = stage.default_percent();
        }
    }
}
