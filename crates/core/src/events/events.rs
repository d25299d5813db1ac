use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },
    /// Subprocesses left by a previous run were killed at startup.
    OrphansKilled {
        pids: Vec<u32>,
    },

    // Item lifecycle
    ItemDiscovered {
        item_id: String,
        title: String,
        locator: String,
    },
    ItemSkipped {
        item_id: String,
        reason: String,
    },
    ItemFinished {
        item_id: String,
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    // Fetch stage
    DownloadStarted {
        item_id: String,
        locator: String,
    },
    DownloadCompleted {
        item_id: String,
        path: String,
    },
    DownloadFailed {
        item_id: String,
        error: String,
    },

    // Encode stage
    EncodeQueued {
        item_id: String,
        position: usize,
    },
    EncodeStarted {
        item_id: String,
        variant: String,
    },
    EncodeProgress {
        item_id: String,
        variant: String,
        percent: f64,
        eta_secs: u64,
    },
    EncodeCompleted {
        item_id: String,
        variant: String,
        elapsed_secs: u64,
    },
    EncodeFailed {
        item_id: String,
        variant: String,
        error: String,
    },

    // Publish stage
    VariantPublished {
        item_id: String,
        variant: String,
        external_ref: String,
    },
    PublishFailed {
        item_id: String,
        variant: String,
        error: String,
    },
}

impl PipelineEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::OrphansKilled { .. } => "orphans_killed",
            Self::ItemDiscovered { .. } => "item_discovered",
            Self::ItemSkipped { .. } => "item_skipped",
            Self::ItemFinished { .. } => "item_finished",
            Self::DownloadStarted { .. } => "download_started",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::DownloadFailed { .. } => "download_failed",
            Self::EncodeQueued { .. } => "encode_queued",
            Self::EncodeStarted { .. } => "encode_started",
            Self::EncodeProgress { .. } => "encode_progress",
            Self::EncodeCompleted { .. } => "encode_completed",
            Self::EncodeFailed { .. } => "encode_failed",
            Self::VariantPublished { .. } => "variant_published",
            Self::PublishFailed { .. } => "publish_failed",
        }
    }

    /// Returns the item this event is about, if any
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::OrphansKilled { .. } => None,
            Self::ItemDiscovered { item_id, .. }
            | Self::ItemSkipped { item_id, .. }
            | Self::ItemFinished { item_id, .. }
            | Self::DownloadStarted { item_id, .. }
            | Self::DownloadCompleted { item_id, .. }
            | Self::DownloadFailed { item_id, .. }
            | Self::EncodeQueued { item_id, .. }
            | Self::EncodeStarted { item_id, .. }
            | Self::EncodeProgress { item_id, .. }
            | Self::EncodeCompleted { item_id, .. }
            | Self::EncodeFailed { item_id, .. }
            | Self::VariantPublished { item_id, .. }
            | Self::PublishFailed { item_id, .. } => Some(item_id),
        }
    }

    /// Whether the event is written to the store.
    ///
    /// Progress samples arrive every poll interval and only go to the log.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::EncodeProgress { .. })
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::EncodeFailed { .. } | Self::PublishFailed { .. }
        )
    }
}

/// Stored event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub item_id: Option<String>,
    pub data: PipelineEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_is_tagged() {
        let event = PipelineEvent::EncodeStarted {
            item_id: "frieren#7".to_string(),
            variant: "720".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "encode_started");
        assert_eq!(json["variant"], "720");

        let parsed: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_type_matches_serde_tag() {
        let events = vec![
            PipelineEvent::OrphansKilled { pids: vec![1] },
            PipelineEvent::ItemFinished {
                item_id: "a#1".to_string(),
                outcome: "completed".to_string(),
                detail: None,
            },
            PipelineEvent::EncodeProgress {
                item_id: "a#1".to_string(),
                variant: "480".to_string(),
                percent: 12.5,
                eta_secs: 90,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_item_id_extraction() {
        let event = PipelineEvent::DownloadFailed {
            item_id: "show#3".to_string(),
            error: "timeout".to_string(),
        };
        assert_eq!(event.item_id(), Some("show#3"));
        assert!(event.is_failure());

        let event = PipelineEvent::ServiceStopped {
            reason: "signal".to_string(),
        };
        assert_eq!(event.item_id(), None);
        assert!(!event.is_failure());
    }

    #[test]
    fn test_progress_is_not_persistent() {
        let progress = PipelineEvent::EncodeProgress {
            item_id: "a#1".to_string(),
            variant: "1080".to_string(),
            percent: 50.0,
            eta_secs: 10,
        };
        assert!(!progress.is_persistent());
        assert!(PipelineEvent::ServiceStopped {
            reason: "x".to_string()
        }
        .is_persistent());
    }
}
