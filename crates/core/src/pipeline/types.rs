//! Types for the pipeline module.

use serde::Serialize;
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::ledger::{ItemKey, LedgerError};
use crate::publisher::PublishError;
use crate::supervisor::SupervisorError;
use crate::transport::TransportError;

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: ItemKey,
    /// Title as announced by the source.
    pub title: String,
    /// Opaque locator handed to the transport.
    pub locator: String,
    /// Required variants. Empty means the configured default list.
    pub variants: Vec<String>,
}

impl Item {
    pub fn new(key: ItemKey, title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            locator: locator.into(),
            variants: Vec::new(),
        }
    }

    pub fn with_variants<I, S>(mut self, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variants = dedup_variants(variants.into_iter().map(Into::into));
        self
    }
}

/// Drops repeated variants, keeping first-seen order.
pub(crate) fn dedup_variants(variants: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    variants
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// How the ledger gates processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    /// Encode only the variants the ledger does not have yet.
    #[default]
    Normal,
    /// Encode every required variant, still recording each in the ledger.
    Force,
}

/// Why an item was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every required variant is already recorded.
    AlreadyComplete,
    /// Batch releases are not processed.
    Batch,
    /// Another call is already processing the item.
    InFlight,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyComplete => "already_complete",
            SkipReason::Batch => "batch",
            SkipReason::InFlight => "in_flight",
        }
    }
}

/// Stage an item failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ledger,
    Fetch,
    Admission,
    Encode,
    Publish,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ledger => "ledger",
            PipelineStage::Fetch => "fetch",
            PipelineStage::Admission => "admission",
            PipelineStage::Encode => "encode",
            PipelineStage::Publish => "publish",
        }
    }
}

/// A variant that did not make it into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantFailure {
    pub variant: String,
    pub stage: PipelineStage,
    pub error: String,
}

/// Terminal result of processing one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every required variant is recorded.
    Completed {
        /// Variants encoded in this run.
        encoded: Vec<String>,
    },
    /// Some required variants are recorded, some failed.
    PartiallyCompleted {
        /// Required variants recorded, from this or earlier runs.
        done: Vec<String>,
        failed: Vec<VariantFailure>,
    },
    /// Nothing was done.
    Skipped { reason: SkipReason },
    /// No required variant is recorded.
    Failed { stage: PipelineStage, error: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::PartiallyCompleted { .. } => "partially_completed",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Outcome::Skipped { reason }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// Short human-readable detail for operator reports.
    pub fn detail(&self) -> Option<String> {
        match self {
            Outcome::Completed { .. } => None,
            Outcome::Skipped { reason } => Some(reason.as_str().to_string()),
            Outcome::PartiallyCompleted { failed, .. } => Some(
                failed
                    .iter()
                    .map(|f| format!("{} ({}): {}", f.variant, f.stage.as_str(), f.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Outcome::Failed { stage, error } => Some(format!("{}: {}", stage.as_str(), error)),
        }
    }
}

/// Errors inside one item's processing.
///
/// These never escape [`Coordinator::process`](super::Coordinator::process);
/// they are folded into the [`Outcome`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] TransportError),

    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Encoder error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// The encode subprocess ran and failed.
    #[error("{0}")]
    Encode(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Ledger(_) => PipelineStage::Ledger,
            PipelineError::Fetch(_) => PipelineStage::Fetch,
            PipelineError::Admission(_) => PipelineStage::Admission,
            PipelineError::Supervisor(_) | PipelineError::Encode(_) | PipelineError::Io(_) => {
                PipelineStage::Encode
            }
            PipelineError::Publish(_) => PipelineStage::Publish,
        }
    }
}
