//! Trait definitions for the encode seam.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::error::SupervisorError;
use super::process::EncodeExit;
use super::progress::ProgressSample;

/// One encode of a source into a single variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub variant: String,
}

/// Something that can produce one output variant from a source file.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Returns the name of this encoder implementation.
    fn name(&self) -> &str;

    /// File extension of produced outputs, without the dot.
    fn output_extension(&self) -> &str {
        "mkv"
    }

    /// Runs one encode to completion.
    ///
    /// A subprocess that exits non-zero yields `Ok` with an unsuccessful
    /// [`EncodeExit`]; `Err` means the encode could not be run at all.
    /// Samples are sent to `progress` while the encode runs.
    async fn encode(
        &self,
        request: EncodeRequest,
        progress: Option<mpsc::Sender<ProgressSample>>,
    ) -> Result<EncodeExit, SupervisorError>;

    /// Asks every running encode to stop. Returns how many were signalled.
    fn cancel_all(&self) -> usize;
}
