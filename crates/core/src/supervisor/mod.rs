//! Encode process supervision.
//!
//! Launches one encode subprocess per variant, follows its progress artifact,
//! supports cancellation, and keeps a registry of live subprocess ids so that
//! orphans can be killed after a crash.

mod error;
mod monitor;
mod probe;
mod process;
mod progress;
mod registry;
mod traits;

pub use error::SupervisorError;
pub use monitor::{progress_stream, JobState};
pub use probe::{FfprobeProbe, MediaProbe};
pub use process::{EncodeExit, EncodeJob, JobCanceller, ProcessSupervisor};
pub use progress::{parse_progress, ProgressReport, ProgressSample, ProgressTracker};
pub use registry::ProcessRegistry;
pub use traits::{EncodeRequest, Encoder};
