//! Progress monitoring by polling the progress artifact.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tracing::trace;

use super::progress::{parse_progress, ProgressSample, ProgressTracker};

/// Lifecycle of an encode job as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Exited,
    Cancelled,
}

struct MonitorState {
    path: PathBuf,
    tracker: ProgressTracker,
    interval: Duration,
    started_at: Instant,
    job_state: watch::Receiver<JobState>,
    read_pending: bool,
    finishing: bool,
    done: bool,
}

/// Poll `path` every `interval`, yielding a sample whenever the artifact
/// carries new information.
///
/// The stream is lazy: nothing is read until it is polled. It ends after the
/// sample carrying `progress=end`, after one final read once the process has
/// exited, or immediately on cancellation.
pub fn progress_stream(
    path: PathBuf,
    total_duration: Duration,
    interval: Duration,
    started_at: Instant,
    job_state: watch::Receiver<JobState>,
) -> impl Stream<Item = ProgressSample> + Send + 'static {
    let state = MonitorState {
        path,
        tracker: ProgressTracker::new(total_duration),
        interval,
        started_at,
        job_state,
        read_pending: true,
        finishing: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if !st.read_pending {
                let changed = tokio::select! {
                    biased;
                    state = st.job_state.wait_for(|s| *s != JobState::Running) => {
                        // A dropped sender means the job itself is gone.
                        Some(state.map(|s| *s).unwrap_or(JobState::Exited))
                    }
                    _ = tokio::time::sleep(st.interval) => None,
                };
                match changed {
                    Some(JobState::Cancelled) => return None,
                    Some(_) => st.finishing = true,
                    None => {}
                }
            }
            st.read_pending = false;

            // A missing or unreadable file is just "nothing new yet".
            let text = tokio::fs::read_to_string(&st.path).await.unwrap_or_default();
            let sample = st
                .tracker
                .observe(parse_progress(&text), st.started_at.elapsed());

            if st.finishing {
                st.done = true;
            }

            if let Some(sample) = sample {
                if sample.ended {
                    st.done = true;
                }
                trace!(percent = sample.percent, "Encode progress");
                return Some((sample, st));
            }
        }
    })
}
