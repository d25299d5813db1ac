//! Encode subprocess supervision.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::monitor::{progress_stream, JobState};
use super::probe::MediaProbe;
use super::progress::ProgressSample;
use super::registry::ProcessRegistry;
use super::traits::{EncodeRequest, Encoder};
use super::SupervisorError;
use crate::config::{EncodeProfile, EncoderConfig};
use crate::metrics;

/// How long to wait for the stderr reader after the process is reaped.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How an encode subprocess ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeExit {
    pub variant: String,
    pub success: bool,
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    pub cancelled: bool,
    /// Last lines of the subprocess's stderr.
    pub stderr_tail: String,
    pub elapsed: Duration,
}

impl EncodeExit {
    /// One-line description for logs and operator reports.
    pub fn describe(&self) -> String {
        let how = if self.cancelled {
            "cancelled".to_string()
        } else {
            match self.code {
                Some(code) => format!("exited with code {}", code),
                None => "killed by signal".to_string(),
            }
        };
        let last_line = self.stderr_tail.lines().last().unwrap_or("").trim();
        if last_line.is_empty() {
            format!("encode {} {}", self.variant, how)
        } else {
            format!("encode {} {}: {}", self.variant, how, last_line)
        }
    }
}

/// Handle for cancelling a job from elsewhere.
#[derive(Clone)]
pub struct JobCanceller {
    state: Arc<watch::Sender<JobState>>,
}

impl JobCanceller {
    /// Flag the job as cancelled; its `wait` kills the subprocess.
    ///
    /// Returns false if the job had already finished or been cancelled.
    pub fn cancel(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == JobState::Running {
                *state = JobState::Cancelled;
                true
            } else {
                false
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow() == JobState::Cancelled
    }
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
}

type ActiveJobs = Arc<Mutex<HashMap<Uuid, JobCanceller>>>;

fn lock_active(active: &ActiveJobs) -> MutexGuard<'_, HashMap<Uuid, JobCanceller>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// One running encode subprocess.
///
/// Dropping the job without waiting kills the subprocess.
pub struct EncodeJob {
    id: Uuid,
    variant: String,
    source: PathBuf,
    dest: PathBuf,
    progress_path: PathBuf,
    pid: u32,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    forwarder: Option<JoinHandle<()>>,
    control: JobCanceller,
    started_at: Instant,
    total_duration: Duration,
    poll_interval: Duration,
    registry: Arc<ProcessRegistry>,
    active: ActiveJobs,
}

impl EncodeJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Source duration used for percentages (probed or fallback).
    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// A fresh progress stream reading the artifact from the start.
    pub fn monitor(&self) -> impl Stream<Item = ProgressSample> + Send + 'static {
        progress_stream(
            self.progress_path.clone(),
            self.total_duration,
            self.poll_interval,
            self.started_at,
            self.control.state.subscribe(),
        )
    }

    pub fn canceller(&self) -> JobCanceller {
        self.control.clone()
    }

    /// Cancel the job. Idempotent; a no-op once the job has finished.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Wait for the subprocess to exit and reap it.
    pub async fn wait(mut self) -> Result<EncodeExit, SupervisorError> {
        let mut state_rx = self.control.state.subscribe();

        let finish = tokio::select! {
            status = self.child.wait() => Finish::Exited(status),
            _ = state_rx.wait_for(|s| *s == JobState::Cancelled) => Finish::Cancelled,
        };

        let (status, cancelled) = match finish {
            Finish::Exited(status) => (status, false),
            Finish::Cancelled => {
                info!(pid = self.pid, variant = %self.variant, "Killing cancelled encode");
                if let Err(e) = self.child.start_kill() {
                    debug!(pid = self.pid, error = %e, "Kill after cancel failed");
                }
                (self.child.wait().await, true)
            }
        };

        self.control.state.send_if_modified(|state| {
            if *state == JobState::Running {
                *state = JobState::Exited;
                true
            } else {
                false
            }
        });
        self.forget();

        let status = status?;

        let stderr_tail = match self.stderr.take() {
            Some(handle) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(tail)) => tail,
                _ => String::new(),
            },
            None => String::new(),
        };

        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }

        let elapsed = self.started_at.elapsed();
        let exit = EncodeExit {
            variant: self.variant.clone(),
            success: status.success() && !cancelled,
            code: status.code(),
            cancelled,
            stderr_tail,
            elapsed,
        };

        let result = if exit.success {
            "success"
        } else if cancelled {
            "cancelled"
        } else {
            "failed"
        };
        metrics::ENCODES_TOTAL
            .with_label_values(&[self.variant.as_str(), result])
            .inc();
        metrics::ENCODE_DURATION
            .with_label_values(&[self.variant.as_str()])
            .observe(elapsed.as_secs_f64());

        if exit.success {
            info!(
                pid = self.pid,
                variant = %self.variant,
                elapsed_secs = elapsed.as_secs(),
                "Encode finished"
            );
        } else {
            warn!(pid = self.pid, variant = %self.variant, "{}", exit.describe());
        }

        Ok(exit)
    }

    /// Drop the job from the registry and the active set.
    fn forget(&self) {
        if let Err(e) = self.registry.unregister(self.pid) {
            warn!(pid = self.pid, error = %e, "Failed to persist process registry");
        }
        lock_active(&self.active).remove(&self.id);
    }
}

impl Drop for EncodeJob {
    fn drop(&mut self) {
        // kill_on_drop reaps the process; make sure nothing still points at it.
        self.forget();
    }
}

/// Starts and supervises encode subprocesses.
pub struct ProcessSupervisor {
    config: EncoderConfig,
    progress_path: PathBuf,
    registry: Arc<ProcessRegistry>,
    probe: Arc<dyn MediaProbe>,
    active: ActiveJobs,
}

impl ProcessSupervisor {
    /// `progress_path` is shared by every job; at most one job may run at a time.
    pub fn new(
        config: EncoderConfig,
        progress_path: impl Into<PathBuf>,
        registry: Arc<ProcessRegistry>,
        probe: Arc<dyn MediaProbe>,
    ) -> Self {
        Self {
            config,
            progress_path: progress_path.into(),
            registry,
            probe,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Number of jobs started and not yet reaped.
    pub fn active_jobs(&self) -> usize {
        lock_active(&self.active).len()
    }

    /// Render the command line for a variant.
    pub fn render_command(
        &self,
        variant: &str,
        source: &Path,
        dest: &Path,
    ) -> Result<(String, Vec<String>), SupervisorError> {
        let profile = self
            .config
            .profiles
            .get(variant)
            .ok_or_else(|| SupervisorError::UnknownVariant(variant.to_string()))?;
        Ok(render(profile, &self.config.ffmpeg_path, source, dest, &self.progress_path))
    }

    /// Launch the encode subprocess for one variant.
    ///
    /// Truncates the progress artifact, registers the pid, and, when a sink
    /// is given, forwards progress samples to it until the job ends.
    pub async fn start(
        &self,
        source: &Path,
        dest: &Path,
        variant: &str,
        progress: Option<mpsc::Sender<ProgressSample>>,
    ) -> Result<EncodeJob, SupervisorError> {
        let (program, args) = self.render_command(variant, source, dest)?;

        let total_duration = match self.probe.duration(source).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!(
                    source = %source.display(),
                    error = %e,
                    fallback_secs = self.config.fallback_duration_secs,
                    "Probe failed, progress will use fallback duration"
                );
                Duration::from_secs(self.config.fallback_duration_secs)
            }
        };

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = self
            .progress_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.progress_path, b"").await?;

        debug!(program = %program, args = ?args, "Spawning encoder");
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::spawn_failed(&program, e))?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("encoder exited before its pid was read"))?;

        if let Err(e) = self.registry.register(pid, &program) {
            warn!(pid, error = %e, "Failed to persist process registry");
        }

        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(collect_tail(s, self.config.stderr_tail_lines)));

        let (state_tx, _) = watch::channel(JobState::Running);
        let control = JobCanceller {
            state: Arc::new(state_tx),
        };

        let id = Uuid::new_v4();
        lock_active(&self.active).insert(id, control.clone());

        let mut job = EncodeJob {
            id,
            variant: variant.to_string(),
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            progress_path: self.progress_path.clone(),
            pid,
            child,
            stderr,
            forwarder: None,
            control,
            started_at: Instant::now(),
            total_duration,
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            registry: Arc::clone(&self.registry),
            active: Arc::clone(&self.active),
        };

        if let Some(tx) = progress {
            let stream = job.monitor();
            job.forwarder = Some(tokio::spawn(async move {
                futures::pin_mut!(stream);
                while let Some(sample) = stream.next().await {
                    if tx.send(sample).await.is_err() {
                        break;
                    }
                }
            }));
        }

        info!(
            pid,
            variant,
            source = %source.display(),
            dest = %dest.display(),
            duration_secs = total_duration.as_secs(),
            "Encode started"
        );

        Ok(job)
    }
}

#[async_trait]
impl Encoder for ProcessSupervisor {
    fn name(&self) -> &str {
        "process"
    }

    async fn encode(
        &self,
        request: EncodeRequest,
        progress: Option<mpsc::Sender<ProgressSample>>,
    ) -> Result<EncodeExit, SupervisorError> {
        let job = self
            .start(&request.source, &request.dest, &request.variant, progress)
            .await?;
        job.wait().await
    }

    fn cancel_all(&self) -> usize {
        let jobs: Vec<JobCanceller> = lock_active(&self.active).values().cloned().collect();
        jobs.iter().filter(|job| job.cancel()).count()
    }
}

/// Substitute placeholders in a profile's arguments.
fn render(
    profile: &EncodeProfile,
    default_program: &str,
    source: &Path,
    dest: &Path,
    progress: &Path,
) -> (String, Vec<String>) {
    let program = profile
        .program
        .clone()
        .unwrap_or_else(|| default_program.to_string());
    let source = source.to_string_lossy();
    let dest = dest.to_string_lossy();
    let progress = progress.to_string_lossy();
    let args = profile
        .args
        .iter()
        .map(|arg| {
            arg.replace("{input}", &source)
                .replace("{progress}", &progress)
                .replace("{output}", &dest)
        })
        .collect();
    (program, args)
}

/// Read stderr to the end, keeping the last `max_lines` lines.
async fn collect_tail(stderr: ChildStderr, max_lines: usize) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(max_lines.min(256));
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == max_lines.max(1) {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProbe;

    fn sh_profile(script: &str) -> EncodeProfile {
        EncodeProfile {
            program: Some("sh".to_string()),
            args: vec!["-c".to_string(), script.to_string(), "{output}".to_string()],
        }
    }

    fn supervisor(dir: &Path, profiles: Vec<(&str, EncodeProfile)>) -> ProcessSupervisor {
        let mut config = EncoderConfig::default().with_poll_interval_ms(20);
        for (name, profile) in profiles {
            config = config.with_profile(name, profile);
        }
        ProcessSupervisor::new(
            config,
            dir.join("prog.txt"),
            Arc::new(ProcessRegistry::in_memory()),
            Arc::new(MockProbe::new(Duration::from_secs(2))),
        )
    }

    #[test]
    fn test_render_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![]);
        let (program, args) = sup
            .render_command("1080", Path::new("/in/ep.mkv"), Path::new("/out/ep.mkv"))
            .unwrap();
        assert_eq!(program, "ffmpeg");
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/in/ep.mkv");
        assert_eq!(args[2], "-progress");
        assert_eq!(args[3], dir.path().join("prog.txt").to_string_lossy());
        assert!(args.contains(&"1920x1080".to_string()));
        assert!(args.contains(&"/out/ep.mkv".to_string()));
    }

    #[test]
    fn test_render_unknown_variant() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![]);
        let result = sup.render_command("4k", Path::new("a"), Path::new("b"));
        assert!(matches!(result, Err(SupervisorError::UnknownVariant(v)) if v == "4k"));
    }

    #[test]
    fn test_render_substitutes_inside_arguments() {
        let profile = EncodeProfile {
            program: Some("sh".to_string()),
            args: vec!["-c".to_string(), "cp '{input}' '{output}'".to_string()],
        };
        let (program, args) = render(
            &profile,
            "ffmpeg",
            Path::new("/a.mkv"),
            Path::new("/b.mkv"),
            Path::new("/p.txt"),
        );
        assert_eq!(program, "sh");
        assert_eq!(args[1], "cp '/a.mkv' '/b.mkv'");
    }

    #[test]
    fn test_describe_exit() {
        let exit = EncodeExit {
            variant: "720".to_string(),
            success: false,
            code: Some(1),
            cancelled: false,
            stderr_tail: "frame=1\nConversion failed!".to_string(),
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(exit.describe(), "encode 720 exited with code 1: Conversion failed!");
    }

    #[tokio::test]
    async fn test_successful_encode_unregisters_pid() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![("copy", sh_profile("echo done > \"$0\""))]);
        let dest = dir.path().join("out").join("ep.mkv");

        let job = sup
            .start(Path::new("/in.mkv"), &dest, "copy", None)
            .await
            .unwrap();
        let pid = job.pid();
        assert!(sup.registry().contains(pid));
        assert_eq!(sup.active_jobs(), 1);

        let exit = job.wait().await.unwrap();
        assert!(exit.success);
        assert_eq!(exit.code, Some(0));
        assert!(!sup.registry().contains(pid));
        assert_eq!(sup.active_jobs(), 0);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_failed_encode_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(
            dir.path(),
            vec![("bad", sh_profile("echo 'Invalid data found' >&2; exit 3"))],
        );

        let exit = sup
            .encode(
                EncodeRequest {
                    source: PathBuf::from("/in.mkv"),
                    dest: dir.path().join("out.mkv"),
                    variant: "bad".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        assert!(!exit.success);
        assert_eq!(exit.code, Some(3));
        assert!(exit.stderr_tail.contains("Invalid data found"));
        assert!(sup.registry().pids().is_empty());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let profile = EncodeProfile {
            program: Some("/nonexistent/encoder".to_string()),
            args: vec!["{output}".to_string()],
        };
        let sup = supervisor(dir.path(), vec![("x", profile)]);
        let result = sup
            .start(Path::new("/in"), &dir.path().join("out"), "x", None)
            .await;
        assert!(matches!(result, Err(SupervisorError::ProgramNotFound { .. })));
        assert!(sup.registry().pids().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![("slow", sh_profile("sleep 30"))]);

        let job = sup
            .start(Path::new("/in"), &dir.path().join("out"), "slow", None)
            .await
            .unwrap();
        let canceller = job.canceller();
        let pid = job.pid();

        let waiter = tokio::spawn(job.wait());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(canceller.cancel());
        // Second cancel is a no-op.
        assert!(!canceller.cancel());

        let exit = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("cancelled encode did not exit")
            .unwrap()
            .unwrap();
        assert!(exit.cancelled);
        assert!(!exit.success);
        assert!(!sup.registry().contains(pid));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![("ok", sh_profile("true"))]);

        let job = sup
            .start(Path::new("/in"), &dir.path().join("out"), "ok", None)
            .await
            .unwrap();
        let canceller = job.canceller();
        let exit = job.wait().await.unwrap();
        assert!(exit.success);
        assert!(!canceller.cancel());
        assert!(!canceller.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_all_signals_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), vec![("slow", sh_profile("sleep 30"))]);

        let job = sup
            .start(Path::new("/in"), &dir.path().join("out"), "slow", None)
            .await
            .unwrap();
        assert_eq!(sup.cancel_all(), 1);
        let exit = job.wait().await.unwrap();
        assert!(exit.cancelled);
        assert_eq!(sup.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_start_truncates_progress_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join("prog.txt");
        std::fs::write(&progress, "out_time_ms=999\nprogress=end\n").unwrap();

        let sup = supervisor(dir.path(), vec![("ok", sh_profile("true"))]);
        let job = sup
            .start(Path::new("/in"), &dir.path().join("out"), "ok", None)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&progress).unwrap(), "");
        job.wait().await.unwrap();
    }
}
