//! Mock encoder and media probe for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};

use crate::supervisor::{
    EncodeExit, EncodeRequest, Encoder, MediaProbe, ProgressSample, SupervisorError,
};

/// Mock implementation of the Encoder trait.
///
/// Provides controllable behavior for testing:
/// - Track encode requests for assertions
/// - Fail selected variants with a non-zero exit
/// - Simulate encode time and progress samples
/// - Track how many encodes ran at once
///
/// # Example
///
/// ```rust,ignore
/// let encoder = MockEncoder::new()
///     .failing_variant("720")
///     .with_delay(Duration::from_millis(50));
///
/// // ... run the coordinator ...
///
/// assert_eq!(encoder.max_concurrent(), 1);
/// ```
#[derive(Debug)]
pub struct MockEncoder {
    requests: Arc<RwLock<Vec<EncodeRequest>>>,
    failing_variants: HashSet<String>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    cancel: Notify,
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            failing_variants: HashSet::new(),
            delay: Duration::ZERO,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            cancel: Notify::new(),
        }
    }

    /// Encodes of `variant` exit with code 1.
    pub fn failing_variant(mut self, variant: impl Into<String>) -> Self {
        self.failing_variants.insert(variant.into());
        self
    }

    /// Simulated encode time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get all encode requests, in call order.
    pub async fn requests(&self) -> Vec<EncodeRequest> {
        self.requests.read().await.clone()
    }

    /// Encodes running right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of encodes that ever ran at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn sample(percent: f64, elapsed: Duration, ended: bool) -> ProgressSample {
        ProgressSample {
            percent,
            out_time: elapsed,
            total_size: (percent * 1024.0) as u64,
            elapsed,
            bytes_per_sec: 1024.0,
            eta: if ended { Duration::ZERO } else { elapsed },
            ended,
        }
    }
}

/// Decrements the running count when an encode ends, however it ends.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Encoder for MockEncoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn encode(
        &self,
        request: EncodeRequest,
        progress: Option<mpsc::Sender<ProgressSample>>,
    ) -> Result<EncodeExit, SupervisorError> {
        self.requests.write().await.push(request.clone());
        let started = Instant::now();

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = RunningGuard(&self.running);
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if let Some(tx) = &progress {
            let _ = tx.send(Self::sample(50.0, started.elapsed(), false)).await;
        }

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(self.delay) => false,
            _ = self.cancel.notified() => true,
        };

        let mut exit = EncodeExit {
            variant: request.variant.clone(),
            success: false,
            code: None,
            cancelled,
            stderr_tail: String::new(),
            elapsed: started.elapsed(),
        };
        if cancelled {
            return Ok(exit);
        }

        if self.failing_variants.contains(&request.variant) {
            exit.code = Some(1);
            exit.stderr_tail = format!("mock encode of {} failed", request.variant);
            return Ok(exit);
        }

        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.dest, request.variant.as_bytes()).await?;

        if let Some(tx) = &progress {
            let _ = tx.send(Self::sample(100.0, started.elapsed(), true)).await;
        }

        exit.success = true;
        exit.code = Some(0);
        Ok(exit)
    }

    fn cancel_all(&self) -> usize {
        let running = self.running();
        self.cancel.notify_waiters();
        running
    }
}

/// Mock implementation of the MediaProbe trait.
#[derive(Debug, Clone)]
pub struct MockProbe {
    duration: Option<Duration>,
}

impl MockProbe {
    /// Every file reports `duration`.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
        }
    }

    /// Every probe fails.
    pub fn failing() -> Self {
        Self { duration: None }
    }
}

#[async_trait]
impl MediaProbe for MockProbe {
    async fn duration(&self, path: &Path) -> Result<Duration, SupervisorError> {
        self.duration.ok_or_else(|| {
            SupervisorError::probe_failed(format!("mock probe failure for {}", path.display()))
        })
    }
}
