//! Pipeline coordinator.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{
    dedup_variants, Item, Outcome, PipelineError, PipelineStage, ProcessMode, SkipReason,
    VariantFailure,
};
use crate::admission::AdmissionQueue;
use crate::config::PipelineConfig;
use crate::events::{EventHandle, PipelineEvent};
use crate::ledger::{CompletionLedger, ItemKey, ItemStatus, LedgerError};
use crate::metrics;
use crate::publisher::Publisher;
use crate::supervisor::{EncodeRequest, Encoder, ProgressSample};
use crate::transport::{Download, Transport};

const BATCH_MARKER: &str = "[Batch]";

type InFlight = Arc<Mutex<HashSet<ItemKey>>>;

fn lock_in_flight(set: &InFlight) -> MutexGuard<'_, HashSet<ItemKey>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks an item as being processed for as long as it lives.
struct InFlightGuard {
    set: InFlight,
    key: ItemKey,
}

impl InFlightGuard {
    fn acquire(set: &InFlight, key: &ItemKey) -> Option<Self> {
        if !lock_in_flight(set).insert(key.clone()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key: key.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_in_flight(&self.set).remove(&self.key);
    }
}

/// Counts one tracked task until dropped, including on panic or abort.
struct TaskGuard(Arc<watch::Sender<usize>>);

impl TaskGuard {
    fn new(tasks: &Arc<watch::Sender<usize>>) -> Self {
        tasks.send_modify(|n| *n += 1);
        Self(Arc::clone(tasks))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Drives items through fetch, encode, publish and ledger update.
///
/// Cheap to share behind an `Arc`; every call to [`process`] is independent
/// apart from the admission queue.
///
/// [`process`]: Coordinator::process
pub struct Coordinator {
    config: PipelineConfig,
    encode_dir: PathBuf,
    ledger: Arc<dyn CompletionLedger>,
    queue: Arc<AdmissionQueue>,
    encoder: Arc<dyn Encoder>,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn Publisher>,
    events: Option<EventHandle>,
    in_flight: InFlight,
    tasks: Arc<watch::Sender<usize>>,
}

impl Coordinator {
    pub fn new(
        config: PipelineConfig,
        encode_dir: impl Into<PathBuf>,
        ledger: Arc<dyn CompletionLedger>,
        queue: Arc<AdmissionQueue>,
        encoder: Arc<dyn Encoder>,
        transport: Arc<dyn Transport>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            encode_dir: encode_dir.into(),
            ledger,
            queue,
            encoder,
            transport,
            publisher,
            events: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Sets the event handle for operator reporting.
    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn ledger(&self) -> &Arc<dyn CompletionLedger> {
        &self.ledger
    }

    /// Items currently being processed.
    pub fn in_flight(&self) -> Vec<ItemKey> {
        let mut keys: Vec<ItemKey> = lock_in_flight(&self.in_flight).iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Spawn item work that shutdown should wait for.
    ///
    /// The task is counted from this call until it finishes, so
    /// [`wait_idle`](Coordinator::wait_idle) cannot miss it.
    pub fn spawn_tracked<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = TaskGuard::new(&self.tasks);
        tokio::spawn(async move {
            let _guard = guard;
            work.await
        })
    }

    /// Tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        *self.tasks.borrow()
    }

    /// Wait up to `limit` for every tracked task to finish.
    ///
    /// Returns false on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let mut rx = self.tasks.subscribe();
        let finished = tokio::time::timeout(limit, rx.wait_for(|n| *n == 0))
            .await
            .is_ok();
        finished
    }

    /// Variants an item must end up with, each listed once.
    pub fn required_variants(&self, item: &Item) -> Vec<String> {
        let variants = if item.variants.is_empty() {
            &self.config.variants
        } else {
            &item.variants
        };
        dedup_variants(variants.iter().cloned())
    }

    /// Ledger status, read off the async runtime.
    pub async fn status(&self, key: &ItemKey) -> Result<ItemStatus, LedgerError> {
        let ledger = Arc::clone(&self.ledger);
        let key = key.clone();
        tokio::task::spawn_blocking(move || ledger.get_status(&key))
            .await
            .map_err(|e| LedgerError::Database(format!("ledger task failed: {}", e)))?
    }

    /// Process one item to a terminal outcome.
    ///
    /// Never fails: errors are reported through events and folded into the
    /// returned [`Outcome`]. The admission ticket, if one was taken, is
    /// always released before this returns.
    pub async fn process(&self, item: Item, mode: ProcessMode) -> Outcome {
        let item_id = item.key.to_string();

        let outcome = match self.run(&item, mode).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(item = %item_id, stage = e.stage().as_str(), error = %e, "Item failed");
                Outcome::Failed {
                    stage: e.stage(),
                    error: e.to_string(),
                }
            }
        };

        metrics::ITEMS_PROCESSED
            .with_label_values(&[outcome.as_str()])
            .inc();

        match &outcome {
            Outcome::Skipped { reason } => {
                debug!(item = %item_id, reason = reason.as_str(), "Item skipped");
                self.emit(PipelineEvent::ItemSkipped {
                    item_id,
                    reason: reason.as_str().to_string(),
                })
                .await;
            }
            other => {
                info!(item = %item_id, outcome = other.as_str(), "Item finished");
                self.emit(PipelineEvent::ItemFinished {
                    item_id,
                    outcome: other.as_str().to_string(),
                    detail: other.detail(),
                })
                .await;
            }
        }

        outcome
    }

    async fn run(&self, item: &Item, mode: ProcessMode) -> Result<Outcome, PipelineError> {
        if self.config.skip_batches && item.title.contains(BATCH_MARKER) {
            return Ok(Outcome::skipped(SkipReason::Batch));
        }

        let Some(_in_flight) = InFlightGuard::acquire(&self.in_flight, &item.key) else {
            return Ok(Outcome::skipped(SkipReason::InFlight));
        };

        let required = self.required_variants(item);
        let status = self.status(&item.key).await?;

        let pending: Vec<String> = match mode {
            ProcessMode::Normal => status.missing(&required).into_iter().cloned().collect(),
            ProcessMode::Force => required.clone(),
        };
        if pending.is_empty() {
            return Ok(Outcome::skipped(SkipReason::AlreadyComplete));
        }

        let item_id = item.key.to_string();
        info!(
            item = %item_id,
            title = %item.title,
            variants = ?pending,
            force = mode == ProcessMode::Force,
            "Processing item"
        );

        self.emit(PipelineEvent::DownloadStarted {
            item_id: item_id.clone(),
            locator: item.locator.clone(),
        })
        .await;
        let download = match self.transport.download(&item.locator, &item.title).await {
            Ok(download) => download,
            Err(e) => {
                self.emit(PipelineEvent::DownloadFailed {
                    item_id: item_id.clone(),
                    error: e.to_string(),
                })
                .await;
                return Err(e.into());
            }
        };
        self.emit(PipelineEvent::DownloadCompleted {
            item_id: item_id.clone(),
            path: download.path.display().to_string(),
        })
        .await;

        let work_dir = self.encode_dir.join(format!(
            "{}-{}",
            sanitize(&item.key.series_id),
            sanitize(&item.key.episode_no)
        ));

        let result = self.encode_and_publish(item, &download, &work_dir, &pending).await;

        self.cleanup(&download, &work_dir).await;

        let (recorded, failures) = result?;
        Ok(self.outcome(&required, &status, recorded, failures))
    }

    /// Encode stage plus the publishes it spawns.
    ///
    /// Returns the variants recorded in the ledger and the ones that failed.
    async fn encode_and_publish(
        &self,
        item: &Item,
        download: &Download,
        work_dir: &Path,
        pending: &[String],
    ) -> Result<(Vec<String>, Vec<VariantFailure>), PipelineError> {
        let item_id = item.key.to_string();
        let source = resolve_source(&download.path).await?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| sanitize(&item.title));

        let ticket = self.queue.enqueue(item_id.clone())?;
        self.emit(PipelineEvent::EncodeQueued {
            item_id: item_id.clone(),
            position: self.queue.len(),
        })
        .await;
        let guard = ticket.wait().await?;
        debug!(item = %item_id, "Holding encode stage");

        let mut publishes: Vec<(String, JoinHandle<Result<(), VariantFailure>>)> = Vec::new();
        let mut failures = Vec::new();

        for variant in pending {
            let dest = work_dir.join(format!(
                "{} [{}].{}",
                stem,
                variant,
                self.encoder.output_extension()
            ));

            match self.encode_variant(&item_id, &source, &dest, variant).await {
                Ok(()) => {
                    let handle = self.spawn_publish(item.key.clone(), variant.clone(), dest);
                    publishes.push((variant.clone(), handle));
                }
                Err(e) => {
                    failures.push(VariantFailure {
                        variant: variant.clone(),
                        stage: PipelineStage::Encode,
                        error: e.to_string(),
                    });
                    break;
                }
            }
        }

        self.queue.release(guard);
        debug!(item = %item_id, "Released encode stage");

        let mut recorded = Vec::new();
        for (variant, handle) in publishes {
            match handle.await {
                Ok(Ok(())) => recorded.push(variant),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => failures.push(VariantFailure {
                    variant,
                    stage: PipelineStage::Publish,
                    error: format!("publish task failed: {}", e),
                }),
            }
        }

        Ok((recorded, failures))
    }

    async fn encode_variant(
        &self,
        item_id: &str,
        source: &Path,
        dest: &Path,
        variant: &str,
    ) -> Result<(), PipelineError> {
        self.emit(PipelineEvent::EncodeStarted {
            item_id: item_id.to_string(),
            variant: variant.to_string(),
        })
        .await;

        let (progress, forwarder) = match &self.events {
            Some(events) => {
                let (tx, rx) = mpsc::channel(16);
                let forwarder = tokio::spawn(forward_progress(
                    rx,
                    events.clone(),
                    item_id.to_string(),
                    variant.to_string(),
                ));
                (Some(tx), Some(forwarder))
            }
            None => (None, None),
        };

        let request = EncodeRequest {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            variant: variant.to_string(),
        };
        let result = self.encoder.encode(request, progress).await;

        if let Some(forwarder) = forwarder {
            let _ = forwarder.await;
        }

        let error = match result {
            Ok(exit) if exit.success => {
                self.emit(PipelineEvent::EncodeCompleted {
                    item_id: item_id.to_string(),
                    variant: variant.to_string(),
                    elapsed_secs: exit.elapsed.as_secs(),
                })
                .await;
                return Ok(());
            }
            Ok(exit) => {
                if !exit.stderr_tail.is_empty() {
                    debug!(item = item_id, variant, stderr = %exit.stderr_tail, "Encoder stderr");
                }
                PipelineError::Encode(exit.describe())
            }
            Err(e) => e.into(),
        };

        self.emit(PipelineEvent::EncodeFailed {
            item_id: item_id.to_string(),
            variant: variant.to_string(),
            error: error.to_string(),
        })
        .await;
        Err(error)
    }

    /// Publish a variant and record it, off the encode path.
    ///
    /// Runs as its own task so a ledger write is finished even if the
    /// caller stops waiting.
    fn spawn_publish(
        &self,
        key: ItemKey,
        variant: String,
        path: PathBuf,
    ) -> JoinHandle<Result<(), VariantFailure>> {
        let publisher = Arc::clone(&self.publisher);
        let ledger = Arc::clone(&self.ledger);
        let events = self.events.clone();

        tokio::spawn(async move {
            let item_id = key.to_string();
            let failure = |stage, error: String| VariantFailure {
                variant: variant.clone(),
                stage,
                error,
            };

            let external_ref = match publisher.publish(&key, &variant, &path).await {
                Ok(external_ref) => external_ref,
                Err(e) => {
                    metrics::PUBLISHES_TOTAL
                        .with_label_values(&[variant.as_str(), "failed"])
                        .inc();
                    warn!(item = %item_id, variant = %variant, error = %e, "Publish failed");
                    if let Some(events) = &events {
                        events
                            .emit(PipelineEvent::PublishFailed {
                                item_id: item_id.clone(),
                                variant: variant.clone(),
                                error: e.to_string(),
                            })
                            .await;
                    }
                    return Err(failure(PipelineStage::Publish, e.to_string()));
                }
            };
            metrics::PUBLISHES_TOTAL
                .with_label_values(&[variant.as_str(), "success"])
                .inc();

            let mark = {
                let ledger = Arc::clone(&ledger);
                let key = key.clone();
                let variant = variant.clone();
                let external_ref = external_ref.clone();
                tokio::task::spawn_blocking(move || {
                    ledger.mark_variant_done(&key, &variant, Some(&external_ref))
                })
                .await
            };
            match mark {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(failure(PipelineStage::Ledger, e.to_string())),
                Err(e) => {
                    return Err(failure(
                        PipelineStage::Ledger,
                        format!("ledger task failed: {}", e),
                    ))
                }
            }

            if let Some(events) = &events {
                events
                    .emit(PipelineEvent::VariantPublished {
                        item_id,
                        variant: variant.clone(),
                        external_ref,
                    })
                    .await;
            }
            Ok(())
        })
    }

    fn outcome(
        &self,
        required: &[String],
        before: &ItemStatus,
        recorded: Vec<String>,
        failures: Vec<VariantFailure>,
    ) -> Outcome {
        if failures.is_empty() {
            return Outcome::Completed { encoded: recorded };
        }

        let done: Vec<String> = required
            .iter()
            .filter(|v| before.is_done(v) || recorded.contains(v))
            .cloned()
            .collect();

        if done.is_empty() {
            let first = &failures[0];
            Outcome::Failed {
                stage: first.stage,
                error: format!("{}: {}", first.variant, first.error),
            }
        } else {
            Outcome::PartiallyCompleted {
                done,
                failed: failures,
            }
        }
    }

    /// Remove the download and intermediate encode outputs.
    async fn cleanup(&self, download: &Download, work_dir: &Path) {
        if let Err(e) = self
            .transport
            .cleanup(download, !self.config.keep_download)
            .await
        {
            warn!(path = %download.path.display(), error = %e, "Download cleanup failed");
        }

        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %work_dir.display(), error = %e, "Encode dir cleanup failed"),
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }
}

async fn forward_progress(
    mut rx: mpsc::Receiver<ProgressSample>,
    events: EventHandle,
    item_id: String,
    variant: String,
) {
    while let Some(sample) = rx.recv().await {
        events.try_emit(PipelineEvent::EncodeProgress {
            item_id: item_id.clone(),
            variant: variant.clone(),
            percent: sample.percent,
            eta_secs: sample.eta.as_secs(),
        });
    }
}

/// The file to encode: the download itself, or the largest file inside a
/// downloaded directory.
async fn resolve_source(path: &Path) -> Result<PathBuf, PipelineError> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut largest: Option<(u64, PathBuf)> = None;
    let mut dirs = vec![path.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                dirs.push(entry.path());
            } else if largest.as_ref().map_or(true, |(size, _)| meta.len() > *size) {
                largest = Some((meta.len(), entry.path()));
            }
        }
    }

    largest.map(|(_, path)| path).ok_or_else(|| {
        PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no files in {}", path.display()),
        ))
    })
}

/// Make a key usable as a single path component.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteLedger;
    use crate::testing::{MockEncoder, MockPublisher, MockTransport};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Harness {
        coordinator: Arc<Coordinator>,
        ledger: Arc<SqliteLedger>,
        encoder: Arc<MockEncoder>,
        transport: Arc<MockTransport>,
        publisher: Arc<MockPublisher>,
        _shutdown: broadcast::Sender<()>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(encoder: MockEncoder) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let queue = Arc::new(AdmissionQueue::new());
        let encoder = Arc::new(encoder);
        let transport = Arc::new(MockTransport::new(dir.path().join("downloads")));
        let publisher = Arc::new(MockPublisher::new());

        let (shutdown, _) = broadcast::channel(1);
        {
            let queue = Arc::clone(&queue);
            let rx = shutdown.subscribe();
            tokio::spawn(async move { queue.admit(rx).await });
        }

        let config = PipelineConfig::default().with_variants(["480", "720"]);
        let coordinator = Arc::new(Coordinator::new(
            config,
            dir.path().join("encode"),
            ledger.clone(),
            queue,
            encoder.clone(),
            transport.clone(),
            publisher.clone(),
        ));

        Harness {
            coordinator,
            ledger,
            encoder,
            transport,
            publisher,
            _shutdown: shutdown,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(MockEncoder::new())
    }

    fn item(ep: &str) -> Item {
        Item::new(
            ItemKey::new("show", ep),
            format!("[Sub] Show - {} [1080p]", ep),
            format!("magnet:?xt=urn:btih:{}", ep),
        )
    }

    #[tokio::test]
    async fn test_process_completes_all_variants() {
        let h = harness();
        let outcome = h.coordinator.process(item("01"), ProcessMode::Normal).await;

        assert_eq!(
            outcome,
            Outcome::Completed {
                encoded: vec!["480".to_string(), "720".to_string()]
            }
        );
        let status = h.ledger.get_status(&ItemKey::new("show", "01")).unwrap();
        assert!(status.is_done("480"));
        assert!(status.is_done("720"));
        assert!(status.external_ref.is_some());
        assert_eq!(h.publisher.published().await.len(), 2);
        assert_eq!(h.transport.cleanups().await, vec![true]);
        assert!(h.coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_complete_item_is_skipped_without_side_effects() {
        let h = harness();
        let key = ItemKey::new("show", "02");
        h.ledger.mark_variant_done(&key, "480", Some("a")).unwrap();
        h.ledger.mark_variant_done(&key, "720", Some("b")).unwrap();

        let outcome = h.coordinator.process(item("02"), ProcessMode::Normal).await;

        assert_eq!(outcome, Outcome::skipped(SkipReason::AlreadyComplete));
        assert_eq!(h.transport.download_count().await, 0);
        assert!(h.encoder.requests().await.is_empty());
        assert!(h.publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_missing_variants_are_encoded() {
        let h = harness();
        let key = ItemKey::new("show", "03");
        h.ledger.mark_variant_done(&key, "480", Some("a")).unwrap();

        let outcome = h.coordinator.process(item("03"), ProcessMode::Normal).await;

        assert_eq!(
            outcome,
            Outcome::Completed {
                encoded: vec!["720".to_string()]
            }
        );
        let variants: Vec<String> = h
            .encoder
            .requests()
            .await
            .into_iter()
            .map(|r| r.variant)
            .collect();
        assert_eq!(variants, vec!["720".to_string()]);
    }

    #[tokio::test]
    async fn test_force_mode_reencodes_everything() {
        let h = harness();
        let key = ItemKey::new("show", "04");
        h.ledger.mark_variant_done(&key, "480", Some("old")).unwrap();
        h.ledger.mark_variant_done(&key, "720", Some("old")).unwrap();

        let outcome = h.coordinator.process(item("04"), ProcessMode::Force).await;

        assert!(outcome.is_completed());
        assert_eq!(h.encoder.requests().await.len(), 2);
        let status = h.ledger.get_status(&key).unwrap();
        assert_ne!(status.external_ref.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_repeated_variants_are_encoded_once() {
        let h = harness();
        let mut it = item("08");
        it.variants = vec!["480".to_string(), "480".to_string()];

        let outcome = h.coordinator.process(it, ProcessMode::Normal).await;

        assert_eq!(
            outcome,
            Outcome::Completed {
                encoded: vec!["480".to_string()]
            }
        );
        assert_eq!(h.encoder.requests().await.len(), 1);
        assert_eq!(h.publisher.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_tracked_items() {
        let h = harness_with(MockEncoder::new().with_delay(Duration::from_millis(100)));
        let coordinator = Arc::clone(&h.coordinator);
        let handle = h.coordinator.spawn_tracked(async move {
            coordinator.process(item("09"), ProcessMode::Normal).await
        });
        assert_eq!(h.coordinator.active_tasks(), 1);

        assert!(!h.coordinator.wait_idle(Duration::from_millis(10)).await);
        assert!(h.coordinator.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(h.coordinator.active_tasks(), 0);
        assert!(handle.await.unwrap().is_completed());
        assert_eq!(h.publisher.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_task_is_not_counted() {
        let h = harness();
        let handle = h.coordinator.spawn_tracked(std::future::pending::<()>());
        assert_eq!(h.coordinator.active_tasks(), 1);

        handle.abort();
        assert!(h.coordinator.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_batch_titles_are_skipped() {
        let h = harness();
        let mut batch = item("05");
        batch.title = "[Sub] Show (01-12) [Batch]".to_string();

        let outcome = h.coordinator.process(batch, ProcessMode::Normal).await;
        assert_eq!(outcome, Outcome::skipped(SkipReason::Batch));
        assert_eq!(h.transport.download_count().await, 0);
    }

    #[tokio::test]
    async fn test_download_failure_fails_item() {
        let h = harness();
        h.transport.fail_next("tracker unreachable").await;

        let outcome = h.coordinator.process(item("06"), ProcessMode::Normal).await;
        match outcome {
            Outcome::Failed { stage, .. } => assert_eq!(stage, PipelineStage::Fetch),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(h.encoder.requests().await.is_empty());
        assert!(h.coordinator.queue().status().holder.is_none());
    }

    #[tokio::test]
    async fn test_encode_failure_aborts_remaining_variants() {
        let h = harness_with(MockEncoder::new().failing_variant("720"));
        let it = item("07").with_variants(["480", "720", "1080"]);

        let outcome = h.coordinator.process(it, ProcessMode::Normal).await;

        match outcome {
            Outcome::PartiallyCompleted { done, failed } => {
                assert_eq!(done, vec!["480".to_string()]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].variant, "720");
                assert_eq!(failed[0].stage, PipelineStage::Encode);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // 1080 was never attempted.
        assert_eq!(h.encoder.requests().await.len(), 2);
        assert!(h.coordinator.queue().status().holder.is_none());

        let status = h.ledger.get_status(&ItemKey::new("show", "07")).unwrap();
        assert!(status.is_done("480"));
        assert!(!status.is_done("720"));
    }

    #[tokio::test]
    async fn test_first_variant_failure_is_failed_outcome() {
        let h = harness_with(MockEncoder::new().failing_variant("480"));
        let outcome = h.coordinator.process(item("08"), ProcessMode::Normal).await;
        match outcome {
            Outcome::Failed { stage, error } => {
                assert_eq!(stage, PipelineStage::Encode);
                assert!(error.starts_with("480"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_variant_unrecorded() {
        let h = harness();
        h.publisher.fail_variant("720").await;

        let outcome = h.coordinator.process(item("09"), ProcessMode::Normal).await;

        match outcome {
            Outcome::PartiallyCompleted { done, failed } => {
                assert_eq!(done, vec!["480".to_string()]);
                assert_eq!(failed[0].stage, PipelineStage::Publish);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let status = h.ledger.get_status(&ItemKey::new("show", "09")).unwrap();
        assert!(!status.is_done("720"));

        // A retry only repeats the missing variant.
        h.publisher.clear_failures().await;
        let outcome = h.coordinator.process(item("09"), ProcessMode::Normal).await;
        assert_eq!(
            outcome,
            Outcome::Completed {
                encoded: vec!["720".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_call_for_same_item_is_skipped() {
        let h = harness_with(MockEncoder::new().with_delay(Duration::from_millis(200)));

        let first = {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move { coordinator.process(item("10"), ProcessMode::Normal).await })
        };

        while h.coordinator.in_flight().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = h.coordinator.process(item("10"), ProcessMode::Normal).await;
        assert_eq!(second, Outcome::skipped(SkipReason::InFlight));

        assert!(first.await.unwrap().is_completed());
        assert!(h.coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_directory_download_uses_largest_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Show S01");
        std::fs::create_dir_all(root.join("extras")).unwrap();
        std::fs::write(root.join("readme.txt"), b"x").unwrap();
        std::fs::write(root.join("extras").join("ep.mkv"), vec![0u8; 64]).unwrap();

        let source = resolve_source(&root).await.unwrap();
        assert_eq!(source, root.join("extras").join("ep.mkv"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a/b:c"), "a_b_c");
        assert_eq!(sanitize("plain"), "plain");
    }
}
