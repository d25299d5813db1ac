//! Common test utilities for router tests with mocks.
//!
//! Builds an in-process router over a real coordinator whose encoder,
//! transport and publisher are mocks, so requests exercise the full
//! pipeline without ffmpeg or a torrent swarm.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;

use encodarr_core::config::DatabaseConfig;
use encodarr_core::events::{EventStore, SqliteEventStore};
use encodarr_core::testing::{MockEncoder, MockFeedSource, MockPublisher, MockTransport};
use encodarr_core::{
    create_event_system, AdmissionQueue, Config, Coordinator, ProcessRegistry, SourcePoller,
    SqliteLedger, TitleResolver,
};

/// Re-export fixtures for test convenience
pub use encodarr_core::testing::fixtures;

pub const FEED: &str = "https://feeds.example.org/rss";

/// Test fixture for router tests with mock collaborators.
pub struct TestFixture {
    pub router: Router,
    pub encoder: Arc<MockEncoder>,
    pub transport: Arc<MockTransport>,
    pub publisher: Arc<MockPublisher>,
    pub feed: Arc<MockFeedSource>,
    pub coordinator: Arc<Coordinator>,
    pub shutdown: broadcast::Sender<()>,
    /// Temporary directory for the database and work dirs
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Knobs for [`TestFixture::with_config`].
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub variants: Vec<String>,
    pub with_poller: bool,
    pub encode_delay: Option<Duration>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            variants: vec!["480".to_string(), "720".to_string()],
            with_poller: false,
            encode_delay: None,
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            ..Config::default()
        };
        config.pipeline.variants = test_config.variants.clone();
        config.poller.feeds = vec![FEED.to_string()];

        let ledger = Arc::new(SqliteLedger::new(&db_path).expect("Failed to open ledger"));
        let event_store: Arc<dyn EventStore> =
            Arc::new(SqliteEventStore::new(&db_path).expect("Failed to create event store"));
        let (event_handle, event_writer) = create_event_system(Arc::clone(&event_store), 100);
        tokio::spawn(event_writer.run());

        let (shutdown, _) = broadcast::channel(1);
        let queue = Arc::new(AdmissionQueue::new());
        {
            let queue = Arc::clone(&queue);
            let rx = shutdown.subscribe();
            tokio::spawn(async move { queue.admit(rx).await });
        }

        let mut encoder = MockEncoder::new();
        if let Some(delay) = test_config.encode_delay {
            encoder = encoder.with_delay(delay);
        }
        let encoder = Arc::new(encoder);
        let transport = Arc::new(MockTransport::new(temp_dir.path().join("downloads")));
        let publisher = Arc::new(MockPublisher::new());

        let coordinator = Arc::new(
            Coordinator::new(
                config.pipeline.clone(),
                temp_dir.path().join("encode"),
                ledger,
                queue,
                encoder.clone(),
                transport.clone(),
                publisher.clone(),
            )
            .with_events(event_handle.clone()),
        );

        let feed = Arc::new(MockFeedSource::new());
        let poller = if test_config.with_poller {
            Some(Arc::new(
                SourcePoller::new(
                    config.poller.clone(),
                    feed.clone(),
                    Arc::new(TitleResolver::new().expect("Failed to build resolver")),
                    Arc::clone(&coordinator),
                )
                .with_events(event_handle),
            ))
        } else {
            None
        };

        let registry = Arc::new(ProcessRegistry::new(temp_dir.path().join("pids.json")));

        let state = Arc::new(encodarr_server::state::AppState::new(
            config,
            Arc::clone(&coordinator),
            registry,
            event_store,
            poller,
        ));
        let router = encodarr_server::api::create_router(state);

        Self {
            router,
            encoder,
            transport,
            publisher,
            feed,
            coordinator,
            shutdown,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// GET a path and return the raw body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll the item endpoint until it reports `complete`, or give up.
    pub async fn wait_until_complete(&self, series_id: &str, episode_no: &str) -> TestResponse {
        let path = format!("/api/v1/items/{}/{}", series_id, episode_no);
        for _ in 0..100 {
            let response = self.get(&path).await;
            if response.body["complete"] == true && response.body["in_flight"] == false {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.get(&path).await
    }

    /// Poll until no item is in flight.
    pub async fn wait_until_idle(&self) {
        assert!(
            self.coordinator.wait_idle(Duration::from_secs(10)).await,
            "item tasks still running"
        );
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = match body {
            Some(json) => {
                request_builder = request_builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}
