use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::retry::RetryConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub torrent: TorrentConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration (ledger and event log share the file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("encodarr.db")
}

/// Working directories.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Where encoded outputs are written before publishing.
    #[serde(default = "default_encode_dir")]
    pub encode_dir: PathBuf,
    /// Progress artifact shared by every encode invocation.
    ///
    /// A single path is only safe because at most one encode runs at a time.
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            encode_dir: default_encode_dir(),
            progress_file: default_progress_file(),
        }
    }
}

fn default_encode_dir() -> PathBuf {
    PathBuf::from("encode")
}

fn default_progress_file() -> PathBuf {
    PathBuf::from("prog.txt")
}

/// Command template for one output variant.
///
/// `args` may contain the placeholders `{input}`, `{progress}` and `{output}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EncodeProfile {
    #[serde(default)]
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl EncodeProfile {
    /// Builds the default x264/opus profile for a resolution.
    pub fn x264(preset: &str, size: &str) -> Self {
        let args = [
            "-i",
            "{input}",
            "-progress",
            "{progress}",
            "-preset",
            preset,
            "-c:v",
            "libx264",
            "-s",
            size,
            "-pix_fmt",
            "yuv420p",
            "-crf",
            "30",
            "-c:a",
            "libopus",
            "-b:a",
            "32k",
            "-c:s",
            "copy",
            "-map",
            "0",
            "-ac",
            "2",
            "-ab",
            "32k",
            "-vbr",
            "2",
            "-level",
            "3.1",
            "{output}",
            "-y",
        ];
        Self {
            program: None,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Default program for profiles that don't name one.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// How often the progress artifact is re-read.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Duration assumed when probing the source fails.
    #[serde(default = "default_fallback_duration_secs")]
    pub fallback_duration_secs: u64,
    /// Lines of stderr kept for failure diagnostics.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
    #[serde(default = "default_profiles")]
    pub profiles: BTreeMap<String, EncodeProfile>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            poll_interval_ms: default_poll_interval_ms(),
            fallback_duration_secs: default_fallback_duration_secs(),
            stderr_tail_lines: default_stderr_tail_lines(),
            profiles: default_profiles(),
        }
    }
}

impl EncoderConfig {
    /// Replace the ffmpeg program path.
    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Replace the progress poll interval.
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Add or replace the profile for a variant.
    pub fn with_profile(mut self, variant: impl Into<String>, profile: EncodeProfile) -> Self {
        self.profiles.insert(variant.into(), profile);
        self
    }
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_poll_interval_ms() -> u64 {
    8000
}

fn default_fallback_duration_secs() -> u64 {
    1440
}

fn default_stderr_tail_lines() -> usize {
    50
}

fn default_profiles() -> BTreeMap<String, EncodeProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert("Hdrip".to_string(), EncodeProfile::x264("superfast", "640x360"));
    profiles.insert("480".to_string(), EncodeProfile::x264("superfast", "854x480"));
    profiles.insert("720".to_string(), EncodeProfile::x264("superfast", "1280x720"));
    profiles.insert("1080".to_string(), EncodeProfile::x264("veryfast", "1920x1080"));
    profiles
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Variants every item must be produced in, encoded in this order.
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,
    /// Skip titles marked as batch releases.
    #[serde(default = "default_true")]
    pub skip_batches: bool,
    /// Keep downloaded sources on disk after processing.
    #[serde(default)]
    pub keep_download: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variants: default_variants(),
            skip_batches: true,
            keep_download: false,
        }
    }
}

impl PipelineConfig {
    pub fn with_variants<I, S>(mut self, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variants = variants.into_iter().map(Into::into).collect();
        self
    }
}

fn default_variants() -> Vec<String> {
    ["Hdrip", "480", "720", "1080"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// Source poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// RSS feed URLs.
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default = "default_poll_secs")]
    pub interval_secs: u64,
    /// HTTP request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Newest entries taken from each feed per poll.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Regex with `series` and `episode` named groups, applied to entry
    /// titles. The built-in release-name pattern is used when unset.
    #[serde(default)]
    pub title_pattern: Option<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feeds: Vec::new(),
            interval_secs: default_poll_secs(),
            timeout_secs: default_request_timeout_secs(),
            max_entries: default_max_entries(),
            title_pattern: None,
        }
    }
}

fn default_max_entries() -> usize {
    1
}

fn default_poll_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Embedded torrent client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentConfig {
    #[serde(default = "default_download_path")]
    pub download_path: PathBuf,
    #[serde(default = "default_true")]
    pub enable_dht: bool,
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Session persistence folder (none disables persistence).
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
    /// Timeout for resolving magnet metadata.
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    /// Give up on a download that hasn't finished after this long.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default = "default_torrent_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            enable_dht: true,
            listen_port: None,
            persistence_path: None,
            metadata_timeout_secs: default_metadata_timeout_secs(),
            completion_timeout_secs: default_completion_timeout_secs(),
            poll_interval_ms: default_torrent_poll_ms(),
        }
    }
}

fn default_download_path() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_metadata_timeout_secs() -> u64 {
    60
}

fn default_completion_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_torrent_poll_ms() -> u64 {
    1000
}

/// Publisher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            library_dir: default_library_dir(),
        }
    }
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("library")
}

/// Process registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("encodarr.pids.json")
}
