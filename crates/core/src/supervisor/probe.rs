//! Media duration probing.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::SupervisorError;

/// Looks up the total duration of a source file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<Duration, SupervisorError>;
}

/// Probe backed by `ffprobe`.
pub struct FfprobeProbe {
    ffprobe_path: String,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Extract the container duration from `ffprobe -show_format` JSON.
    fn parse_duration(output: &str) -> Result<Duration, SupervisorError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            duration: Option<String>,
        }

        let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
            SupervisorError::probe_failed(format!("Failed to parse ffprobe output: {}", e))
        })?;

        let secs = probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| SupervisorError::probe_failed("ffprobe reported no duration"))?;

        Ok(Duration::from_secs_f64(secs))
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration(&self, path: &Path) -> Result<Duration, SupervisorError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SupervisorError::spawn_failed(&self.ffprobe_path, e))?;

        if !output.status.success() {
            return Err(SupervisorError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Self::parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}
