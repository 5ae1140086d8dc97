use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a long-running download job.
///
/// Job ids travel on the wire as `downloadId`. They are never reused: once a
/// job reaches a terminal state its id is retired for the rest of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id: milliseconds since the epoch plus a random suffix.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", millis, &suffix[..9]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Payload of a `download` request.
///
/// Optional fields left as `None` are filled from the configured
/// [`DownloadDefaults`](crate::models::DownloadDefaults) when the job starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<bool>,

    #[serde(default)]
    pub audio_only: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_quality: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_subtitles(mut self, subtitles: bool) -> Self {
        self.subtitles = Some(subtitles);
        self
    }

    pub fn audio_only(mut self, audio_quality: Option<String>) -> Self {
        self.audio_only = true;
        self.audio_quality = audio_quality;
        self
    }

    /// Returns the reason the request cannot be started, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("download request has no URL".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("download request has no title".to_string());
        }
        Ok(())
    }
}

/// Point-in-time progress of a job, as reported by the worker.
///
/// Every field is optional. No monotonicity or range checks are applied here;
/// the worker is trusted and consumers must tolerate any subset being absent.
/// Byte counts are floats because the worker derives them from percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// Transfer rate in bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Estimated seconds remaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,

    /// Current output file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Free-form phase marker, e.g. `merging`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ProgressSnapshot {
    /// Read a snapshot field by field from the worker's `progress` object.
    ///
    /// A field of the wrong type is dropped on its own; the rest are kept.
    /// Numbers may also arrive as numeric strings.
    pub fn from_value(value: &Value) -> Self {
        let number = |key: &str| match value.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        };
        let text = |key: &str| value.get(key)?.as_str().map(str::to_string);

        Self {
            percent: number("percent"),
            downloaded: number("downloaded"),
            total: number("total"),
            speed: number("speed"),
            eta: number("eta"),
            filename: text("filename"),
            status: text("status"),
        }
    }

    /// One-line human readable rendering, skipping absent fields.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(percent) = self.percent {
            parts.push(format!("{:.1}%", percent));
        }
        if let (Some(downloaded), Some(total)) = (self.downloaded, self.total) {
            parts.push(format!("{} / {}", format_bytes(downloaded), format_bytes(total)));
        }
        if let Some(speed) = self.speed {
            parts.push(format!("{}/s", format_bytes(speed)));
        }
        if let Some(eta) = self.eta {
            let eta = eta.max(0.0) as u64;
            parts.push(format!("ETA {}:{:02}", eta / 60, eta % 60));
        }
        if let Some(status) = &self.status {
            parts.push(status.clone());
        }
        if let Some(filename) = &self.filename {
            parts.push(filename.clone());
        }

        if parts.is_empty() {
            "working".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Result of a connectivity check. Never an error: a failed check is `ok: false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub ok: bool,

    #[serde(default, alias = "ytdlpVersion")]
    pub worker_version: Option<String>,

    #[serde(default, alias = "ffmpegVersion")]
    pub media_tool_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
