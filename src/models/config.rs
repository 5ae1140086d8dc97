use crate::models::job::DownloadRequest;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root of `mediabridge.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bridge: BridgeSettings,
    pub downloads: DownloadDefaults,
}

/// Channel and call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Registered name of the worker's host manifest
    pub host_name: String,

    /// Extra directories searched for `<host_name>.json` before the platform defaults
    pub manifest_dirs: Vec<String>,

    /// Origin passed to the worker as its first argument, if any
    pub allowed_origin: Option<String>,

    pub call_timeout_ms: u64,

    /// Timeout for calls that block on a dialog inside the worker
    pub dialog_timeout_ms: u64,

    pub debug_mode: bool,

    pub log_dir: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            manifest_dirs: Vec::new(),
            allowed_origin: None,
            call_timeout_ms: default_call_timeout_ms(),
            dialog_timeout_ms: default_dialog_timeout_ms(),
            debug_mode: false,
            log_dir: "logs".to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn dialog_timeout(&self) -> Duration {
        Duration::from_millis(self.dialog_timeout_ms)
    }
}

/// Defaults applied to download requests that leave fields unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadDefaults {
    pub output: String,
    pub format: String,
    pub extension: String,
    pub subtitles: bool,
    pub audio_quality: Option<String>,

    /// Quality label to format selector, in display order
    pub quality_presets: IndexMap<String, String>,
}

impl Default for DownloadDefaults {
    fn default() -> Self {
        let mut quality_presets = IndexMap::new();
        quality_presets.insert("best".to_string(), "bestvideo+bestaudio/best".to_string());
        for height in [2160, 1440, 1080, 720, 480, 360] {
            quality_presets.insert(
                format!("{}p", height),
                format!(
                    "bestvideo[height<={h}]+bestaudio/best[height<={h}]",
                    h = height
                ),
            );
        }
        quality_presets.insert("audio".to_string(), "bestaudio/best".to_string());

        Self {
            output: "~/Downloads".to_string(),
            format: "bestvideo+bestaudio/best".to_string(),
            extension: "mp4".to_string(),
            subtitles: false,
            audio_quality: None,
            quality_presets,
        }
    }
}

impl DownloadDefaults {
    /// Look up a quality label (case-insensitive).
    pub fn format_for_quality(&self, quality: &str) -> Option<&str> {
        self.quality_presets
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(quality))
            .map(|(_, format)| format.as_str())
    }

    /// Fill the unset optional fields of `request`.
    pub fn apply(&self, mut request: DownloadRequest) -> DownloadRequest {
        if request.format.is_none() {
            request.format = Some(self.format.clone());
        }
        if request.output.is_none() {
            request.output = Some(self.output.clone());
        }
        if request.extension.is_none() {
            request.extension = Some(self.extension.clone());
        }
        if request.subtitles.is_none() {
            request.subtitles = Some(self.subtitles);
        }
        if request.audio_only && request.audio_quality.is_none() {
            request.audio_quality = self.audio_quality.clone();
        }
        request
    }
}

fn default_host_name() -> String {
    "com.mediabridge.native_host".to_string()
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_dialog_timeout_ms() -> u64 {
    65_000
}
