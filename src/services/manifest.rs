// Native messaging host registration
//
// A worker is registered by dropping `<name>.json` into one of the browser's
// NativeMessagingHosts directories. Lookup failures and misconfigured
// manifests are connection errors: the worker cannot be launched.

use crate::error::BridgeError;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::OnceLock;

/// Contents of a host manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Absolute path to the worker executable
    pub path: Utf8PathBuf,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn host_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").expect("Invalid host name regex")
    })
}

/// Whether `name` is an acceptable native messaging host name.
pub fn is_valid_host_name(name: &str) -> bool {
    host_name_pattern().is_match(name)
}

impl HostManifest {
    /// Per-user manifest directories for the common Chromium-based browsers.
    pub fn default_dirs() -> Vec<Utf8PathBuf> {
        let Some(home) = crate::config::home_dir() else {
            return Vec::new();
        };

        let relative: &[&str] = if cfg!(target_os = "macos") {
            &[
                "Library/Application Support/Google/Chrome/NativeMessagingHosts",
                "Library/Application Support/Chromium/NativeMessagingHosts",
                "Library/Application Support/BraveSoftware/Brave-Browser/NativeMessagingHosts",
            ]
        } else {
            &[
                ".config/google-chrome/NativeMessagingHosts",
                ".config/chromium/NativeMessagingHosts",
                ".config/BraveSoftware/Brave-Browser/NativeMessagingHosts",
            ]
        };

        relative.iter().map(|r| home.join(r)).collect()
    }

    /// Read and validate a manifest file.
    pub fn load(path: &Utf8Path) -> Result<Self, BridgeError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BridgeError::Connection(format!("Failed to read host manifest {}: {}", path, e))
        })?;

        let manifest: HostManifest = serde_json::from_str(&contents).map_err(|e| {
            BridgeError::Connection(format!("Invalid host manifest {}: {}", path, e))
        })?;

        if manifest.kind != "stdio" {
            return Err(BridgeError::Connection(format!(
                "Host manifest {} has unsupported type '{}'",
                path, manifest.kind
            )));
        }

        if !manifest.path.is_absolute() {
            return Err(BridgeError::Connection(format!(
                "Host manifest {} must use an absolute executable path",
                path
            )));
        }

        if !manifest.path.is_file() {
            return Err(BridgeError::Connection(format!(
                "Worker executable not found: {}",
                manifest.path
            )));
        }

        Ok(manifest)
    }

    /// Find the manifest for `host_name` in the first directory that has one.
    pub fn locate(host_name: &str, dirs: &[Utf8PathBuf]) -> Result<Self, BridgeError> {
        if !is_valid_host_name(host_name) {
            return Err(BridgeError::Connection(format!(
                "Invalid host name '{}'",
                host_name
            )));
        }

        let file_name = format!("{}.json", host_name);
        let Some(path) = dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
        else {
            tracing::warn!(
                "No manifest for {} in {} directories",
                host_name,
                dirs.len()
            );
            return Err(BridgeError::Connection(format!(
                "Native host '{}' is not registered",
                host_name
            )));
        };

        let manifest = Self::load(&path)?;
        if manifest.name != host_name {
            return Err(BridgeError::Connection(format!(
                "Host manifest {} declares name '{}', expected '{}'",
                path, manifest.name, host_name
            )));
        }

        tracing::debug!("Using host manifest {}", path);
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn temp_dir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn write_manifest(dir: &Utf8Path, name: &str, exe: &Utf8Path, kind: &str) {
        let manifest = serde_json::json!({
            "name": name,
            "description": "test worker",
            "path": exe,
            "type": kind,
            "allowed_origins": ["chrome-extension://abcdef/"]
        });
        fs::write(dir.join(format!("{}.json", name)), manifest.to_string()).unwrap();
    }

    #[test]
    fn test_host_name_validation() {
        assert!(is_valid_host_name("com.mediabridge.native_host"));
        assert!(is_valid_host_name("worker"));
        assert!(!is_valid_host_name("Com.Upper"));
        assert!(!is_valid_host_name("trailing."));
        assert!(!is_valid_host_name("../escape"));
    }

    #[test]
    fn test_locate_finds_first_registered_dir() {
        let (_guard, dir) = temp_dir();
        let exe = dir.join("worker.sh");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        write_manifest(&dir, "com.example.worker", &exe, "stdio");

        let (_empty_guard, empty) = temp_dir();
        let manifest =
            HostManifest::locate("com.example.worker", &[empty, dir.clone()]).unwrap();
        assert_eq!(manifest.path, exe);
        assert_eq!(manifest.allowed_origins.len(), 1);
    }

    #[test]
    fn test_missing_registration_is_connection_error() {
        let (_guard, dir) = temp_dir();
        let err = HostManifest::locate("com.example.worker", &[dir]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_misconfigured_manifests_rejected() {
        let (_guard, dir) = temp_dir();
        let exe = dir.join("worker.sh");
        fs::write(&exe, "#!/bin/sh\n").unwrap();

        write_manifest(&dir, "wrong_type", &exe, "socket");
        assert!(HostManifest::locate("wrong_type", &[dir.clone()]).is_err());

        write_manifest(&dir, "missing_exe", &dir.join("nope"), "stdio");
        assert!(HostManifest::locate("missing_exe", &[dir.clone()]).is_err());

        fs::write(dir.join("garbage.json"), "{not json").unwrap();
        assert!(HostManifest::locate("garbage", &[dir.clone()]).is_err());
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let (_guard, dir) = temp_dir();
        let exe = dir.join("worker.sh");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        write_manifest(&dir, "other", &exe, "stdio");
        fs::rename(dir.join("other.json"), dir.join("expected.json")).unwrap();

        let err = HostManifest::locate("expected", &[dir]).unwrap_err();
        assert!(err.to_string().contains("declares name 'other'"));
    }

    #[test]
    fn test_default_dirs_under_home() {
        let dirs = HostManifest::default_dirs();
        match crate::config::home_dir() {
            Some(home) => {
                assert_eq!(dirs.len(), 3);
                assert!(dirs.iter().all(|d| d.starts_with(&home)));
                assert!(dirs.iter().all(|d| d.ends_with("NativeMessagingHosts")));
            }
            None => assert!(dirs.is_empty()),
        }
    }
}
