// Wire envelope shared by both directions of the channel.
//
// Outbound requests are flat JSON objects `{id, action, ...payload}`. Inbound
// messages are classified exactly once, here, into either a call response
// (carries `id`) or a job event (carries `type` and `downloadId`).

use crate::models::job::{JobId, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Actions understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Test,
    Download,
    Cancel,
    SelectDirectory,
    OpenFolder,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Download => "download",
            Self::Cancel => "cancel",
            Self::SelectDirectory => "selectDirectory",
            Self::OpenFolder => "openFolder",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the outbound object for a correlated call.
///
/// `id` and `action` always win over payload keys of the same name.
pub fn encode_request(id: u64, action: Action, payload: Map<String, Value>) -> Value {
    let mut message = payload;
    message.insert("id".to_string(), Value::from(id));
    message.insert("action".to_string(), Value::from(action.as_str()));
    Value::Object(message)
}

/// Convert any serializable payload into the flat field map used by [`encode_request`].
///
/// Non-object payloads (and serialization failures) yield an empty map.
pub fn payload_of<T: Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!("Ignoring non-object payload: {}", other);
            Map::new()
        }
        Err(e) => {
            tracing::warn!("Failed to serialize payload: {}", e);
            Map::new()
        }
    }
}

/// Event reported by the worker for a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    Progress(ProgressSnapshot),
    Complete { filename: Option<String> },
    Error { message: String },
}

impl JobEventKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// An inbound message after boundary classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to a correlated call. `Err` holds the worker's error text.
    CallResponse {
        id: u64,
        outcome: Result<Value, String>,
    },

    /// Event addressed to a job.
    JobEvent { job_id: JobId, event: JobEventKind },

    /// Anything else; logged and dropped by the router.
    Unrecognized(Value),
}

/// Fields used for classification; everything else stays in `rest`.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(default)]
    id: Option<u64>,

    #[serde(default, rename = "downloadId")]
    download_id: Option<String>,

    #[serde(default, rename = "type")]
    kind: Option<String>,

    #[serde(default)]
    error: Option<Value>,

    #[serde(default)]
    success: Option<Value>,

    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl Inbound {
    pub fn classify(message: Value) -> Self {
        let raw: RawInbound = match serde_json::from_value(message.clone()) {
            Ok(raw) => raw,
            Err(_) => return Self::Unrecognized(message),
        };

        let error = raw.error.as_ref().and_then(error_text);
        let success = raw.success.as_ref().and_then(success_flag);

        if let Some(id) = raw.id {
            let outcome = match (error, success) {
                (Some(error), _) => Err(error),
                (None, Some(false)) => Err("request failed".to_string()),
                (None, _) => Ok(message),
            };
            return Self::CallResponse { id, outcome };
        }

        let (Some(download_id), Some(kind)) = (raw.download_id, raw.kind) else {
            return Self::Unrecognized(message);
        };

        let event = match kind.as_str() {
            "progress" => {
                let snapshot = raw
                    .rest
                    .get("progress")
                    .map(ProgressSnapshot::from_value)
                    .unwrap_or_default();
                JobEventKind::Progress(snapshot)
            }
            "complete" => JobEventKind::Complete {
                filename: raw
                    .rest
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "error" => JobEventKind::Error {
                message: error.unwrap_or_else(|| "Download failed".to_string()),
            },
            _ => return Self::Unrecognized(message),
        };

        Self::JobEvent {
            job_id: JobId::from(download_id),
            event,
        }
    }
}

/// Error text from an `error` field: a string, an object's `message`, or the raw JSON.
fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(text)) => Some(text.clone()),
            _ => Some(error.to_string()),
        },
        other => Some(other.to_string()),
    }
}

/// A `success` flag given as a bool or as `"true"`/`"false"`.
fn success_flag(success: &Value) -> Option<bool> {
    match success {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.trim().parse::<bool>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_flattens_payload() {
        let mut payload = Map::new();
        payload.insert("downloadId".into(), json!("J1"));
        payload.insert("id".into(), json!(999));

        let message = encode_request(7, Action::Cancel, payload);
        assert_eq!(message, json!({"id": 7, "action": "cancel", "downloadId": "J1"}));
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(serde_json::to_value(Action::SelectDirectory).unwrap(), "selectDirectory");
        assert_eq!(Action::OpenFolder.to_string(), "openFolder");
    }

    #[test]
    fn test_classify_call_success() {
        let message = json!({"id": 3, "success": true, "path": "/tmp"});
        match Inbound::classify(message.clone()) {
            Inbound::CallResponse { id, outcome } => {
                assert_eq!(id, 3);
                assert_eq!(outcome, Ok(message));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_call_error_and_negative_ack() {
        let err = Inbound::classify(json!({"id": 4, "error": "Unknown action: nope"}));
        assert_eq!(
            err,
            Inbound::CallResponse { id: 4, outcome: Err("Unknown action: nope".into()) }
        );

        let nack = Inbound::classify(json!({"id": 5, "success": false}));
        assert_eq!(
            nack,
            Inbound::CallResponse { id: 5, outcome: Err("request failed".into()) }
        );
    }

    #[test]
    fn test_download_ack_is_a_call_response() {
        let ack = json!({"id": 9, "success": true, "downloadId": "J1"});
        assert!(matches!(Inbound::classify(ack), Inbound::CallResponse { id: 9, .. }));
    }

    #[test]
    fn test_classify_job_events() {
        let progress = Inbound::classify(
            json!({"type": "progress", "downloadId": "J1", "progress": {"percent": 50}}),
        );
        match progress {
            Inbound::JobEvent { job_id, event: JobEventKind::Progress(p) } => {
                assert_eq!(job_id.as_str(), "J1");
                assert_eq!(p.percent, Some(50.0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let complete = Inbound::classify(
            json!({"type": "complete", "downloadId": "J1", "filename": "video.mp4"}),
        );
        assert_eq!(
            complete,
            Inbound::JobEvent {
                job_id: "J1".into(),
                event: JobEventKind::Complete { filename: Some("video.mp4".into()) },
            }
        );

        let error = Inbound::classify(
            json!({"type": "error", "downloadId": "J1", "error": "Download failed. Check yt-dlp logs for details."}),
        );
        assert!(matches!(
            error,
            Inbound::JobEvent { event: JobEventKind::Error { .. }, .. }
        ));
    }

    #[test]
    fn test_loosely_typed_fields_still_classify() {
        let nack = Inbound::classify(json!({"id": 6, "success": "false"}));
        assert_eq!(
            nack,
            Inbound::CallResponse { id: 6, outcome: Err("request failed".into()) }
        );

        let ack = Inbound::classify(json!({"id": 7, "success": "true"}));
        assert!(matches!(ack, Inbound::CallResponse { id: 7, outcome: Ok(_) }));

        let call_error = Inbound::classify(json!({"id": 8, "error": {"code": 2}}));
        assert_eq!(
            call_error,
            Inbound::CallResponse { id: 8, outcome: Err(r#"{"code":2}"#.into()) }
        );

        let job_error = Inbound::classify(json!({
            "type": "error",
            "downloadId": "J1",
            "error": {"message": "HTTP Error 403"}
        }));
        assert_eq!(
            job_error,
            Inbound::JobEvent {
                job_id: "J1".into(),
                event: JobEventKind::Error { message: "HTTP Error 403".into() },
            }
        );

        let progress = Inbound::classify(json!({
            "type": "progress",
            "downloadId": "J1",
            "progress": {"percent": 40, "eta": "00:15"}
        }));
        match progress {
            Inbound::JobEvent { event: JobEventKind::Progress(p), .. } => {
                assert_eq!(p.percent, Some(40.0));
                assert_eq!(p.eta, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_unrecognized() {
        assert!(matches!(Inbound::classify(json!({"hello": 1})), Inbound::Unrecognized(_)));
        assert!(matches!(
            Inbound::classify(json!({"type": "paused", "downloadId": "J1"})),
            Inbound::Unrecognized(_)
        ));
        assert!(matches!(Inbound::classify(json!([1, 2])), Inbound::Unrecognized(_)));
        // Null id (worker could not echo one) is not a call response
        assert!(matches!(
            Inbound::classify(json!({"id": null, "error": "Unknown action: x"})),
            Inbound::Unrecognized(_)
        ));
    }
}
