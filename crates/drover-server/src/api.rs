//! Request and response bodies

use axum::body::Bytes;
use drover_core::{OperatingMode, TaskId, TaskState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Response to `POST /api/tasks` and `POST /api/tasks/{id}/continue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreatedResponse {
    pub task_id: TaskId,
    pub status: TaskState,
}

/// Body of the reject endpoints; may be omitted entirely
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: OperatingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: OperatingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Parse a required JSON body, reporting problems as `400 {error}`
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid body: {}", e)))
}

/// Like [`parse_body`], but an empty body means the default
pub fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::TaskSubmission;

    #[test]
    fn test_parse_optional_body() {
        let empty: RejectRequest = parse_optional_body(&Bytes::new()).unwrap();
        assert!(empty.reason.is_none());

        let given: RejectRequest =
            parse_optional_body(&Bytes::from_static(br#"{"reason":"duplicate"}"#)).unwrap();
        assert_eq!(given.reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn test_parse_body_errors_are_bad_requests() {
        let err = parse_body::<TaskSubmission>(&Bytes::from_static(b"{\"title\": 3}")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = parse_body::<ModeRequest>(&Bytes::from_static(br#"{"mode":"manual"}"#)).unwrap_err();
        assert!(err.to_string().starts_with("invalid body"));
    }

    #[test]
    fn test_created_response_shape() {
        let json = serde_json::to_value(TaskCreatedResponse {
            task_id: "t1".into(),
            status: TaskState::PendingApproval,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"taskId": "t1", "status": "pending_approval"}));
    }
}
