//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use drover_core::DroverError;
use thiserror::Error;
use tracing::error;

use crate::api::ErrorBody;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DroverError> for ApiError {
    fn from(err: DroverError) -> Self {
        match err {
            DroverError::TaskNotFound(_) => ApiError::NotFound(err.to_string()),
            DroverError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            DroverError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            DroverError::Serialization(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found: ApiError = DroverError::TaskNotFound("t1".into()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let conflict: ApiError = DroverError::InvalidTransition {
            task_id: "t1".into(),
            state: "active".into(),
            action: "approve".into(),
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert!(conflict.to_string().contains("cannot approve while active"));

        let bad: ApiError = DroverError::InvalidRequest("title must not be empty".into()).into();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.to_string(), "title must not be empty");

        let internal: ApiError = DroverError::Other("boom".into()).into();
        assert_eq!(internal.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
