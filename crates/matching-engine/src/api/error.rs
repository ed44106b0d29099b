//! Mapping of engine errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::{CancelError, MatchError, PlacementError};
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retryable: false,
        }
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "message": self.message,
            "retryable": self.retryable,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<common::Error> for ApiError {
    fn from(err: common::Error) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Conflict(_) | StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string()).retryable(err.is_retryable())
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        let status = match &err {
            MatchError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MatchError::AlreadyTerminal { .. } | MatchError::Conflict { .. } => StatusCode::CONFLICT,
            MatchError::EventLocked(_) => StatusCode::LOCKED,
            MatchError::BetNotFound(_) => StatusCode::NOT_FOUND,
            MatchError::MatchPersistFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string()).retryable(err.is_retryable())
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        let status = match &err {
            CancelError::NotCancellable { .. } | CancelError::Conflict { .. } => StatusCode::CONFLICT,
            CancelError::BetNotFound(_) => StatusCode::NOT_FOUND,
            CancelError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CancelError::Ledger { .. } => StatusCode::BAD_GATEWAY,
            CancelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string()).retryable(err.is_retryable())
    }
}

impl From<PlacementError> for ApiError {
    fn from(err: PlacementError) -> Self {
        let retryable = err.is_retryable();
        let status = match &err {
            PlacementError::Validation(ValidationError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            PlacementError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PlacementError::EventLocked(_) => StatusCode::LOCKED,
            PlacementError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PlacementError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PlacementError::Match { source, .. } => ApiError::from(source.clone()).status,
        };
        ApiError::new(status, err.to_string()).retryable(retryable)
    }
}
