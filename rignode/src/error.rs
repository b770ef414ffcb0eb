use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use api::response::ErrorBody;

#[derive(Debug)]
pub enum AppError {
    /// Admission check failed; the operator has to act before a retry.
    Precondition(String),
    /// The state machine forbids this transition in the current state.
    Conflict(String),
    CameraAbsent(String),
    MasterUnreachable(String),
    NotFound(String),
    BadRequest(String),
    Driver(String),
    /// Internal bug: a transition the machine forbids was about to happen.
    Invariant(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn precondition<T: ToString>(t: T) -> Self {
        AppError::Precondition(t.to_string())
    }

    pub fn conflict<T: ToString>(t: T) -> Self {
        AppError::Conflict(t.to_string())
    }

    pub fn bad_request<T: ToString>(t: T) -> Self {
        AppError::BadRequest(t.to_string())
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Precondition(m) => {
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", m.clone())
            }
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone()),
            AppError::CameraAbsent(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "camera_absent", m.clone())
            }
            AppError::MasterUnreachable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "master_unreachable", m.clone())
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            AppError::Driver(m) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "driver_failure", m.clone())
            }
            AppError::Invariant(m) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation", m.clone())
            }
            AppError::InternalServerError(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, tag, message) = self.parts();
        (
            status,
            Json(ErrorBody {
                error: tag.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}
