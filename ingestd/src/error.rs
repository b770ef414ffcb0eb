use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use api::response::ErrorBody;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn bad_request<T: ToString>(t: T) -> Self {
        AppError::BadRequest(t.to_string())
    }

    pub fn not_found<T: ToString>(t: T) -> Self {
        AppError::NotFound(t.to_string())
    }

    pub fn conflict<T: ToString>(t: T) -> Self {
        AppError::Conflict(t.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, tag, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m),
            AppError::InternalServerError(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        };
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
