use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    Encoding(String),
}

impl From<prometheus::Error> for ApiError {
    fn from(err: prometheus::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match self {
            ApiError::Encoding(msg) => format!("failed to encode metrics: {msg}"),
        };
        let body = Json(ErrorBody { error: message });
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
