use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use recap_export::ExportError;
use recap_store::StoreError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    BadRequest(String),
    BadGateway(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                String::from("invalid password"),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message.as_str()
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPassword => ApiError::Unauthorized,
            StoreError::Locked | StoreError::PasswordNotSet | StoreError::PasswordAlreadySet => {
                ApiError::Forbidden(err.to_string())
            }
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::Persistence(_) | StoreError::Io(_) | StoreError::Crypto(_) => {
                ApiError::InternalError(err.to_string())
            }
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::MissingConfig(msg) | ExportError::Url(msg) => ApiError::BadRequest(msg),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}
