use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::InvalidCollection(_) => StatusCode::BAD_REQUEST,
            ServerError::EmptyBody | ServerError::BodyTooLarge { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
