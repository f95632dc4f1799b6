use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Live reading unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Historical data unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("{}", format_schema_mismatch(.missing, .extra))]
    SchemaMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("Model prediction failed: {0}")]
    ModelApplication(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Unsupported model file: {0}")]
    ModelFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_schema_mismatch(missing: &[String], extra: &[String]) -> String {
    let mut msg = format!(
        "Feature schema mismatch: missing columns [{}]",
        missing.join(", ")
    );
    if !extra.is_empty() {
        msg.push_str(&format!(", unused columns [{}]", extra.join(", ")));
    }
    msg
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SourceUnavailable(_) | AppError::ExternalServiceError(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::HistoryUnavailable(_) | AppError::ModelUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Csv(_) | AppError::Io(_) => {
                tracing::error!("Storage error: {:?}", self);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(ErrorResponse {
                        error: "Internal storage error".to_string(),
                    }),
                )
                    .into_response();
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            axum::Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_lists_missing_columns() {
        let err = AppError::SchemaMismatch {
            missing: vec!["lag_4h".to_string(), "PM1".to_string()],
            extra: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Feature schema mismatch: missing columns [lag_4h, PM1]"
        );
    }

    #[test]
    fn test_schema_mismatch_lists_extra_columns() {
        let err = AppError::SchemaMismatch {
            missing: vec!["lag_4h".to_string()],
            extra: vec!["SO2".to_string()],
        };
        assert!(err.to_string().contains("unused columns [SO2]"));
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::NotFound("x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::SourceUnavailable("down".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = AppError::HistoryUnavailable("gone".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = AppError::ModelApplication("nan".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
