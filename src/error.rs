use std::any::Any;
use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::rate_limit::{RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Please verify your email before logging in")]
    Unverified,

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    RateLimited {
        message: &'static str,
        limit: u32,
        retry_after: Duration,
    },

    #[error("Statistics service unavailable: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Detail of an internal error, attached to the response so the
/// development-mode layer can surface it.
#[derive(Clone, Debug)]
pub struct ErrorDetail(pub String);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Unverified => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            AppError::RateLimited {
                message,
                limit,
                retry_after,
            } => {
                let secs = retry_after.as_secs().max(1);
                let body = json!({
                    "success": false,
                    "message": message,
                    "retryAfter": secs,
                });

                let mut res = (status, Json(body)).into_response();
                let headers = res.headers_mut();
                headers.insert(RETRY_AFTER, HeaderValue::from(secs));
                headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
                headers.insert(RATELIMIT_REMAINING, HeaderValue::from(0u32));
                headers.insert(RATELIMIT_RESET, HeaderValue::from(secs));
                res
            }
            AppError::Internal(detail) => {
                error!("Unhandled error: {detail}");

                let body = json!({ "success": false, "message": "Internal server error" });
                let mut res = (status, Json(body)).into_response();
                res.extensions_mut().insert(ErrorDetail(detail));
                res
            }
            other => {
                let body = json!({ "success": false, "message": other.to_string() });
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization failed: {e}"))
    }
}

// Development mode only: put the internal error detail back into the body.
pub async fn expose_error_detail(res: Response) -> Response {
    let Some(ErrorDetail(detail)) = res.extensions().get::<ErrorDetail>().cloned() else {
        return res;
    };

    let body = json!({
        "success": false,
        "message": "Internal server error",
        "error": detail,
    });
    (res.status(), Json(body)).into_response()
}

// Panics inside handlers become the same 500 body as any other internal error
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Unverified.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn rate_limited_response_carries_retry_headers() {
        let res = AppError::RateLimited {
            message: "slow down",
            limit: 20,
            retry_after: Duration::from_secs(42),
        }
        .into_response();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[RETRY_AFTER], "42");
        assert_eq!(res.headers()[RATELIMIT_LIMIT], "20");
        assert_eq!(res.headers()[RATELIMIT_REMAINING], "0");
    }

    #[test]
    fn internal_error_hides_detail_but_keeps_it_attached() {
        let res = AppError::Internal("db exploded".into()).into_response();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = res.extensions().get::<ErrorDetail>().expect("detail attached");
        assert_eq!(detail.0, "db exploded");
    }

    #[test]
    fn panic_payload_is_converted_to_500() {
        let res = handle_panic(Box::new("boom"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.extensions().get::<ErrorDetail>().unwrap().0.contains("boom"));
    }
}
