use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{
    AuthResponse, LoginRequest, RegisterRequest, RegisterResponse, UserResponse, VerifyOtpRequest,
};
use crate::state::AppState;

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(req) = payload?;

    match state.auth.login(&req.email, &req.password) {
        Ok((token, user)) => {
            info!("Login succeeded for {}", user.email);
            Ok(Json(AuthResponse::new(token, user)))
        }
        Err(e) => {
            warn!("Login failed for {}: {e}", req.email.trim());
            Err(e)
        }
    }
}

pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload?;

    let code = state.auth.register(&req.name, &req.email, &req.password)?;

    let res = RegisterResponse {
        success: true,
        message: "Registration successful, check your email for the OTP".to_string(),
        dev_otp: state.config.environment.is_development().then_some(code),
    };
    Ok((StatusCode::CREATED, Json(res)))
}

pub async fn verify_otp_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(req) = payload?;

    let (token, user) = state.auth.verify_otp(&req.email, &req.otp)?;
    Ok(Json(AuthResponse::new(token, user)))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;

    let user = state
        .auth
        .user_for_token(token)
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}
