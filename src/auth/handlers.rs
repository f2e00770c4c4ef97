use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            is_valid_email, ForgotPasswordRequest, LoginRequest, OtpPendingResponse,
            OtpSubmission, PublicUser, RegisterRequest, ResendOtpRequest, ResetPasswordRequest,
            ResetTokenResponse, SessionResponse,
        },
        error::AuthError,
        jwt::AuthUser,
        password,
        service::AuthService,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/register/verify", post(verify_registration))
        .route("/auth/login", post(login))
        .route("/auth/login/verify", post(complete_login))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/verify-otp", post(verify_reset_otp))
        .route("/auth/password/reset", post(reset_password))
        .route("/auth/otp/resend", post(resend_otp))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn check_email(email: &str) -> Result<(), AuthError> {
    if !is_valid_email(email) {
        warn!("rejected malformed email");
        return Err(AuthError::Validation("invalid email".into()));
    }
    Ok(())
}

fn check_password(plain: &str) -> Result<(), AuthError> {
    if !password::meets_policy(plain) {
        return Err(AuthError::Validation(
            "password must be at least 12 characters with upper and lower case letters, \
             a digit, and a special character"
                .into(),
        ));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<OtpPendingResponse>), AuthError> {
    let email = payload.email.trim().to_lowercase();
    check_email(&email)?;
    check_password(&payload.password)?;
    if payload.name.trim().is_empty() {
        return Err(AuthError::Validation("name must not be empty".into()));
    }

    let user_id = AuthService::from_state(&state)
        .register(&payload.name, &email, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(OtpPendingResponse { user_id })))
}

#[instrument(skip(state, payload))]
pub async fn verify_registration(
    State(state): State<AppState>,
    Json(payload): Json<OtpSubmission>,
) -> Result<Json<SessionResponse>, AuthError> {
    let (token, user) = AuthService::from_state(&state)
        .verify_registration(payload.user_id, &payload.code)
        .await?;
    Ok(Json(SessionResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<OtpPendingResponse>, AuthError> {
    let email = payload.email.trim().to_lowercase();
    check_email(&email)?;

    let user_id = AuthService::from_state(&state)
        .login(&email, &payload.password)
        .await?;
    Ok(Json(OtpPendingResponse { user_id }))
}

#[instrument(skip(state, payload))]
pub async fn complete_login(
    State(state): State<AppState>,
    Json(payload): Json<OtpSubmission>,
) -> Result<Json<SessionResponse>, AuthError> {
    let (token, user) = AuthService::from_state(&state)
        .complete_login(payload.user_id, &payload.code)
        .await?;
    Ok(Json(SessionResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AuthError> {
    let email = payload.email.trim().to_lowercase();
    check_email(&email)?;

    match AuthService::from_state(&state).forgot_password(&email).await {
        // The response shape never reveals whether the address is known.
        Ok(()) | Err(AuthError::NotFound) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "if the address is registered, a code is on its way"
            })),
        )),
        Err(e) => Err(e),
    }
}

#[instrument(skip(state, payload))]
pub async fn verify_reset_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpSubmission>,
) -> Result<Json<ResetTokenResponse>, AuthError> {
    let reset_token = AuthService::from_state(&state)
        .verify_reset_otp(payload.user_id, &payload.code)
        .await?;
    Ok(Json(ResetTokenResponse { reset_token }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    check_password(&payload.new_password)?;

    AuthService::from_state(&state)
        .reset_password(payload.user_id, &payload.reset_token, &payload.new_password)
        .await?;
    Ok(Json(json!({ "message": "password updated" })))
}

#[instrument(skip(state, payload))]
pub async fn resend_otp(
    State(state): State<AppState>,
    Json(payload): Json<ResendOtpRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    AuthService::from_state(&state)
        .resend_otp(payload.user_id)
        .await?;
    Ok(Json(json!({ "message": "a fresh code is on its way" })))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = AuthService::from_state(&state)
        .user_profile(user_id)
        .await?;
    Ok(Json(PublicUser::from(&user)))
}
