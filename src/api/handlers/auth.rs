use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::state::AppState,
    auth::{AuthService, SESSION_COOKIE},
    error::Result,
};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub member_id: Uuid,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>)> {
    req.validate()?;

    let auth_service = &state.service_context.auth_service;
    let (session, token) = auth_service.login(&req.email, &req.password).await?;

    let secure = state.settings.server.base_url.starts_with("https://");
    let cookie = auth_service.create_session_cookie(&token, secure);

    tracing::info!(member_id = %session.member_id, "member logged in");

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            message: "Login successful".to_string(),
            member_id: session.member_id,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode)> {
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        if let Err(e) = state.service_context.auth_service
            .invalidate_session(session_cookie.value())
            .await
        {
            tracing::warn!(error = %e, "failed to invalidate session on logout");
        }
    }

    let jar = jar.add(AuthService::create_logout_cookie());

    Ok((jar, StatusCode::NO_CONTENT))
}
