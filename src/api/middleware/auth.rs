use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::{
    api::state::AppState,
    auth::SESSION_COOKIE,
    domain::{Member, MemberStatus},
    error::{AppError, Result},
};

#[derive(Clone)]
pub struct CurrentUser {
    pub member: Member,
}

async fn authenticate(state: &AppState, jar: &CookieJar) -> Result<Member> {
    let session_cookie = jar
        .get(SESSION_COOKIE)
        .ok_or(AppError::Unauthorized)?;

    let session = state.service_context.auth_service
        .validate_session(session_cookie.value())
        .await?
        .ok_or(AppError::Unauthorized)?;

    let member = state.service_context.member_repo
        .find_by_id(session.member_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    match member.status {
        MemberStatus::Active => Ok(member),
        MemberStatus::Suspended => Err(AppError::Forbidden),
    }
}

pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let member = authenticate(&state, &jar).await?;

    request.extensions_mut().insert(CurrentUser { member });

    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let member = authenticate(&state, &jar).await?;

    if !member.is_admin() {
        return Err(AppError::Forbidden);
    }

    request.extensions_mut().insert(CurrentUser { member });

    Ok(next.run(request).await)
}
