//! Per-user routes: the caller's profile singleton, signup, email
//! verification and password-reset links.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::models::{User, UserProfile};
use parley_core::{ApiError, Envelope};
use parley_share::LinkPurpose;
use parley_store::{NewUser, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::identity::Identity;
use crate::state::AppState;

pub fn user_router() -> Router<AppState> {
    Router::new()
        .route("/user", get(whoami))
        .route(
            "/user/profile",
            get(get_profile)
                .post(create_profile)
                .put(update_profile)
                .delete(delete_profile),
        )
        .route("/user/signup", post(signup))
        .route("/user/password-reset", post(request_password_reset))
        .route(
            &format!("/{}/{{payload}}/{{signature}}", LinkPurpose::EmailVerification.path()),
            get(verify_email),
        )
        .route(
            &format!("/{}/{{payload}}/{{signature}}", LinkPurpose::PasswordReset.path()),
            get(confirm_password_reset),
        )
}

#[derive(Debug, Serialize)]
struct WhoAmI {
    id: String,
}

async fn whoami(Identity(owner): Identity) -> Json<WhoAmI> {
    Json(WhoAmI {
        id: owner.to_string(),
    })
}

async fn get_profile(
    State(state): State<AppState>,
    Identity(owner): Identity,
) -> ApiResult<Json<Envelope<UserProfile>>> {
    Ok(Json(state.profiles.get(&owner).await?))
}

async fn create_profile(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(profile): Json<UserProfile>,
) -> ApiResult<(StatusCode, Json<Envelope<UserProfile>>)> {
    let env = state.profiles.create(&owner, profile).await?;
    Ok((StatusCode::CREATED, Json(env)))
}

async fn update_profile(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Json(profile): Json<UserProfile>,
) -> ApiResult<Json<Envelope<UserProfile>>> {
    Ok(Json(state.profiles.update(&owner, profile).await?))
}

async fn delete_profile(State(state): State<AppState>, Identity(owner): Identity) -> ApiResult<StatusCode> {
    if state.profiles.delete(&owner).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("UserProfile not found").into())
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Create an account and mint its verification link. Delivering the link
/// by email happens outside this service.
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<Envelope<User>>)> {
    let env = state
        .accounts
        .create(NewUser {
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
        })
        .await?;
    let link = state.links.issue(env.id, LinkPurpose::EmailVerification).await?;
    info!(user_id = env.id, expires = %link.expire_time, "verification link issued");
    Ok((StatusCode::CREATED, Json(env)))
}

async fn verify_email(
    State(state): State<AppState>,
    Path((payload, signature)): Path<(String, String)>,
) -> ApiResult<Json<Envelope<User>>> {
    let user_id = state
        .links
        .redeem(LinkPurpose::EmailVerification, &payload, &signature)
        .await?;
    Ok(Json(state.accounts.mark_email_verified(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Always 202 so the response does not reveal which emails have accounts.
/// The link is handed to delivery (logged here) only for a known email.
async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<StatusCode> {
    match state.accounts.find_by_email(&req.email).await {
        Ok(env) => {
            let link = state.links.issue(env.id, LinkPurpose::PasswordReset).await?;
            info!(user_id = env.id, expires = %link.expire_time, "password reset link issued");
        }
        Err(StoreError::NotFound(_)) => debug!("password reset for unknown email"),
        Err(e) => return Err(e.into()),
    }
    Ok(StatusCode::ACCEPTED)
}

/// Proves the bearer holds a live reset link and returns the account it
/// was issued to. Storing the new credential belongs to the identity
/// provider in front of this service.
async fn confirm_password_reset(
    State(state): State<AppState>,
    Path((payload, signature)): Path<(String, String)>,
) -> ApiResult<Json<Envelope<User>>> {
    let user_id = state
        .links
        .redeem(LinkPurpose::PasswordReset, &payload, &signature)
        .await?;
    Ok(Json(state.accounts.get(user_id).await?))
}
