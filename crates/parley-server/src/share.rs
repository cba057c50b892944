use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use parley_core::{Envelope, Key, ObjectClass};
use parley_share::ShareLink;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::identity::Identity;
use crate::state::AppState;

/// Mounted under `/{share_prefix}`.
pub fn share_router() -> Router<AppState> {
    Router::new()
        .route("/{class_name}/{id}/generate", get(generate_share))
        .route("/{payload}/{signature}", get(resolve_share))
}

/// `?ttl_secs=` overrides the configured share lifetime.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    pub ttl_secs: Option<u64>,
}

async fn generate_share(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path((class_name, id)): Path<(String, u64)>,
    Query(params): Query<GenerateParams>,
) -> ApiResult<Json<ShareLink>> {
    let class: ObjectClass = class_name.parse()?;
    let source = Key::instance(class, &owner, id)?;
    let ttl = params.ttl_secs.map(Duration::from_secs);
    Ok(Json(state.shares.generate(&source, ttl).await?))
}

/// Public: the link itself is the capability.
async fn resolve_share(
    State(state): State<AppState>,
    Path((payload, signature)): Path<(String, String)>,
) -> ApiResult<Json<Envelope>> {
    Ok(Json(state.shares.resolve(&payload, &signature).await?))
}
