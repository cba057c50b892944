//! Per-user, per-route admission in front of every handler.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parley_core::ApiError;
use tracing::warn;

use crate::error::AppError;
use crate::identity::Identity;
use crate::state::AppState;

/// Anonymous requests and unmatched paths pass straight through; the
/// handler decides whether they are allowed at all. A ledger failure is a
/// 500, never an admission.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.rate_limit.enabled {
        return next.run(request).await;
    }
    let Some(owner) = Identity::from_headers(request.headers()) else {
        return next.run(request).await;
    };
    let Some(route) = request.extensions().get::<MatchedPath>().map(|p| p.as_str().to_string()) else {
        return next.run(request).await;
    };

    let weight = state.rate_limit.weight_for(&route);
    match state.limiter.check(&owner, &route, weight).await {
        Ok(decision) if decision.admitted => next.run(request).await,
        Ok(decision) => {
            warn!(owner = %owner, route, score = decision.score, "rate limited");
            AppError(ApiError::rate_limited()).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
