//! Rendering a stored prompt template, mounted next to the template CRUD
//! routes.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use parley_core::models::{Prompt, PromptTemplate};
use parley_store::Collection;
use serde_json::{Map, Value};

use crate::error::ApiResult;
use crate::identity::Identity;

pub fn render_router() -> Router<Collection<PromptTemplate>> {
    Router::new().route("/{id}/render", post(render_template))
}

/// The body is an object holding exactly the template's arguments.
async fn render_template(
    State(templates): State<Collection<PromptTemplate>>,
    Identity(owner): Identity,
    Path(id): Path<u64>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<Json<Prompt>> {
    let template = templates.get(&owner, id).await?;
    Ok(Json(template.object.render(&params)?))
}
