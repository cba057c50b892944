//! Message log routes nested under `/chat/{id}`.

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::{Json, Router};
use parley_core::models::{Chat, ChatMessage};
use parley_core::Envelope;
use parley_store::Collection;

use crate::error::ApiResult;
use crate::identity::Identity;

pub fn messages_router() -> Router<Collection<Chat>> {
    Router::new()
        .route("/{id}/messages", post(append_message))
        .route("/{id}/messages/{index}", patch(edit_message))
}

/// Append without running a completion.
async fn append_message(
    State(chats): State<Collection<Chat>>,
    Identity(owner): Identity,
    Path(id): Path<u64>,
    Json(message): Json<ChatMessage>,
) -> ApiResult<Json<Envelope<Chat>>> {
    Ok(Json(chats.append(&owner, id, Chat::MESSAGES_FIELD, &message).await?))
}

async fn edit_message(
    State(chats): State<Collection<Chat>>,
    Identity(owner): Identity,
    Path((id, index)): Path<(u64, usize)>,
    Json(message): Json<ChatMessage>,
) -> ApiResult<Json<Envelope<Chat>>> {
    Ok(Json(
        chats
            .replace_element(&owner, id, Chat::MESSAGES_FIELD, index, &message)
            .await?,
    ))
}
