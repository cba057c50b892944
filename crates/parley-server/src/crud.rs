//! Create/read/update/delete/list routes for any instance-shaped class.
//!
//! [`crud_router`] is instantiated once per class at startup; the returned
//! router still needs its [`Collection`] supplied with `with_state`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use parley_core::{ApiError, Envelope, StoredObject};
use parley_store::{Collection, ListQuery, Page, Sort, SortField};
use serde::Deserialize;

use crate::error::{ApiResult, AppError};
use crate::identity::Identity;

const DEFAULT_LIMIT: u64 = 10;

/// `?offset=&limit=&sorting_field=&ascending=`
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub sorting_field: Option<SortField>,
    pub ascending: Option<bool>,
}

impl ListParams {
    pub fn into_query(self) -> Result<ListQuery, AppError> {
        let page = Page::new(self.offset.unwrap_or(0), self.limit.unwrap_or(DEFAULT_LIMIT))?;
        Ok(ListQuery {
            page: Some(page),
            sort: self.sorting_field.map(|field| Sort {
                field,
                ascending: self.ascending.unwrap_or(true),
            }),
        })
    }
}

pub fn crud_router<T: StoredObject>() -> Router<Collection<T>> {
    Router::new()
        .route("/", get(list_objects::<T>).post(create_object::<T>))
        .route(
            "/{id}",
            get(get_object::<T>)
                .put(update_object::<T>)
                .delete(delete_object::<T>),
        )
}

async fn create_object<T: StoredObject>(
    State(collection): State<Collection<T>>,
    Identity(owner): Identity,
    Json(object): Json<T>,
) -> ApiResult<(StatusCode, Json<Envelope<T>>)> {
    let env = collection.create(&owner, object).await?;
    Ok((StatusCode::CREATED, Json(env)))
}

async fn get_object<T: StoredObject>(
    State(collection): State<Collection<T>>,
    Identity(owner): Identity,
    Path(id): Path<u64>,
) -> ApiResult<Json<Envelope<T>>> {
    Ok(Json(collection.get(&owner, id).await?))
}

async fn update_object<T: StoredObject>(
    State(collection): State<Collection<T>>,
    Identity(owner): Identity,
    Path(id): Path<u64>,
    Json(object): Json<T>,
) -> ApiResult<Json<Envelope<T>>> {
    Ok(Json(collection.update(&owner, id, object).await?))
}

async fn delete_object<T: StoredObject>(
    State(collection): State<Collection<T>>,
    Identity(owner): Identity,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    if collection.delete(&owner, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("{} not found", collection.class())).into())
    }
}

async fn list_objects<T: StoredObject>(
    State(collection): State<Collection<T>>,
    Identity(owner): Identity,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Envelope<T>>>> {
    Ok(Json(collection.list(&owner, params.into_query()?).await?))
}
