use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use parley_core::models::{Chat, CompletionParameters, Prompt, PromptTemplate};
use parley_settings::ParleySettings;
use parley_store::{purge_expired, Database, EventBus};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chat::messages_router;
use crate::crud::crud_router;
use crate::error::ServerError;
use crate::events::events_router;
use crate::prompts::render_router;
use crate::ratelimit::rate_limit;
use crate::share::share_router;
use crate::state::AppState;
use crate::users::user_router;

/// Build the router with every route mounted under `/v1`.
pub fn build_router(state: AppState, share_prefix: &str) -> Router {
    let v1 = Router::new()
        .nest(
            "/chat",
            crud_router::<Chat>()
                .merge(messages_router())
                .with_state(state.chats.clone()),
        )
        .nest(
            "/prompts/template",
            crud_router::<PromptTemplate>()
                .merge(render_router())
                .with_state(state.templates.clone()),
        )
        .nest("/prompts/prompt", crud_router::<Prompt>().with_state(state.prompts.clone()))
        .nest(
            "/completion/parameters",
            crud_router::<CompletionParameters>().with_state(state.parameters.clone()),
        )
        .nest(&format!("/{}", share_prefix.trim_matches('/')), share_router())
        .merge(user_router())
        .merge(events_router());

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.db.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"status": "closed"})))
    } else {
        (StatusCode::OK, Json(serde_json::json!({"status": "healthy"})))
    }
}

/// Periodically reclaim rows whose TTL has lapsed. Stops once the database
/// is shut down.
pub fn start_purge_task(db: Database, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if db.is_closed() {
                break;
            }
            match purge_expired(&db).await {
                Ok(stats) if stats.total() > 0 => info!(
                    documents = stats.documents,
                    values = stats.values,
                    ledger_entries = stats.ledger_entries,
                    "expired rows purged"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "expired row sweep failed"),
            }
        }
    })
}

/// Bind, serve and start background tasks.
pub async fn start(settings: &ParleySettings, db: Database) -> Result<ServerHandle, ServerError> {
    let state = AppState::new(db.clone(), settings)?;
    let events = state.events.clone();
    let router = build_router(state, &settings.share.prefix);

    let listener = TcpListener::bind((settings.server.host.as_str(), settings.server.port)).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "parley server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server exited with error");
        }
    });
    let sweeper = start_purge_task(db, Duration::from_secs(settings.server.purge_interval_secs));

    Ok(ServerHandle {
        addr,
        events,
        shutdown: Some(shutdown_tx),
        server,
        sweeper,
    })
}

/// Handle returned by [`start`]. Keeps the server and sweeper alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    events: EventBus,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections, end open event streams and wait for
    /// in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let stopped = self.events.stop_all();
        if stopped > 0 {
            info!(subscribers = stopped, "event streams stopped");
        }
        self.sweeper.abort();
        if let Err(e) = (&mut self.server).await {
            warn!(error = %e, "server task did not finish cleanly");
        }
        info!("parley server stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::identity::USER_HEADER;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use parley_core::events::{CrudAction, EventAction, EventRecord};
    use parley_core::{ErrorKind, ManualClock};
    use parley_share::LinkPurpose;
    use parley_store::SearchIndex;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn setup() -> (Router, AppState) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let db = Database::in_memory(clock).unwrap();
        SearchIndex::new(db.clone()).migrate_all().await.unwrap();
        let settings = ParleySettings::default();
        let state = AppState::new(db, &settings).unwrap();
        (build_router(state.clone(), &settings.share.prefix), state)
    }

    fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    // ── health / identity ──

    #[tokio::test]
    async fn health_reports_database_state() {
        let (app, state) = setup().await;
        let (status, body) = send(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        state.db.shutdown().unwrap();
        let (status, _) = send(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let (app, _) = setup().await;
        let (status, body) = send(&app, request(Method::GET, "/v1/chat", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");
    }

    // ── crud ──

    #[tokio::test]
    async fn chat_crud_round() {
        let (app, _) = setup().await;
        let (status, created) = send(
            &app,
            request(Method::POST, "/v1/chat", Some("u1"), Some(json!({"messages": []}))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], 1);
        assert_eq!(created["owner"], "u1");
        assert_eq!(created["class_name"], "Chat");

        let (status, fetched) = send(&app, request(Method::GET, "/v1/chat/1", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let replacement = json!({"messages": [{"role": "system", "content": "be brief"}]});
        let (status, updated) =
            send(&app, request(Method::PUT, "/v1/chat/1", Some("u1"), Some(replacement))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["object"]["messages"][0]["content"], "be brief");

        let (status, _) = send(&app, request(Method::DELETE, "/v1/chat/1", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, request(Method::DELETE, "/v1/chat/1", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let (app, _) = setup().await;
        send(&app, request(Method::POST, "/v1/chat", Some("u1"), Some(json!({})))).await;
        let (status, _) = send(&app, request(Method::GET, "/v1/chat/1", Some("u2"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, listed) = send(&app, request(Method::GET, "/v1/chat", Some("u2"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn listing_pages_and_sorts() {
        let (app, _) = setup().await;
        for _ in 0..5 {
            send(&app, request(Method::POST, "/v1/chat", Some("u1"), Some(json!({})))).await;
        }
        let (status, page) = send(
            &app,
            request(
                Method::GET,
                "/v1/chat?offset=1&limit=2&sorting_field=id&ascending=false",
                Some("u1"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<u64> = page
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, [4, 3]);

        let (status, _) = send(&app, request(Method::GET, "/v1/chat?limit=0", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_without_index_is_not_implemented() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let db = Database::in_memory(clock).unwrap();
        let settings = ParleySettings::default();
        let app = build_router(AppState::new(db, &settings).unwrap(), &settings.share.prefix);
        let (status, body) = send(&app, request(Method::GET, "/v1/prompts/prompt", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["kind"], "index_not_implemented");
    }

    #[tokio::test]
    async fn chat_messages_append_and_edit() {
        let (app, _) = setup().await;
        send(&app, request(Method::POST, "/v1/chat", Some("u1"), Some(json!({})))).await;
        for text in ["a", "b"] {
            let (status, _) = send(
                &app,
                request(
                    Method::POST,
                    "/v1/chat/1/messages",
                    Some("u1"),
                    Some(json!({"role": "user", "content": text})),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, chat) = send(
            &app,
            request(
                Method::PATCH,
                "/v1/chat/1/messages/0",
                Some("u1"),
                Some(json!({"role": "user", "content": "edited"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chat["object"]["messages"][0]["content"], "edited");
        assert_eq!(chat["object"]["messages"][1]["content"], "b");

        let (status, _) = send(
            &app,
            request(
                Method::PATCH,
                "/v1/chat/1/messages/9",
                Some("u1"),
                Some(json!({"role": "user", "content": "x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &app,
            request(
                Method::POST,
                "/v1/chat/7/messages",
                Some("u1"),
                Some(json!({"role": "user", "content": "x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── user ──

    #[tokio::test]
    async fn profile_is_unique_per_user() {
        let (app, _) = setup().await;
        let profile = json!({"custom_instructions": {"enabled": true}});
        let (status, _) = send(
            &app,
            request(Method::POST, "/v1/user/profile", Some("u1"), Some(profile.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) =
            send(&app, request(Method::POST, "/v1/user/profile", Some("u1"), Some(profile))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "already_exists");

        let (status, fetched) = send(&app, request(Method::GET, "/v1/user/profile", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["object"]["custom_instructions"]["enabled"], true);

        let (status, _) = send(&app, request(Method::DELETE, "/v1/user/profile", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, request(Method::GET, "/v1/user/profile", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signup_then_verify_email() {
        let (app, state) = setup().await;
        let signup = json!({"first_name": "Ada", "last_name": "L", "email": "ada@example.com"});
        let (status, user) =
            send(&app, request(Method::POST, "/v1/user/signup", None, Some(signup.clone()))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["object"]["email_verified"], false);
        let (status, _) = send(&app, request(Method::POST, "/v1/user/signup", None, Some(signup))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let id = user["id"].as_u64().unwrap();
        let link = state.links.issue(id, LinkPurpose::EmailVerification).await.unwrap();
        let uri = format!("/v1/verify-email/{}/{}", link.payload, link.signature);
        let (status, verified) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["object"]["email_verified"], true);

        let reset = state.links.issue(id, LinkPurpose::PasswordReset).await.unwrap();
        let uri = format!("/v1/verify-email/{}/{}", reset.payload, reset.signature);
        let (status, _) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn password_reset_links() {
        let (app, state) = setup().await;
        let signup = json!({"first_name": "Ada", "last_name": "L", "email": "ada@example.com"});
        let (_, user) = send(&app, request(Method::POST, "/v1/user/signup", None, Some(signup))).await;
        let id = user["id"].as_u64().unwrap();

        for email in ["ADA@example.com", "nobody@example.com"] {
            let (status, _) = send(
                &app,
                request(Method::POST, "/v1/user/password-reset", None, Some(json!({"email": email}))),
            )
            .await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        let reset = state.links.issue(id, LinkPurpose::PasswordReset).await.unwrap();
        assert!(reset.uri.contains("/reset-password/"));
        let uri = format!("/v1/reset-password/{}/{}", reset.payload, reset.signature);
        let (status, account) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(account["id"], id);

        let verify = state.links.issue(id, LinkPurpose::EmailVerification).await.unwrap();
        let uri = format!("/v1/reset-password/{}/{}", verify.payload, verify.signature);
        let (status, body) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request");
    }

    // ── prompt templates ──

    #[tokio::test]
    async fn render_prompt_template() {
        let (app, _) = setup().await;
        let template = json!({
            "name": "EditCode",
            "description": "Clean up code",
            "language": "eng",
            "arguments": [{"name": "code", "type": "str"}, {"name": "passes", "type": "int"}],
            "messages": [
                {"role": "system", "content": "Make {{ passes }} passes."},
                {"role": "user", "content": "Edit: {{code}}"}
            ]
        });
        let (status, _) =
            send(&app, request(Method::POST, "/v1/prompts/template", Some("u1"), Some(template))).await;
        assert_eq!(status, StatusCode::CREATED);

        let render = |body: Value| request(Method::POST, "/v1/prompts/template/1/render", Some("u1"), Some(body));
        let (status, prompt) = send(&app, render(json!({"code": "x = 1", "passes": 2}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(prompt["name"], "EditCode");
        assert_eq!(prompt["messages"][0]["content"], "Make 2 passes.");
        assert_eq!(prompt["messages"][1]["content"], "Edit: x = 1");

        let (status, body) = send(&app, render(json!({"code": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "missing parameter: passes");
        let (status, _) = send(&app, render(json!({"code": "x", "passes": 2, "extra": true}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(&app, render(json!({"code": "x", "passes": "2"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "parameter passes must be of type int");

        let (status, _) = send(
            &app,
            request(Method::POST, "/v1/prompts/template/9/render", Some("u1"), Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── share ──

    #[tokio::test]
    async fn share_generate_and_resolve() {
        let (app, _) = setup().await;
        send(
            &app,
            request(
                Method::POST,
                "/v1/chat",
                Some("u1"),
                Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
            ),
        )
        .await;
        let (status, link) =
            send(&app, request(Method::GET, "/v1/share/Chat/1/generate", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        let payload = link["payload"].as_str().unwrap();
        let signature = link["signature"].as_str().unwrap();
        assert!(link["uri"].as_str().unwrap().ends_with(&format!("/share/{payload}/{signature}")));

        let uri = format!("/v1/share/{payload}/{signature}");
        let (status, shared) = send(&app, request(Method::GET, &uri, None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shared["object"]["messages"][0]["content"], "hi");

        let forged = format!("/v1/share/{payload}/{}", "0".repeat(64));
        let (status, body) = send(&app, request(Method::GET, &forged, None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid request");
    }

    #[tokio::test]
    async fn share_lifetime_can_be_set_per_link() {
        let (app, _) = setup().await;
        send(&app, request(Method::POST, "/v1/chat", Some("u1"), Some(json!({})))).await;
        let (status, _) = send(
            &app,
            request(Method::GET, "/v1/share/Chat/1/generate?ttl_secs=60", Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            request(Method::GET, "/v1/share/Chat/1/generate?ttl_secs=0", Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sharing_someone_elses_object_fails() {
        let (app, _) = setup().await;
        send(&app, request(Method::POST, "/v1/chat", Some("u1"), Some(json!({})))).await;
        let (status, _) =
            send(&app, request(Method::GET, "/v1/share/Chat/1/generate", Some("u2"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) =
            send(&app, request(Method::GET, "/v1/share/Widget/1/generate", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ── rate limiting ──

    #[tokio::test]
    async fn twenty_sixth_call_is_limited() {
        let (app, _) = setup().await;
        for _ in 0..25 {
            let (status, _) = send(&app, request(Method::GET, "/v1/user", Some("u1"), None)).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send(&app, request(Method::GET, "/v1/user", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["kind"], "rate_limited");

        // other users and routes keep their own ledgers
        let (status, _) = send(&app, request(Method::GET, "/v1/user", Some("u2"), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, request(Method::GET, "/v1/user/profile", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn share_generation_is_weighted() {
        let (app, _) = setup().await;
        for _ in 0..5 {
            send(&app, request(Method::GET, "/v1/share/Chat/1/generate", Some("u1"), None)).await;
        }
        let (status, _) =
            send(&app, request(Method::GET, "/v1/share/Chat/1/generate", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    // ── events ──

    #[tokio::test]
    async fn object_events_stream_as_ndjson() {
        let (app, state) = setup().await;
        let resp = app
            .clone()
            .oneshot(request(Method::GET, "/v1/events/object", Some("u1"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], crate::events::NDJSON);

        let owner = parley_core::Owner::new("u1").unwrap();
        state.chats.create(&owner, Chat::default()).await.unwrap();
        state.events.stop_all();

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: EventRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record.event.action, EventAction::Crud(CrudAction::Create));
        assert_eq!(record.owner, owner);
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected() {
        let (app, _) = setup().await;
        let (status, body) = send(&app, request(Method::GET, "/v1/events/chat", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], ErrorKind::InvalidRequest.as_str());
    }
}
