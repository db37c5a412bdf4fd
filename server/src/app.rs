use std::sync::Arc;

use crate::config::{Settings, StoreKind};
use crate::contacts::{load_contact_for_conversation, save_contact};
use crate::error::ConsoleError;
use crate::gateway::{chat_views, gateway_thread, instance_connected, EvolutionClient};
use crate::lifecycle::{apply_transition, Transition};
use crate::queue::{view_from_summary, ConversationBoard};
use crate::store::{ConsoleStore, MemoryStore, PgStore};
use crate::thread::{load_thread, send_reply};
use crate::types::*;
use crate::workflow::start_conversation;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub const AGENT_HEADER: &str = "x-agent-id";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn agent_from_headers(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.settings.default_agent_id.clone())
}

fn account(state: &AppState) -> &str {
    &state.settings.account_id
}

fn gateway(state: &AppState) -> Result<&EvolutionClient, ConsoleError> {
    state
        .gateway
        .as_ref()
        .ok_or_else(|| ConsoleError::Configuration("messaging gateway is not configured".into()))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListConversationsQuery>,
) -> impl IntoResponse {
    let summaries = match state.store.conversation_summaries(account(&state)).await {
        Ok(list) => list,
        Err(err) => return ConsoleError::from(err).into_response(),
    };
    let board = ConversationBoard::from_summaries(&summaries, Utc::now());
    Json(json!({
        "conversations": board.visible(query.tab, &query.filters()),
        "counts": board.counts(),
    }))
    .into_response()
}

async fn post_start_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartConversationBody>,
) -> impl IntoResponse {
    let agent = agent_from_headers(&state, &headers);
    match start_conversation(
        state.store.as_ref(),
        account(&state),
        &body.identifier,
        Some(&agent),
    )
    .await
    {
        Ok(view) => (StatusCode::CREATED, Json(json!({ "conversation": view }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match load_thread(state.store.as_ref(), account(&state), &conversation_id).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn post_message(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    let agent = agent_from_headers(&state, &headers);
    match send_reply(
        state.store.as_ref(),
        state.gateway.as_ref(),
        account(&state),
        &agent,
        &conversation_id,
        &body.text,
    )
    .await
    {
        Ok(message) => (StatusCode::CREATED, Json(json!({ "message": message }))).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn run_transition(
    state: &AppState,
    conversation_id: &str,
    transition: Transition,
) -> Result<ConversationView, ConsoleError> {
    let summary = state
        .store
        .conversation_summary(account(state), conversation_id)
        .await?
        .ok_or_else(|| ConsoleError::NotFound(format!("conversation {conversation_id} not found")))?;
    let mut view = view_from_summary(&summary, Utc::now());
    apply_transition(state.store.as_ref(), account(state), &mut view, &transition).await?;
    Ok(view)
}

fn transition_response(result: Result<ConversationView, ConsoleError>) -> axum::response::Response {
    match result {
        Ok(view) => Json(json!({ "conversation": view })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn post_assume(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let agent_id = agent_from_headers(&state, &headers);
    transition_response(run_transition(&state, &conversation_id, Transition::Assume { agent_id }).await)
}

async fn post_queue(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    transition_response(run_transition(&state, &conversation_id, Transition::SendToQueue).await)
}

async fn post_finish(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    transition_response(run_transition(&state, &conversation_id, Transition::Finish).await)
}

async fn post_reopen(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ReopenQuery>,
) -> impl IntoResponse {
    let agent_id = query.assign.then(|| agent_from_headers(&state, &headers));
    transition_response(run_transition(&state, &conversation_id, Transition::Reopen { agent_id }).await)
}

async fn post_urgent(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    transition_response(run_transition(&state, &conversation_id, Transition::ToggleUrgent).await)
}

async fn post_pin(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    transition_response(run_transition(&state, &conversation_id, Transition::TogglePin).await)
}

async fn post_transfer(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<TransferBody>,
) -> impl IntoResponse {
    transition_response(
        run_transition(
            &state,
            &conversation_id,
            Transition::Transfer {
                user_id: body.user_id,
            },
        )
        .await,
    )
}

async fn get_conversation_contact(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match load_contact_for_conversation(state.store.as_ref(), account(&state), &conversation_id).await
    {
        Ok(contact) => Json(json!({ "contact": contact })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn put_contact(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SaveContactBody>,
) -> impl IntoResponse {
    match save_contact(
        state.store.as_ref(),
        account(&state),
        &body.contact,
        body.conversation_id.as_deref(),
    )
    .await
    {
        Ok(saved) => {
            let status = if saved.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!(saved))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn get_gateway_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(client) = state.gateway.as_ref() else {
        return Json(json!({ "configured": false, "connected": false })).into_response();
    };
    let status = client.instance_status().await;
    let connected = status.as_ref().is_some_and(instance_connected);
    Json(json!({
        "configured": true,
        "connected": connected,
        "instance": client.instance(),
        "status": status,
    }))
    .into_response()
}

async fn post_gateway_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WebhookBody>,
) -> impl IntoResponse {
    let client = match gateway(&state) {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };
    if body.url.trim().is_empty() {
        return ConsoleError::validation("webhook url is required").into_response();
    }
    if client.set_webhook(body.url.trim(), body.events.as_deref()).await {
        Json(json!({ "ok": true })).into_response()
    } else {
        ConsoleError::Gateway("webhook registration failed".into()).into_response()
    }
}

async fn get_gateway_chats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let client = match gateway(&state) {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };
    let chats = client.list_chats().await;
    Json(json!({ "conversations": chat_views(&chats, Utc::now()) })).into_response()
}

async fn get_gateway_chat_messages(
    Path(remote_jid): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GatewayMessagesQuery>,
) -> impl IntoResponse {
    let client = match gateway(&state) {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };
    let raw = client.list_messages(&remote_jid, query.limit).await;
    Json(json!({ "messages": gateway_thread(&raw) })).into_response()
}

async fn get_gateway_contacts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let client = match gateway(&state) {
        Ok(client) => client,
        Err(err) => return err.into_response(),
    };
    Json(json!({ "contacts": client.list_contacts().await })).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/start", post(post_start_conversation))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(get_messages).post(post_message),
        )
        .route(
            "/api/conversations/{conversation_id}/assume",
            post(post_assume),
        )
        .route("/api/conversations/{conversation_id}/queue", post(post_queue))
        .route(
            "/api/conversations/{conversation_id}/finish",
            post(post_finish),
        )
        .route(
            "/api/conversations/{conversation_id}/reopen",
            post(post_reopen),
        )
        .route(
            "/api/conversations/{conversation_id}/urgent",
            post(post_urgent),
        )
        .route("/api/conversations/{conversation_id}/pin", post(post_pin))
        .route(
            "/api/conversations/{conversation_id}/transfer",
            post(post_transfer),
        )
        .route(
            "/api/conversations/{conversation_id}/contact",
            get(get_conversation_contact),
        )
        .route("/api/contacts", put(put_contact))
        .route("/api/gateway/status", get(get_gateway_status))
        .route("/api/gateway/webhook", post(post_gateway_webhook))
        .route("/api/gateway/chats", get(get_gateway_chats))
        .route(
            "/api/gateway/chats/{remote_jid}/messages",
            get(get_gateway_chat_messages),
        )
        .route("/api/gateway/contacts", get(get_gateway_contacts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn ConsoleStore>, BoxError> {
    match settings.store {
        StoreKind::Memory => {
            tracing::warn!("using in-memory store, data is lost on restart");
            let store = MemoryStore::new();
            let inbox = store
                .seed_inbox(
                    &settings.account_id,
                    Channel::Whatsapp.meta().label,
                    Channel::Whatsapp,
                    Utc::now(),
                )
                .await;
            tracing::info!(inbox_id = %inbox.id, "seeded default whatsapp inbox");
            Ok(Arc::new(store))
        }
        StoreKind::Postgres => {
            let db = PgPoolOptions::new()
                .max_connections(10)
                .connect(&settings.database_url)
                .await
                .map_err(|e| {
                    format!(
                        "failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars): {e}"
                    )
                })?;
            sqlx::migrate!("./migrations")
                .run(&db)
                .await
                .map_err(|e| format!("failed to run sqlx migrations: {e}"))?;
            Ok(Arc::new(PgStore::new(db)))
        }
    }
}

pub async fn run() -> Result<(), BoxError> {
    let settings = Settings::from_env();
    let store = open_store(&settings).await?;
    let gateway = settings.evolution.clone().map(EvolutionClient::new);

    if let (Some(client), Some(url)) = (gateway.as_ref(), settings.public_webhook_url.as_deref()) {
        if client.set_webhook(url, None).await {
            tracing::info!(url, "gateway webhook registered");
        } else {
            tracing::warn!(url, "gateway webhook registration failed");
        }
    }
    if gateway.is_none() {
        tracing::info!("EVOLUTION_API_* not set, replies are stored without relay");
    }

    let port = settings.port;
    let state = Arc::new(AppState {
        store,
        gateway,
        settings,
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;

    tracing::info!("agent console server running at http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
