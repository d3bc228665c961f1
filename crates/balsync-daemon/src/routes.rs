//! Axum router and all HTTP handlers for balsync-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. The entity routes are the host bridge: they stand in
//! for the game server telling the engine that an entity joined, left, or
//! had its balance changed.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use balsync_core::{schedule_attach, Entity, EntityId, LedgerError, SyncError};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        flush_label, AmountRequest, AttachRequest, AttachResponse, BalanceResponse,
        DetachResponse, ErrorResponse, HealthResponse, SaveResponse, StatusResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/save", post(save))
        .route("/v1/entities/:id/attach", post(attach))
        .route("/v1/entities/:id/detach", post(detach))
        .route("/v1/entities/:id/balance", get(balance))
        .route("/v1/entities/:id/deposit", post(deposit))
        .route("/v1/entities/:id/withdraw", post(withdraw))
        .with_state(state)
}

fn error_response(err: &SyncError) -> Response {
    let status = match err {
        SyncError::Ledger(LedgerError::NoAccount(_)) => StatusCode::NOT_FOUND,
        SyncError::Ledger(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Store(_) | SyncError::OwnerContextClosed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let s = st.engine.settings();
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            auto_save_interval_secs: s.auto_save_interval_secs,
            poll_interval_secs: s.poll_interval_secs,
            offline_scan_interval_secs: s.offline_scan_interval_secs,
            attach_delay_ms: s.attach_delay_ms,
            flush_on_detach: s.flush_on_detach,
            reset_on_attach: s.reset_on_attach,
            monitor_offline_changes: s.monitor_offline_changes,
            notify_on_external_change: s.notify_on_external_change,
            starting_balance: s.starting_balance,
            attached: st.engine.attached_count(),
            tracked_snapshots: st.engine.tracked_count(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/save
// ---------------------------------------------------------------------------

pub(crate) async fn save(State(st): State<Arc<AppState>>) -> Response {
    match st.save_all().await {
        Ok(report) => (StatusCode::OK, Json(SaveResponse::from(report))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/entities/:id/attach
// ---------------------------------------------------------------------------

/// Attach now when no delay is configured, otherwise schedule it (202).
pub(crate) async fn attach(
    State(st): State<Arc<AppState>>,
    Path(id): Path<EntityId>,
    Json(req): Json<AttachRequest>,
) -> Response {
    let entity = Entity::new(id, req.name);

    if st.engine.settings().attach_delay_ms > 0 {
        schedule_attach(&st.scheduler, Arc::clone(&st.engine), entity);
        info!(entity = %id, "attach scheduled");
        return (StatusCode::ACCEPTED, Json(AttachResponse::scheduled(id))).into_response();
    }

    match st.engine.attach(&entity).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(AttachResponse::completed(id, &outcome)),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/entities/:id/detach
// ---------------------------------------------------------------------------

pub(crate) async fn detach(State(st): State<Arc<AppState>>, Path(id): Path<EntityId>) -> Response {
    let was_attached = st.engine.is_attached(id);
    match st.engine.detach(id).await {
        Ok(flush) => (
            StatusCode::OK,
            Json(DetachResponse {
                entity_id: id,
                detached: was_attached,
                flush: flush.as_ref().map(|o| flush_label(o).to_string()),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/entities/:id/balance
// ---------------------------------------------------------------------------

pub(crate) async fn balance(State(st): State<Arc<AppState>>, Path(id): Path<EntityId>) -> Response {
    match st.engine.ledger().balance(id).await {
        Ok(Some(balance)) => (
            StatusCode::OK,
            Json(BalanceResponse {
                entity_id: id,
                balance,
                attached: st.engine.is_attached(id),
                snapshot: st.engine.snapshot(id).map(Into::into),
            }),
        )
            .into_response(),
        Ok(None) => error_response(&SyncError::Ledger(LedgerError::NoAccount(id))),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/entities/:id/deposit  /v1/entities/:id/withdraw
// ---------------------------------------------------------------------------

pub(crate) async fn deposit(
    State(st): State<Arc<AppState>>,
    Path(id): Path<EntityId>,
    Json(req): Json<AmountRequest>,
) -> Response {
    let res = st.engine.ledger().deposit(id, req.amount).await;
    balance_after(&st, id, res)
}

pub(crate) async fn withdraw(
    State(st): State<Arc<AppState>>,
    Path(id): Path<EntityId>,
    Json(req): Json<AmountRequest>,
) -> Response {
    let res = st.engine.ledger().withdraw(id, req.amount).await;
    balance_after(&st, id, res)
}

fn balance_after(
    st: &AppState,
    id: EntityId,
    res: Result<rust_decimal::Decimal, SyncError>,
) -> Response {
    match res {
        Ok(balance) => (
            StatusCode::OK,
            Json(BalanceResponse {
                entity_id: id,
                balance,
                attached: st.engine.is_attached(id),
                snapshot: st.engine.snapshot(id).map(Into::into),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
