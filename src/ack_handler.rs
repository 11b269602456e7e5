use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::ack::AckVerifier;
use crate::config::IdentityConfig;
use crate::error::AckError;
use crate::identity;
use crate::sor_client::SorClient;
use crate::store;

#[derive(Clone)]
pub struct AckHandlerState {
    pub pool: sqlx::SqlitePool,
    pub verifier: Arc<AckVerifier>,
    pub sor_client: Arc<dyn SorClient>,
    pub identity_config: Arc<IdentityConfig>,
}

pub fn build_router(state: AckHandlerState) -> Router {
    Router::new().route("/ack", get(ack_handler)).with_state(state)
}

/// Query parameters accepted by `GET /ack` (spec.md §4.8). `tid`/`v` identify
/// the current payload shape; `id`/`list` identify the legacy shape. Exactly
/// one of `tid` or `id` is expected to be present.
#[derive(Debug, Deserialize)]
pub struct AckQuery {
    pub tid: Option<i64>,
    pub v: Option<i64>,
    pub id: Option<String>,
    pub list: Option<String>,
    pub exp: i64,
    pub sig: String,
    pub c: Option<String>,
    pub r: Option<String>,
    pub a: Option<String>,
}

async fn ack_handler(
    State(state): State<AckHandlerState>,
    Query(query): Query<AckQuery>,
    headers: HeaderMap,
) -> Response {
    let now = Utc::now();

    let identity = identity::resolve_identity(&headers, &state.identity_config);

    let (list_id, item_id) = match resolve_target(&state, &query, now).await {
        Ok(target) => target,
        Err(response) => return response,
    };

    let Some(identity) = identity else {
        warn!("ack click with no resolvable identity");
        return (StatusCode::UNAUTHORIZED, "Could not resolve your identity.").into_response();
    };

    let ack_by_email_or_upn = identity.upn.or(identity.email).unwrap_or_default();
    match state
        .sor_client
        .mark_completed(&list_id, &item_id, &identity.display_name, &ack_by_email_or_upn)
        .await
    {
        Ok(()) => info!(item_id, "task acknowledged"),
        Err(e) => error!(item_id, error = %e, "failed to mark task completed; next tick will reconcile"),
    }

    (StatusCode::OK, "Acknowledged. You can close this window.").into_response()
}

/// Dispatches to the current (`tid`) or legacy (`id`) payload shape and
/// returns the `(list_id, item_id)` to mark complete, or an error response.
async fn resolve_target(state: &AckHandlerState, query: &AckQuery, now: chrono::DateTime<Utc>) -> Result<(String, String), Response> {
    if let Some(task_id) = query.tid {
        let Some(ack_version) = query.v else {
            return Err((StatusCode::BAD_REQUEST, "missing required query parameter: v").into_response());
        };

        let task = store::fetch_task_by_id(&state.pool, task_id)
            .await
            .map_err(|e| {
                error!(task_id, error = %e, "failed to fetch task for ack verification");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error.").into_response()
            })?
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "unknown task").into_response())?;

        state
            .verifier
            .verify_current(task_id, ack_version, query.exp, &query.sig, task.ack_version, now)
            .await
            .map_err(ack_error_response)?;

        let sp_item_id = task.sp_item_id.ok_or_else(|| (StatusCode::BAD_REQUEST, "task is not linked").into_response())?;
        Ok((task.list_key, sp_item_id))
    } else if let Some(item_id) = &query.id {
        let list_id = query.list.clone().unwrap_or_default();
        state
            .verifier
            .verify_legacy(item_id, query.exp, &query.sig, query.c.as_deref(), now)
            .await
            .map_err(ack_error_response)?;
        Ok((list_id, item_id.clone()))
    } else {
        Err((StatusCode::BAD_REQUEST, "missing required query parameter: tid or id").into_response())
    }
}

fn ack_error_response(err: AckError) -> Response {
    match err {
        AckError::Expired => (StatusCode::GONE, "This link has expired.").into_response(),
        AckError::BadSignature | AckError::Replay { .. } => (StatusCode::UNAUTHORIZED, "Invalid link.").into_response(),
    }
}
