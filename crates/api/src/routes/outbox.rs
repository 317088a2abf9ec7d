//! Operator endpoints for the transactional outbox: health snapshot,
//! manual processing pass, and dead-letter inspection/replay.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::DlqEntryId;
use domain::OutboxStats;
use outbox::{OutboxProcessor, OutboxService};
use serde::Serialize;
use storage::Storage;
use uuid::Uuid;

use crate::error::ApiError;

/// Shared state for the outbox routes.
pub struct OutboxState<S: Storage> {
    pub storage: S,
    pub service: OutboxService<S>,
    pub processor: Arc<OutboxProcessor<S>>,
}

/// GET /outbox/stats — the outbox health snapshot.
pub async fn stats<S: Storage + 'static>(
    State(state): State<Arc<OutboxState<S>>>,
) -> Result<Json<OutboxStats>, ApiError> {
    Ok(Json(state.service.stats().await?))
}

#[derive(Serialize)]
pub struct RunResponse {
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    /// True when another pass was already active and this one was skipped.
    pub skipped: bool,
}

/// POST /outbox/run — forces an immediate processing pass.
pub async fn run<S: Storage + 'static>(
    State(state): State<Arc<OutboxState<S>>>,
) -> Result<Json<RunResponse>, ApiError> {
    let report = state.processor.run_once().await?;
    Ok(Json(RunResponse {
        processed: report.processed,
        failed: report.failed,
        dead_lettered: report.dead_lettered,
        skipped: report.skipped,
    }))
}

#[derive(Serialize)]
pub struct DlqEntrySummary {
    pub id: DlqEntryId,
    pub event_type: String,
    pub retry_count: u32,
    pub reprocessed: bool,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// GET /outbox/dlq — lists dead-letter entries, oldest first.
pub async fn list_dlq<S: Storage + 'static>(
    State(state): State<Arc<OutboxState<S>>>,
) -> Result<Json<Vec<DlqEntrySummary>>, ApiError> {
    let entries = state.storage.dlq_entries().await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| DlqEntrySummary {
                id: entry.id,
                event_type: entry.event_type,
                retry_count: entry.retry_count,
                reprocessed: entry.reprocessed,
                created_at: entry.created_at,
                last_error: entry.failure_log.last().map(|f| f.message.clone()),
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct ReplayResponse {
    /// The fresh pending event created from the entry.
    pub event_id: common::OutboxEventId,
}

/// POST /outbox/dlq/{id}/replay — replays a dead-letter entry once.
pub async fn replay_dlq<S: Storage + 'static>(
    State(state): State<Arc<OutboxState<S>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let event = state.service.replay_dlq(DlqEntryId::from_uuid(id)).await?;
    Ok(Json(ReplayResponse { event_id: event.id }))
}
