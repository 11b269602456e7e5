use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ack::AckLinkBuilder;
use crate::clock;
use crate::config::Config;
use crate::error::{NotifyError, SorClientError};
use crate::models::TaskRow;
use crate::notify_client::NotifyClient;
use crate::sor_client::SorClient;
use crate::store;
use crate::workflow::CategoryOrder;

pub struct ChaserLoopDeps {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub sor_client: Arc<dyn SorClient>,
    pub notify_client: Arc<dyn NotifyClient>,
    pub link_builder: Arc<AckLinkBuilder>,
    pub category_order: Arc<CategoryOrder>,
}

/// Outcome of processing a single candidate, used for logging and the safety
/// valve — only `Failed` counts toward `MaxConsecutiveFailures`.
enum CandidateOutcome {
    Chased,
    Skipped(&'static str),
    Failed,
}

pub async fn chaser_loop(deps: ChaserLoopDeps, cancel: CancellationToken) {
    info!("chaser loop started");
    let cadence = StdDuration::from_secs(deps.config.chaser.cadence_minutes as u64 * 60);
    let mut consecutive_failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            info!("chaser loop shutting down");
            return;
        }

        let tick_started = std::time::Instant::now();
        match run_tick(&deps, &cancel).await {
            Ok(()) => {
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(error = %e, consecutive_failures, "chaser tick failed");
            }
        }

        if consecutive_failures >= deps.config.chaser.safety.max_consecutive_failures {
            let cool_off = StdDuration::from_secs(deps.config.chaser.safety.cool_off_minutes as u64 * 60);
            warn!(consecutive_failures, cool_off_minutes = deps.config.chaser.safety.cool_off_minutes, "cooling off after repeated failures");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(cool_off) => {}
            }
            consecutive_failures = 0;
            continue;
        }

        let elapsed = tick_started.elapsed();
        let sleep_for = cadence.checked_sub(elapsed).unwrap_or(StdDuration::from_secs(1)).max(StdDuration::from_secs(1));
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

/// Entry point for `chaser tick` — runs exactly one tick and returns.
pub async fn run_single_tick_for_cli(deps: &ChaserLoopDeps, cancel: &CancellationToken) -> Result<()> {
    run_tick(deps, cancel).await
}

async fn run_tick(deps: &ChaserLoopDeps, cancel: &CancellationToken) -> Result<()> {
    let now = Utc::now();
    let candidates = store::fetch_due_candidates(&deps.pool, now, deps.config.chaser.batch_size).await?;
    debug!(count = candidates.len(), "fetched due candidates");

    let mut failed_candidates: u32 = 0;

    for candidate in candidates {
        if cancel.is_cancelled() {
            break;
        }
        match process_candidate(deps, &candidate, now).await {
            Ok(CandidateOutcome::Chased) => info!(task_id = candidate.task_id, "chased"),
            Ok(CandidateOutcome::Skipped(reason)) => debug!(task_id = candidate.task_id, reason, "skipped candidate"),
            Ok(CandidateOutcome::Failed) => {
                failed_candidates += 1;
                warn!(task_id = candidate.task_id, "candidate processing failed; will retry next tick");
            }
            Err(e) if is_fatal_auth_error(&e) => {
                error!(task_id = candidate.task_id, error = %e, "auth failure from collaborator; aborting tick");
                return Err(e);
            }
            Err(e) => {
                failed_candidates += 1;
                warn!(task_id = candidate.task_id, error = %e, "candidate processing failed; will retry next tick");
            }
        }
    }

    // Transient per-candidate failures count toward the safety valve the same
    // as a tick-level error; a tick where every candidate timed out must not
    // reset `consecutive_failures` to zero.
    if failed_candidates > 0 {
        anyhow::bail!("{failed_candidates} candidate(s) failed this tick");
    }
    Ok(())
}

/// `401`/`403` from a collaborator is fatal for the whole tick rather than a
/// single candidate — the credential is bad and every remaining candidate
/// would fail the same way.
fn is_fatal_auth_error(err: &anyhow::Error) -> bool {
    if let Some(SorClientError::Status { status, .. }) = err.downcast_ref::<SorClientError>() {
        return *status == 401 || *status == 403;
    }
    if let Some(NotifyError::Status { status, .. }) = err.downcast_ref::<NotifyError>() {
        return *status == 401 || *status == 403;
    }
    false
}

async fn process_candidate(deps: &ChaserLoopDeps, candidate: &TaskRow, now: chrono::DateTime<Utc>) -> Result<CandidateOutcome> {
    let Some(sp_item_id) = candidate.sp_item_id.as_deref() else {
        return Ok(CandidateOutcome::Skipped("not linked"));
    };

    // Step 3: confirm against source of truth.
    let status_and_due = deps.sor_client.get_status_and_due_utc(&candidate.list_key, sp_item_id).await?;
    let Some(status_and_due) = status_and_due else {
        return Ok(CandidateOutcome::Skipped("item gone from system of record"));
    };

    if status_and_due.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("completed")) {
        store::update_status(&deps.pool, candidate.task_id, "Completed").await?;
        return Ok(CandidateOutcome::Skipped("completed"));
    }
    if let Some(due) = status_and_due.due_date_utc {
        if due > now {
            return Ok(CandidateOutcome::Skipped("not yet due"));
        }
    }

    // Step 4: sequential gate.
    if let (Some(category), Some(anchor)) = (&candidate.category_key, &candidate.anchor_date_type) {
        if let Some(predecessor) = deps.category_order.predecessor(category, anchor) {
            let start_offset = candidate.start_offset_days.unwrap_or(0);
            let group = store::fetch_group_statuses(&deps.pool, &candidate.customer_id, predecessor, anchor, start_offset).await?;
            if !store::group_is_fully_completed(&group) {
                return Ok(CandidateOutcome::Skipped("predecessor category not complete"));
            }
        }
    }

    // Step 5: window check.
    let business_window = &deps.config.chaser.business_window;
    if !clock::is_within_window(
        &candidate.region,
        business_window.start_hour_local,
        business_window.end_hour_local,
        business_window.cushion_hours,
        now,
    ) {
        let next_utc = clock::next_business_day_at_hour_utc(&candidate.region, deps.config.chaser.send_hour_local, now);
        deps.sor_client
            .update_chaser_fields(&candidate.list_key, sp_item_id, true, false, next_utc)
            .await?;
        store::update_next_chase_at(&deps.pool, candidate.task_id, next_utc).await?;
        return Ok(CandidateOutcome::Skipped("outside business window"));
    }

    // Step 6: rotate link.
    let new_version = candidate.ack_version.max(0) + 1;
    let ttl_hours = deps.config.ack_link.policy.chaser_ttl_hours.max(1);
    let expires = now + chrono::Duration::hours(ttl_hours as i64);
    let ack_url = deps
        .link_builder
        .build(candidate.task_id, new_version, expires, Some(&candidate.region), candidate.anchor_date_type.as_deref())
        .await?;

    // Step 7: post.
    let body_html = render_reminder_body(candidate, &ack_url, status_and_due.due_date_utc);
    let post_result = deps
        .notify_client
        .post_reminder(
            &candidate.team_id,
            &candidate.channel_id,
            candidate.root_message_id.as_deref(),
            &body_html,
            None,
            deps.config.chaser.thread_fallback,
        )
        .await?;
    if !post_result.ok {
        return Ok(CandidateOutcome::Failed);
    }
    if let Some(new_root) = &post_result.new_root_message_id {
        store::update_message_coordinates(&deps.pool, candidate.task_id, new_root, new_root).await?;
    }

    // Step 8: write-through + mirror.
    let next_utc = clock::next_business_day_at_hour_utc(&candidate.region, deps.config.chaser.send_hour_local, now);
    deps.sor_client
        .update_chaser_fields(&candidate.list_key, sp_item_id, true, true, next_utc)
        .await?;
    store::mirror_chase_rotation(&deps.pool, candidate.task_id, new_version, expires, now, next_utc).await?;

    Ok(CandidateOutcome::Chased)
}

fn render_reminder_body(candidate: &TaskRow, ack_url: &str, due_date_utc: Option<chrono::DateTime<Utc>>) -> String {
    let due_str = due_date_utc.map(|d| d.to_rfc3339()).unwrap_or_else(|| "unknown".to_string());
    format!(
        "<p><strong>{}</strong> was due on {} and is still open.</p><p><a href=\"{}\">Acknowledge</a></p>",
        html_escape(&candidate.task_name),
        due_str,
        ack_url
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
