use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::models::{GroupStatusRow, TaskRow, TaskState};

/// All task_id_map columns in SELECT order (must match `TaskRow` field order).
const TASK_COLUMNS: &str = "task_id, sp_item_id, list_key, customer_id, phase_name, task_name, workflow_id,
    correlation_id, category_key, anchor_date_type, start_offset_days, region, team_id, channel_id,
    root_message_id, last_message_id, state, status, ack_version, ack_expires_utc,
    next_chase_at_utc_cached, last_chase_at_utc, created_utc";

/// Due-candidate query: rows ready to chase, oldest-due first, batch-limited.
pub async fn fetch_due_candidates(pool: &SqlitePool, now: DateTime<Utc>, batch_size: u32) -> Result<Vec<TaskRow>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM task_id_map
         WHERE next_chase_at_utc_cached IS NOT NULL
           AND next_chase_at_utc_cached <= ?
           AND (status IS NULL OR status <> 'Completed')
         ORDER BY next_chase_at_utc_cached ASC
         LIMIT ?"
    );
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(now)
        .bind(batch_size)
        .fetch_all(pool)
        .await
        .context("fetching due candidates")?;
    Ok(rows)
}

/// Group status query powering the sequential gate (§4.7): statuses of all
/// `linked` rows sharing a customer, category, anchor-date type, and offset.
pub async fn fetch_group_statuses(
    pool: &SqlitePool,
    customer_id: &str,
    category_key: &str,
    anchor_date_type: &str,
    start_offset_days: i64,
) -> Result<Vec<GroupStatusRow>> {
    let rows = sqlx::query_as::<_, GroupStatusRow>(
        "SELECT status FROM task_id_map
         WHERE customer_id = ? AND category_key = ? AND anchor_date_type = ? AND start_offset_days = ?
           AND state = 'linked'
         ORDER BY task_name",
    )
    .bind(customer_id)
    .bind(category_key)
    .bind(anchor_date_type)
    .bind(start_offset_days)
    .fetch_all(pool)
    .await
    .context("fetching group statuses")?;
    Ok(rows)
}

/// Reserve a new task row with its dimensional keys; starts life in `reserved`.
#[allow(clippy::too_many_arguments)]
pub async fn reserve_task(
    pool: &SqlitePool,
    list_key: &str,
    customer_id: &str,
    phase_name: &str,
    task_name: &str,
    workflow_id: &str,
    correlation_id: Option<&str>,
    region: &str,
    team_id: &str,
    channel_id: &str,
    created_utc: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO task_id_map
            (list_key, customer_id, phase_name, task_name, workflow_id, correlation_id,
             region, team_id, channel_id, state, ack_version, created_utc)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(list_key)
    .bind(customer_id)
    .bind(phase_name)
    .bind(task_name)
    .bind(workflow_id)
    .bind(correlation_id)
    .bind(region)
    .bind(team_id)
    .bind(channel_id)
    .bind(TaskState::Reserved.as_str())
    .bind(created_utc)
    .execute(pool)
    .await
    .context("reserving task")?;

    let task_id = result.last_insert_rowid();
    debug!(task_id, customer_id, task_name, "reserved task");
    Ok(task_id)
}

/// Link a reserved task to its system-of-record item, transitioning to `linked`.
pub async fn link_task(pool: &SqlitePool, task_id: i64, sp_item_id: &str) -> Result<()> {
    sqlx::query("UPDATE task_id_map SET sp_item_id = ?, state = ? WHERE task_id = ?")
        .bind(sp_item_id)
        .bind(TaskState::Linked.as_str())
        .bind(task_id)
        .execute(pool)
        .await
        .context("linking task")?;
    debug!(task_id, sp_item_id, "linked task");
    Ok(())
}

pub async fn update_status(pool: &SqlitePool, task_id: i64, status: &str) -> Result<()> {
    sqlx::query("UPDATE task_id_map SET status = ? WHERE task_id = ?")
        .bind(status)
        .bind(task_id)
        .execute(pool)
        .await
        .context("updating status")?;
    Ok(())
}

pub async fn update_next_chase_at(pool: &SqlitePool, task_id: i64, next_chase_at_utc: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE task_id_map SET next_chase_at_utc_cached = ? WHERE task_id = ?")
        .bind(next_chase_at_utc)
        .bind(task_id)
        .execute(pool)
        .await
        .context("updating next_chase_at_utc_cached")?;
    Ok(())
}

/// Atomic mirror write performed after a successful chaser post (spec.md §4.7 step 8).
pub async fn mirror_chase_rotation(
    pool: &SqlitePool,
    task_id: i64,
    ack_version: i64,
    ack_expires_utc: DateTime<Utc>,
    last_chase_at_utc: DateTime<Utc>,
    next_chase_at_utc: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE task_id_map
         SET ack_version = ?, ack_expires_utc = ?, last_chase_at_utc = ?, next_chase_at_utc_cached = ?
         WHERE task_id = ?",
    )
    .bind(ack_version)
    .bind(ack_expires_utc)
    .bind(last_chase_at_utc)
    .bind(next_chase_at_utc)
    .bind(task_id)
    .execute(pool)
    .await
    .context("mirroring chase rotation")?;
    Ok(())
}

pub async fn update_message_coordinates(
    pool: &SqlitePool,
    task_id: i64,
    root_message_id: &str,
    last_message_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE task_id_map SET root_message_id = ?, last_message_id = ? WHERE task_id = ?")
        .bind(root_message_id)
        .bind(last_message_id)
        .bind(task_id)
        .execute(pool)
        .await
        .context("updating message coordinates")?;
    Ok(())
}

pub async fn update_category_attributes(
    pool: &SqlitePool,
    task_id: i64,
    category_key: Option<&str>,
    anchor_date_type: Option<&str>,
    start_offset_days: Option<i64>,
) -> Result<()> {
    sqlx::query("UPDATE task_id_map SET category_key = ?, anchor_date_type = ?, start_offset_days = ? WHERE task_id = ?")
        .bind(category_key)
        .bind(anchor_date_type)
        .bind(start_offset_days)
        .bind(task_id)
        .execute(pool)
        .await
        .context("updating category attributes")?;
    Ok(())
}

pub async fn fetch_task_by_id(pool: &SqlitePool, task_id: i64) -> Result<Option<TaskRow>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM task_id_map WHERE task_id = ?");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("fetching task by id")?;
    Ok(row)
}

pub async fn fetch_task_by_sp_item_id(pool: &SqlitePool, sp_item_id: &str) -> Result<Option<TaskRow>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM task_id_map WHERE sp_item_id = ?");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(sp_item_id)
        .fetch_optional(pool)
        .await
        .context("fetching task by sp_item_id")?;
    Ok(row)
}

/// Count rows in a group that are fully `Completed`, used by the sequential gate.
pub fn group_is_fully_completed(rows: &[GroupStatusRow]) -> bool {
    !rows.is_empty() && rows.iter().all(|r| r.status.as_deref() == Some("Completed"))
}

pub async fn get_config_value(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT value FROM config_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("reading config_store")?;
    Ok(row.map(|r| r.get::<String, _>("value")))
}

pub async fn set_config_value(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO config_store (key, value, updated_at) VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("writing config_store")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::create_pool;
    use chrono::TimeZone as _;

    async fn test_pool() -> SqlitePool {
        let dir = tempfile::tempdir().unwrap();
        let wf = dir.path().join("workflow.json");
        std::fs::write(&wf, "{}").unwrap();
        let config: Config = toml::from_str(&format!(
            "[chaser]\ndata_dir = {:?}\nworkflow_template_path = {:?}\n[ack_link]\nbase_url = \"https://example.test\"\n\
             [sor_client]\nbase_url = \"https://sor.example.test\"\n\
             [notify_client]\nbase_url = \"https://chat.example.test\"\n",
            dir.path(),
            wf
        ))
        .unwrap();
        // keep tempdir alive for the lifetime of the pool by leaking it in tests
        Box::leak(Box::new(dir));
        create_pool(&config).await.unwrap()
    }

    #[tokio::test]
    async fn reserve_then_link_round_trip() {
        let pool = test_pool().await;
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let task_id = reserve_task(
            &pool, "Tasks", "cust-1", "Phase A", "Task A", "wf-1", None, "EMEA", "team-1", "chan-1", now,
        )
        .await
        .unwrap();

        let row = fetch_task_by_id(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(row.state(), TaskState::Reserved);
        assert!(row.sp_item_id.is_none());

        link_task(&pool, task_id, "sp-item-1").await.unwrap();
        let row = fetch_task_by_id(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(row.state(), TaskState::Linked);
        assert_eq!(row.sp_item_id.as_deref(), Some("sp-item-1"));
    }

    #[tokio::test]
    async fn due_candidates_excludes_completed_and_future() {
        let pool = test_pool().await;
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let overdue = reserve_task(&pool, "T", "c", "p", "overdue", "wf", None, "UTC", "t", "ch", now)
            .await
            .unwrap();
        update_next_chase_at(&pool, overdue, now - chrono::Duration::hours(1)).await.unwrap();

        let future = reserve_task(&pool, "T", "c", "p", "future", "wf", None, "UTC", "t", "ch", now)
            .await
            .unwrap();
        update_next_chase_at(&pool, future, now + chrono::Duration::hours(1)).await.unwrap();

        let completed = reserve_task(&pool, "T", "c", "p", "completed", "wf", None, "UTC", "t", "ch", now)
            .await
            .unwrap();
        update_next_chase_at(&pool, completed, now - chrono::Duration::hours(1)).await.unwrap();
        update_status(&pool, completed, "Completed").await.unwrap();

        let candidates = fetch_due_candidates(&pool, now, 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].task_id, overdue);
    }

    #[tokio::test]
    async fn group_completion_gate() {
        let rows = vec![
            GroupStatusRow { status: Some("Completed".to_string()) },
            GroupStatusRow { status: Some("Completed".to_string()) },
        ];
        assert!(group_is_fully_completed(&rows));

        let rows = vec![
            GroupStatusRow { status: Some("Completed".to_string()) },
            GroupStatusRow { status: Some("In Progress".to_string()) },
        ];
        assert!(!group_is_fully_completed(&rows));

        assert!(!group_is_fully_completed(&[]));
    }

    #[tokio::test]
    async fn config_store_roundtrip() {
        let pool = test_pool().await;
        assert_eq!(get_config_value(&pool, "LinkSigningKey").await.unwrap(), None);
        set_config_value(&pool, "LinkSigningKey", "secret-value").await.unwrap();
        assert_eq!(
            get_config_value(&pool, "LinkSigningKey").await.unwrap(),
            Some("secret-value".to_string())
        );
        set_config_value(&pool, "LinkSigningKey", "rotated").await.unwrap();
        assert_eq!(get_config_value(&pool, "LinkSigningKey").await.unwrap(), Some("rotated".to_string()));
    }
}
