use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Lifecycle of a task projection row. A row starts `Reserved` the moment a
/// task is first seen (before the channel thread exists) and becomes
/// `Linked` once a root message has been posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Reserved,
    Linked,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Reserved => "reserved",
            TaskState::Linked => "linked",
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(TaskState::Reserved),
            "linked" => Ok(TaskState::Linked),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// All columns of a task projection row, in SELECT order (must match
/// `TASK_COLUMNS` in store.rs).
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub task_id: i64,
    pub sp_item_id: Option<String>,
    pub list_key: String,
    pub customer_id: String,
    pub phase_name: String,
    pub task_name: String,
    pub workflow_id: String,
    pub correlation_id: Option<String>,
    pub category_key: Option<String>,
    pub anchor_date_type: Option<String>,
    pub start_offset_days: Option<i64>,
    pub region: String,
    pub team_id: String,
    pub channel_id: String,
    pub root_message_id: Option<String>,
    pub last_message_id: Option<String>,
    pub state: String,
    pub status: Option<String>,
    pub ack_version: i64,
    pub ack_expires_utc: Option<DateTime<Utc>>,
    pub next_chase_at_utc_cached: Option<DateTime<Utc>>,
    pub last_chase_at_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl TaskRow {
    pub fn state(&self) -> TaskState {
        self.state.parse().unwrap_or(TaskState::Reserved)
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("Completed")
    }
}

/// Identifies a sequential-gate group: tasks sharing a customer, category,
/// anchor-date type, and phase offset chase together as one unit.
#[derive(Debug, Clone, FromRow)]
pub struct GroupStatusRow {
    pub status: Option<String>,
}
