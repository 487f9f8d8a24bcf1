use serde::Serialize;

pub const EVENT_TASK_CREATED: &str = "task.created";
pub const EVENT_TASK_UPDATED: &str = "task.updated";
pub const EVENT_TASK_DELETED: &str = "task.deleted";

/// Emitted after a write to the `tasks` table has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEventPayload {
    pub event_type: &'static str,
    pub task_id: String,
    pub owner: String,
}

impl TaskEventPayload {
    pub fn created(task_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            event_type: EVENT_TASK_CREATED,
            task_id: task_id.into(),
            owner: owner.into(),
        }
    }

    pub fn updated(task_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            event_type: EVENT_TASK_UPDATED,
            task_id: task_id.into(),
            owner: owner.into(),
        }
    }

    pub fn deleted(task_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            event_type: EVENT_TASK_DELETED,
            task_id: task_id.into(),
            owner: owner.into(),
        }
    }
}
