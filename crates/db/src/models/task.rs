use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

pub use crate::types::{TaskPriority, TaskStatus};
use crate::entities::task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: NaiveDate,
    #[serde(default, with = "crate::clock_time::option")]
    #[ts(type = "string | null")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "crate::clock_time::option")]
    #[ts(type = "string | null")]
    pub due_time: Option<NaiveTime>,
    #[serde(default)]
    pub assigned_to: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task as submitted for creation, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: NaiveDate,
    #[serde(default, with = "crate::clock_time::option")]
    #[ts(type = "string | null")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "crate::clock_time::option")]
    #[ts(type = "string | null")]
    pub due_time: Option<NaiveTime>,
    pub assigned_to: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changed fields of a task. The owner is fixed at creation and has no field
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// `Some(None)` clears the start time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::clock_time::patch"
    )]
    #[ts(type = "string | null")]
    pub start_time: Option<Option<NaiveTime>>,
    /// `Some(None)` clears the due time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::clock_time::patch"
    )]
    #[ts(type = "string | null")]
    pub due_time: Option<Option<NaiveTime>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskUpdate {
    pub fn empty(updated_at: DateTime<Utc>) -> Self {
        Self {
            title: None,
            description: None,
            status: None,
            priority: None,
            due_date: None,
            start_time: None,
            due_time: None,
            assigned_to: None,
            updated_at,
        }
    }

    pub fn status(status: TaskStatus, updated_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            ..Self::empty(updated_at)
        }
    }
}

impl Task {
    /// Local wall-clock moment the task is due. Tasks without a due time are
    /// due at the last minute of their due date.
    pub fn due_at(&self) -> NaiveDateTime {
        let time = self
            .due_time
            .or_else(|| NaiveTime::from_hms_opt(23, 59, 59))
            .unwrap_or(NaiveTime::MIN);
        self.due_date.and_time(time)
    }

    fn from_model(model: task::Model) -> Self {
        Self {
            id: model.uuid.to_string(),
            title: model.title,
            description: model.description,
            status: model.status,
            priority: model.priority,
            due_date: model.due_date,
            start_time: model.start_time,
            due_time: model.due_time,
            assigned_to: model.assigned_to,
            created_by: model.created_by,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    pub async fn find_by_owner<C: ConnectionTrait>(db: &C, owner: &str) -> Result<Vec<Self>, DbErr> {
        let records = task::Entity::find()
            .filter(task::Column::CreatedBy.eq(owner))
            .order_by_asc(task::Column::CreatedAt)
            .order_by_asc(task::Column::Id)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Self>, DbErr> {
        let Ok(uuid) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(uuid))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &NewTask,
        task_id: Uuid,
    ) -> Result<Self, DbErr> {
        let active = task::ActiveModel {
            uuid: Set(task_id),
            title: Set(data.title.clone()),
            description: Set(data.description.clone()),
            status: Set(data.status),
            priority: Set(data.priority),
            due_date: Set(data.due_date),
            start_time: Set(data.start_time),
            due_time: Set(data.due_time),
            assigned_to: Set(data.assigned_to.clone()),
            created_by: Set(data.created_by.clone()),
            created_at: Set(data.created_at.into()),
            updated_at: Set(data.updated_at.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    /// Applies `data` to the task `id` owned by `owner`. A task owned by
    /// someone else is reported as not found.
    pub async fn update<C: ConnectionTrait>(
        db: &C,
        owner: &str,
        id: &str,
        data: &TaskUpdate,
    ) -> Result<Self, DbErr> {
        let not_found = || DbErr::RecordNotFound("Task not found".to_string());
        let uuid = Uuid::parse_str(id).map_err(|_| not_found())?;
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(uuid))
            .filter(task::Column::CreatedBy.eq(owner))
            .one(db)
            .await?
            .ok_or_else(not_found)?;

        let mut active: task::ActiveModel = record.into();
        if let Some(title) = data.title.clone() {
            active.title = Set(title);
        }
        if let Some(description) = data.description.clone() {
            active.description = Set(description);
        }
        if let Some(status) = data.status {
            active.status = Set(status);
        }
        if let Some(priority) = data.priority {
            active.priority = Set(priority);
        }
        if let Some(due_date) = data.due_date {
            active.due_date = Set(due_date);
        }
        if let Some(start_time) = data.start_time {
            active.start_time = Set(start_time);
        }
        if let Some(due_time) = data.due_time {
            active.due_time = Set(due_time);
        }
        if let Some(assigned_to) = data.assigned_to.clone() {
            active.assigned_to = Set(assigned_to);
        }
        active.updated_at = Set(data.updated_at.into());

        let updated = active.update(db).await?;
        Ok(Self::from_model(updated))
    }

    /// Removes the task `id` owned by `owner`. Returns false when no such row
    /// exists for that owner.
    pub async fn delete<C: ConnectionTrait>(db: &C, owner: &str, id: &str) -> Result<bool, DbErr> {
        let Ok(uuid) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let result = task::Entity::delete_many()
            .filter(task::Column::Uuid.eq(uuid))
            .filter(task::Column::CreatedBy.eq(owner))
            .exec(db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
