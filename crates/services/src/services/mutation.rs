use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use db::models::task::{NewTask, TaskPriority, TaskStatus, TaskUpdate};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use ts_rs::TS;

use super::{
    board::StatusIntent,
    clock::Clock,
    identity::{Identity, SessionContext},
    notification::{Notification, Notifier},
    store::{DocumentStore, StoreError},
};

const DEFAULT_ASSIGNEE: &str = "user";

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{0}")]
    Validation(String),
    #[error("You must be signed in to {0}")]
    NotSignedIn(MutationAction),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MutationAction {
    #[strum(to_string = "create a task")]
    Create,
    #[strum(to_string = "update a task")]
    Edit,
    #[strum(to_string = "move a task")]
    SetStatus,
    #[strum(to_string = "delete a task")]
    Delete,
}

impl MutationAction {
    fn failure_description(self) -> &'static str {
        match self {
            MutationAction::Create => "Failed to create task",
            MutationAction::Edit => "Failed to update task",
            MutationAction::SetStatus => "Failed to update task status",
            MutationAction::Delete => "Failed to delete task",
        }
    }
}

/// Fields of the "add task" form. Everything but the title is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskForm {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
    #[serde(with = "db::clock_time::option")]
    #[ts(type = "string | null")]
    pub start_time: Option<NaiveTime>,
    #[serde(with = "db::clock_time::option")]
    #[ts(type = "string | null")]
    pub due_time: Option<NaiveTime>,
    pub assigned_to: Option<String>,
}

impl CreateTaskForm {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Full-field edit. Status is not editable here; it only changes through a
/// board gesture. Clock times distinguish an absent field (keep) from `null`
/// (clear).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<NaiveDate>,
    #[serde(
        with = "db::clock_time::patch",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(type = "string | null")]
    pub start_time: Option<Option<NaiveTime>>,
    #[serde(
        with = "db::clock_time::patch",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(type = "string | null")]
    pub due_time: Option<Option<NaiveTime>>,
    pub assigned_to: Option<String>,
}

/// The only writer of tasks. Each call is submitted once; its outcome is
/// reported as a notification and the board catches up from the next
/// snapshot.
#[derive(Clone)]
pub struct TaskMutations {
    store: Arc<dyn DocumentStore>,
    session: SessionContext,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl TaskMutations {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: SessionContext,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            session,
            notifier,
            clock,
        }
    }

    pub async fn create(&self, form: CreateTaskForm) -> Result<String, MutationError> {
        let action = MutationAction::Create;
        let identity = self.require_identity(action)?;
        let title = self.require_title(&form.title)?;

        let now = self.clock.now_utc();
        let task = NewTask {
            title,
            description: form.description.unwrap_or_default(),
            status: TaskStatus::Todo,
            priority: form.priority.unwrap_or_default(),
            due_date: form.due_date.unwrap_or_else(|| self.clock.now_local().date()),
            start_time: form.start_time.or_else(|| NaiveTime::from_hms_opt(9, 0, 0)),
            due_time: form.due_time.or_else(|| NaiveTime::from_hms_opt(17, 0, 0)),
            assigned_to: form
                .assigned_to
                .filter(|assignee| !assignee.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ASSIGNEE.to_string()),
            created_by: identity.uid,
            created_at: now,
            updated_at: now,
        };

        let result = self.store.create(task).await;
        self.report(
            action,
            result,
            Notification::info("Task created", "New task has been added to your list"),
        )
    }

    pub async fn edit(&self, task_id: &str, edit: TaskEdit) -> Result<(), MutationError> {
        let action = MutationAction::Edit;
        let identity = self.require_identity(action)?;
        let title = match &edit.title {
            Some(title) => Some(self.require_title(title)?),
            None => None,
        };

        let fields = TaskUpdate {
            title,
            description: edit.description,
            priority: edit.priority,
            due_date: edit.due_date,
            start_time: edit.start_time,
            due_time: edit.due_time,
            assigned_to: edit.assigned_to,
            ..TaskUpdate::empty(self.clock.now_utc())
        };
        let result = self.store.update(&identity.uid, task_id, fields).await;
        self.report(
            action,
            result,
            Notification::info("Task updated", "Your changes have been saved"),
        )
    }

    pub async fn set_status(&self, intent: StatusIntent) -> Result<(), MutationError> {
        let action = MutationAction::SetStatus;
        let identity = self.require_identity(action)?;
        tracing::debug!(
            task_id = intent.task_id.as_str(),
            status = %intent.status,
            "submitting status change"
        );

        let result = self
            .store
            .update(
                &identity.uid,
                &intent.task_id,
                TaskUpdate::status(intent.status, intent.updated_at),
            )
            .await;
        self.report(
            action,
            result,
            Notification::info(
                "Task updated",
                format!("Task moved to {}", intent.status.title()),
            ),
        )
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), MutationError> {
        let action = MutationAction::Delete;
        let identity = self.require_identity(action)?;
        let result = self.store.delete(&identity.uid, task_id).await;
        self.report(
            action,
            result,
            Notification::info("Task deleted", "The task has been successfully deleted"),
        )
    }

    fn require_identity(&self, action: MutationAction) -> Result<Identity, MutationError> {
        self.session.current().ok_or_else(|| {
            let err = MutationError::NotSignedIn(action);
            self.notifier
                .notify(Notification::error("Not signed in", err.to_string()));
            err
        })
    }

    fn require_title(&self, title: &str) -> Result<String, MutationError> {
        let title = title.trim();
        if title.is_empty() {
            let err = MutationError::Validation("Title is required".to_string());
            self.notifier
                .notify(Notification::error("Error", err.to_string()));
            return Err(err);
        }
        Ok(title.to_string())
    }

    fn report<T>(
        &self,
        action: MutationAction,
        result: Result<T, StoreError>,
        success: Notification,
    ) -> Result<T, MutationError> {
        match result {
            Ok(value) => {
                self.notifier.notify(success);
                Ok(value)
            }
            Err(err) => {
                tracing::error!(error = %err, action = %action, "task mutation failed");
                self.notifier.notify(Notification::error(
                    "Error",
                    action.failure_description(),
                ));
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use tokio::sync::watch;

    use super::*;
    use crate::services::{
        clock::FixedClock,
        test_support::{RecordingStore, StoreCall},
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
    }

    fn mutations(
        store: &Arc<RecordingStore>,
        signed_in: bool,
    ) -> (TaskMutations, Notifier, watch::Sender<Option<Identity>>) {
        let identity = signed_in.then(|| Identity {
            uid: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            display_name: None,
            avatar_url: None,
        });
        let (tx, rx) = watch::channel(identity);
        let notifier = Notifier::new();
        let clock = Arc::new(FixedClock::new(today().and_hms_opt(8, 30, 0).unwrap()));
        (
            TaskMutations::new(store.clone(), SessionContext::new(rx), notifier.clone(), clock),
            notifier,
            tx,
        )
    }

    #[tokio::test]
    async fn create_applies_defaults_and_forces_todo() {
        let store = RecordingStore::shared();
        let (mutations, notifier, _tx) = mutations(&store, true);
        let mut toasts = notifier.subscribe();

        let id = mutations
            .create(CreateTaskForm::titled("  Write report "))
            .await
            .unwrap();
        assert_eq!(id, "task-1");

        let calls = store.calls();
        let StoreCall::Create(task) = &calls[0] else {
            panic!("expected a create call");
        };
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.due_date, today());
        assert_eq!(task.start_time, NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(task.due_time, NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(task.assigned_to, "user");
        assert_eq!(task.created_by, "alice");
        assert_eq!(task.created_at, task.updated_at);

        let toast = toasts.try_recv().unwrap();
        assert_eq!(toast.title, "Task created");
        assert_eq!(toast.description, "New task has been added to your list");
    }

    #[tokio::test]
    async fn blank_title_never_reaches_the_store() {
        let store = RecordingStore::shared();
        let (mutations, notifier, _tx) = mutations(&store, true);
        let mut toasts = notifier.subscribe();

        let err = mutations.create(CreateTaskForm::titled("   ")).await.unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
        assert!(store.calls().is_empty());
        assert!(toasts.try_recv().unwrap().is_error());
    }

    #[tokio::test]
    async fn signed_out_mutations_are_rejected() {
        let store = RecordingStore::shared();
        let (mutations, notifier, _tx) = mutations(&store, false);
        let mut toasts = notifier.subscribe();

        let err = mutations.delete("task-1").await.unwrap_err();
        assert!(matches!(err, MutationError::NotSignedIn(MutationAction::Delete)));
        assert_eq!(err.to_string(), "You must be signed in to delete a task");
        assert!(store.calls().is_empty());
        assert_eq!(toasts.try_recv().unwrap().title, "Not signed in");
    }

    #[tokio::test]
    async fn store_failure_names_the_action() {
        let store = RecordingStore::shared();
        store.set_fail_writes(true);
        let (mutations, notifier, _tx) = mutations(&store, true);
        let mut toasts = notifier.subscribe();

        let intent = StatusIntent {
            task_id: "t1".to_string(),
            status: TaskStatus::Completed,
            updated_at: Utc::now(),
        };
        assert!(mutations.set_status(intent).await.is_err());
        let toast = toasts.try_recv().unwrap();
        assert!(toast.is_error());
        assert_eq!(toast.description, "Failed to update task status");

        assert!(mutations.delete("t1").await.is_err());
        assert_eq!(toasts.try_recv().unwrap().description, "Failed to delete task");
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn edit_never_touches_status() {
        let store = RecordingStore::shared();
        let (mutations, _notifier, _tx) = mutations(&store, true);

        mutations
            .edit(
                "t1",
                TaskEdit {
                    title: Some("Renamed".to_string()),
                    priority: Some(TaskPriority::High),
                    ..TaskEdit::default()
                },
            )
            .await
            .unwrap();

        let updates = store.updates();
        let (id, fields) = &updates[0];
        assert_eq!(id, "t1");
        assert_eq!(fields.title.as_deref(), Some("Renamed"));
        assert_eq!(fields.priority, Some(TaskPriority::High));
        assert_eq!(fields.status, None);
        assert_eq!(fields.description, None);
    }

    #[tokio::test]
    async fn status_change_reports_target_column() {
        let store = RecordingStore::shared();
        let (mutations, notifier, _tx) = mutations(&store, true);
        let mut toasts = notifier.subscribe();

        let stamped = Utc::now();
        mutations
            .set_status(StatusIntent {
                task_id: "t1".to_string(),
                status: TaskStatus::InProgress,
                updated_at: stamped,
            })
            .await
            .unwrap();

        assert_eq!(
            store.updates(),
            vec![(
                "t1".to_string(),
                TaskUpdate::status(TaskStatus::InProgress, stamped)
            )]
        );
        assert_eq!(toasts.try_recv().unwrap().description, "Task moved to In Progress");
    }

    #[tokio::test]
    async fn writes_are_scoped_to_the_signed_in_owner() {
        let store = RecordingStore::shared();
        let (mutations, _notifier, _tx) = mutations(&store, true);

        mutations.edit("t1", TaskEdit::default()).await.unwrap();
        mutations
            .set_status(StatusIntent {
                task_id: "t1".to_string(),
                status: TaskStatus::Completed,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        mutations.delete("t1").await.unwrap();

        assert_eq!(store.write_owners(), vec!["alice"; 3]);
    }

    #[tokio::test]
    async fn edit_can_clear_a_clock_time() {
        let store = RecordingStore::shared();
        let (mutations, _notifier, _tx) = mutations(&store, true);

        let edit: TaskEdit = serde_json::from_str(r#"{"startTime":null}"#).unwrap();
        assert_eq!(edit.start_time, Some(None));
        assert_eq!(edit.due_time, None);
        mutations.edit("t1", edit).await.unwrap();

        let updates = store.updates();
        let (_, fields) = &updates[0];
        assert_eq!(fields.start_time, Some(None));
        assert_eq!(fields.due_time, None);
    }

    #[test]
    fn task_edit_bindings_export_with_their_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        TaskEdit::export_all_to(dir.path()).unwrap();

        let edit = std::fs::read_to_string(dir.path().join("TaskEdit.ts")).unwrap();
        assert!(edit.contains("startTime: string | null"));
        assert!(dir.path().join("TaskPriority.ts").exists());
    }
}
