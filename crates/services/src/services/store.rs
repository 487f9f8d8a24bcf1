use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use db::{
    DBService, DbErr,
    events::TaskEventPayload,
    models::task::{NewTask, Task, TaskUpdate},
};
use futures::{Stream, StreamExt, stream::BoxStream};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Live feed of full task snapshots for one owner. Each item replaces the
/// previous one. Dropping the subscription releases it.
pub struct TaskSubscription {
    owner: String,
    stream: BoxStream<'static, Result<Vec<Task>, StoreError>>,
}

impl TaskSubscription {
    pub fn new(
        owner: impl Into<String>,
        stream: BoxStream<'static, Result<Vec<Task>, StoreError>>,
    ) -> Self {
        Self {
            owner: owner.into(),
            stream,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Stream for TaskSubscription {
    type Item = Result<Vec<Task>, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        tracing::debug!(owner = self.owner.as_str(), "task subscription released");
    }
}

/// Remote record store for tasks. Writes resolve once the store has accepted
/// them; their effect becomes visible through [`DocumentStore::subscribe`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn subscribe(&self, owner: &str) -> Result<TaskSubscription, StoreError>;

    /// Returns the id the store assigned.
    async fn create(&self, task: NewTask) -> Result<String, StoreError>;

    /// Updates a task owned by `owner`. Tasks of other owners are reported as
    /// [`StoreError::NotFound`].
    async fn update(&self, owner: &str, id: &str, fields: TaskUpdate) -> Result<(), StoreError>;

    /// Deletes a task owned by `owner`, with the same scoping as `update`.
    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError>;
}

/// sqlite-backed store. Every committed write is announced on an internal
/// event channel; subscribers refetch their owner's rows when an event for
/// that owner arrives.
#[derive(Clone)]
pub struct LocalDocumentStore {
    db: DBService,
    events: broadcast::Sender<TaskEventPayload>,
}

impl LocalDocumentStore {
    pub fn new(db: DBService) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { db, events }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    fn emit(&self, payload: TaskEventPayload) {
        tracing::trace!(
            event_type = payload.event_type,
            task_id = payload.task_id.as_str(),
            "task event"
        );
        let _ = self.events.send(payload);
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn subscribe(&self, owner: &str) -> Result<TaskSubscription, StoreError> {
        // Subscribe before the first fetch so no write falls between the two.
        let receiver = self.events.subscribe();
        let initial = Task::find_by_owner(&self.db.pool, owner).await?;

        let filter_owner = owner.to_string();
        let fetch_owner = owner.to_string();
        let db = self.db.clone();

        let changes = BroadcastStream::new(receiver).filter_map(move |event| {
            let owner = filter_owner.clone();
            async move {
                match event {
                    Ok(payload) => (payload.owner == owner).then_some(()),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "task event receiver lagged, refetching");
                        Some(())
                    }
                }
            }
        });
        let snapshots = changes.then(move |()| {
            let db = db.clone();
            let owner = fetch_owner.clone();
            async move {
                Task::find_by_owner(&db.pool, &owner)
                    .await
                    .map_err(StoreError::from)
            }
        });

        let stream = futures::stream::once(async move { Ok(initial) })
            .chain(snapshots)
            .boxed();
        tracing::debug!(owner, "task subscription opened");
        Ok(TaskSubscription::new(owner, stream))
    }

    async fn create(&self, task: NewTask) -> Result<String, StoreError> {
        let created = Task::create(&self.db.pool, &task, Uuid::new_v4()).await?;
        self.emit(TaskEventPayload::created(&created.id, &created.created_by));
        Ok(created.id)
    }

    async fn update(&self, owner: &str, id: &str, fields: TaskUpdate) -> Result<(), StoreError> {
        let updated = Task::update(&self.db.pool, owner, id, &fields)
            .await
            .map_err(|err| match err {
                DbErr::RecordNotFound(_) => StoreError::NotFound(id.to_string()),
                other => StoreError::Database(other),
            })?;
        self.emit(TaskEventPayload::updated(&updated.id, &updated.created_by));
        Ok(())
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        if !Task::delete(&self.db.pool, owner, id).await? {
            tracing::debug!(task_id = id, owner, "delete matched no task");
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.emit(TaskEventPayload::deleted(id, owner));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveTime, Utc};
    use db::models::task::{TaskPriority, TaskStatus};
    use tokio::time::timeout;

    use super::*;

    async fn store() -> LocalDocumentStore {
        LocalDocumentStore::new(DBService::in_memory().await.unwrap())
    }

    fn new_task(title: &str, owner: &str) -> NewTask {
        let now = Utc::now();
        NewTask {
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0),
            due_time: NaiveTime::from_hms_opt(17, 0, 0),
            assigned_to: "user".to_string(),
            created_by: owner.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn next_snapshot(subscription: &mut TaskSubscription) -> Vec<Task> {
        timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("snapshot in time")
            .expect("stream open")
            .expect("snapshot ok")
    }

    #[tokio::test]
    async fn subscription_starts_with_current_rows() {
        let store = store().await;
        store.create(new_task("existing", "alice")).await.unwrap();

        let mut subscription = store.subscribe("alice").await.unwrap();
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "existing");
    }

    #[tokio::test]
    async fn every_write_pushes_a_fresh_snapshot() {
        let store = store().await;
        let mut subscription = store.subscribe("alice").await.unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());

        let id = store.create(new_task("write report", "alice")).await.unwrap();
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);

        store
            .update(
                "alice",
                &id,
                TaskUpdate::status(TaskStatus::Completed, Utc::now()),
            )
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot[0].status, TaskStatus::Completed);

        store.delete("alice", &id).await.unwrap();
        assert!(next_snapshot(&mut subscription).await.is_empty());
    }

    #[tokio::test]
    async fn other_owners_writes_are_not_pushed() {
        let store = store().await;
        let mut subscription = store.subscribe("alice").await.unwrap();
        next_snapshot(&mut subscription).await;

        store.create(new_task("not yours", "bob")).await.unwrap();
        let pending = timeout(Duration::from_millis(100), subscription.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn updating_missing_task_is_not_found() {
        let store = store().await;
        let err = store
            .update(
                "alice",
                &Uuid::new_v4().to_string(),
                TaskUpdate::status(TaskStatus::Completed, Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn writes_to_another_owners_task_are_refused() {
        let store = store().await;
        let id = store.create(new_task("private", "alice")).await.unwrap();
        let mut bobs = store.subscribe("bob").await.unwrap();
        assert!(next_snapshot(&mut bobs).await.is_empty());

        let err = store
            .update("bob", &id, TaskUpdate::status(TaskStatus::Completed, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = store.delete("bob", &id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let mut alices = store.subscribe("alice").await.unwrap();
        let snapshot = next_snapshot(&mut alices).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, TaskStatus::Todo);
    }
}
