use std::sync::Arc;

use db::models::task::{Task, TaskStatus};
use futures::StreamExt;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use super::{
    identity::{Identity, SessionContext},
    notification::{Notification, Notifier},
    reminder::ReminderService,
    store::{DocumentStore, StoreError, TaskSubscription},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct Column {
    pub id: TaskStatus,
    pub title: String,
    pub tasks: Vec<Task>,
}

impl Column {
    fn empty(status: TaskStatus) -> Self {
        Self {
            id: status,
            title: status.title().to_string(),
            tasks: Vec::new(),
        }
    }
}

/// The three status columns in fixed order. Every task sits in exactly the
/// column whose id equals its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct Board {
    pub columns: [Column; 3],
}

impl Default for Board {
    fn default() -> Self {
        Self {
            columns: TaskStatus::ALL.map(Column::empty),
        }
    }
}

impl Board {
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut board = Self::default();
        for task in tasks {
            board.columns[task.status.position()].tasks.push(task);
        }
        board
    }

    pub fn column(&self, status: TaskStatus) -> &Column {
        &self.columns[status.position()]
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.columns.iter().flat_map(|column| column.tasks.iter())
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks().find(|task| task.id == task_id)
    }

    pub fn column_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.columns
            .iter()
            .find(|column| column.tasks.iter().any(|task| task.id == task_id))
            .map(|column| column.id)
    }

    pub fn len(&self) -> usize {
        self.columns.iter().map(|column| column.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a [`Board`] in sync with the store's live feed for whoever is
/// signed in. The feed is reopened on every identity change and released
/// when the projection is dropped.
pub struct RealtimeProjection {
    board: watch::Receiver<Board>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct ProjectionWorker {
    store: Arc<dyn DocumentStore>,
    identity: watch::Receiver<Option<Identity>>,
    board: watch::Sender<Board>,
    reminders: ReminderService,
    notifier: Notifier,
    cancel: CancellationToken,
}

impl RealtimeProjection {
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        session: &SessionContext,
        reminders: ReminderService,
        notifier: Notifier,
    ) -> Self {
        let (board_tx, board_rx) = watch::channel(Board::default());
        let cancel = CancellationToken::new();
        let worker = ProjectionWorker {
            store,
            identity: session.changes(),
            board: board_tx,
            reminders,
            notifier,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());
        Self {
            board: board_rx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Board> {
        self.board.clone()
    }

    pub fn board(&self) -> Board {
        self.board.borrow().clone()
    }

    /// Stops the worker and waits for it to release its subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "projection worker ended abnormally");
        }
    }
}

impl Drop for RealtimeProjection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ProjectionWorker {
    async fn run(mut self) {
        loop {
            let identity = self.identity.borrow_and_update().clone();
            self.reminders.reset();

            let mut subscription = tokio::select! {
                _ = self.cancel.cancelled() => return,
                opened = self.open(identity) => opened,
            };

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("projection cancelled");
                        return;
                    }
                    changed = self.identity.changed() => {
                        if changed.is_err() {
                            tracing::debug!("identity source closed, stopping projection");
                            return;
                        }
                        break;
                    }
                    next = next_snapshot(&mut subscription) => match next {
                        Some(Ok(tasks)) => self.apply(tasks),
                        Some(Err(err)) => {
                            self.report_failure(&err);
                            subscription = None;
                        }
                        None => {
                            tracing::debug!("task feed ended");
                            subscription = None;
                        }
                    },
                }
            }
        }
    }

    async fn open(&self, identity: Option<Identity>) -> Option<TaskSubscription> {
        let Some(identity) = identity else {
            tracing::debug!("no identity, showing empty board");
            self.board.send_replace(Board::default());
            return None;
        };

        match self.store.subscribe(&identity.uid).await {
            Ok(subscription) => {
                tracing::debug!(uid = identity.uid.as_str(), "projection subscribed");
                Some(subscription)
            }
            Err(err) => {
                self.board.send_replace(Board::default());
                self.report_failure(&err);
                None
            }
        }
    }

    fn apply(&self, tasks: Vec<Task>) {
        tracing::trace!(count = tasks.len(), "applying task snapshot");
        self.board.send_replace(Board::from_tasks(tasks.iter().cloned()));
        self.reminders.on_snapshot(&tasks);
    }

    fn report_failure(&self, err: &StoreError) {
        tracing::error!(error = %err, "task subscription failed");
        self.notifier
            .notify(Notification::error("Error", "Failed to load tasks"));
    }
}

async fn next_snapshot(
    subscription: &mut Option<TaskSubscription>,
) -> Option<Result<Vec<Task>, StoreError>> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tokio::sync::watch;

    use super::*;
    use crate::services::{
        clock::FixedClock,
        config::{NotificationConfig, ReminderConfig},
        test_support::{RecordingStore, sample_task, wait_until},
    };

    fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: None,
            display_name: None,
            avatar_url: None,
        }
    }

    fn reminders(notifier: &Notifier) -> ReminderService {
        let now = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        ReminderService::new(
            Arc::new(FixedClock::new(now)),
            notifier.clone(),
            ReminderConfig::default(),
            &NotificationConfig::default(),
        )
    }

    fn spawn(
        store: &Arc<RecordingStore>,
        identity_rx: watch::Receiver<Option<Identity>>,
    ) -> (RealtimeProjection, Notifier) {
        let notifier = Notifier::new();
        let projection = RealtimeProjection::spawn(
            store.clone(),
            &SessionContext::new(identity_rx),
            reminders(&notifier),
            notifier.clone(),
        );
        (projection, notifier)
    }

    #[test]
    fn partition_is_total_and_exclusive() {
        let tasks = vec![
            sample_task("a", "alice", TaskStatus::Todo),
            sample_task("b", "alice", TaskStatus::Completed),
            sample_task("c", "alice", TaskStatus::InProgress),
            sample_task("d", "alice", TaskStatus::Todo),
        ];
        let board = Board::from_tasks(tasks.clone());

        assert_eq!(board.len(), tasks.len());
        for column in &board.columns {
            assert!(column.tasks.iter().all(|task| task.status == column.id));
        }
        for task in &tasks {
            let holding = board
                .columns
                .iter()
                .filter(|column| column.tasks.iter().any(|t| t.id == task.id))
                .count();
            assert_eq!(holding, 1);
        }
        assert_eq!(board.column_of("b"), Some(TaskStatus::Completed));
        assert_eq!(
            board.columns.map(|column| column.title),
            ["To Do", "In Progress", "Completed"].map(String::from)
        );
    }

    #[test]
    fn same_snapshot_twice_yields_same_board() {
        let tasks = vec![
            sample_task("a", "alice", TaskStatus::Todo),
            sample_task("b", "alice", TaskStatus::InProgress),
        ];
        assert_eq!(Board::from_tasks(tasks.clone()), Board::from_tasks(tasks));
    }

    #[tokio::test]
    async fn snapshots_replace_the_board() {
        let store = RecordingStore::shared();
        let (_tx, rx) = watch::channel(Some(identity("alice")));
        let (projection, _notifier) = spawn(&store, rx);
        let mut board = projection.subscribe();

        wait_until(|| store.active_subscriptions("alice") == 1).await;
        store.push_snapshot(
            "alice",
            vec![
                sample_task("a", "alice", TaskStatus::Todo),
                sample_task("b", "alice", TaskStatus::InProgress),
            ],
        );
        board.changed().await.unwrap();
        assert_eq!(board.borrow_and_update().len(), 2);

        store.push_snapshot("alice", vec![sample_task("b", "alice", TaskStatus::Completed)]);
        board.changed().await.unwrap();
        let current = board.borrow_and_update().clone();
        assert_eq!(current.len(), 1);
        assert_eq!(current.column_of("b"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn identity_change_releases_previous_subscription() {
        let store = RecordingStore::shared();
        let (tx, rx) = watch::channel(Some(identity("alice")));
        let (projection, _notifier) = spawn(&store, rx);

        wait_until(|| store.active_subscriptions("alice") == 1).await;
        store.push_snapshot("alice", vec![sample_task("a", "alice", TaskStatus::Todo)]);
        wait_until(|| projection.board().len() == 1).await;

        tx.send_replace(Some(identity("bob")));
        wait_until(|| store.active_subscriptions("bob") == 1).await;
        assert_eq!(store.active_subscriptions("alice"), 0);

        tx.send_replace(None);
        wait_until(|| store.active_subscriptions("bob") == 0).await;
        wait_until(|| projection.board().is_empty()).await;
    }

    #[tokio::test]
    async fn dropping_projection_releases_subscription() {
        let store = RecordingStore::shared();
        let (_tx, rx) = watch::channel(Some(identity("alice")));
        let (projection, _notifier) = spawn(&store, rx);

        wait_until(|| store.active_subscriptions("alice") == 1).await;
        drop(projection);
        wait_until(|| store.active_subscriptions("alice") == 0).await;
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let store = RecordingStore::shared();
        store.set_fail_subscribe(true);
        let (_tx, rx) = watch::channel(Some(identity("alice")));
        let notifier = Notifier::new();
        let mut toasts = notifier.subscribe();
        let projection = RealtimeProjection::spawn(
            store.clone(),
            &SessionContext::new(rx),
            reminders(&notifier),
            notifier.clone(),
        );

        let toast = toasts.recv().await.unwrap();
        assert!(toast.is_error());
        assert!(projection.board().is_empty());
        projection.shutdown().await;
    }
}
