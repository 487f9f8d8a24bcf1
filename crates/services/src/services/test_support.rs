//! In-memory fakes for the collaborator traits.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use db::models::task::{NewTask, Task, TaskPriority, TaskStatus, TaskUpdate};
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    generation::{GenerationClient, GenerationError},
    store::{DocumentStore, StoreError, TaskSubscription},
};

pub fn sample_task(id: &str, owner: &str, status: TaskStatus) -> Task {
    let now = Utc::now();
    Task {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: String::new(),
        status,
        priority: TaskPriority::Medium,
        due_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap_or_default(),
        start_time: NaiveTime::from_hms_opt(9, 0, 0),
        due_time: NaiveTime::from_hms_opt(17, 0, 0),
        assigned_to: "user".to_string(),
        created_by: owner.to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(NewTask),
    Update(String, TaskUpdate),
    Delete(String),
}

type Feed = mpsc::UnboundedSender<Result<Vec<Task>, StoreError>>;

#[derive(Default)]
struct RecordingInner {
    calls: Vec<StoreCall>,
    write_owners: Vec<String>,
    feeds: Vec<(String, Feed)>,
    fail_writes: bool,
    fail_subscribe: bool,
    next_id: usize,
}

/// Records writes and lets tests push snapshots to open subscriptions.
#[derive(Default)]
pub struct RecordingStore {
    inner: Mutex<RecordingInner>,
}

impl RecordingStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Owner passed with each update and delete, in call order.
    pub fn write_owners(&self) -> Vec<String> {
        self.lock().write_owners.clone()
    }

    pub fn updates(&self) -> Vec<(String, TaskUpdate)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Update(id, fields) => Some((id, fields)),
                _ => None,
            })
            .collect()
    }

    pub fn active_subscriptions(&self, owner: &str) -> usize {
        self.lock()
            .feeds
            .iter()
            .filter(|(feed_owner, feed)| feed_owner == owner && !feed.is_closed())
            .count()
    }

    /// Delivers `tasks` to every open subscription of `owner`.
    pub fn push_snapshot(&self, owner: &str, tasks: Vec<Task>) -> usize {
        let mut inner = self.lock();
        inner.feeds.retain(|(_, feed)| !feed.is_closed());
        inner
            .feeds
            .iter()
            .filter(|(feed_owner, _)| feed_owner == owner)
            .filter(|(_, feed)| feed.send(Ok(tasks.clone())).is_ok())
            .count()
    }

    fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.fail_writes {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn subscribe(&self, owner: &str) -> Result<TaskSubscription, StoreError> {
        let mut inner = self.lock();
        if inner.fail_subscribe {
            return Err(StoreError::Unavailable("subscribe rejected".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.feeds.push((owner.to_string(), tx));
        Ok(TaskSubscription::new(
            owner,
            UnboundedReceiverStream::new(rx).boxed(),
        ))
    }

    async fn create(&self, task: NewTask) -> Result<String, StoreError> {
        self.record(StoreCall::Create(task))?;
        let mut inner = self.lock();
        inner.next_id += 1;
        Ok(format!("task-{}", inner.next_id))
    }

    async fn update(&self, owner: &str, id: &str, fields: TaskUpdate) -> Result<(), StoreError> {
        self.lock().write_owners.push(owner.to_string());
        self.record(StoreCall::Update(id.to_string(), fields))
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        self.lock().write_owners.push(owner.to_string());
        self.record(StoreCall::Delete(id.to_string()))
    }
}

/// How one generation request behaves.
#[derive(Debug, Clone)]
pub enum Script {
    /// Streams the chunks, then completes.
    Chunks(Vec<String>),
    /// Streams the chunks, then never completes.
    Stall(Vec<String>),
    /// Streams the chunks, then fails.
    FailAfter(Vec<String>),
    /// Fails before any chunk.
    FailOpen,
}

impl Script {
    pub fn chunks(chunks: &[&str]) -> Self {
        Script::Chunks(chunks.iter().map(|chunk| chunk.to_string()).collect())
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Generation client replaying one [`Script`] per request.
#[derive(Default)]
pub struct ScriptedGeneration {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
    streams_dropped: Arc<AtomicUsize>,
}

impl ScriptedGeneration {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn streams_dropped(&self) -> usize {
        self.streams_dropped.load(Ordering::SeqCst)
    }

    fn next_script(&self, prompt: &str) -> Script {
        self.prompts
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(prompt.to_string());
        self.scripts
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .pop_front()
            .unwrap_or(Script::Chunks(Vec::new()))
    }
}

fn chunk_stream(chunks: Vec<String>) -> BoxStream<'static, Result<String, GenerationError>> {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        match self.next_script(prompt) {
            Script::Chunks(chunks) => Ok(chunks.concat()),
            Script::Stall(_) | Script::FailAfter(_) | Script::FailOpen => Err(
                GenerationError::Api("scripted failure".to_string()),
            ),
        }
    }

    async fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, GenerationError>>, GenerationError> {
        let stream = match self.next_script(prompt) {
            Script::Chunks(chunks) => chunk_stream(chunks),
            Script::Stall(chunks) => chunk_stream(chunks)
                .chain(futures::stream::pending())
                .boxed(),
            Script::FailAfter(chunks) => chunk_stream(chunks)
                .chain(futures::stream::once(async {
                    Err(GenerationError::Stream("connection reset".to_string()))
                }))
                .boxed(),
            Script::FailOpen => {
                return Err(GenerationError::Api("scripted failure".to_string()));
            }
        };
        let counter = DropCounter(self.streams_dropped.clone());
        Ok(stream
            .map(move |item| {
                let _ = &counter;
                item
            })
            .boxed())
    }
}
