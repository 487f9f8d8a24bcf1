use std::sync::{Arc, Mutex};

use db::{
    clock_time,
    models::task::{Task, TaskPriority, TaskStatus},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use super::generation::{GenerationClient, GenerationError};

pub const GREETING: &str = "Hello! I can help you manage your tasks and answer any questions you have. What would you like to know?";
pub const APOLOGY: &str = "I apologize, but I encountered an error. Please try again.";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

const INSTRUCTIONS: &str = "Instructions:
1. If the question is about tasks, analyze the task data and provide specific insights
2. If it's a general question, provide a helpful response based on your knowledge
3. Format the response in a clear, readable way without using markdown or special formatting
4. For task analysis, consider task priorities and deadlines, current task status, workload balance and time management
5. Keep responses concise but informative
6. Use simple formatting like new lines for readability
7. Provide a natural, conversational response that directly addresses the user's question

Please respond in plain text without any special characters or markdown.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("A response is still streaming")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only message list. Only the trailing assistant message changes,
/// and only while `streaming` is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, TS)]
#[ts(export)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    streaming: bool,
}

impl Transcript {
    pub fn with_greeting() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(GREETING)],
            streaming: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Appends the question and an empty assistant placeholder.
    pub fn begin(mut self, question: &str) -> Self {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(String::new()));
        self.streaming = true;
        self
    }

    pub fn apply_chunk(mut self, chunk: &str) -> Self {
        if self.streaming
            && let Some(placeholder) = self.messages.last_mut()
        {
            placeholder.content.push_str(chunk);
        }
        self
    }

    pub fn finish(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn fail(mut self) -> Self {
        if self.streaming
            && let Some(placeholder) = self.messages.last_mut()
        {
            placeholder.content = APOLOGY.to_string();
        }
        self.streaming = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Appended { index: usize, message: ChatMessage },
    Replaced { index: usize, message: ChatMessage },
    Finished { index: usize },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSummary<'a> {
    title: &'a str,
    status: TaskStatus,
    priority: TaskPriority,
    description: &'a str,
    due_date: String,
    start_time: Option<String>,
    due_time: Option<String>,
}

impl<'a> From<&'a Task> for TaskSummary<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            title: &task.title,
            status: task.status,
            priority: task.priority,
            description: &task.description,
            due_date: task.due_date.format("%Y-%m-%d").to_string(),
            start_time: task.start_time.as_ref().map(clock_time::format),
            due_time: task.due_time.as_ref().map(clock_time::format),
        }
    }
}

/// Prompt carrying every task's details, the question and the answering
/// instructions.
pub fn build_prompt(tasks: &[Task], question: &str) -> String {
    let summaries: Vec<TaskSummary<'_>> = tasks.iter().map(TaskSummary::from).collect();
    let details = serde_json::to_string_pretty(&summaries).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Context: User has {count} tasks.\nTask Details:\n{details}\n\nUser Question: {question}\n\n{INSTRUCTIONS}",
        count = tasks.len(),
    )
}

/// One-shot generation. Any failure becomes the apology text.
pub async fn suggest(client: &dyn GenerationClient, prompt: &str) -> String {
    match client.generate(prompt).await {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "suggestion failed");
            APOLOGY.to_string()
        }
    }
}

#[derive(Default)]
struct SessionState {
    transcript: Transcript,
    cancel: Option<CancellationToken>,
}

type SharedState = Arc<Mutex<SessionState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|err| err.into_inner())
}

/// Chat against a [`GenerationClient`], one response at a time.
pub struct ChatSession {
    state: SharedState,
    client: Arc<dyn GenerationClient>,
    events: broadcast::Sender<TranscriptEvent>,
    streaming: bool,
}

/// Completion handle for a submitted question.
pub struct ResponseHandle(JoinHandle<()>);

impl ResponseHandle {
    pub async fn wait(self) {
        if let Err(err) = self.0.await {
            tracing::warn!(error = %err, "chat response task failed");
        }
    }
}

impl ChatSession {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SessionState {
                transcript: Transcript::with_greeting(),
                cancel: None,
            })),
            client,
            events,
            streaming: true,
        }
    }

    /// With streaming off the whole answer lands in one update.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.events.subscribe()
    }

    pub fn transcript(&self) -> Transcript {
        lock(&self.state).transcript.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).transcript.is_streaming()
    }

    /// Starts answering `input` with `tasks` as context. Blank input and
    /// input arriving while a response streams are rejected without
    /// touching the transcript.
    pub fn submit(&self, input: &str, tasks: &[Task]) -> Result<ResponseHandle, ChatError> {
        let question = input.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let cancel = CancellationToken::new();
        let appended = {
            let mut state = lock(&self.state);
            if state.transcript.is_streaming() {
                return Err(ChatError::Busy);
            }
            let transcript = std::mem::take(&mut state.transcript).begin(question);
            let messages = transcript.messages();
            let appended = messages.len() - 2..messages.len();
            let events: Vec<TranscriptEvent> = appended
                .map(|index| TranscriptEvent::Appended {
                    index,
                    message: messages[index].clone(),
                })
                .collect();
            state.transcript = transcript;
            state.cancel = Some(cancel.clone());
            events
        };
        for event in appended {
            let _ = self.events.send(event);
        }

        let worker = ResponseWorker {
            state: self.state.clone(),
            events: self.events.clone(),
            client: self.client.clone(),
            prompt: build_prompt(tasks, question),
            streaming: self.streaming,
            cancel,
        };
        Ok(ResponseHandle(tokio::spawn(worker.run())))
    }

    /// Stops the active response, keeping whatever content arrived.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.state).cancel.take() {
            token.cancel();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct ResponseWorker {
    state: SharedState,
    events: broadcast::Sender<TranscriptEvent>,
    client: Arc<dyn GenerationClient>,
    prompt: String,
    streaming: bool,
    cancel: CancellationToken,
}

impl ResponseWorker {
    async fn run(self) {
        if self.streaming {
            self.run_streaming().await;
        } else {
            self.run_single().await;
        }
    }

    async fn run_streaming(&self) {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish();
                return;
            }
            opened = self.client.generate_stream(&self.prompt) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(&err);
                return;
            }
        };

        let mut failure = None;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("chat response cancelled");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => self.apply(&chunk),
                    Some(Err(err)) => {
                        failure = Some(err);
                        break;
                    }
                    None => break,
                },
            }
        }
        drop(stream);
        match failure {
            Some(err) => self.fail(&err),
            None => self.finish(),
        }
    }

    async fn run_single(&self) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish();
                return;
            }
            result = self.client.generate(&self.prompt) => result,
        };
        match result {
            Ok(text) => {
                self.apply(&text);
                self.finish();
            }
            Err(err) => self.fail(&err),
        }
    }

    fn update<F>(&self, change: F) -> Option<(usize, ChatMessage)>
    where
        F: FnOnce(Transcript) -> Transcript,
    {
        let mut state = lock(&self.state);
        let transcript = change(std::mem::take(&mut state.transcript));
        let last = transcript
            .messages()
            .len()
            .checked_sub(1)
            .and_then(|index| Some((index, transcript.last()?.clone())));
        if !transcript.is_streaming() {
            state.cancel = None;
        }
        state.transcript = transcript;
        last
    }

    fn apply(&self, chunk: &str) {
        if let Some((index, message)) = self.update(|transcript| transcript.apply_chunk(chunk)) {
            let _ = self.events.send(TranscriptEvent::Replaced { index, message });
        }
    }

    fn finish(&self) {
        if let Some((index, _)) = self.update(Transcript::finish) {
            let _ = self.events.send(TranscriptEvent::Finished { index });
        }
    }

    fn fail(&self, err: &GenerationError) {
        tracing::warn!(error = %err, "chat response failed");
        if let Some((index, message)) = self.update(Transcript::fail) {
            let _ = self.events.send(TranscriptEvent::Replaced { index, message });
            let _ = self.events.send(TranscriptEvent::Finished { index });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::services::test_support::{
        Script, ScriptedGeneration, sample_task, wait_until,
    };

    fn drain(rx: &mut broadcast::Receiver<TranscriptEvent>) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn replaced_contents(events: &[TranscriptEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                TranscriptEvent::Replaced { message, .. } => Some(message.content.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn transcript_updates_are_pure() {
        let start = Transcript::with_greeting();
        let begun = start.clone().begin("hi");
        assert_eq!(start.messages().len(), 1);
        assert_eq!(begun.messages().len(), 3);

        let done = begun.apply_chunk("Hel").apply_chunk("lo").finish();
        assert_eq!(done.last().unwrap().content, "Hello");
        assert!(!done.is_streaming());

        let frozen = done.clone().apply_chunk(" more");
        assert_eq!(frozen, done);
    }

    #[tokio::test]
    async fn chunks_accumulate_into_one_message() {
        let client = ScriptedGeneration::new([Script::chunks(&["Hel", "lo", " world"])]);
        let session = ChatSession::new(client.clone());
        let mut events = session.subscribe();

        session.submit("What is due?", &[]).unwrap().wait().await;

        let events = drain(&mut events);
        assert_eq!(
            replaced_contents(&events),
            vec!["Hel".to_string(), "Hello".to_string(), "Hello world".to_string()]
        );
        assert_eq!(events.last(), Some(&TranscriptEvent::Finished { index: 2 }));

        let transcript = session.transcript();
        assert_eq!(transcript.messages().len(), 3);
        assert_eq!(transcript.messages()[0].content, GREETING);
        assert_eq!(transcript.messages()[1], ChatMessage::user("What is due?"));
        assert_eq!(transcript.messages()[2], ChatMessage::assistant("Hello world"));
        assert!(!transcript.is_streaming());
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let session = ChatSession::new(ScriptedGeneration::new(Vec::<Script>::new()));
        assert_eq!(session.submit("   ", &[]).err(), Some(ChatError::EmptyInput));
        assert_eq!(session.transcript(), Transcript::with_greeting());
    }

    #[tokio::test]
    async fn second_submit_while_streaming_is_rejected() {
        let client = ScriptedGeneration::new([Script::Stall(vec!["partial".to_string()])]);
        let session = ChatSession::new(client.clone());

        let handle = session.submit("first", &[]).unwrap();
        wait_until(|| session.transcript().last().unwrap().content == "partial").await;
        let before = session.transcript();

        assert_eq!(session.submit("second", &[]).err(), Some(ChatError::Busy));
        assert_eq!(session.transcript(), before);
        assert_eq!(client.prompts().len(), 1);

        session.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn cancel_freezes_partial_content_and_drops_stream() {
        let client = ScriptedGeneration::new([
            Script::Stall(vec!["Hal".to_string(), "f".to_string()]),
            Script::chunks(&["next"]),
        ]);
        let session = ChatSession::new(client.clone());

        let handle = session.submit("question", &[]).unwrap();
        wait_until(|| session.transcript().last().unwrap().content == "Half").await;
        session.cancel();
        handle.wait().await;

        assert_eq!(client.streams_dropped(), 1);
        let transcript = session.transcript();
        assert!(!transcript.is_streaming());
        assert_eq!(transcript.last().unwrap().content, "Half");

        session.submit("again", &[]).unwrap().wait().await;
        assert_eq!(session.transcript().last().unwrap().content, "next");
    }

    #[tokio::test]
    async fn failures_become_the_apology() {
        let client = ScriptedGeneration::new([
            Script::FailAfter(vec!["par".to_string()]),
            Script::FailOpen,
        ]);
        let session = ChatSession::new(client.clone());

        session.submit("one", &[]).unwrap().wait().await;
        assert_eq!(session.transcript().last().unwrap().content, APOLOGY);

        session.submit("two", &[]).unwrap().wait().await;
        let transcript = session.transcript();
        assert_eq!(transcript.messages().len(), 5);
        assert_eq!(transcript.last().unwrap().content, APOLOGY);
        assert!(!transcript.is_streaming());
    }

    #[tokio::test]
    async fn non_streaming_mode_lands_whole_answer() {
        let client = ScriptedGeneration::new([Script::chunks(&["All ", "at once"])]);
        let session = ChatSession::new(client.clone()).with_streaming(false);
        let mut events = session.subscribe();

        session.submit("q", &[]).unwrap().wait().await;
        assert_eq!(replaced_contents(&drain(&mut events)), vec!["All at once".to_string()]);
    }

    #[tokio::test]
    async fn dropping_session_stops_the_stream() {
        let client = ScriptedGeneration::new([Script::Stall(Vec::new())]);
        let session = ChatSession::new(client.clone());
        let handle = session.submit("q", &[]).unwrap();
        wait_until(|| client.prompts().len() == 1).await;

        drop(session);
        tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .unwrap();
        assert_eq!(client.streams_dropped(), 1);
    }

    #[test]
    fn prompt_carries_task_details_and_question() {
        let mut task = sample_task("t1", "alice", TaskStatus::InProgress);
        task.title = "Write report".to_string();
        task.description = "Quarterly numbers".to_string();
        let prompt = build_prompt(&[task], "What should I do first?");

        assert!(prompt.starts_with("Context: User has 1 tasks."));
        assert!(prompt.contains("\"title\": \"Write report\""));
        assert!(prompt.contains("\"status\": \"in-progress\""));
        assert!(prompt.contains("\"priority\": \"medium\""));
        assert!(prompt.contains("\"description\": \"Quarterly numbers\""));
        assert!(prompt.contains("\"dueDate\": \"2025-01-15\""));
        assert!(prompt.contains("\"startTime\": \"09:00\""));
        assert!(prompt.contains("\"dueTime\": \"17:00\""));
        assert!(prompt.contains("User Question: What should I do first?"));
        assert!(prompt.contains("without any special characters or markdown"));
    }

    #[tokio::test]
    async fn suggest_falls_back_to_apology() {
        let client = ScriptedGeneration::new([Script::chunks(&["Try ", "this"]), Script::FailOpen]);
        assert_eq!(suggest(client.as_ref(), "p").await, "Try this");
        assert_eq!(suggest(client.as_ref(), "p").await, APOLOGY);
    }
}
