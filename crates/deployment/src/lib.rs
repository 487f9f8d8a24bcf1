use std::sync::Arc;

use async_trait::async_trait;
use db::{DbErr, models::task::Task};
use serde::{Deserialize, Serialize};
use services::services::{
    auth::AuthService,
    board::BoardController,
    calendar::Calendar,
    chat::{ChatError, ChatSession, ResponseHandle},
    clock::Clock,
    config::{Config, ConfigError},
    generation::{GenerationClient, GenerationError},
    identity::{AuthError, IdentityProvider, SessionContext},
    mutation::TaskMutations,
    notification::Notifier,
    projection::{Board, RealtimeProjection},
    reminder::ReminderService,
    store::{DocumentStore, StoreError},
};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Top-level screens of the signed-in shell.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS, Display, EnumString,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum View {
    #[default]
    Board,
    Calendar,
    Assistant,
}

/// A wired set of collaborators. Implementations decide where tasks, accounts
/// and generated text come from; everything above them is shared.
#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;

    fn notifier(&self) -> &Notifier;

    fn clock(&self) -> &Arc<dyn Clock>;

    fn store(&self) -> &Arc<dyn DocumentStore>;

    fn identity(&self) -> &Arc<dyn IdentityProvider>;

    fn generation(&self) -> &Arc<dyn GenerationClient>;

    fn session(&self) -> SessionContext {
        SessionContext::from_provider(self.identity().as_ref())
    }

    fn auth(&self) -> AuthService {
        AuthService::new(self.identity().clone(), self.notifier().clone())
    }

    fn mutations(&self) -> TaskMutations {
        TaskMutations::new(
            self.store().clone(),
            self.session(),
            self.notifier().clone(),
            self.clock().clone(),
        )
    }

    /// Starts the realtime projection and builds every screen over it from the
    /// current config.
    async fn dashboard(&self) -> Dashboard {
        let config = self.config().read().await.clone();
        let reminders = ReminderService::new(
            self.clock().clone(),
            self.notifier().clone(),
            config.reminders.clone(),
            &config.notifications,
        );
        let projection = RealtimeProjection::spawn(
            self.store().clone(),
            &self.session(),
            reminders,
            self.notifier().clone(),
        );
        let mutations = self.mutations();
        let board = BoardController::new(
            config.board.clone(),
            self.clock().clone(),
            projection.subscribe(),
            mutations.clone(),
        );
        let calendar = Calendar::new(projection.subscribe(), mutations.clone(), self.clock().clone());
        let chat =
            ChatSession::new(self.generation().clone()).with_streaming(config.assistant.streaming);

        tracing::debug!(streaming = config.assistant.streaming, "dashboard ready");
        Dashboard {
            view: View::default(),
            projection,
            mutations,
            board,
            calendar,
            chat,
        }
    }
}

/// The signed-in shell: one projection shared by the board, the calendar and
/// the assistant.
pub struct Dashboard {
    view: View,
    projection: RealtimeProjection,
    mutations: TaskMutations,
    board: BoardController,
    calendar: Calendar,
    chat: ChatSession,
}

impl Dashboard {
    pub fn view(&self) -> View {
        self.view
    }

    pub fn navigate(&mut self, view: View) {
        if self.view != view {
            tracing::debug!(from = %self.view, to = %view, "navigate");
            self.view = view;
        }
    }

    pub fn snapshot(&self) -> Board {
        self.projection.board()
    }

    pub fn subscribe(&self) -> watch::Receiver<Board> {
        self.projection.subscribe()
    }

    pub fn mutations(&self) -> &TaskMutations {
        &self.mutations
    }

    pub fn board(&mut self) -> &mut BoardController {
        &mut self.board
    }

    pub fn calendar(&mut self) -> &mut Calendar {
        &mut self.calendar
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    /// Sends a question to the assistant with the current tasks as context.
    pub fn ask(&self, question: &str) -> Result<ResponseHandle, ChatError> {
        let tasks: Vec<Task> = self.projection.board().tasks().cloned().collect();
        self.chat.submit(question, &tasks)
    }

    pub async fn shutdown(self) {
        self.chat.cancel();
        self.projection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use db::DBService;
    use services::services::{
        auth::Credentials,
        chat::ChatRole,
        clock::FixedClock,
        identity::LocalIdentityProvider,
        mutation::CreateTaskForm,
        test_support::{RecordingStore, Script, ScriptedGeneration, StoreCall, wait_until},
    };

    use super::*;

    #[derive(Clone)]
    struct FakeDeployment {
        config: Arc<RwLock<Config>>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        store: Arc<dyn DocumentStore>,
        recording: Arc<RecordingStore>,
        identity: Arc<dyn IdentityProvider>,
        generation: Arc<dyn GenerationClient>,
    }

    #[async_trait]
    impl Deployment for FakeDeployment {
        async fn new() -> Result<Self, DeploymentError> {
            let recording = RecordingStore::shared();
            let now = NaiveDate::from_ymd_opt(2025, 1, 15)
                .and_then(|date| date.and_hms_opt(8, 0, 0))
                .ok_or_else(|| anyhow::anyhow!("bad fixture date"))?;
            let db = DBService::in_memory().await?;
            Ok(Self {
                config: Arc::new(RwLock::new(Config::default())),
                notifier: Notifier::new(),
                clock: Arc::new(FixedClock::new(now)),
                store: recording.clone(),
                recording,
                identity: LocalIdentityProvider::shared(db),
                generation: ScriptedGeneration::new(vec![Script::chunks(&["Do ", "it"])]),
            })
        }

        fn config(&self) -> &Arc<RwLock<Config>> {
            &self.config
        }

        fn notifier(&self) -> &Notifier {
            &self.notifier
        }

        fn clock(&self) -> &Arc<dyn Clock> {
            &self.clock
        }

        fn store(&self) -> &Arc<dyn DocumentStore> {
            &self.store
        }

        fn identity(&self) -> &Arc<dyn IdentityProvider> {
            &self.identity
        }

        fn generation(&self) -> &Arc<dyn GenerationClient> {
            &self.generation
        }
    }

    #[test]
    fn view_names_round_trip() {
        assert_eq!(View::Calendar.to_string(), "calendar");
        assert_eq!(View::from_str("assistant").unwrap(), View::Assistant);
        assert_eq!(View::default(), View::Board);
    }

    #[tokio::test]
    async fn mutations_require_sign_in() {
        let deployment = FakeDeployment::new().await.unwrap();
        let result = deployment.mutations().create(CreateTaskForm::titled("Write")).await;
        assert!(result.is_err());
        assert!(deployment.recording.calls().is_empty());
    }

    #[tokio::test]
    async fn dashboard_follows_the_signed_in_owner() {
        let deployment = FakeDeployment::new().await.unwrap();
        let identity = deployment
            .auth()
            .sign_up(&Credentials::new("ada@example.com", "secret1"))
            .await
            .unwrap();

        let mut dashboard = deployment.dashboard().await;
        let recording = deployment.recording.clone();
        let owner = identity.uid.clone();
        wait_until(|| recording.active_subscriptions(&owner) == 1).await;

        dashboard
            .mutations()
            .create(CreateTaskForm::titled("Write report"))
            .await
            .unwrap();
        assert!(matches!(
            deployment.recording.calls().as_slice(),
            [StoreCall::Create(task)] if task.created_by == identity.uid
        ));

        dashboard.navigate(View::Assistant);
        assert_eq!(dashboard.view(), View::Assistant);

        dashboard.ask("What next?").unwrap().wait().await;
        let transcript = dashboard.chat().transcript();
        let last = transcript.last().unwrap();
        assert_eq!(last.role, ChatRole::Assistant);
        assert_eq!(last.content, "Do it");

        dashboard.shutdown().await;
    }
}
