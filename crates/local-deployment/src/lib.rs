use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    clock::{Clock, SystemClock},
    config::{AssistantConfig, Config, load_config_from_file, save_config_to_file},
    generation::{ChunkStream, GeminiClient, GenerationClient, GenerationError},
    identity::{IdentityProvider, LocalIdentityProvider},
    notification::Notifier,
    store::{DocumentStore, LocalDocumentStore},
};
use tokio::sync::RwLock;
use utils::assets::config_path;

/// Sqlite-backed tasks and accounts plus the Gemini endpoint.
#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DocumentStore>,
    accounts: Arc<LocalIdentityProvider>,
    identity: Arc<dyn IdentityProvider>,
    generation: Arc<dyn GenerationClient>,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let config = Self::load_runtime_config().await?;
        let db = DBService::new().await?;
        let generation = Self::build_generation(&config.assistant);
        Ok(Self::from_parts(config, db, generation, Arc::new(SystemClock)))
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

impl LocalDeployment {
    /// Wires a deployment over an existing database. Used by [`Deployment::new`]
    /// and by tests that bring their own clock and generation client.
    pub fn from_parts(
        config: Config,
        db: DBService,
        generation: Arc<dyn GenerationClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let accounts = LocalIdentityProvider::shared(db.clone());
        Self {
            config: Arc::new(RwLock::new(config)),
            store: Arc::new(LocalDocumentStore::new(db.clone())),
            db,
            notifier: Notifier::new(),
            clock,
            identity: accounts.clone(),
            accounts,
            generation,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    /// The concrete account registry behind [`Deployment::identity`].
    pub fn accounts(&self) -> &Arc<LocalIdentityProvider> {
        &self.accounts
    }

    async fn load_runtime_config() -> Result<Config, DeploymentError> {
        let path = config_path();
        let config = load_config_from_file(&path).await;
        save_config_to_file(&config, &path).await?;
        tracing::debug!(path = %path.display(), version = config.config_version.as_str(), "config loaded");
        Ok(config)
    }

    fn build_generation(config: &AssistantConfig) -> Arc<dyn GenerationClient> {
        match GeminiClient::from_env(config) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                tracing::warn!("Assistant disabled: {}", err);
                Arc::new(UnconfiguredGeneration)
            }
        }
    }
}

/// Stands in for the generation endpoint when no API key is configured. Every
/// request fails, so the assistant answers with its apology.
struct UnconfiguredGeneration;

#[async_trait]
impl GenerationClient for UnconfiguredGeneration {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::MissingApiKey)
    }

    async fn generate_stream(&self, _prompt: &str) -> Result<ChunkStream, GenerationError> {
        Err(GenerationError::MissingApiKey)
    }
}
