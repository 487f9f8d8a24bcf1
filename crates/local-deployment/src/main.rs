use deployment::{Deployment, DeploymentError, View};
use local_deployment::LocalDeployment;
use services::services::{
    auth::Credentials,
    identity::{AuthError, Identity},
    mutation::{CreateTaskForm, MutationError},
    notification::Notification,
    projection::Board,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{EnvFilter, prelude::*};

const EMAIL_ENV: &str = "TASKBOARD_EMAIL";
const PASSWORD_ENV: &str = "TASKBOARD_PASSWORD";

#[derive(Debug, Error)]
pub enum TaskboardError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

enum Command {
    Watch,
    Add(String),
    Ask(String),
}

impl Command {
    fn from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let Some(name) = args.next() else {
            return Ok(Self::Watch);
        };
        let rest = args.collect::<Vec<_>>().join(" ");
        match name.as_str() {
            "watch" => Ok(Self::Watch),
            "add" if !rest.trim().is_empty() => Ok(Self::Add(rest)),
            "ask" if !rest.trim().is_empty() => Ok(Self::Ask(rest)),
            other => anyhow::bail!("usage: taskboard [watch | add <title> | ask <question>], got '{other}'"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), TaskboardError> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,taskboard={level},services={level},db={level},deployment={level},local_deployment={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string)
        .map_err(|err| anyhow::anyhow!("Failed to create tracing filter: {err}"))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let command = Command::from_args(std::env::args().skip(1))?;
    let deployment = LocalDeployment::new().await?;
    let notifications = tokio::spawn(log_notifications(deployment.notifier().subscribe()));

    let identity = sign_in(&deployment).await?;
    tracing::info!(uid = identity.uid.as_str(), "session started");

    let mut dashboard = deployment.dashboard().await;
    let board_log = tokio::spawn(log_board(dashboard.subscribe()));

    match command {
        Command::Watch => {
            tracing::info!("Watching the board, press Ctrl+C to exit");
            tokio::signal::ctrl_c().await?;
        }
        Command::Add(title) => {
            let id = dashboard.mutations().create(CreateTaskForm::titled(title)).await?;
            tracing::info!(task_id = id.as_str(), "task added");
        }
        Command::Ask(question) => {
            dashboard.navigate(View::Assistant);
            let response = dashboard
                .ask(&question)
                .map_err(|err| anyhow::anyhow!("{err}"))?;
            response.wait().await;
            if let Some(answer) = dashboard.chat().transcript().last() {
                println!("{}", answer.content);
            }
        }
    }

    board_log.abort();
    dashboard.shutdown().await;
    notifications.abort();
    Ok(())
}

/// Signs in with the configured credentials, registering the account on
/// first use.
async fn sign_in(deployment: &LocalDeployment) -> Result<Identity, TaskboardError> {
    let email = std::env::var(EMAIL_ENV).unwrap_or_default();
    let password = std::env::var(PASSWORD_ENV).unwrap_or_default();
    let credentials = Credentials::new(email, password);
    credentials.validate()?;

    match deployment.identity().sign_in_with_password(&credentials).await {
        Ok(identity) => Ok(identity),
        Err(AuthError::AccountNotFound(_)) => Ok(deployment.auth().sign_up(&credentials).await?),
        Err(err) => Err(err.into()),
    }
}

async fn log_notifications(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) if notification.is_error() => {
                tracing::warn!(title = notification.title.as_str(), "{}", notification.description);
            }
            Ok(notification) => {
                tracing::info!(title = notification.title.as_str(), "{}", notification.description);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "notification log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_board(mut board: watch::Receiver<Board>) {
    while board.changed().await.is_ok() {
        let snapshot = board.borrow_and_update().clone();
        for column in &snapshot.columns {
            tracing::info!(column = %column.id, tasks = column.tasks.len(), "{}", column.title);
        }
    }
}
