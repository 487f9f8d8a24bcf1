use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use db::{
    DBService, SqlErr,
    models::account::{Account, NewAccount},
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::sync::watch;
use ts_rs::TS;
use uuid::Uuid;

use super::auth::Credentials;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, EnumString, Display,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
    Microsoft,
    Apple,
}

impl OAuthProvider {
    pub fn provider_id(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google.com",
            OAuthProvider::Github => "github.com",
            OAuthProvider::Microsoft => "microsoft.com",
            OAuthProvider::Apple => "apple.com",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidCredential(String),
    #[error("Sign-in popup was blocked")]
    PopupBlocked,
    #[error("An account already exists for {0}")]
    AccountExists(String),
    #[error("No account found for {0}")]
    AccountNotFound(String),
    #[error("Auth provider error: {0}")]
    Provider(String),
}

/// The external identity service. Implementations publish every sign-in and
/// sign-out on the receiver returned by [`IdentityProvider::watch`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    fn watch(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in_with_password(&self, credentials: &Credentials)
    -> Result<Identity, AuthError>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> Result<Identity, AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Explicit handle on "who is signed in", handed to the components that
/// scope their work by owner.
#[derive(Clone)]
pub struct SessionContext {
    identity: watch::Receiver<Option<Identity>>,
}

impl SessionContext {
    pub fn new(identity: watch::Receiver<Option<Identity>>) -> Self {
        Self { identity }
    }

    pub fn from_provider(provider: &dyn IdentityProvider) -> Self {
        Self::new(provider.watch())
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.clone()
    }
}

#[derive(Default)]
struct ProviderState {
    oauth: HashMap<OAuthProvider, Identity>,
    reset_requests: Vec<String>,
    popups_blocked: bool,
}

/// Email/password accounts persisted in the local database. Passwords are
/// stored as Argon2 PHC strings. OAuth sign-in succeeds only for providers
/// registered with [`LocalIdentityProvider::register_oauth`].
pub struct LocalIdentityProvider {
    db: DBService,
    state: Mutex<ProviderState>,
    current: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    pub fn new(db: DBService) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            db,
            state: Mutex::new(ProviderState::default()),
            current,
        }
    }

    pub fn shared(db: DBService) -> Arc<Self> {
        Arc::new(Self::new(db))
    }

    pub fn register_oauth(&self, provider: OAuthProvider, identity: Identity) {
        self.lock().oauth.insert(provider, identity);
    }

    pub fn set_popups_blocked(&self, blocked: bool) {
        self.lock().popups_blocked = blocked;
    }

    pub fn password_reset_requests(&self) -> Vec<String> {
        self.lock().reset_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn set_current(&self, identity: Option<Identity>) {
        self.current.send_replace(identity);
    }

    async fn find_account(&self, email: &str) -> Result<Option<Account>, AuthError> {
        Account::find_by_email(&self.db.pool, email)
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))
    }
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Self {
            uid: account.uid,
            email: Some(account.email),
            display_name: account.display_name,
            avatar_url: None,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Provider(format!("Password hashing failed: {err}")))
    })
    .await
    .map_err(|err| AuthError::Provider(err.to_string()))?
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|err| AuthError::Provider(format!("Stored password hash is invalid: {err}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|err| AuthError::Provider(err.to_string()))?
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<Identity, AuthError> {
        let email = normalize_email(&credentials.email);
        let account = self
            .find_account(&email)
            .await?
            .ok_or_else(|| AuthError::AccountNotFound(email.clone()))?;
        if !verify_password(&credentials.password, &account.password_hash).await? {
            tracing::debug!(email = email.as_str(), "password mismatch");
            return Err(AuthError::InvalidCredential(
                "Incorrect email or password".to_string(),
            ));
        }

        let identity = Identity::from(account);
        tracing::info!(uid = identity.uid.as_str(), "signed in with password");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let email = normalize_email(&credentials.email);
        if self.find_account(&email).await?.is_some() {
            return Err(AuthError::AccountExists(email));
        }

        let new_account = NewAccount {
            email: email.clone(),
            password_hash: hash_password(&credentials.password).await?,
            display_name: None,
        };
        let account = Account::create(&self.db.pool, &new_account, Uuid::new_v4())
            .await
            .map_err(|err| match err.sql_err() {
                // Lost a race with a concurrent sign-up for the same address.
                Some(SqlErr::UniqueConstraintViolation(_)) => AuthError::AccountExists(email.clone()),
                _ => AuthError::Provider(err.to_string()),
            })?;

        let identity = Identity::from(account);
        tracing::info!(uid = identity.uid.as_str(), "account created");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> Result<Identity, AuthError> {
        let identity = {
            let state = self.lock();
            if state.popups_blocked {
                return Err(AuthError::PopupBlocked);
            }
            state.oauth.get(&provider).cloned().ok_or_else(|| {
                AuthError::Provider(format!(
                    "{} sign-in is not configured",
                    provider.provider_id()
                ))
            })?
        };
        tracing::info!(
            uid = identity.uid.as_str(),
            provider = provider.provider_id(),
            "signed in with oauth"
        );
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if self.find_account(&email).await?.is_none() {
            return Err(AuthError::AccountNotFound(email));
        }
        tracing::info!(email = email.as_str(), "password reset requested");
        self.lock().reset_requests.push(email);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(identity) = self.current_identity() {
            tracing::info!(uid = identity.uid.as_str(), "signed out");
        }
        self.set_current(None);
        Ok(())
    }
}
