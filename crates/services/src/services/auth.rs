use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub use super::identity::{AuthError, Identity, IdentityProvider, OAuthProvider};
use super::notification::{Notification, Notifier};

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidCredential(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AuthError::InvalidCredential(
            "Please enter your email address".to_string(),
        ));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(AuthError::InvalidCredential(
            "Please enter a valid email address".to_string(),
        ));
    }
    Ok(())
}

/// Sign-in, sign-up and recovery flows. Every failure is returned for inline
/// display and also reported as a notification; nothing is retried.
#[derive(Clone)]
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    notifier: Notifier,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>, notifier: Notifier) -> Self {
        Self { provider, notifier }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.provider.current_identity()
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let result = match credentials.validate() {
            Ok(()) => self.provider.sign_in_with_password(credentials).await,
            Err(err) => Err(err),
        };
        self.report(result, "Signed in successfully", "Welcome back!", "Sign in failed")
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let result = match credentials.validate() {
            Ok(()) => self.provider.sign_up(credentials).await,
            Err(err) => Err(err),
        };
        self.report(
            result,
            "Account created successfully",
            "Welcome to Task Manager!",
            "Sign up failed",
        )
    }

    pub async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
    ) -> Result<Identity, AuthError> {
        let result = self.provider.sign_in_with_oauth(provider).await;
        if let Err(AuthError::PopupBlocked) = &result {
            self.notifier.notify(Notification::error(
                "Popup Blocked",
                "Please allow popups for this site and try again.",
            ));
            return result;
        }
        self.report(result, "Signed in successfully", "Welcome back!", "Sign in failed")
    }

    pub async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let result = match validate_email(email) {
            Ok(()) => self.provider.send_password_reset(email).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(()) => self.notifier.notify(Notification::info(
                "Password reset email sent",
                "Check your email for password reset instructions.",
            )),
            Err(err) => self
                .notifier
                .notify(Notification::error("Password reset failed", err.to_string())),
        }
        result
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.provider.sign_out().await;
        match &result {
            Ok(()) => self.notifier.notify(Notification::info(
                "Signed out",
                "You have been successfully signed out.",
            )),
            Err(err) => self
                .notifier
                .notify(Notification::error("Sign out failed", err.to_string())),
        }
        result
    }

    fn report(
        &self,
        result: Result<Identity, AuthError>,
        success_title: &str,
        success_description: &str,
        failure_title: &str,
    ) -> Result<Identity, AuthError> {
        match &result {
            Ok(_) => self
                .notifier
                .notify(Notification::info(success_title, success_description)),
            Err(err) => self
                .notifier
                .notify(Notification::error(failure_title, err.to_string())),
        }
        result
    }
}
