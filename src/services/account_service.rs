//! Domain service for account registration, sign-in and administration.
//!
//! The caller's identity is never read from ambient state: handlers pass the
//! session handle and, for protected operations, the [`CurrentUser`] resolved
//! by [`AccountService::authorize`].

use thiserror::Error;

use crate::db::User;
use crate::domain::{BulkAction, Claims, CurrentUser, UserId};
use crate::services::credential_store::StoreError;
use crate::services::session::{SessionError, SessionIssuer};
use crate::services::validation::{Credentials, FieldErrors, Registration};

/// Errors specific to account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Email is already registered.")]
    EmailTaken,

    /// Unknown email and wrong password share this variant so the two
    /// cases cannot be told apart.
    #[error("Invalid login attempt.")]
    InvalidCredentials,

    #[error("Your account is blocked.")]
    Blocked,

    /// No session, or the session's user is gone or blocked.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("No users selected for {}.", .0.gerund())]
    NoSelection(BulkAction),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AccountError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(format!("{err:#}"))
    }
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmailTaken => Self::EmailTaken,
            StoreError::Other(e) => e.into(),
        }
    }
}

/// Result of a bulk action that passed the empty-selection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    pub action: BulkAction,

    /// Records that existed and were changed or removed.
    pub affected: u64,

    /// The caller acted on their own account and the session was ended.
    pub signed_out: bool,
}

impl BulkOutcome {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "{} user(s) have been {} successfully.",
            self.affected,
            self.action.past_tense()
        )
    }
}

/// Domain service trait for accounts.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    /// Creates an account.
    ///
    /// # Errors
    ///
    /// [`AccountError::Validation`] for bad input, [`AccountError::EmailTaken`]
    /// when the email is already in use.
    async fn register(&self, registration: Registration) -> Result<User, AccountError>;

    /// Verifies credentials, stamps the login time and issues a session.
    ///
    /// # Errors
    ///
    /// [`AccountError::InvalidCredentials`] for an unknown email or wrong
    /// password, [`AccountError::Blocked`] for a blocked account.
    async fn login(
        &self,
        credentials: Credentials,
        session: &dyn SessionIssuer,
    ) -> Result<Claims, AccountError>;

    /// Ends the session. Works whether or not anyone is signed in.
    async fn logout(&self, session: &dyn SessionIssuer) -> Result<(), AccountError>;

    /// Resolves the session's identity against live state.
    ///
    /// # Errors
    ///
    /// [`AccountError::Unauthenticated`] when there is no session, or when
    /// the user no longer exists or is blocked. In the latter two cases the
    /// session has been invalidated.
    async fn authorize(&self, session: &dyn SessionIssuer) -> Result<CurrentUser, AccountError>;

    /// Every user, most recent login first, never-logged-in users last.
    async fn list_users(&self, current: &CurrentUser) -> Result<Vec<User>, AccountError>;

    /// Applies `action` to all `ids` in one batch.
    ///
    /// # Errors
    ///
    /// [`AccountError::NoSelection`] when `ids` is empty; nothing is changed.
    async fn apply_bulk(
        &self,
        action: BulkAction,
        ids: &[UserId],
        current: &CurrentUser,
        session: &dyn SessionIssuer,
    ) -> Result<BulkOutcome, AccountError>;
}
