//! Persistence seam used by the account service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::SqlErr;
use thiserror::Error;

use crate::db::{NewUser, Store, User};
use crate::domain::UserId;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same email already exists.
    #[error("email already registered")]
    EmailTaken,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Lookup-by-email and bulk mutation over user records.
///
/// Bulk operations are single statements, so each call either applies to
/// every matching row or to none.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Same as [`CredentialStore::find_by_email`] plus the stored password hash.
    async fn find_credentials(&self, email: &str) -> anyhow::Result<Option<(User, String)>>;

    /// Returns `false` when the user no longer exists.
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> anyhow::Result<bool>;

    async fn list_by_recent_login(&self) -> anyhow::Result<Vec<User>>;

    /// Returns how many of `ids` matched an existing row.
    async fn set_blocked(&self, ids: &[UserId], blocked: bool) -> anyhow::Result<u64>;

    /// Returns how many of `ids` matched an existing row.
    async fn delete(&self, ids: &[UserId]) -> anyhow::Result<u64>;
}

#[async_trait]
impl CredentialStore for Store {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.create_user(new_user).await.map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                StoreError::EmailTaken
            } else {
                StoreError::Other(anyhow::Error::new(err).context("Failed to insert user"))
            }
        })
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.get_user_by_email(email).await
    }

    async fn find_credentials(&self, email: &str) -> anyhow::Result<Option<(User, String)>> {
        self.get_user_by_email_with_password(email).await
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> anyhow::Result<bool> {
        self.record_user_login(id, at).await
    }

    async fn list_by_recent_login(&self) -> anyhow::Result<Vec<User>> {
        self.list_users_by_recent_login().await
    }

    async fn set_blocked(&self, ids: &[UserId], blocked: bool) -> anyhow::Result<u64> {
        self.set_users_blocked(ids, blocked).await
    }

    async fn delete(&self, ids: &[UserId]) -> anyhow::Result<u64> {
        self.delete_users(ids).await
    }
}
