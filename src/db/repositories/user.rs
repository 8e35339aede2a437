use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, sea_query::Expr,
};

use crate::domain::UserId;
use crate::entities::{prelude::*, users};

/// User data returned from repository (without sensitive password hash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub is_blocked: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: UserId::new(model.id),
            name: model.name,
            email: model.email,
            is_blocked: model.is_blocked,
            registered_at: model.registered_at,
            last_login_at: model.last_login_at,
        }
    }
}

/// Fields of a user row that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub registered_at: DateTime<Utc>,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Inserts a user. The raw `DbErr` is returned so callers can tell a
    /// unique-constraint violation apart from other failures.
    pub async fn create(&self, new_user: NewUser) -> std::result::Result<User, DbErr> {
        let active = users::ActiveModel {
            name: Set(new_user.name),
            email: Set(new_user.email),
            password_hash: Set(new_user.password_hash),
            is_blocked: Set(false),
            registered_at: Set(Some(new_user.registered_at)),
            last_login_at: Set(None),
            ..Default::default()
        };

        let model = active.insert(&self.conn).await?;
        Ok(User::from(model))
    }

    /// Get user by exact email match
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    /// Get user by email together with the stored password hash (for login)
    pub async fn get_by_email_with_password(&self, email: &str) -> Result<Option<(User, String)>> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(|u| {
            let password_hash = u.password_hash.clone();
            (User::from(u), password_hash)
        }))
    }

    pub async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        let user = Users::find_by_id(id.value())
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    /// Stamps the login time in one statement. Returns `false` when the user
    /// no longer exists.
    pub async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<bool> {
        let result = Users::update_many()
            .col_expr(users::Column::LastLoginAt, Expr::value(at))
            .filter(users::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to record login time")?;

        Ok(result.rows_affected > 0)
    }

    /// All users, most recent login first. Users who never logged in come
    /// last; ties keep ascending id order.
    pub async fn list_by_recent_login(&self) -> Result<Vec<User>> {
        let rows = Users::find()
            .order_by_asc(Expr::col(users::Column::LastLoginAt).is_null())
            .order_by_desc(users::Column::LastLoginAt)
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Sets the blocked flag on every listed user in a single statement.
    /// Returns the number of rows that matched.
    pub async fn set_blocked(&self, ids: &[UserId], blocked: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = Users::update_many()
            .col_expr(users::Column::IsBlocked, Expr::value(blocked))
            .filter(users::Column::Id.is_in(ids.iter().map(UserId::value)))
            .exec(&self.conn)
            .await
            .context("Failed to update blocked flag")?;

        Ok(result.rows_affected)
    }

    /// Deletes every listed user in a single statement.
    pub async fn delete_many(&self, ids: &[UserId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = Users::delete_many()
            .filter(users::Column::Id.is_in(ids.iter().map(UserId::value)))
            .exec(&self.conn)
            .await
            .context("Failed to delete users")?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::TimeZone;

    async fn repo() -> UserRepository {
        let db_path = std::env::temp_dir().join(format!(
            "useradmin-repo-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let store = Store::new(&format!("sqlite:{}", db_path.display()))
            .await
            .expect("failed to open test store");
        store.user_repo()
    }

    async fn insert(repo: &UserRepository, email: &str) -> User {
        repo.create(NewUser {
            name: email.to_string(),
            email: email.to_string(),
            password_hash: "x".to_string(),
            registered_at: Utc::now(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn listing_puts_never_logged_in_last_in_id_order() {
        let repo = repo().await;
        let never_a = insert(&repo, "a@example.com").await;
        let older = insert(&repo, "b@example.com").await;
        let never_c = insert(&repo, "c@example.com").await;
        let newer = insert(&repo, "d@example.com").await;

        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        assert!(repo.record_login(older.id, t1).await.unwrap());
        assert!(repo.record_login(newer.id, t2).await.unwrap());

        let ids: Vec<UserId> = repo
            .list_by_recent_login()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id, never_a.id, never_c.id]);
    }

    #[tokio::test]
    async fn equal_login_times_keep_id_order() {
        let repo = repo().await;
        let first = insert(&repo, "a@example.com").await;
        let second = insert(&repo, "b@example.com").await;

        let at = Utc.with_ymd_and_hms(2026, 2, 2, 12, 0, 0).unwrap();
        repo.record_login(second.id, at).await.unwrap();
        repo.record_login(first.id, at).await.unwrap();

        let ids: Vec<UserId> = repo
            .list_by_recent_login()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn record_login_for_missing_user_returns_false() {
        let repo = repo().await;
        let user = insert(&repo, "gone@example.com").await;
        assert_eq!(repo.delete_many(&[user.id]).await.unwrap(), 1);

        assert!(!repo.record_login(user.id, Utc::now()).await.unwrap());
        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
    }
}
