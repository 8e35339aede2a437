//! `SeaORM` implementation of the `AccountService` trait.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

use crate::db::{NewUser, User};
use crate::domain::{BulkAction, Claims, CurrentUser, UserId};
use crate::services::account_service::{AccountError, AccountService, BulkOutcome};
use crate::services::credential_store::CredentialStore;
use crate::services::password::CredentialHasher;
use crate::services::session::SessionIssuer;
use crate::services::validation::{Credentials, Registration};

pub struct SeaOrmAccountService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn CredentialHasher>,
}

impl SeaOrmAccountService {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { store, hasher }
    }

    async fn hash_password(&self, password: String) -> Result<String, AccountError> {
        let hasher = Arc::clone(&self.hasher);
        task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AccountError::Internal(format!("Password hashing task panicked: {e}")))?
            .map_err(|e| AccountError::Internal(e.to_string()))
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, AccountError> {
        let hasher = Arc::clone(&self.hasher);
        task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| {
                AccountError::Internal(format!("Password verification task panicked: {e}"))
            })?
            .map_err(|e| AccountError::Internal(e.to_string()))
    }
}

fn record_login_attempt(outcome: &'static str) {
    metrics::counter!("account_login_attempts_total", "outcome" => outcome).increment(1);
}

#[async_trait]
impl AccountService for SeaOrmAccountService {
    async fn register(&self, registration: Registration) -> Result<User, AccountError> {
        registration.validate().map_err(AccountError::Validation)?;

        let Registration {
            name,
            email,
            password,
        } = registration;

        let password_hash = self.hash_password(password).await?;

        let user = self
            .store
            .create_user(NewUser {
                name,
                email,
                password_hash,
                registered_at: Utc::now(),
            })
            .await
            .inspect_err(|e| warn!("Registration rejected: {e}"))?;

        info!(user_id = %user.id, "Registered new user");
        Ok(user)
    }

    async fn login(
        &self,
        credentials: Credentials,
        session: &dyn SessionIssuer,
    ) -> Result<Claims, AccountError> {
        credentials.validate().map_err(AccountError::Validation)?;

        let Some((user, password_hash)) = self.store.find_credentials(&credentials.email).await?
        else {
            record_login_attempt("invalid");
            return Err(AccountError::InvalidCredentials);
        };

        if !self
            .verify_password(credentials.password, password_hash)
            .await?
        {
            record_login_attempt("invalid");
            return Err(AccountError::InvalidCredentials);
        }

        // Checked only after the password so the blocked message is never
        // shown to someone who does not know the password.
        if user.is_blocked {
            record_login_attempt("blocked");
            warn!(user_id = %user.id, "Login refused for blocked user");
            return Err(AccountError::Blocked);
        }

        // Deleted between lookup and stamp.
        if !self.store.record_login(user.id, Utc::now()).await? {
            record_login_attempt("invalid");
            return Err(AccountError::InvalidCredentials);
        }

        let claims = Claims {
            email: user.email,
            name: user.name,
        };
        session.issue(&claims).await?;

        record_login_attempt("success");
        info!(user_id = %user.id, "User logged in");
        Ok(claims)
    }

    async fn logout(&self, session: &dyn SessionIssuer) -> Result<(), AccountError> {
        session.invalidate().await?;
        Ok(())
    }

    async fn authorize(&self, session: &dyn SessionIssuer) -> Result<CurrentUser, AccountError> {
        let Some(claims) = session.claims().await? else {
            return Err(AccountError::Unauthenticated);
        };

        match self.store.find_by_email(&claims.email).await? {
            Some(user) if !user.is_blocked => Ok(CurrentUser {
                id: user.id,
                email: user.email,
                name: user.name,
            }),
            Some(user) => {
                info!(user_id = %user.id, "Ending session of blocked user");
                session.invalidate().await?;
                Err(AccountError::Unauthenticated)
            }
            None => {
                info!("Ending session of deleted user");
                session.invalidate().await?;
                Err(AccountError::Unauthenticated)
            }
        }
    }

    async fn list_users(&self, current: &CurrentUser) -> Result<Vec<User>, AccountError> {
        let users = self.store.list_by_recent_login().await?;
        debug!(user_id = %current.id, count = users.len(), "Listed users");
        Ok(users)
    }

    async fn apply_bulk(
        &self,
        action: BulkAction,
        ids: &[UserId],
        current: &CurrentUser,
        session: &dyn SessionIssuer,
    ) -> Result<BulkOutcome, AccountError> {
        if ids.is_empty() {
            return Err(AccountError::NoSelection(action));
        }

        let unique: Vec<UserId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let includes_self = unique.contains(&current.id);

        let affected = match action {
            BulkAction::Block => self.store.set_blocked(&unique, true).await?,
            BulkAction::Unblock => self.store.set_blocked(&unique, false).await?,
            BulkAction::Delete => self.store.delete(&unique).await?,
        };

        metrics::counter!("account_bulk_actions_total", "action" => action.as_str())
            .increment(1);
        info!(
            user_id = %current.id,
            action = %action,
            requested = unique.len(),
            affected,
            "Applied bulk action"
        );

        let signed_out = includes_self && action.signs_out_self();
        if signed_out {
            info!(user_id = %current.id, action = %action, "User acted on own account, ending session");
            session.invalidate().await?;
        }

        Ok(BulkOutcome {
            action,
            affected,
            signed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::db::Store;
    use crate::services::password::Argon2Hasher;
    use crate::services::credential_store::StoreError;
    use crate::services::session::SessionError;
    use chrono::{DateTime, TimeZone};
    use std::sync::Mutex;

    /// In-memory stand-in for the cookie session.
    #[derive(Default)]
    struct TestSession {
        claims: Mutex<Option<Claims>>,
    }

    impl TestSession {
        fn signed_in_as(claims: &Claims) -> Self {
            Self {
                claims: Mutex::new(Some(claims.clone())),
            }
        }

        fn is_active(&self) -> bool {
            self.claims.lock().unwrap().is_some()
        }
    }

    #[async_trait]
    impl SessionIssuer for TestSession {
        async fn issue(&self, claims: &Claims) -> Result<(), SessionError> {
            *self.claims.lock().unwrap() = Some(claims.clone());
            Ok(())
        }

        async fn claims(&self) -> Result<Option<Claims>, SessionError> {
            Ok(self.claims.lock().unwrap().clone())
        }

        async fn invalidate(&self) -> Result<(), SessionError> {
            *self.claims.lock().unwrap() = None;
            Ok(())
        }
    }

    struct Harness {
        store: Store,
        service: SeaOrmAccountService,
    }

    async fn harness() -> Harness {
        let db_path = std::env::temp_dir().join(format!(
            "useradmin-service-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let store = Store::new(&format!("sqlite:{}", db_path.display()))
            .await
            .expect("failed to open test store");

        let service = SeaOrmAccountService::new(Arc::new(store.clone()), cheap_hasher());
        Harness { store, service }
    }

    fn cheap_hasher() -> Arc<dyn CredentialHasher> {
        Arc::new(
            Argon2Hasher::from_config(&SecurityConfig {
                argon2_memory_cost_kib: 1024,
                argon2_time_cost: 1,
                argon2_parallelism: 1,
            })
            .unwrap(),
        )
    }

    /// Deletes the user right after their credentials are read, as a
    /// concurrent bulk delete would.
    struct DeletedAfterLookup(Store);

    #[async_trait]
    impl CredentialStore for DeletedAfterLookup {
        async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
            CredentialStore::create_user(&self.0, new_user).await
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            self.0.get_user_by_email(email).await
        }

        async fn find_credentials(&self, email: &str) -> anyhow::Result<Option<(User, String)>> {
            let found = self.0.get_user_by_email_with_password(email).await?;
            if let Some((user, _)) = &found {
                self.0.delete_users(&[user.id]).await?;
            }
            Ok(found)
        }

        async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> anyhow::Result<bool> {
            self.0.record_user_login(id, at).await
        }

        async fn list_by_recent_login(&self) -> anyhow::Result<Vec<User>> {
            self.0.list_users_by_recent_login().await
        }

        async fn set_blocked(&self, ids: &[UserId], blocked: bool) -> anyhow::Result<u64> {
            self.0.set_users_blocked(ids, blocked).await
        }

        async fn delete(&self, ids: &[UserId]) -> anyhow::Result<u64> {
            self.0.delete_users(ids).await
        }
    }

    impl Harness {
        async fn register(&self, name: &str, email: &str) -> User {
            self.service
                .register(Registration::new(name, email, "secret"))
                .await
                .expect("registration failed")
        }

        async fn sign_in(&self, email: &str) -> (TestSession, CurrentUser) {
            let session = TestSession::default();
            self.service
                .login(Credentials::new(email, "secret"), &session)
                .await
                .expect("login failed");
            let current = self.service.authorize(&session).await.expect("authorize failed");
            (session, current)
        }
    }

    #[tokio::test]
    async fn register_stores_hash_and_timestamps() {
        let h = harness().await;
        let user = h.register("Ada", "ada@example.com").await;

        assert_eq!(user.name, "Ada");
        assert!(!user.is_blocked);
        assert!(user.registered_at.is_some());
        assert!(user.last_login_at.is_none());

        let (_, hash) = h
            .store
            .get_user_by_email_with_password("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!hash.is_empty());
        assert_ne!(hash, "secret");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_without_second_record() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;

        let err = h
            .service
            .register(Registration::new("Imposter", "ada@example.com", "other"))
            .await
            .unwrap_err();

        assert!(matches!(err, AccountError::EmailTaken));
        assert_eq!(err.to_string(), "Email is already registered.");
        assert_eq!(h.store.list_users_by_recent_login().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_registration_creates_nothing() {
        let h = harness().await;
        let err = h
            .service
            .register(Registration::new("Ada", "not-an-email", "secret"))
            .await
            .unwrap_err();

        assert!(matches!(err, AccountError::Validation(_)));
        assert!(h.store.list_users_by_recent_login().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;
        let session = TestSession::default();

        let unknown = h
            .service
            .login(Credentials::new("nobody@example.com", "secret"), &session)
            .await
            .unwrap_err();
        let wrong = h
            .service
            .login(Credentials::new("ada@example.com", "wrong"), &session)
            .await
            .unwrap_err();

        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, AccountError::InvalidCredentials));
        assert!(matches!(wrong, AccountError::InvalidCredentials));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn login_stamps_last_login_and_issues_claims() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;
        let session = TestSession::default();

        let claims = h
            .service
            .login(Credentials::new("ada@example.com", "secret"), &session)
            .await
            .unwrap();

        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.name, "Ada");
        assert_eq!(session.claims().await.unwrap(), Some(claims));

        let user = h.store.get_user_by_email("ada@example.com").await.unwrap().unwrap();
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn blocked_user_gets_distinct_message_and_no_access() {
        let h = harness().await;
        let ada = h.register("Ada", "ada@example.com").await;
        let (session, _) = h.sign_in("ada@example.com").await;

        h.store.set_users_blocked(&[ada.id], true).await.unwrap();

        // An existing session is ended on the next protected access.
        let err = h.service.authorize(&session).await.unwrap_err();
        assert!(matches!(err, AccountError::Unauthenticated));
        assert!(!session.is_active());

        let fresh = TestSession::default();
        let err = h
            .service
            .login(Credentials::new("ada@example.com", "secret"), &fresh)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Blocked));
        assert_eq!(err.to_string(), "Your account is blocked.");
        assert!(!fresh.is_active());
    }

    #[tokio::test]
    async fn authorize_rejects_missing_session_and_deleted_user() {
        let h = harness().await;
        let empty = TestSession::default();
        assert!(matches!(
            h.service.authorize(&empty).await,
            Err(AccountError::Unauthenticated)
        ));

        let ghost = TestSession::signed_in_as(&Claims {
            email: "ghost@example.com".to_string(),
            name: "Ghost".to_string(),
        });
        assert!(matches!(
            h.service.authorize(&ghost).await,
            Err(AccountError::Unauthenticated)
        ));
        assert!(!ghost.is_active());
    }

    #[tokio::test]
    async fn self_block_ends_the_session() {
        let h = harness().await;
        let ada = h.register("Ada", "ada@example.com").await;
        let bob = h.register("Bob", "bob@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;

        let outcome = h
            .service
            .apply_bulk(BulkAction::Block, &[bob.id, ada.id], &current, &session)
            .await
            .unwrap();

        assert_eq!(outcome.affected, 2);
        assert!(outcome.signed_out);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn self_delete_ends_the_session() {
        let h = harness().await;
        let ada = h.register("Ada", "ada@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;

        let outcome = h
            .service
            .apply_bulk(BulkAction::Delete, &[ada.id], &current, &session)
            .await
            .unwrap();

        assert_eq!(outcome.affected, 1);
        assert!(outcome.signed_out);
        assert!(matches!(
            h.service.authorize(&session).await,
            Err(AccountError::Unauthenticated)
        ));
        assert!(h.store.get_user(ada.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn self_unblock_keeps_the_session() {
        let h = harness().await;
        let ada = h.register("Ada", "ada@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;

        let outcome = h
            .service
            .apply_bulk(BulkAction::Unblock, &[ada.id], &current, &session)
            .await
            .unwrap();

        assert!(!outcome.signed_out);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn blocking_others_keeps_the_session() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;
        let bob = h.register("Bob", "bob@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;

        let outcome = h
            .service
            .apply_bulk(BulkAction::Block, &[bob.id], &current, &session)
            .await
            .unwrap();

        assert!(!outcome.signed_out);
        assert!(session.is_active());
        assert_eq!(outcome.message(), "1 user(s) have been blocked successfully.");
    }

    #[tokio::test]
    async fn unblock_reports_only_existing_records() {
        let h = harness().await;
        let ada = h.register("Ada", "ada@example.com").await;
        let bob = h.register("Bob", "bob@example.com").await;
        let carol = h.register("Carol", "carol@example.com").await;
        h.store
            .set_users_blocked(&[bob.id, carol.id], true)
            .await
            .unwrap();
        let (session, current) = h.sign_in("ada@example.com").await;

        let ids = [bob.id, carol.id, UserId::new(9_999), UserId::new(10_000)];
        let outcome = h
            .service
            .apply_bulk(BulkAction::Unblock, &ids, &current, &session)
            .await
            .unwrap();

        assert_eq!(outcome.affected, 2);
        assert!(!outcome.signed_out);
        let users = h.service.list_users(&current).await.unwrap();
        assert!(users.iter().all(|u| !u.is_blocked));
        assert!(users.iter().any(|u| u.id == ada.id));
    }

    #[tokio::test]
    async fn empty_selection_changes_nothing() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;
        let before = h.store.list_users_by_recent_login().await.unwrap();

        for action in [BulkAction::Block, BulkAction::Unblock, BulkAction::Delete] {
            let err = h
                .service
                .apply_bulk(action, &[], &current, &session)
                .await
                .unwrap_err();
            assert!(matches!(err, AccountError::NoSelection(a) if a == action));
        }

        assert_eq!(h.store.list_users_by_recent_login().await.unwrap(), before);
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn duplicate_ids_count_once() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;
        let bob = h.register("Bob", "bob@example.com").await;
        let (session, current) = h.sign_in("ada@example.com").await;

        let outcome = h
            .service
            .apply_bulk(BulkAction::Block, &[bob.id, bob.id], &current, &session)
            .await
            .unwrap();

        assert_eq!(outcome.affected, 1);
    }

    #[tokio::test]
    async fn users_are_ordered_by_last_login_with_never_last() {
        let h = harness().await;
        let never = h.register("Never", "never@example.com").await;
        let older = h.register("Older", "older@example.com").await;
        let newer = h.register("Newer", "newer@example.com").await;

        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        h.store.record_user_login(older.id, t2).await.unwrap();
        h.store.record_user_login(newer.id, t1).await.unwrap();

        let current = CurrentUser {
            id: newer.id,
            email: newer.email.clone(),
            name: newer.name.clone(),
        };
        let order: Vec<UserId> = h
            .service
            .list_users(&current)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();

        assert_eq!(order, vec![newer.id, older.id, never.id]);
    }

    #[tokio::test]
    async fn user_deleted_during_login_gets_generic_failure() {
        let h = harness().await;
        h.register("Ada", "ada@example.com").await;

        let racing = SeaOrmAccountService::new(
            Arc::new(DeletedAfterLookup(h.store.clone())),
            cheap_hasher(),
        );
        let session = TestSession::default();
        let err = racing
            .login(Credentials::new("ada@example.com", "secret"), &session)
            .await
            .unwrap_err();

        assert!(matches!(err, AccountError::InvalidCredentials));
        assert!(!session.is_active());
        assert!(h.store.get_user_by_email("ada@example.com").await.unwrap().is_none());
    }
}
