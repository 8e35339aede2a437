//! Session seam: issue, read and invalidate the signed session.

use async_trait::async_trait;
use thiserror::Error;
use tower_sessions::Session;

use crate::domain::Claims;

const CLAIMS_KEY: &str = "claims";

#[derive(Debug, Error)]
#[error("Session error: {0}")]
pub struct SessionError(pub String);

impl From<tower_sessions::session::Error> for SessionError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self(err.to_string())
    }
}

#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Binds the session to `claims`, replacing any previous identity.
    async fn issue(&self, claims: &Claims) -> Result<(), SessionError>;

    async fn claims(&self) -> Result<Option<Claims>, SessionError>;

    /// Destroys the session. Safe to call on an empty session.
    async fn invalidate(&self) -> Result<(), SessionError>;
}

#[async_trait]
impl SessionIssuer for Session {
    async fn issue(&self, claims: &Claims) -> Result<(), SessionError> {
        // New id on every sign-in so a pre-login cookie cannot be reused.
        self.cycle_id().await?;
        self.insert(CLAIMS_KEY, claims).await?;
        Ok(())
    }

    async fn claims(&self) -> Result<Option<Claims>, SessionError> {
        Ok(self.get::<Claims>(CLAIMS_KEY).await?)
    }

    async fn invalidate(&self) -> Result<(), SessionError> {
        self.flush().await?;
        Ok(())
    }
}
