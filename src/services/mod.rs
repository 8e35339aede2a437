pub mod credential_store;
pub use credential_store::{CredentialStore, StoreError};

pub mod password;
pub use password::{Argon2Hasher, CredentialHasher};

pub mod session;
pub use session::{SessionError, SessionIssuer};

pub mod validation;
pub use validation::{Credentials, FieldErrors, Registration};

pub mod account_service;
pub mod account_service_impl;
pub use account_service::{AccountError, AccountService, BulkOutcome};
pub use account_service_impl::SeaOrmAccountService;
