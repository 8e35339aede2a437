use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::services::{AccountService, Argon2Hasher, SeaOrmAccountService};

#[derive(Clone)]
pub struct SharedState {
    pub config: Config,

    pub store: Store,

    pub account_service: Arc<dyn AccountService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let hasher = Argon2Hasher::from_config(&config.security)?;

        let account_service: Arc<dyn AccountService> = Arc::new(SeaOrmAccountService::new(
            Arc::new(store.clone()),
            Arc::new(hasher),
        ));

        Ok(Self {
            config,
            store,
            account_service,
        })
    }
}
