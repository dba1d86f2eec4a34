use crate::chain::SecurityChain;
use crate::config::ServerConfig;
use crate::ingest::{open_storage, Ingest};
use anyhow::Context;
use std::sync::Arc;
use telemon_common::retry::RetryExecutor;
use telemon_security::{Decryptor, Signer};
use telemon_storage::Storage;

/// Shared by every HTTP handler and the gRPC service. Read-only apart from
/// the storage backend, which does its own locking.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<SecurityChain>,
    pub ingest: Ingest,
}

impl AppState {
    pub fn new(chain: SecurityChain, ingest: Ingest) -> Self {
        Self {
            chain: Arc::new(chain),
            ingest,
        }
    }

    /// Loads keys and opens storage as configured.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let decryptor = config
            .crypto_key
            .as_deref()
            .map(|path| {
                Decryptor::load(path).with_context(|| format!("loading {}", path.display()))
            })
            .transpose()?;
        let chain = SecurityChain::new(
            decryptor,
            Signer::new(config.key.as_deref()),
            config.network_guard()?,
        );

        let retry = RetryExecutor::new(config.retry_unit);
        let storage = open_storage(config.database_path.as_deref(), retry).await?;
        Ok(Self::new(chain, Ingest::new(storage, retry, config.storage_timeout)))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.ingest.storage()
    }
}
