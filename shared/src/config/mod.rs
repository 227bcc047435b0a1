pub mod config;

pub use self::config::{load_config, parse_config};

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::server_config::AppConfig;

/// A cheaply-cloneable, live config handle.
///
/// All clones share the same underlying `RwLock<AppConfig>`, so a call to
/// [`LiveConfig::reload`] is immediately visible to every holder, including
/// the identity provider's user directory and the guard's route table.
///
/// Keep read guards short-lived and never hold one across `.await`; copy the
/// value out first.
#[derive(Clone, Debug)]
pub struct LiveConfig(Arc<RwLock<AppConfig>>);

impl LiveConfig {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.0.read().await
    }

    /// Atomically swap in a new config.
    pub async fn reload(&self, new: AppConfig) {
        *self.0.write().await = new;
    }
}
