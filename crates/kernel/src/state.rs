//! Application state shared across all handlers.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::file::{FileStore, LocalFileStore};
use crate::form::{FormEnvironment, SessKey};

/// Context and user the demo server acts for; there is no login.
pub const GUEST_USER_ID: i64 = 1;
pub const GUEST_USER_CONTEXT_ID: i64 = 1;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn FileStore>,
}

impl AppState {
    /// Create the state, preparing the store and temp directories.
    pub fn new(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.filestore_dir).with_context(|| {
            format!(
                "failed to create file store directory {}",
                config.filestore_dir.display()
            )
        })?;
        fs::create_dir_all(config.temp_dir.join("uploads")).with_context(|| {
            format!(
                "failed to create temp directory {}",
                config.temp_dir.display()
            )
        })?;

        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.filestore_dir));
        info!(
            filestore = %config.filestore_dir.display(),
            temp = %config.temp_dir.display(),
            "file store ready"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config: config.clone(),
                store,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.inner.store
    }

    /// Environment for forms built during one request.
    pub fn form_environment(&self, sesskey: SessKey) -> FormEnvironment {
        FormEnvironment {
            sesskey,
            developer_mode: self.inner.config.debug_developer,
            temp_dir: self.inner.config.temp_dir.clone(),
            user_context_id: GUEST_USER_CONTEXT_ID,
            user_id: GUEST_USER_ID,
            store: Arc::clone(&self.inner.store),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}
