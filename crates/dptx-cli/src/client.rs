//! Connection to the remote configuration service.

use std::sync::Arc;

use anyhow::{Context, Result};
use dptx_core::config::CoordinatorConfig;
use dptx_core::{CallContext, DataPlaneClient, TransactionApi, TransactionCoordinator};

use crate::Config;

/// HTTP client plus the coordinator driving it.
#[derive(Debug)]
pub struct Session {
    client: Arc<DataPlaneClient>,
    coordinator: TransactionCoordinator,
}

impl Session {
    /// Creates a session from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection settings are invalid or the retry
    /// settings in the environment cannot be parsed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Arc::new(
            DataPlaneClient::new(&config.client).context("Invalid API connection settings")?,
        );
        let coordinator_config = match &config.coordinator {
            Some(coordinator) => coordinator.clone(),
            None => CoordinatorConfig::from_env().context("Invalid retry settings")?,
        };
        coordinator_config
            .validate()
            .context("Invalid retry settings")?;

        tracing::debug!(
            base_url = client.base_url(),
            policy = ?coordinator_config.retry_policy(),
            "session created"
        );
        let api: Arc<dyn TransactionApi> = client.clone();
        Ok(Self {
            coordinator: TransactionCoordinator::new(api, &coordinator_config),
            client,
        })
    }

    /// Returns the HTTP client.
    #[must_use]
    pub fn client(&self) -> &Arc<DataPlaneClient> {
        &self.client
    }

    /// Returns the coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }
}

/// Returns a context cancelled when the process receives Ctrl-C.
#[must_use]
pub fn interruptible_context() -> CallContext {
    let ctx = CallContext::background();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling in-flight request");
            on_signal.cancel();
        }
    });
    ctx
}
