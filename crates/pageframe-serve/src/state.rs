//! Shared application state.

use std::sync::Arc;

use pageframe_core::EmbedProxy;

use crate::config::Config;

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The embedding pipeline, including both caches.
    pub proxy: Arc<EmbedProxy>,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create the state with the production HTTP fetcher.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let proxy = EmbedProxy::new(config.proxy.clone())?;
        Ok(Self::with_proxy(config, proxy))
    }

    /// Create the state around an already built pipeline.
    pub fn with_proxy(config: Config, proxy: EmbedProxy) -> Self {
        Self {
            proxy: Arc::new(proxy),
            config: Arc::new(config),
        }
    }
}
