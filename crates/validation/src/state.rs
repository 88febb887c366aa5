//! Application state for the validation service.
//!
//! The state is cloned into every handler. It carries the [`EngineProvider`]
//! rather than an engine so that handlers never build one themselves and the
//! engine's lifecycle stays owned by the provider.

use std::sync::Arc;

use crate::config::ValidatorConfig;
use crate::engine::EngineProvider;

/// Shared application state.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use helios_validation::{AppState, ValidatorConfig};
/// use helios_validation::conformance::ConformanceEngineFactory;
/// use helios_validation::engine::EngineProvider;
///
/// let config = ValidatorConfig::default();
/// let provider = EngineProvider::from_config(Arc::new(ConformanceEngineFactory::new()), &config);
/// let state = AppState::new(provider, config);
/// ```
#[derive(Clone)]
pub struct AppState {
    provider: EngineProvider,
    config: Arc<ValidatorConfig>,
}

impl AppState {
    /// Creates the state from a provider and configuration.
    pub fn new(provider: EngineProvider, config: ValidatorConfig) -> Self {
        Self {
            provider,
            config: Arc::new(config),
        }
    }

    /// Returns the engine provider.
    pub fn provider(&self) -> &EngineProvider {
        &self.provider
    }

    /// Returns the service configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Returns the configured maximum body size in bytes.
    pub fn max_body_size(&self) -> usize {
        self.config.max_body_size
    }
}
