//! Builder to construct a token pool from configuration.

use std::sync::Arc;

use crate::config::TokenPoolConfig;
use crate::core::{AffinityEvaluator, SimpleAffinityEvaluator, TokenPool};

/// Builds a [`TokenPool`] from a [`TokenPoolConfig`] and an evaluator.
///
/// The evaluator defaults to [`SimpleAffinityEvaluator`]; embedding systems
/// with their own routing rules inject a custom [`AffinityEvaluator`].
#[derive(Clone)]
pub struct TokenPoolBuilder {
    config: TokenPoolConfig,
    evaluator: Arc<dyn AffinityEvaluator>,
}

impl std::fmt::Debug for TokenPoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPoolBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenPoolBuilder {
    /// Start from a configuration with the default evaluator.
    #[must_use]
    pub fn new(config: TokenPoolConfig) -> Self {
        Self {
            config,
            evaluator: Arc::new(SimpleAffinityEvaluator),
        }
    }

    /// Replace the affinity evaluator.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn AffinityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// The configuration this builder will apply.
    #[must_use]
    pub const fn config(&self) -> &TokenPoolConfig {
        &self.config
    }

    /// Validate the configuration and construct the pool, starting its
    /// health sweep thread.
    ///
    /// # Errors
    ///
    /// A description of the configuration validation failure.
    pub fn build(self) -> Result<TokenPool, String> {
        self.config.validate()?;
        Ok(TokenPool::with_config(&self.config, self.evaluator))
    }
}

impl Default for TokenPoolBuilder {
    fn default() -> Self {
        Self::new(TokenPoolConfig::default())
    }
}
