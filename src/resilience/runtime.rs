//! Config-driven entry point: resolves each operation's policy by name and
//! wires it to the shared breaker registry.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use super::executor::{PolicyChain, PolicyChainBuilder, PolicyConfig};
use super::operation::ProtectedOperation;
use super::outcome::PolicyError;
use super::registry::BreakerRegistry;
use crate::config::{load_config, validate_config, ConfigError, EngineConfig};

#[derive(Debug, Clone)]
pub struct PolicyRuntime {
    config: Arc<EngineConfig>,
    registry: BreakerRegistry,
    resolved: Arc<DashMap<String, PolicyConfig>>,
}

impl PolicyRuntime {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        tracing::info!(
            policies = config.policies.len(),
            "Policy runtime configured"
        );
        Ok(Self {
            config: Arc::new(config),
            registry: BreakerRegistry::new(),
            resolved: Arc::new(DashMap::new()),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::new(load_config(path)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    /// Policy for `operation`, resolved once and then reused.
    pub fn policy_for(&self, operation: &str) -> PolicyConfig {
        self.resolved
            .entry(operation.to_string())
            .or_insert_with(|| self.config.policy_for(operation))
            .value()
            .clone()
    }

    /// Chain builder preloaded with the operation's policy and the shared
    /// registry, for callers that need a custom classifier.
    pub fn builder<I, T, E>(&self, op: ProtectedOperation<I, T, E>) -> PolicyChainBuilder<I, T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let policy = self.policy_for(op.name());
        PolicyChain::builder(op).config(policy).registry(&self.registry)
    }

    pub fn register<I, T, E>(&self, op: ProtectedOperation<I, T, E>) -> PolicyChain<I, T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.builder(op).build()
    }

    pub fn register_with_fallback<I, T, E>(
        &self,
        op: ProtectedOperation<I, T, E>,
        fallback: ProtectedOperation<I, T, E>,
    ) -> PolicyChain<I, T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.builder(op).fallback(fallback).build()
    }

    /// Build a chain and execute it in one call. Breaker state is shared with
    /// every other chain for the same operation name, but the chain itself is
    /// assembled anew on each call: hot paths should `register` once and keep
    /// the returned chain.
    pub async fn execute<I, T, E>(&self, op: &ProtectedOperation<I, T, E>, input: I) -> Result<T, PolicyError<E>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.register(op.clone()).execute(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.defaults.timeout_ms = Some(0);
        assert!(matches!(PolicyRuntime::new(config), Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_execute_shares_breaker_across_calls() {
        let config = parse_config(
            r#"
            [policies.availability.circuit_breaker]
            request_volume_threshold = 2
            failure_ratio = 0.5
            "#,
        )
        .unwrap();
        let runtime = PolicyRuntime::new(config).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = ProtectedOperation::new("availability", move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>("Service failed.") }
        });

        for _ in 0..2 {
            assert!(matches!(runtime.execute(&op, 2).await, Err(PolicyError::Operation(_))));
        }
        assert!(runtime.execute(&op, 2).await.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let breaker = runtime.registry().get("availability").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registered_chain_shares_breaker_with_execute() {
        let config = parse_config(
            r#"
            [policies.availability.circuit_breaker]
            request_volume_threshold = 2
            "#,
        )
        .unwrap();
        let runtime = PolicyRuntime::new(config).unwrap();

        let op = ProtectedOperation::new("availability", |_: u32| async { Err::<u32, _>("Service failed.") });
        let chain = runtime.register(op.clone());
        for _ in 0..2 {
            let _ = chain.execute(2).await;
        }

        assert!(runtime.execute(&op, 2).await.unwrap_err().is_circuit_open());
        assert_eq!(runtime.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_unlisted_operation_uses_defaults() {
        let config = parse_config("[defaults.retry]\nmax_retries = 1").unwrap();
        let runtime = PolicyRuntime::new(config).unwrap();

        let op = ProtectedOperation::new("anything", |_: ()| async { Err::<(), _>("boom") });
        let err = runtime.execute(&op, ()).await.unwrap_err();
        assert!(matches!(err, PolicyError::RetriesExhausted { attempts: 2, .. }));
        assert!(runtime.registry().is_empty());
    }
}
