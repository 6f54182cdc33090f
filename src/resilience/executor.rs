//! Policy chain executor.
//!
//! Composes, for one operation and its resolved policy:
//!
//! ```text
//! Fallback( Retry( Breaker-gate( Timeout( operation ) ) ) )
//! ```
//!
//! Absent policies are left out of the chain rather than configured as no-ops,
//! so an operation without `[retry]` never reports `RetriesExhausted`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::circuit_breaker::{with_breaker, CircuitBreaker};
use super::fallback::{dispatch, ExecutionResult};
use super::operation::{guard, Guarded, ProtectedOperation};
use super::outcome::{CountAll, OutcomeClassifier, PolicyError};
use super::registry::BreakerRegistry;
use super::retries::{with_retry, RetryPolicy};
use super::timeouts::with_timeout;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Resolved, immutable policy for one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyConfig {
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl PolicyConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }
}

/// An operation wrapped in its full policy chain.
pub struct PolicyChain<I, T, E> {
    name: Arc<str>,
    config: PolicyConfig,
    chain: Guarded<I, T, E>,
    fallback: Option<ProtectedOperation<I, T, E>>,
    classifier: Arc<dyn OutcomeClassifier<E>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl<I, T, E> Clone for PolicyChain<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            chain: self.chain.clone(),
            fallback: self.fallback.clone(),
            classifier: self.classifier.clone(),
            breaker: self.breaker.clone(),
        }
    }
}

impl<I, T, E> PolicyChain<I, T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn builder(operation: ProtectedOperation<I, T, E>) -> PolicyChainBuilder<I, T, E> {
        PolicyChainBuilder {
            operation,
            config: PolicyConfig::default(),
            fallback: None,
            classifier: Arc::new(CountAll),
            registry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// The breaker gating this operation, if one is configured.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Run the chain, returning the value or a classified failure.
    pub async fn execute(&self, input: I) -> Result<T, PolicyError<E>> {
        self.execute_detailed(input).await.into_result()
    }

    /// Run the chain, keeping whether the fallback supplied the value.
    pub async fn execute_detailed(&self, input: I) -> ExecutionResult<T, E> {
        let execution_id = Uuid::new_v4();
        let span = tracing::info_span!("execute", operation = %self.name, %execution_id);
        let started = Instant::now();

        async move {
            let result = match &self.fallback {
                Some(fallback) => {
                    let primary = self.chain.invoke(input.clone()).await;
                    dispatch(primary, fallback, input, self.classifier.as_ref()).await
                }
                None => match self.chain.invoke(input).await {
                    Ok(value) => ExecutionResult::Completed(value),
                    Err(error) => ExecutionResult::Failed(error),
                },
            };

            let label = match &result {
                ExecutionResult::Completed(_) => "completed",
                ExecutionResult::Recovered { .. } => "recovered",
                ExecutionResult::Failed(error) => error.kind(),
            };
            metrics::record_execution(&self.name, label, started);
            tracing::debug!(
                result = label,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Execution finished"
            );
            result
        }
        .instrument(span)
        .await
    }
}

/// Assembles a [`PolicyChain`].
pub struct PolicyChainBuilder<I, T, E> {
    operation: ProtectedOperation<I, T, E>,
    config: PolicyConfig,
    fallback: Option<ProtectedOperation<I, T, E>>,
    classifier: Arc<dyn OutcomeClassifier<E>>,
    registry: Option<BreakerRegistry>,
}

impl<I, T, E> PolicyChainBuilder<I, T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn config(mut self, config: PolicyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fallback(mut self, fallback: ProtectedOperation<I, T, E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn classifier(mut self, classifier: impl OutcomeClassifier<E>) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Share breakers through `registry` instead of giving the chain its own.
    pub fn registry(mut self, registry: &BreakerRegistry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    pub fn build(self) -> PolicyChain<I, T, E> {
        let name = self.operation.shared_name();
        let config = self.config;

        let timed = with_timeout(guard(self.operation), config.timeout);

        let breaker = config.circuit_breaker.as_ref().map(|cb| match &self.registry {
            Some(registry) => registry.get_or_create(&name, cb),
            None => Arc::new(CircuitBreaker::new(name.as_ref(), cb.clone())),
        });
        let gated = match &breaker {
            Some(breaker) => with_breaker(timed, breaker.clone(), self.classifier.clone()),
            None => timed,
        };

        let chain = match config.retry {
            Some(policy) => with_retry(gated, policy, self.classifier.clone()),
            None => gated,
        };

        tracing::debug!(
            operation = %name,
            retry = config.retry.is_some(),
            timeout = ?config.timeout,
            circuit_breaker = breaker.is_some(),
            fallback = self.fallback.is_some(),
            "Policy chain assembled"
        );

        PolicyChain {
            name,
            config,
            chain,
            fallback: self.fallback,
            classifier: self.classifier,
            breaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(calls: Arc<AtomicU32>, fail_first: u32) -> ProtectedOperation<u32, u32, &'static str> {
        ProtectedOperation::new("coffees", move |id: u32| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < fail_first {
                    Err("Resource failure.")
                } else {
                    Ok(id)
                }
            }
        })
    }

    #[tokio::test]
    async fn test_bare_chain_passes_errors_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = PolicyChain::builder(counting(calls.clone(), 1)).build();
        assert!(matches!(chain.execute(7).await, Err(PolicyError::Operation("Resource failure."))));
        assert_eq!(chain.execute(7).await.unwrap(), 7);
        assert!(chain.breaker().is_none());
    }

    #[tokio::test]
    async fn test_retry_then_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let chain = PolicyChain::builder(counting(calls.clone(), u32::MAX))
            .config(PolicyConfig::default().with_retry(RetryPolicy::new(2)))
            .fallback(ProtectedOperation::new("coffees", |_: u32| async { Ok(1) }))
            .build();

        match chain.execute_detailed(5).await {
            ExecutionResult::Recovered { value, cause } => {
                assert_eq!(value, 1);
                assert!(matches!(cause, PolicyError::RetriesExhausted { attempts: 3, .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_breaker_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = PolicyConfig::default()
            .with_retry(RetryPolicy::new(10))
            .with_circuit_breaker(CircuitBreakerConfig {
                request_volume_threshold: 2,
                failure_ratio: 1.0,
                open_duration_ms: 60_000,
                half_open_success_threshold: 1,
            });
        let chain = PolicyChain::builder(counting(calls.clone(), u32::MAX)).config(config).build();

        let err = chain.execute(1).await.unwrap_err();
        assert!(err.is_circuit_open(), "third attempt is denied: {:?}", err.kind());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.breaker().map(|b| b.state()), Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_registry_shares_breakers() {
        let registry = BreakerRegistry::new();
        let config = PolicyConfig::default().with_circuit_breaker(CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));

        let a = PolicyChain::builder(counting(calls.clone(), 0))
            .config(config.clone())
            .registry(&registry)
            .build();
        let b = PolicyChain::builder(counting(calls, 0))
            .config(config)
            .registry(&registry)
            .build();

        assert!(Arc::ptr_eq(a.breaker().unwrap(), b.breaker().unwrap()));
        assert_eq!(registry.len(), 1);
    }
}
