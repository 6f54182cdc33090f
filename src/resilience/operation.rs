//! Protected operations.
//!
//! # Responsibilities
//! - Give a callable unit of work a stable name (the policy/breaker key)
//! - Erase the concrete future type so policy layers can wrap each other
//! - Adapt tower services into operations
//!
//! # Design Decisions
//! - Futures are `'static + Send` so the timeout guard can move them onto a task
//! - Cloning shares the callable; the engine never owns the caller's state

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, TryFutureExt};
use tower::{Service, ServiceExt};

use super::outcome::PolicyError;

/// An operation whose failures are already classified by the engine. Every
/// policy layer maps a `Guarded` operation to another one.
pub type Guarded<I, T, E> = ProtectedOperation<I, T, PolicyError<E>>;

type CallFn<I, T, E> = dyn Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// A named, callable unit of work.
pub struct ProtectedOperation<I, T, E> {
    name: Arc<str>,
    call: Arc<CallFn<I, T, E>>,
}

impl<I, T, E> ProtectedOperation<I, T, E> {
    /// Wrap an async function under the given name.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            call: Arc::new(move |input| -> BoxFuture<'static, Result<T, E>> {
                Box::pin(f(input))
            }),
        }
    }

    /// Build an operation that reuses an existing name.
    pub(crate) fn from_boxed<F>(name: Arc<str>, f: F) -> Self
    where
        F: Fn(I) -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static,
    {
        Self {
            name,
            call: Arc::new(f),
        }
    }

    /// Operation name, used as the policy and breaker key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Start one invocation.
    pub fn invoke(&self, input: I) -> BoxFuture<'static, Result<T, E>> {
        (self.call)(input)
    }
}

impl<I, T, E> ProtectedOperation<I, T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Adapt a cloneable tower service. Each invocation drives a fresh clone to
    /// readiness before calling it.
    pub fn from_service<S>(name: impl Into<String>, service: S) -> Self
    where
        S: Service<I, Response = T, Error = E> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        Self::new(name, move |input| service.clone().oneshot(input))
    }
}

/// Lift a caller's operation into the engine's failure taxonomy.
pub fn guard<I, T, E>(op: ProtectedOperation<I, T, E>) -> Guarded<I, T, E>
where
    I: 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let name = op.shared_name();
    ProtectedOperation::from_boxed(name, move |input| {
        op.invoke(input).map_err(PolicyError::Operation).boxed()
    })
}

impl<I, T, E> Clone for ProtectedOperation<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            call: self.call.clone(),
        }
    }
}

impl<I, T, E> fmt::Debug for ProtectedOperation<I, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedOperation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::service_fn;

    #[tokio::test]
    async fn test_invoke_closure() {
        let op = ProtectedOperation::new("double", |n: u32| async move { Ok::<_, Infallible>(n * 2) });
        assert_eq!(op.name(), "double");
        assert_eq!(op.invoke(21).await.unwrap(), 42);

        let cloned = op.clone();
        assert_eq!(cloned.invoke(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_guard_classifies_errors() {
        let op = ProtectedOperation::new("fails", |_: ()| async { Err::<(), _>("boom") });
        let guarded = guard(op);
        assert_eq!(guarded.name(), "fails");
        match guarded.invoke(()).await {
            Err(PolicyError::Operation(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_from_service() {
        let svc = service_fn(|name: String| async move { Ok::<_, Infallible>(name.len()) });
        let op = ProtectedOperation::from_service("len", svc);
        assert_eq!(op.invoke("espresso".to_string()).await.unwrap(), 8);
    }
}
