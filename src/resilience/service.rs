//! `tower::Service` adapter so a policy chain can be mounted by transport
//! layers.

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::Service;

use super::executor::PolicyChain;
use super::outcome::PolicyError;

impl<I, T, E> Service<I> for PolicyChain<I, T, E>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Response = T;
    type Error = PolicyError<E>;
    type Future = BoxFuture<'static, Result<T, PolicyError<E>>>;

    // Always ready; an open breaker surfaces as an error from `call`.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, input: I) -> Self::Future {
        let chain = self.clone();
        async move { chain.execute(input).await }.boxed()
    }
}
