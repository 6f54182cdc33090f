//! Coffee shop endpoints driven by the demo binary.
//!
//! Each endpoint injects its own kind of fault: random failures (catalog),
//! random latency (recommendations) and a fixed failure pattern
//! (availability). All of them share one invocation counter, so log lines
//! from different endpoints interleave in a single sequence.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use fault_tolerance::resilience::faults::{FaultSource, ScriptedFaults, SeededDelays, SeededFaults};
use fault_tolerance::resilience::{ErrorClass, ExecutionResult, PolicyChain, PolicyRuntime, ProtectedOperation};

#[derive(Debug, Clone, Serialize)]
pub struct Coffee {
    pub id: u32,
    pub name: &'static str,
    pub country_of_origin: &'static str,
    pub price: u32,
}

const COFFEES: [Coffee; 3] = [
    Coffee { id: 1, name: "Fernandez Espresso", country_of_origin: "Colombia", price: 23 },
    Coffee { id: 2, name: "La Scala Whole Beans", country_of_origin: "Bolivia", price: 18 },
    Coffee { id: 3, name: "Dak Lak Filter", country_of_origin: "Vietnam", price: 25 },
];

fn coffee_by_id(id: u32) -> Option<Coffee> {
    COFFEES.iter().find(|c| c.id == id).cloned()
}

#[derive(Debug, Clone, Error)]
pub enum CoffeeError {
    #[error("Resource failure.")]
    ResourceFailure,

    #[error("Service failed.")]
    ServiceFailed,

    #[error("coffee {0} not found")]
    NotFound(u32),
}

/// A missing coffee is an answer, not an outage.
pub fn classify(error: &CoffeeError) -> ErrorClass {
    match error {
        CoffeeError::NotFound(_) => ErrorClass::Benign,
        CoffeeError::ResourceFailure | CoffeeError::ServiceFailed => ErrorClass::Failure,
    }
}

#[derive(Clone)]
pub struct CoffeeShop {
    invocations: Arc<AtomicU64>,
    catalog_faults: Arc<SeededFaults>,
    delays: Arc<SeededDelays>,
    availability_faults: Arc<ScriptedFaults>,
}

impl CoffeeShop {
    pub fn new(seed: u64) -> Self {
        Self {
            invocations: Arc::new(AtomicU64::new(0)),
            catalog_faults: Arc::new(SeededFaults::new(seed, 0.5)),
            delays: Arc::new(SeededDelays::new(seed, Duration::from_millis(500))),
            availability_faults: Arc::new(ScriptedFaults::alternating(2, 2)),
        }
    }

    /// The full catalog. Fails about half the time.
    pub fn coffees(&self) -> ProtectedOperation<(), Vec<Coffee>, CoffeeError> {
        let shop = self.clone();
        ProtectedOperation::new("coffees", move |_: ()| {
            let invocation = shop.invocations.fetch_add(1, Ordering::SeqCst);
            let fail = shop.catalog_faults.should_fail();
            async move {
                if fail {
                    tracing::error!("coffees invocation #{} failed", invocation);
                    return Err(CoffeeError::ResourceFailure);
                }
                tracing::info!("coffees invocation #{} returning successfully", invocation);
                Ok(COFFEES.to_vec())
            }
        })
    }

    /// Two coffees related to `id`, after a random delay of up to 500 ms.
    pub fn recommendations(&self) -> ProtectedOperation<u32, Vec<Coffee>, CoffeeError> {
        let shop = self.clone();
        ProtectedOperation::new("recommendations", move |id: u32| {
            let invocation = shop.invocations.fetch_add(1, Ordering::SeqCst);
            let delay = shop.delays.next_delay();
            async move {
                tokio::time::sleep(delay).await;
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    "recommendations invocation #{} returning successfully",
                    invocation
                );
                Ok(COFFEES.iter().filter(|c| c.id != id).take(2).cloned().collect())
            }
        })
    }

    /// Safe bet: something everybody likes.
    pub fn fallback_recommendations(&self) -> ProtectedOperation<u32, Vec<Coffee>, CoffeeError> {
        ProtectedOperation::new("recommendations", |_: u32| async {
            tracing::info!("Falling back to fallback_recommendations()");
            coffee_by_id(1).map(|c| vec![c]).ok_or(CoffeeError::NotFound(1))
        })
    }

    /// Remaining packages of coffee `id`. Alternates two successes and two
    /// failures.
    pub fn availability(&self) -> ProtectedOperation<u32, u32, CoffeeError> {
        let shop = self.clone();
        ProtectedOperation::new("availability", move |id: u32| {
            let invocation = shop.invocations.fetch_add(1, Ordering::SeqCst);
            let coffee = coffee_by_id(id);
            let fail = coffee.is_some() && shop.availability_faults.should_fail();
            async move {
                let Some(coffee) = coffee else {
                    return Err(CoffeeError::NotFound(id));
                };
                if fail {
                    let error = CoffeeError::ServiceFailed;
                    tracing::error!("availability invocation #{} failed: {}", invocation, error);
                    return Err(error);
                }
                tracing::info!("availability invocation #{} returning successfully", invocation);
                Ok(((invocation * 7 + u64::from(coffee.price)) % 40) as u32)
            }
        })
    }
}

pub async fn run_catalog(shop: &CoffeeShop, runtime: &PolicyRuntime, requests: u32, interval: Duration) {
    let chain = runtime.builder(shop.coffees()).classifier(classify).build();
    drive(&chain, (), requests, interval).await;
}

pub async fn run_recommendations(shop: &CoffeeShop, runtime: &PolicyRuntime, requests: u32, interval: Duration) {
    let chain = runtime
        .builder(shop.recommendations())
        .fallback(shop.fallback_recommendations())
        .classifier(classify)
        .build();
    drive(&chain, 2, requests, interval).await;
}

pub async fn run_availability(shop: &CoffeeShop, runtime: &PolicyRuntime, requests: u32, interval: Duration) {
    let chain = runtime.builder(shop.availability()).classifier(classify).build();
    drive(&chain, 2, requests, interval).await;
}

async fn drive<I, T, E>(chain: &PolicyChain<I, T, E>, input: I, requests: u32, interval: Duration)
where
    I: Clone + Send + 'static,
    T: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    for request in 1..=requests {
        match chain.execute_detailed(input.clone()).await {
            ExecutionResult::Completed(value) => {
                tracing::info!(operation = chain.name(), request, result = %json(&value), "Request served");
            }
            ExecutionResult::Recovered { value, cause } => {
                tracing::info!(
                    operation = chain.name(),
                    request,
                    result = %json(&value),
                    cause = %cause,
                    "Request served by fallback"
                );
            }
            ExecutionResult::Failed(error) => {
                tracing::warn!(operation = chain.name(), request, error = %error, "Request failed");
            }
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
