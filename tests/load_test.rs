//! Load testing for the policy engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fault_tolerance::resilience::executor::PolicyConfig;
use fault_tolerance::resilience::{BreakerRegistry, CircuitState};
use fault_tolerance::{PolicyChain, PolicyError, ProtectedOperation};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_open_breaker_once() {
    let threshold: u32 = 4;

    // Fails immediately on the first `threshold` calls; later calls succeed
    // only after a delay, so every failure is recorded first.
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = ProtectedOperation::new("availability", move |input: u32| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < threshold {
                return Err("Service failed.");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(input)
        }
    });
    let chain = PolicyChain::builder(op)
        .config(PolicyConfig::default().with_circuit_breaker(common::breaker(threshold, 0.5, 60_000, 1)))
        .build();
    let breaker = chain.breaker().unwrap().clone();

    let mut tasks = Vec::new();
    for i in 0..64 {
        let chain = chain.clone();
        let breaker = breaker.clone();
        tasks.push(tokio::spawn(async move {
            let result = chain.execute(i).await;
            assert!(breaker.snapshot().window_len <= threshold as usize);
            result
        }));
    }

    let mut failures: u32 = 0;
    let mut rejections: u64 = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => {}
            Err(PolicyError::Operation(_)) => failures += 1,
            Err(PolicyError::CircuitBreakerOpen { .. }) => rejections += 1,
            Err(other) => panic!("unexpected failure: {:?}", other),
        }
    }

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.times_opened, 1, "exactly one closed -> open transition");
    assert!(snapshot.window_len <= threshold as usize);
    assert_eq!(failures, threshold);
    assert_eq!(snapshot.total_rejections, rejections);
    assert_eq!(calls.load(Ordering::SeqCst) as u64 + rejections, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_performance() {
    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let (op, calls) = common::failing_first("coffees", 0);
    let chain = PolicyChain::builder(op)
        .config(
            PolicyConfig::default()
                .with_timeout(Duration::from_secs(1))
                .with_circuit_breaker(common::breaker(20, 0.5, 5000, 1)),
        )
        .build();

    let start = Instant::now();
    let mut tasks = Vec::new();
    for t in 0..concurrency {
        let chain = chain.clone();
        tasks.push(tokio::spawn(async move {
            let mut served: u32 = 0;
            for r in 0..requests_per_task {
                let input = t * requests_per_task + r;
                if matches!(chain.execute(input).await, Ok(v) if v == input) {
                    served += 1;
                }
            }
            served
        }));
    }

    let mut served: u32 = 0;
    for task in tasks {
        served += task.await.unwrap();
    }
    let elapsed = start.elapsed();

    println!(
        "served {} requests in {:?} ({:.0} req/s)",
        served,
        elapsed,
        served as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(served, total_requests);
    assert_eq!(calls.load(Ordering::SeqCst), total_requests);
    let snapshot = chain.breaker().unwrap().snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.total_successes, total_requests as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_concurrent_get_or_create() {
    let registry = BreakerRegistry::new();
    let config = common::breaker(4, 0.5, 5000, 1);

    let mut tasks = Vec::new();
    for i in 0..32 {
        let registry = registry.clone();
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let name = if i % 2 == 0 { "availability" } else { "recommendations" };
            registry.get_or_create(name, &config)
        }));
    }

    let mut breakers = Vec::new();
    for task in tasks {
        breakers.push(task.await.unwrap());
    }

    assert_eq!(registry.len(), 2);
    for pair in breakers.chunks(2) {
        assert!(Arc::ptr_eq(&pair[0], &registry.get("availability").unwrap()));
        assert!(Arc::ptr_eq(&pair[1], &registry.get("recommendations").unwrap()));
    }
}
