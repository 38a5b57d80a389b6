use std::sync::Arc;
use std::time::Duration;

use endpoint::fake::{FakeEndpoint, FakeFactory};
use endpoint::registry::{EndpointKind, SharedRegistry};
use endpoint::{Address, ReleaseOutcome, ServiceKey};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("endpoint=debug")
        .with_test_writer()
        .try_init();
}

fn server_registry() -> Arc<SharedRegistry<FakeEndpoint>> {
    Arc::new(SharedRegistry::new(EndpointKind::Server))
}

#[tokio::test]
async fn two_services_share_then_release() {
    init_tracing();
    let registry = server_registry();
    let factory = FakeFactory::new();
    let address = Address::parse("10.0.0.1:8080").unwrap();

    let a = registry.acquire(&address, "svcA".into(), &factory).await.unwrap();
    let b = registry.acquire(&address, "svcB".into(), &factory).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let outcome = registry.release(&a, &address, &"svcA".into()).await.unwrap();
    assert_eq!(outcome, ReleaseOutcome::Retained { remaining: 1 });
    assert!(a.is_active());

    let outcome = registry.release(&b, &address, &"svcB".into()).await.unwrap();
    assert_eq!(outcome, ReleaseOutcome::TornDown);
    assert!(!b.is_active());
    assert!(registry.lookup(&address).await.is_none());
    assert_eq!(factory.teardowns(), 1);
}

#[tokio::test]
async fn release_of_unknown_service_changes_nothing() {
    let registry = server_registry();
    let factory = FakeFactory::new();
    let address = Address::parse("10.0.0.1:8080").unwrap();

    let endpoint = registry.acquire(&address, "svcA".into(), &factory).await.unwrap();
    let before = registry.snapshot().await;

    registry.release(&endpoint, &address, &"ghost".into()).await.unwrap();

    let after = registry.snapshot().await;
    assert_eq!(before[0].service_keys, after[0].service_keys);
    assert_eq!(before[0].endpoint_id, after[0].endpoint_id);
    assert_eq!(factory.teardowns(), 0);
    assert!(endpoint.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_cold_acquire_creates_once() {
    init_tracing();
    let registry = server_registry();
    let factory = Arc::new(FakeFactory::new().with_delay(Duration::from_millis(20)));
    let address = Address::parse("10.0.0.1:8080").unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let factory = Arc::clone(&factory);
            let address = address.clone();
            tokio::spawn(async move {
                registry
                    .acquire(&address, ServiceKey::new(format!("svc-{}", i)), factory.as_ref())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let handles: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(factory.created(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(registry.service_keys(&address).await.unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_release_tears_down_exactly_once() {
    let registry = server_registry();
    let factory = FakeFactory::new();
    let address = Address::parse("10.0.0.1:8080").unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let key = ServiceKey::new(format!("svc-{}", i));
        let handle = registry.acquire(&address, key.clone(), &factory).await.unwrap();
        handles.push((key, handle));
    }

    let tasks: Vec<_> = handles
        .into_iter()
        .map(|(key, handle)| {
            let registry = Arc::clone(&registry);
            let address = address.clone();
            tokio::spawn(async move { registry.release(&handle, &address, &key).await.unwrap() })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let torn_down = outcomes
        .iter()
        .filter(|o| **o == ReleaseOutcome::TornDown)
        .count();
    assert_eq!(torn_down, 1);
    assert_eq!(factory.teardowns(), 1);
    assert!(registry.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn construction_failure_does_not_affect_other_addresses() {
    let registry = server_registry();
    let failing = Arc::new(FakeFactory::failing("connection refused"));
    let working = Arc::new(FakeFactory::new());

    let bad = {
        let registry = Arc::clone(&registry);
        let failing = Arc::clone(&failing);
        tokio::spawn(async move {
            let address = Address::parse("10.0.0.1:8080").unwrap();
            registry.acquire(&address, "svcA".into(), failing.as_ref()).await
        })
    };
    let good = {
        let registry = Arc::clone(&registry);
        let working = Arc::clone(&working);
        tokio::spawn(async move {
            let address = Address::parse("10.0.0.2:8080").unwrap();
            registry.acquire(&address, "svcB".into(), working.as_ref()).await
        })
    };

    assert!(bad.await.unwrap().is_err());
    assert!(good.await.unwrap().is_ok());
    assert_eq!(
        registry.addresses().await,
        vec![Address::parse("10.0.0.2:8080").unwrap()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_never_returns_torn_down_endpoint() {
    let registry = server_registry();
    let factory = Arc::new(FakeFactory::new());
    let address = Address::parse("10.0.0.1:8080").unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let factory = Arc::clone(&factory);
            let address = address.clone();
            tokio::spawn(async move {
                let key = ServiceKey::new(format!("svc-{}", i));
                for _ in 0..50 {
                    let handle = registry
                        .acquire(&address, key.clone(), factory.as_ref())
                        .await
                        .unwrap();
                    assert!(handle.is_active());
                    tokio::task::yield_now().await;
                    registry.release(&handle, &address, &key).await.unwrap();
                }
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert!(registry.is_empty().await);
    // Every endpoint ever created was torn down exactly once
    assert_eq!(factory.created(), factory.teardowns());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stale_releases_race_reacquire_without_killing_live_endpoints() {
    init_tracing();
    let registry = server_registry();
    let live = Arc::new(FakeFactory::new());
    let retired_factory = FakeFactory::new();
    let address = Address::parse("10.0.0.1:8080").unwrap();

    // Handles left behind by a registry that was dropped without shutdown:
    // still active, but unknown to the live registry
    let orphans = {
        let retired: SharedRegistry<FakeEndpoint> = SharedRegistry::new(EndpointKind::Server);
        let mut orphans = Vec::new();
        for i in 0..4 {
            let address = Address::parse(&format!("10.0.0.1:{}", 8080 + i)).unwrap();
            let handle = retired
                .acquire(&address, "retired".into(), &retired_factory)
                .await
                .unwrap();
            orphans.push((address, handle));
        }
        orphans
    };
    assert!(orphans.iter().all(|(_, h)| h.is_active()));

    let holders: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let live = Arc::clone(&live);
            let address = address.clone();
            tokio::spawn(async move {
                let key = ServiceKey::new(format!("svc-{}", i));
                let mut previous = None;
                for _ in 0..50 {
                    // Give back the handle from the last round again; by now
                    // another holder may have torn it down and re-created
                    if let Some(stale) = previous.take() {
                        registry.release(&stale, &address, &key).await.unwrap();
                    }

                    let handle = registry
                        .acquire(&address, key.clone(), live.as_ref())
                        .await
                        .unwrap();
                    assert!(handle.is_active());

                    tokio::task::yield_now().await;
                    assert!(handle.is_active());
                    registry.release(&handle, &address, &key).await.unwrap();
                    previous = Some(handle);
                }
            })
        })
        .collect();

    let orphan_releases: Vec<_> = orphans
        .iter()
        .cloned()
        .map(|(address, handle)| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                registry.release(&handle, &address, &"retired".into()).await.unwrap()
            })
        })
        .collect();

    for task in futures::future::join_all(holders).await {
        task.unwrap();
    }
    for outcome in futures::future::join_all(orphan_releases).await {
        assert_eq!(outcome.unwrap(), ReleaseOutcome::Superseded);
    }

    assert!(registry.is_empty().await);
    assert_eq!(live.created(), live.teardowns());

    // The orphans were unregistered and still active, so their inner
    // teardown ran on the superseded path
    assert!(orphans.iter().all(|(_, h)| !h.is_active()));
    assert_eq!(retired_factory.created(), 4);
    assert_eq!(retired_factory.teardowns(), 4);

    let metrics = registry.metrics();
    assert!(metrics.superseded >= 4);
    assert_eq!(metrics.torn_down, live.teardowns() as u64 + 4);
}
