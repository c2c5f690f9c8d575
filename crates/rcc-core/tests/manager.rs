mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rcc_common::RouteErrorKind;
use rcc_core::context::RequestContext;
use rcc_core::manager::SchedulerManager;
use rcc_core::pool::UnavailableKind;
use rcc_provider_core::{AdapterRegistry, EventHub, RouterConfig, SelectionStrategy};

use common::{ScriptedAdapter, Step, chat_request, pipeline_for, pool_for};

fn default_config() -> RouterConfig {
    RouterConfig::default()
}

fn single_pool(adapter: Arc<ScriptedAdapter>) -> HashMap<String, Arc<rcc_core::pool::PipelinePool>> {
    let pool = pool_for(
        "vm",
        SelectionStrategy::PriorityFirst,
        vec![pipeline_for("vm", "p1", 0, 1, adapter)],
    );
    HashMap::from([("vm".to_string(), pool)])
}

#[tokio::test]
async fn routing_to_an_unknown_virtual_model_fails() {
    let manager = SchedulerManager::new(EventHub::new(16));
    manager
        .initialize(
            single_pool(Arc::new(ScriptedAdapter::new("p1", Vec::new()))),
            &default_config(),
        )
        .await;

    let err = manager
        .route(RequestContext::new("ghost"), "ghost", &chat_request("ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RouteErrorKind::UnknownVirtualModel);
}

#[tokio::test]
async fn initialize_is_a_one_shot_operation() {
    let manager = SchedulerManager::new(EventHub::new(16));
    manager
        .initialize(
            single_pool(Arc::new(ScriptedAdapter::new("p1", Vec::new()))),
            &default_config(),
        )
        .await;
    let before = manager.mappings();

    // A second initialize must not replace the scheduler set.
    let other = pool_for(
        "vm-other",
        SelectionStrategy::PriorityFirst,
        vec![pipeline_for(
            "vm-other",
            "p9",
            0,
            1,
            Arc::new(ScriptedAdapter::new("p9", Vec::new())),
        )],
    );
    manager
        .initialize(
            HashMap::from([("vm-other".to_string(), other)]),
            &default_config(),
        )
        .await;

    let after = manager.mappings();
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].virtual_model_id, after[0].virtual_model_id);
    assert_eq!(before[0].scheduler_id, after[0].scheduler_id);
}

#[tokio::test]
async fn route_reaches_the_scheduler_and_mappings_reflect_it() {
    let adapter = Arc::new(ScriptedAdapter::new("p1", Vec::new()));
    let manager = SchedulerManager::new(EventHub::new(16));
    manager
        .initialize(single_pool(adapter.clone()), &default_config())
        .await;

    let resp = manager
        .route(RequestContext::new("vm"), "vm", &chat_request("vm"))
        .await
        .unwrap();
    assert_eq!(resp.choices.len(), 1);
    assert_eq!(adapter.executed(), 1);

    let mappings = manager.mappings();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].virtual_model_id, "vm");
    assert!(mappings[0].enabled);

    let snapshot = manager.metrics_snapshot().await;
    assert_eq!(snapshot.overall.successes, 1);
    assert_eq!(snapshot.per_vm["vm"].pipelines.len(), 1);
}

#[tokio::test]
async fn reload_replaces_pools_and_clears_permanent_blacklists() {
    let adapter = Arc::new(ScriptedAdapter::new("alpha", Vec::new()));
    let manager = SchedulerManager::new(EventHub::new(16));

    let pool = pool_for(
        "vm",
        SelectionStrategy::PriorityFirst,
        vec![pipeline_for("vm", "alpha", 0, 1, adapter.clone())],
    );
    pool.mark_unavailable(0, None, UnavailableKind::AuthInvalid)
        .await;
    manager
        .initialize(
            HashMap::from([("vm".to_string(), pool)]),
            &default_config(),
        )
        .await;

    let err = manager
        .route(RequestContext::new("vm"), "vm", &chat_request("vm"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RouteErrorKind::NoTargetAvailable);

    // Reload from a configuration snapshot that resolves the same target.
    let raw = r#"{
        "providers": {
            "alpha": {
                "type": "openai",
                "endpoint": "https://alpha.example",
                "models": {"test-model": {}},
                "auth": {"kind": "apiKey", "keys": ["k0"]}
            }
        },
        "virtualModels": {
            "vm": {"targets": [{"providerId": "alpha", "modelId": "test-model"}]}
        }
    }"#;
    let config: RouterConfig = serde_json::from_str::<RouterConfig>(raw)
        .unwrap()
        .normalized();
    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone());
    let warnings = manager.reload(&config, &registry).await;
    assert!(warnings.is_empty());

    manager
        .route(RequestContext::new("vm"), "vm", &chat_request("vm"))
        .await
        .unwrap();
    assert_eq!(adapter.executed(), 1);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_work_then_rejects_new_requests() {
    let adapter = Arc::new(ScriptedAdapter::new(
        "p1",
        vec![Step::SleepThenSucceed {
            delay: Duration::from_millis(150),
            content: "draining",
        }],
    ));
    let manager = Arc::new(SchedulerManager::new(EventHub::new(16)));
    manager
        .initialize(single_pool(adapter), &default_config())
        .await;

    let slow = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .route(RequestContext::new("vm"), "vm", &chat_request("vm"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    manager.shutdown(Duration::from_secs(2)).await.unwrap();
    assert!(slow.await.unwrap().is_ok());

    let err = manager
        .route(RequestContext::new("vm"), "vm", &chat_request("vm"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RouteErrorKind::Overloaded);
}
