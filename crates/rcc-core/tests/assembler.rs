mod common;

use std::sync::Arc;

use rcc_core::assemble::assemble;
use rcc_provider_core::{AdapterRegistry, EventHub, RouterConfig};

use common::ScriptedAdapter;

const CONFIG: &str = r#"{
    "providers": {
        "alpha": {
            "type": "openai",
            "endpoint": "https://alpha.example",
            "models": {"m-large": {}, "m-small": {}},
            "auth": {"kind": "apiKey", "keys": ["k0", "k1"]}
        },
        "beta": {
            "type": "openai",
            "endpoint": "https://beta.example",
            "models": {"m-large": {}},
            "auth": {"kind": "apiKey", "keys": ["k0"]}
        }
    },
    "virtualModels": {
        "vm-a": {
            "targets": [
                {"providerId": "alpha", "modelId": "m-large", "keyIndex": 1, "weight": 2},
                {"providerId": "beta", "modelId": "m-large"},
                {"providerId": "alpha", "modelId": "m-small", "enabled": false}
            ]
        },
        "vm-broken": {
            "targets": [
                {"providerId": "ghost", "modelId": "m-large"},
                {"providerId": "alpha", "modelId": "m-unknown"},
                {"providerId": "beta", "modelId": "m-large", "keyIndex": 5}
            ]
        },
        "vm-disabled": {
            "enabled": false,
            "targets": [{"providerId": "alpha", "modelId": "m-large"}]
        }
    }
}"#;

fn registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new("alpha", Vec::new())));
    registry.register(Arc::new(ScriptedAdapter::new("beta", Vec::new())));
    registry
}

fn config() -> RouterConfig {
    serde_json::from_str::<RouterConfig>(CONFIG)
        .unwrap()
        .normalized()
}

#[test]
fn pools_materialise_targets_in_declaration_order() {
    let events = EventHub::new(16);
    let output = assemble(&config(), &registry(), &events);

    let pool = &output.pools["vm-a"];
    let ids: Vec<&str> = pool.pipelines().iter().map(|p| p.id()).collect();
    // Disabled third target is skipped; order and identity are deterministic.
    assert_eq!(ids, vec!["vm-a::alpha::m-large::1", "vm-a::beta::m-large::0"]);
    assert_eq!(pool.pipelines()[0].weight(), 2);
    assert_eq!(pool.pipelines()[1].index(), 1);
}

#[test]
fn reassembly_of_the_same_snapshot_is_identical() {
    let events = EventHub::new(16);
    let cfg = config();
    let reg = registry();

    let first = assemble(&cfg, &reg, &events);
    let second = assemble(&cfg, &reg, &events);

    let shape = |output: &rcc_core::assemble::AssemblyOutput| {
        let mut entries: Vec<(String, Vec<String>)> = output
            .pools
            .iter()
            .map(|(vm, pool)| {
                (
                    vm.clone(),
                    pool.pipelines()
                        .iter()
                        .map(|p| p.id().to_string())
                        .collect(),
                )
            })
            .collect();
        entries.sort();
        entries
    };
    assert_eq!(shape(&first), shape(&second));
}

#[test]
fn unresolvable_targets_degrade_to_warnings() {
    let events = EventHub::new(16);
    let output = assemble(&config(), &registry(), &events);

    // Every target of vm-broken is unresolvable: no pool, one warning per
    // target plus the inert-model warning.
    assert!(!output.pools.contains_key("vm-broken"));
    let broken: Vec<&String> = output
        .warnings
        .iter()
        .filter(|w| w.contains("vm-broken"))
        .collect();
    assert_eq!(broken.len(), 4);
    assert!(broken.iter().any(|w| w.contains("unknown provider")));
    assert!(broken.iter().any(|w| w.contains("does not declare model")));
    assert!(broken.iter().any(|w| w.contains("key index")));
}

#[test]
fn disabled_virtual_models_are_not_assembled() {
    let events = EventHub::new(16);
    let output = assemble(&config(), &registry(), &events);
    assert!(!output.pools.contains_key("vm-disabled"));
    // Disabled is a configuration choice, not a defect: no warning.
    assert!(!output.warnings.iter().any(|w| w.contains("vm-disabled")));
}

#[test]
fn healthy_virtual_models_survive_a_broken_sibling() {
    let events = EventHub::new(16);
    let output = assemble(&config(), &registry(), &events);
    assert_eq!(output.pools.len(), 1);
    assert!(output.pools.contains_key("vm-a"));
}
