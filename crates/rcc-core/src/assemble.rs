//! Pipeline assembly: configuration snapshot in, pools out.
//!
//! Pure construction. No network calls, no shared mutable state, no spawned
//! tasks; safe to re-run against a candidate configuration to validate it.
//! Target order is preserved exactly; scheduler determinism depends on it.

use std::collections::HashMap;
use std::sync::Arc;

use rcc_provider_core::{AdapterRegistry, EventHub, RouterConfig, VirtualModelConfig};

use crate::pipeline::Pipeline;
use crate::pool::PipelinePool;

pub struct AssemblyOutput {
    pub pools: HashMap<String, Arc<PipelinePool>>,
    pub warnings: Vec<String>,
}

/// Materialise one pool per enabled virtual model with at least one
/// resolvable target. Broken targets and inert virtual models degrade to
/// warnings; the rest of the configuration proceeds.
pub fn assemble(
    config: &RouterConfig,
    registry: &AdapterRegistry,
    events: &EventHub,
) -> AssemblyOutput {
    let mut pools = HashMap::new();
    let mut warnings = Vec::new();

    for (vm_id, vm) in &config.virtual_models {
        if !vm.enabled {
            continue;
        }
        let pipelines = resolve_targets(config, registry, vm, &mut warnings);
        if pipelines.is_empty() {
            warnings.push(format!(
                "virtual model {vm_id:?} has no resolvable targets and will not be schedulable"
            ));
            continue;
        }
        let pool = PipelinePool::new(
            vm_id.clone(),
            pipelines,
            config.scheduler.selection_strategy,
            events.clone(),
        );
        pools.insert(vm_id.clone(), Arc::new(pool));
    }

    for warning in &warnings {
        tracing::warn!(%warning, "assembly");
    }
    AssemblyOutput { pools, warnings }
}

fn resolve_targets(
    config: &RouterConfig,
    registry: &AdapterRegistry,
    vm: &VirtualModelConfig,
    warnings: &mut Vec<String>,
) -> Vec<Arc<Pipeline>> {
    let mut pipelines = Vec::new();
    for target in &vm.targets {
        if !target.enabled {
            continue;
        }
        let Some(provider) = config.providers.get(&target.provider_id) else {
            warnings.push(format!(
                "virtual model {:?}: target references unknown provider {:?}",
                vm.id, target.provider_id
            ));
            continue;
        };
        if !provider.declares_model(&target.model_id) {
            warnings.push(format!(
                "virtual model {:?}: provider {:?} does not declare model {:?}",
                vm.id, target.provider_id, target.model_id
            ));
            continue;
        }
        if target.key_index >= provider.auth.key_slots() {
            warnings.push(format!(
                "virtual model {:?}: key index {} out of range for provider {:?} ({} slots)",
                vm.id,
                target.key_index,
                target.provider_id,
                provider.auth.key_slots()
            ));
            continue;
        }
        let Some(adapter) = registry.get(&target.provider_id) else {
            warnings.push(format!(
                "virtual model {:?}: no adapter instance for provider {:?}",
                vm.id, target.provider_id
            ));
            continue;
        };
        // Index is the position in the pool, assigned in target order.
        pipelines.push(Arc::new(Pipeline::new(
            &vm.id,
            &target.provider_id,
            &target.model_id,
            target.key_index,
            target.weight,
            pipelines.len(),
            adapter,
        )));
    }
    pipelines
}
