// ABOUTME: Balancer/picker traits and the default random/round-robin implementations
// ABOUTME: Grounded on examples/original_source/balance/balancer.go and balance/random.go

use crate::descriptor::CallContext;
use crate::discovery::{DiscoveryResult, Instance};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one instance for the next RPC call.
///
/// Conformant implementations must satisfy (spec.md section 4.6):
/// - B1: never return an instance not present in `result`.
/// - B2: terminate for any non-empty `instances`.
/// - B3: be safe to call concurrently.
pub trait Picker: Send + Sync {
    fn next(&self, ctx: &CallContext, request: &[u8]) -> Instance;
}

/// Generates pickers for a given discovery result.
pub trait Balancer: Send + Sync {
    fn get_picker(&self, result: &DiscoveryResult) -> Box<dyn Picker>;
    fn name(&self) -> &'static str;
}

/// Uniform random selection without replacement per call, the default
/// strategy (grounded verbatim on `balance/random.go`'s `randomPicker`).
pub struct RandomPicker {
    instances: Vec<Instance>,
}

impl RandomPicker {
    pub fn new(instances: Vec<Instance>) -> Self {
        RandomPicker { instances }
    }
}

impl Picker for RandomPicker {
    fn next(&self, _ctx: &CallContext, _request: &[u8]) -> Instance {
        let idx = rand::rng().random_range(0..self.instances.len());
        self.instances[idx].clone()
    }
}

pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn get_picker(&self, result: &DiscoveryResult) -> Box<dyn Picker> {
        Box::new(RandomPicker::new(result.instances.clone()))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Cycles through instances in order, supplemented per spec.md section 4.6
/// ("other strategies ... are conformant if they satisfy B1-B3"; the
/// interface is explicitly meant to have more than one implementation).
pub struct RoundRobinPicker {
    instances: Vec<Instance>,
    cursor: AtomicUsize,
}

impl RoundRobinPicker {
    pub fn new(instances: Vec<Instance>) -> Self {
        RoundRobinPicker {
            instances,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Picker for RoundRobinPicker {
    fn next(&self, _ctx: &CallContext, _request: &[u8]) -> Instance {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        self.instances[i].clone()
    }
}

pub struct RoundRobinBalancer;

impl Balancer for RoundRobinBalancer {
    fn get_picker(&self, result: &DiscoveryResult) -> Box<dyn Picker> {
        Box::new(RoundRobinPicker::new(result.instances.clone()))
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instances() -> Vec<Instance> {
        vec![
            Instance::new("tcp", "10.0.0.1", 9000, 0),
            Instance::new("tcp", "10.0.0.2", 9000, 1),
            Instance::new("tcp", "10.0.0.3", 9000, 2),
        ]
    }

    #[test]
    fn random_picker_never_returns_foreign_instance() {
        let instances = sample_instances();
        let picker = RandomPicker::new(instances.clone());
        let ctx = CallContext::default();
        for _ in 0..100 {
            let picked = picker.next(&ctx, b"");
            assert!(instances.contains(&picked));
        }
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let instances = sample_instances();
        let picker = RoundRobinPicker::new(instances.clone());
        let ctx = CallContext::default();
        let picks: Vec<_> = (0..6).map(|_| picker.next(&ctx, b"")).collect();
        assert_eq!(picks[0], instances[0]);
        assert_eq!(picks[1], instances[1]);
        assert_eq!(picks[2], instances[2]);
        assert_eq!(picks[3], instances[0]);
    }

    #[test]
    fn balancer_name_identifies_strategy() {
        assert_eq!(RandomBalancer.name(), "random");
        assert_eq!(RoundRobinBalancer.name(), "round_robin");
    }
}
