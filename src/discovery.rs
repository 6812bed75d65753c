// ABOUTME: Service discovery data types: Instance, DiscoveryResult, Change
// ABOUTME: Grounded on examples/original_source/discovery/discovery.go, field-for-field

use std::collections::HashMap;

/// A logical endpoint in a discovery result.
///
/// Immutable after creation. The original source's `Weight()` field is
/// misnamed: it is used purely as a positional routing index into the
/// facade's connection list, never as an actual load-balancing weight
/// (spec.md section 9 "Weight as routing index" REDESIGN FLAG). We split
/// the two concerns: `route_index` is the renamed field this crate uses
/// for routing; `weight` is kept as a genuine, separate numeric hint for
/// balancer implementations that want one (e.g. a weighted picker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub network: String,
    pub host: String,
    pub port: u16,
    pub route_index: usize,
    pub weight: u32,
    pub tags: HashMap<String, String>,
}

impl Instance {
    pub fn new(network: impl Into<String>, host: impl Into<String>, port: u16, route_index: usize) -> Self {
        Instance {
            network: network.into(),
            host: host.into(),
            port,
            route_index,
            weight: 0,
            tags: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A snapshot of a resolver's current view of a service's instances.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub cacheable: bool,
    pub cache_key: String,
    pub instances: Vec<Instance>,
}

impl DiscoveryResult {
    pub fn new(instances: Vec<Instance>) -> Self {
        DiscoveryResult {
            cacheable: false,
            cache_key: String::new(),
            instances,
        }
    }
}

/// The diff between a discovery result and the previous one, dispatched
/// by a `Resolver` when the underlying set of instances changes.
#[derive(Debug, Clone, Default)]
pub struct Change {
    pub result: DiscoveryResult,
    pub added: Vec<Instance>,
    pub updated: Vec<Instance>,
    pub removed: Vec<Instance>,
}

/// Emits `Change` events as the set of instances for a service evolves.
///
/// Implementations (DNS polling, etcd/consul watch, static list) are an
/// external collaborator out of scope for this crate (spec.md section 1);
/// only the shape of what a resolver hands the facade is specified here.
/// Uses a native `async fn` in a trait, matching the teacher's
/// `client/traits.rs` ("no async_trait dependency") rather than boxing.
pub trait Resolver: Send + Sync {
    fn resolve(&self) -> impl std::future::Future<Output = DiscoveryResult> + Send;
}
