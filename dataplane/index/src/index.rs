use crate::{
    authorization_policy::PolicySpec, lookup, metrics::IndexMetrics, service::ServiceSpec,
    ClusterInfo,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use l4_dataplane_api::{self as api, Labels};
use l4_dataplane_core::{
    Endpoint, EndpointRegistry, PolicyRef, PolicySet, PolicyTable, ServiceEndpoints, ServiceRef,
};
use parking_lot::RwLock;
use std::{collections::hash_map::Entry, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Processes updates to a single kind of resource.
pub trait IndexResource<R> {
    /// Compiles and applies a resource, replacing any prior version with the same name.
    fn apply(&mut self, resource: R);

    /// Observes the removal of a resource.
    fn delete(&mut self, namespace: String, name: String);
}

/// Holds all indexing state. Owned and updated by a single writer that processes resource
/// updates, publishing complete tables to the shared lookup tables for lock-free reads.
#[derive(Debug)]
pub struct Index {
    cluster_info: Arc<ClusterInfo>,

    policies: HashMap<PolicyRef, PolicySpec>,
    services: HashMap<ServiceRef, ServiceSpec>,
    endpoints: HashMap<ServiceRef, Vec<Arc<Endpoint>>>,

    /// A handle that publishes updates to the lookup tables.
    lookups: lookup::Writer,

    metrics: IndexMetrics,
}

// === impl Index ===

impl Index {
    pub fn new(cluster_info: Arc<ClusterInfo>, metrics: IndexMetrics) -> (lookup::Reader, SharedIndex) {
        let (writer, reader) = lookup::pair();
        let idx = Self {
            cluster_info,
            policies: HashMap::default(),
            services: HashMap::default(),
            endpoints: HashMap::default(),
            lookups: writer,
            metrics,
        };
        (reader, Arc::new(RwLock::new(idx)))
    }

    /// Applies a decoded manifest resource.
    pub fn apply_resource(&mut self, resource: api::Resource) {
        self.metrics.applied(resource.kind());
        match resource {
            api::Resource::AuthorizationPolicy(policy) => self.apply(policy),
            api::Resource::Service(svc) => self.apply(svc),
            api::Resource::Endpoints(eps) => self.apply(eps),
        }
    }

    /// Removes a resource previously applied from a manifest.
    pub fn delete_resource(&mut self, key: api::ResourceKey) {
        self.metrics.deleted(key.kind);
        let api::ResourceKey {
            kind,
            namespace,
            name,
        } = key;
        match kind {
            api::Kind::AuthorizationPolicy => {
                IndexResource::<api::AuthorizationPolicy>::delete(self, namespace, name)
            }
            api::Kind::Service => IndexResource::<api::Service>::delete(self, namespace, name),
            api::Kind::Endpoints => IndexResource::<api::Endpoints>::delete(self, namespace, name),
        }
    }

    pub(crate) fn rejected(&self, kind: api::Kind) {
        self.metrics.rejected(kind);
    }

    pub(crate) fn apply_policy(&mut self, reference: PolicyRef, spec: PolicySpec) {
        match self.policies.entry(reference) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == spec {
                    tracing::debug!(policy = %entry.key(), "no changes");
                    return;
                }
                tracing::debug!(policy = %entry.key(), "updating");
                entry.insert(spec);
            }
            Entry::Vacant(entry) => {
                tracing::debug!(policy = %entry.key(), "creating");
                entry.insert(spec);
            }
        }
        self.publish_policies();
    }

    pub(crate) fn delete_policy(&mut self, reference: PolicyRef) {
        if self.policies.remove(&reference).is_none() {
            tracing::debug!(policy = %reference, "not found");
            return;
        }
        tracing::debug!(policy = %reference, "deleted");
        self.publish_policies();
    }

    pub(crate) fn apply_service(&mut self, service: ServiceRef, spec: ServiceSpec) {
        match self.services.entry(service) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == spec {
                    tracing::debug!(service = %entry.key(), "no changes");
                    return;
                }
                tracing::debug!(service = %entry.key(), "updating");
                entry.insert(spec);
            }
            Entry::Vacant(entry) => {
                tracing::debug!(service = %entry.key(), "creating");
                entry.insert(spec);
            }
        }
        // Labels select policies; VIPs and the distribution mode route connections.
        self.publish_policies();
        self.publish_registry();
    }

    pub(crate) fn delete_service(&mut self, service: ServiceRef) {
        if self.services.remove(&service).is_none() {
            tracing::debug!(%service, "not found");
            return;
        }
        tracing::debug!(%service, "deleted");
        self.publish_policies();
        self.publish_registry();
    }

    pub(crate) fn apply_endpoints(&mut self, service: ServiceRef, endpoints: Vec<Arc<Endpoint>>) {
        let is_new = !self.endpoints.contains_key(&service);
        match self.endpoints.entry(service) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == endpoints {
                    tracing::debug!(service = %entry.key(), "no changes");
                    return;
                }
                tracing::debug!(service = %entry.key(), endpoints = endpoints.len(), "updating endpoints");
                entry.insert(endpoints);
            }
            Entry::Vacant(entry) => {
                tracing::debug!(service = %entry.key(), endpoints = endpoints.len(), "creating endpoints");
                entry.insert(endpoints);
            }
        }
        // A new endpoint set may introduce a destination that policies must be resolved for.
        if is_new {
            self.publish_policies();
        }
        self.publish_registry();
    }

    pub(crate) fn delete_endpoints(&mut self, service: ServiceRef) {
        if self.endpoints.remove(&service).is_none() {
            tracing::debug!(%service, "not found");
            return;
        }
        tracing::debug!(%service, "deleted endpoints");
        self.publish_policies();
        self.publish_registry();
    }

    /// Every service known through either its `Service` or its `Endpoints`.
    fn destinations(&self) -> HashSet<&ServiceRef> {
        self.services.keys().chain(self.endpoints.keys()).collect()
    }

    fn publish_policies(&mut self) {
        let empty = Labels::default();
        let mut table = PolicyTable::default();
        for service in self.destinations() {
            let labels = self
                .services
                .get(service)
                .map(|s| &s.labels)
                .unwrap_or(&empty);
            let policies = self
                .policies
                .values()
                .filter(|spec| self.selects(spec, service, labels))
                .map(|spec| spec.policy.clone())
                .collect::<PolicySet>();
            table.insert(service.clone(), policies);
        }

        tracing::debug!(services = table.len(), policies = self.policies.len(), "publishing policies");
        self.metrics.set_policies(self.policies.len());
        self.lookups.publish_policies(table);
    }

    fn publish_registry(&mut self) {
        let mut registry = EndpointRegistry::default();
        for service in self.destinations() {
            let svc = self.services.get(service);
            registry.insert(
                service.clone(),
                svc.map(|s| s.vips.clone()).unwrap_or_default(),
                ServiceEndpoints {
                    mode: svc.map(|s| s.mode).unwrap_or_default(),
                    endpoints: self.endpoints.get(service).cloned().unwrap_or_default(),
                },
            );
        }

        tracing::debug!(
            services = registry.len(),
            endpoints = registry.endpoints_len(),
            "publishing endpoints"
        );
        self.lookups.publish_registry(registry);
    }

    /// Policies apply to services in their own namespace, or to every service when they are
    /// in the root namespace.
    fn selects(&self, spec: &PolicySpec, service: &ServiceRef, labels: &Labels) -> bool {
        let ns = &spec.policy.reference.namespace;
        if *ns != service.namespace && *ns != self.cluster_info.root_namespace {
            return false;
        }
        spec.selector
            .as_ref()
            .map(|selector| selector.matches(labels))
            .unwrap_or(true)
    }
}
