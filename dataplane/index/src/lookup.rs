use arc_swap::ArcSwap;
use l4_dataplane_core::{EndpointRegistry, PolicyTable};
use std::sync::Arc;

/// Publishes complete table versions. Held only by the index.
#[derive(Debug)]
pub(crate) struct Writer(Tables);

/// Supports lock-free reads of the most recently published tables.
#[derive(Clone, Debug)]
pub struct Reader(Tables);

#[derive(Clone, Debug, Default)]
struct Tables {
    policies: Arc<ArcSwap<PolicyTable>>,
    registry: Arc<ArcSwap<EndpointRegistry>>,
}

pub(crate) fn pair() -> (Writer, Reader) {
    let tables = Tables::default();
    let w = Writer(tables.clone());
    let r = Reader(tables);
    (w, r)
}

// === impl Writer ===

impl Writer {
    pub(crate) fn publish_policies(&mut self, policies: PolicyTable) {
        self.0.policies.store(Arc::new(policies));
    }

    pub(crate) fn publish_registry(&mut self, registry: EndpointRegistry) {
        self.0.registry.store(Arc::new(registry));
    }
}

// === impl Reader ===

impl Reader {
    #[inline]
    pub fn policies(&self) -> Arc<PolicyTable> {
        self.0.policies.load_full()
    }

    #[inline]
    pub fn registry(&self) -> Arc<EndpointRegistry> {
        self.0.registry.load_full()
    }
}
