use crate::{lookup::Reader, metrics::DecisionMetrics};
use l4_dataplane_core::{Connection, Denial, Destination, Endpoint, Locality, ServiceRef, Verdict};
use serde::Serialize;
use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Makes admission and routing decisions against the most recently published tables.
#[derive(Clone, Debug)]
pub struct Engine {
    reader: Reader,
    authz: AuthzToggle,
    metrics: DecisionMetrics,
}

/// Formats a list of services for logging.
struct Services<'a>(&'a [ServiceRef]);

/// Enables or disables the admission path at runtime. Shared by all engine handles.
#[derive(Clone, Debug)]
pub struct AuthzToggle(Arc<AtomicBool>);

/// The outcome of a new outbound connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum Decision {
    /// Connect to `addr`, served by `endpoint`.
    Forward {
        endpoint: Arc<Endpoint>,
        addr: SocketAddr,
    },

    /// Refused by authorization policy.
    Deny { denial: Denial },

    /// The destination service has no endpoint eligible for this client.
    NoBackend { service: ServiceRef },

    /// The destination is not known to the mesh and is left untouched.
    Passthrough,
}

// === impl Engine ===

impl Engine {
    pub fn new(reader: Reader, authz: AuthzToggle, metrics: DecisionMetrics) -> Self {
        Self {
            reader,
            authz,
            metrics,
        }
    }

    pub fn authz(&self) -> &AuthzToggle {
        &self.authz
    }

    /// Evaluates a connection to `service` against authorization policy.
    ///
    /// Each denial is logged exactly once.
    pub fn evaluate(&self, service: &ServiceRef, conn: &Connection) -> Verdict {
        self.admit(std::slice::from_ref(service), conn)
    }

    /// Evaluates a connection against the combined policies of every service in `services`.
    fn admit(&self, services: &[ServiceRef], conn: &Connection) -> Verdict {
        if !self.authz.is_enabled() {
            self.metrics.authz("allow");
            return Verdict::Allow;
        }

        let verdict = self.reader.policies().evaluate_all(services, conn);
        match &verdict {
            Verdict::Allow => self.metrics.authz("allow"),
            Verdict::Deny(denial) => {
                tracing::info!(service = %Services(services), src = %conn.src, dst = %conn.dst, "{denial}");
                self.metrics.authz("deny");
            }
        }
        verdict
    }

    /// Selects a healthy endpoint of `service` for a client in `client`.
    pub fn select(&self, service: &ServiceRef, client: &Locality) -> Option<Arc<Endpoint>> {
        self.reader
            .registry()
            .select(service, client, &mut rand::thread_rng())
            .cloned()
    }

    /// Decides how to handle a new outbound connection: admission first, then routing.
    pub fn connect(&self, conn: Connection, client: &Locality) -> Decision {
        let registry = self.reader.registry();
        let decision = match registry.resolve(conn.dst) {
            None => Decision::Passthrough,

            Some(Destination::Service(service)) => match self.evaluate(service, &conn) {
                Verdict::Deny(denial) => Decision::Deny { denial },
                Verdict::Allow => match registry.select(service, client, &mut rand::thread_rng()) {
                    Some(endpoint) => Decision::Forward {
                        addr: endpoint.addr,
                        endpoint: endpoint.clone(),
                    },
                    None => {
                        tracing::debug!(%service, %client, "no endpoint available");
                        Decision::NoBackend {
                            service: service.clone(),
                        }
                    }
                },
            },

            // Connections addressed to a specific endpoint are not rerouted. An address shared by
            // several services is subject to the policies of each of them.
            Some(Destination::Endpoint(owners)) => {
                let services = owners
                    .iter()
                    .map(|ep| ep.service.clone())
                    .collect::<Vec<_>>();
                match (self.admit(&services, &conn), owners.first()) {
                    (Verdict::Deny(denial), _) => Decision::Deny { denial },
                    (Verdict::Allow, Some(endpoint)) => Decision::Forward {
                        endpoint: endpoint.clone(),
                        addr: conn.dst,
                    },
                    (Verdict::Allow, None) => Decision::Passthrough,
                }
            }
        };

        self.metrics.connect(decision.outcome());
        decision
    }
}

// === impl Services ===

impl fmt::Display for Services<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, service) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            service.fmt(f)?;
        }
        Ok(())
    }
}

// === impl AuthzToggle ===

impl AuthzToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true if the state changed.
    pub fn set(&self, enabled: bool) -> bool {
        self.0.swap(enabled, Ordering::AcqRel) != enabled
    }

    pub fn status(&self) -> &'static str {
        if self.is_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    }
}

impl Default for AuthzToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Display for AuthzToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status().fmt(f)
    }
}

// === impl Decision ===

impl Decision {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Forward { .. } => "forward",
            Self::Deny { .. } => "deny",
            Self::NoBackend { .. } => "no_backend",
            Self::Passthrough => "passthrough",
        }
    }
}
