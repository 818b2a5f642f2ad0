//! L4 data-plane index
//!
//! The index compiles resources into the tables that connection decisions are made against:
//!
//! - Each `AuthorizationPolicy` selects services by label, in its own namespace or, when it is
//!   in the root namespace, across the mesh. Policies are grouped by the services they select
//!   into a [`PolicyTable`](l4_dataplane_core::PolicyTable).
//! - Each `Service` supplies labels, virtual IPs, and a distribution mode.
//! - Each `Endpoints` supplies the complete set of backends for the service of the same name.
//!
//! ```text
//! [ AuthorizationPolicy ] -> [ Service ] <- [ Endpoints ]
//! ```
//!
//! Resources are compiled before anything is modified, so an invalid resource never replaces
//! a valid one. After each change the index builds complete new tables and publishes them;
//! readers load the current tables without locking and never observe a partial update.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod authorization_policy;
mod endpoints;
pub mod engine;
mod error;
mod index;
mod lookup;
pub mod metrics;
mod service;


pub use self::{
    engine::{AuthzToggle, Decision, Engine},
    error::Error,
    index::{Index, IndexResource, SharedIndex},
    lookup::Reader,
    metrics::{DecisionMetrics, IndexMetrics},
};

/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Policies in this namespace apply to services in every namespace.
    pub root_namespace: String,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            root_namespace: l4_dataplane_core::DEFAULT_ROOT_NAMESPACE.to_string(),
        }
    }
}
