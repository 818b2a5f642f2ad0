#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authz;
pub mod endpoint;
pub mod locality;
mod network_match;
pub mod ports;
pub mod registry;

pub use self::{
    authz::{Action, Clause, Connection, Denial, Match, Policy, PolicyRef, PolicySet, PolicyTable, Rule, Verdict},
    endpoint::{Endpoint, ServiceRef},
    locality::{DistributionMode, Locality, Tier},
    network_match::NetworkMatch,
    registry::{Destination, EndpointRegistry, ServiceEndpoints},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// The namespace whose policies apply to every service.
pub const DEFAULT_ROOT_NAMESPACE: &str = "mesh-system";
