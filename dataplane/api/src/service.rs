use k8s_openapi::{api::core::v1::ServiceSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde::Deserialize;

/// A service's labels and virtual IPs.
///
/// Its distribution mode is read from `spec.trafficDistribution`, falling back to the
/// `networking.istio.io/traffic-distribution` annotation.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

/// The complete set of backend instances for the service with the same namespace and name.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Endpoints {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,

    #[serde(default)]
    pub locality: Locality,

    #[serde(default = "healthy")]
    pub healthy: bool,
}

/// Omitted fields are empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Locality {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub subzone: String,
}

fn healthy() -> bool {
    true
}
