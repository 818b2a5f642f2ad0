use crate::{index::Index, Error, IndexResource};
use l4_dataplane_api::{self as api, Labels};
use l4_dataplane_core::{DistributionMode, ServiceRef};
use std::net::IpAddr;

/// The parts of a service that affect policy selection and endpoint routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ServiceSpec {
    pub labels: Labels,
    pub vips: Vec<IpAddr>,
    pub mode: DistributionMode,
}

impl IndexResource<api::Service> for Index {
    fn apply(&mut self, svc: api::Service) {
        let namespace = api::manifest::namespace(&svc.metadata).to_string();
        let name = svc.metadata.name.clone().unwrap_or_default();
        let service = ServiceRef::new(namespace, name);

        let spec = match compile(svc) {
            Ok(spec) => spec,
            Err(error) => {
                tracing::warn!(namespace = %service.namespace, name = %service.name, %error, "Invalid Service");
                self.rejected(api::Kind::Service);
                return;
            }
        };

        self.apply_service(service, spec);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_service(ServiceRef::new(namespace, name));
    }
}

pub(crate) fn compile(svc: api::Service) -> Result<ServiceSpec, Error> {
    let api::Service { metadata, spec } = svc;

    // `spec.trafficDistribution` takes precedence over the annotation.
    let mode = spec
        .traffic_distribution
        .as_deref()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(DistributionMode::ANNOTATION))
                .map(String::as_str)
        })
        .map(|v| {
            v.parse::<DistributionMode>()
                .map_err(|_| Error::InvalidDistribution(v.to_string()))
        })
        .transpose()?
        .unwrap_or_default();

    let ips = match spec.cluster_ips {
        Some(ips) if !ips.is_empty() => ips,
        _ => spec.cluster_ip.into_iter().collect(),
    };
    let vips = ips
        .into_iter()
        // Headless services have no virtual IP.
        .filter(|ip| !ip.is_empty() && ip != "None")
        .map(|value| {
            value
                .parse::<IpAddr>()
                .map_err(|source| Error::InvalidAddress { value, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ServiceSpec {
        labels: metadata.labels.into(),
        vips,
        mode,
    })
}
