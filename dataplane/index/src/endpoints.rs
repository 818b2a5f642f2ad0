use crate::{index::Index, Error, IndexResource};
use l4_dataplane_api as api;
use l4_dataplane_core::{Endpoint, Locality, ServiceRef};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

impl IndexResource<api::Endpoints> for Index {
    fn apply(&mut self, eps: api::Endpoints) {
        let namespace = api::manifest::namespace(&eps.metadata).to_string();
        let name = eps.metadata.name.clone().unwrap_or_default();
        let service = ServiceRef::new(namespace, name);

        let endpoints = match compile(&service, eps.endpoints) {
            Ok(endpoints) => endpoints,
            Err(error) => {
                tracing::warn!(namespace = %service.namespace, name = %service.name, %error, "Invalid Endpoints");
                self.rejected(api::Kind::Endpoints);
                return;
            }
        };

        self.apply_endpoints(service, endpoints);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_endpoints(ServiceRef::new(namespace, name));
    }
}

pub(crate) fn compile(
    service: &ServiceRef,
    endpoints: Vec<api::service::Endpoint>,
) -> Result<Vec<Arc<Endpoint>>, Error> {
    endpoints
        .into_iter()
        .map(|ep| {
            if ep.port == 0 {
                return Err(Error::InvalidPort(ep.port.to_string()));
            }
            let ip = ep
                .address
                .parse::<IpAddr>()
                .map_err(|source| Error::InvalidAddress {
                    value: ep.address.clone(),
                    source,
                })?;
            let api::service::Locality {
                region,
                zone,
                subzone,
            } = ep.locality;
            Ok(Arc::new(Endpoint {
                addr: SocketAddr::new(ip, ep.port),
                locality: Locality::new(region, zone, subzone),
                healthy: ep.healthy,
                service: service.clone(),
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_endpoint(address: &str, port: u16) -> api::service::Endpoint {
        api::service::Endpoint {
            address: address.to_string(),
            port,
            locality: api::service::Locality {
                region: "region".to_string(),
                zone: "zone1".to_string(),
                subzone: "subzone1".to_string(),
            },
            healthy: true,
        }
    }

    #[test]
    fn compiles_endpoints() {
        let svc = ServiceRef::new("sample", "helloworld");
        let eps = compile(&svc, vec![mk_endpoint("10.0.0.1", 5000), mk_endpoint("fd00::1", 5000)])
            .expect("endpoints must compile");
        assert_eq!(
            eps.iter().map(|ep| ep.addr).collect::<Vec<_>>(),
            vec![
                "10.0.0.1:5000".parse::<SocketAddr>().unwrap(),
                "[fd00::1]:5000".parse().unwrap()
            ]
        );
        assert!(eps.iter().all(|ep| ep.service == svc));
        assert_eq!(eps[0].locality, Locality::new("region", "zone1", "subzone1"));
    }

    #[test]
    fn rejects_invalid_endpoints() {
        let svc = ServiceRef::new("sample", "helloworld");
        assert!(matches!(
            compile(&svc, vec![mk_endpoint("10.0.0.1", 0)]),
            Err(Error::InvalidPort(_))
        ));
        assert!(matches!(
            compile(&svc, vec![mk_endpoint("10.0.0.1", 80), mk_endpoint("helloworld", 80)]),
            Err(Error::InvalidAddress { .. })
        ));
    }
}
