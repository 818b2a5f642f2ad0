//! Locality-aware endpoint selection.
//!
//! Endpoints are ranked by [`Tier`] relative to the client. How tiers are used depends on the
//! service's [`DistributionMode`]:
//!
//! - `PreferClose` selects from the closest tier that has a healthy endpoint.
//! - `Local` only ever selects from the client's own subzone.
//! - `Default` ignores locality and treats every healthy endpoint alike.
//!
//! Endpoints within the selected tier are chosen uniformly at random.

use crate::{
    endpoint::{Endpoint, ServiceRef},
    locality::{DistributionMode, Locality, Tier},
};
use ahash::AHashMap as HashMap;
use rand::Rng;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// A service's distribution mode and its complete endpoint set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub mode: DistributionMode,
    pub endpoints: Vec<Arc<Endpoint>>,
}

/// Endpoints by service, with reverse lookups for connection destinations.
#[derive(Clone, Debug, Default)]
pub struct EndpointRegistry {
    services: HashMap<ServiceRef, Arc<ServiceEndpoints>>,
    by_vip: HashMap<IpAddr, ServiceRef>,
    by_addr: HashMap<SocketAddr, Vec<Arc<Endpoint>>>,
}

/// What a connection's destination address refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Destination<'a> {
    /// A service's virtual IP.
    Service(&'a ServiceRef),

    /// A specific endpoint's address, with one entry per owning service ordered by service.
    Endpoint(&'a [Arc<Endpoint>]),
}

// === impl ServiceEndpoints ===

impl ServiceEndpoints {
    /// Returns the tier that selection draws from, or `None` if no endpoint may be selected.
    pub fn selection_tier(&self, client: &Locality) -> Option<Tier> {
        let best = self
            .endpoints
            .iter()
            .filter(|ep| ep.healthy)
            .map(|ep| self.rank(client, ep))
            .min()?;

        if self.mode == DistributionMode::Local && best != Tier::Subzone {
            return None;
        }
        Some(best)
    }

    pub fn select<R: Rng>(&self, client: &Locality, rng: &mut R) -> Option<&Arc<Endpoint>> {
        let tier = self.selection_tier(client)?;
        let candidates = || {
            self.endpoints
                .iter()
                .filter(move |ep| ep.healthy && self.rank(client, ep) == tier)
        };

        let n = candidates().count();
        if n == 0 {
            return None;
        }
        candidates().nth(rng.gen_range(0..n))
    }

    #[inline]
    fn rank(&self, client: &Locality, ep: &Endpoint) -> Tier {
        match self.mode {
            DistributionMode::Default => Tier::Any,
            DistributionMode::PreferClose | DistributionMode::Local => client.tier(&ep.locality),
        }
    }
}

// === impl EndpointRegistry ===

impl EndpointRegistry {
    pub fn insert(
        &mut self,
        service: ServiceRef,
        vips: impl IntoIterator<Item = IpAddr>,
        endpoints: ServiceEndpoints,
    ) {
        for vip in vips {
            self.by_vip.insert(vip, service.clone());
        }
        for ep in &endpoints.endpoints {
            let owners = self.by_addr.entry(ep.addr).or_default();
            match owners.binary_search_by(|o| o.service.cmp(&ep.service)) {
                Ok(idx) => owners[idx] = ep.clone(),
                Err(idx) => owners.insert(idx, ep.clone()),
            }
        }
        self.services.insert(service, Arc::new(endpoints));
    }

    pub fn get(&self, service: &ServiceRef) -> Option<&ServiceEndpoints> {
        self.services.get(service).map(|s| &**s)
    }

    /// Resolves a connection's destination. Service VIPs take precedence over endpoint
    /// addresses.
    pub fn resolve(&self, dst: SocketAddr) -> Option<Destination<'_>> {
        if let Some(svc) = self.by_vip.get(&dst.ip()) {
            return Some(Destination::Service(svc));
        }
        self.by_addr
            .get(&dst)
            .map(|owners| Destination::Endpoint(owners.as_slice()))
    }

    pub fn select<R: Rng>(
        &self,
        service: &ServiceRef,
        client: &Locality,
        rng: &mut R,
    ) -> Option<&Arc<Endpoint>> {
        self.services.get(service)?.select(client, rng)
    }

    pub fn services(&self) -> impl Iterator<Item = (&ServiceRef, &ServiceEndpoints)> {
        self.services.iter().map(|(k, v)| (k, &**v))
    }

    /// The number of services in the registry.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The total number of endpoints across all services.
    pub fn endpoints_len(&self) -> usize {
        self.services.values().map(|s| s.endpoints.len()).sum()
    }
}
