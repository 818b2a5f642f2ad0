#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod logs;
pub mod retry;

pub use self::{
    logs::LogCapture,
    retry::{Retry, Timeout},
};

use l4_dataplane_api as api;
use l4_dataplane_core::{Connection, Locality};
use l4_dataplane_index::{
    AuthzToggle, ClusterInfo, Decision, DecisionMetrics, Engine, Index, IndexMetrics, Reader,
    SharedIndex,
};
use std::{net::SocketAddr, sync::Arc};

/// An index and engine driven by manifests, as the runtime drives them.
pub struct TestEnv {
    index: SharedIndex,
    reader: Reader,
    engine: Engine,
}

// === impl TestEnv ===

impl TestEnv {
    pub fn with_root_namespace(root_namespace: &str) -> Self {
        let cluster = ClusterInfo {
            root_namespace: root_namespace.to_string(),
        };
        let (reader, index) = Index::new(Arc::new(cluster), IndexMetrics::default());
        let engine = Engine::new(
            reader.clone(),
            AuthzToggle::default(),
            DecisionMetrics::default(),
        );
        Self {
            index,
            reader,
            engine,
        }
    }

    /// Applies every resource in a manifest, panicking if it does not decode.
    #[track_caller]
    pub fn apply(&self, manifest: &str) {
        if let Err(error) = self.try_apply(manifest) {
            panic!("failed to decode manifest: {error}\n{manifest}");
        }
    }

    pub fn try_apply(&self, manifest: &str) -> Result<(), api::Error> {
        let resources = api::decode_all(manifest)?;
        let mut index = self.index.write();
        for resource in resources {
            index.apply_resource(resource);
        }
        Ok(())
    }

    pub fn delete(&self, kind: api::Kind, namespace: &str, name: &str) {
        self.index.write().delete_resource(api::ResourceKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    #[track_caller]
    pub fn connect(&self, src: &str, dst: &str, client: &Locality) -> Decision {
        let conn = Connection {
            src: src.parse().expect("source must be an IP address"),
            dst: dst.parse().expect("destination must be a socket address"),
        };
        self.engine.connect(conn, client)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::with_root_namespace(l4_dataplane_core::DEFAULT_ROOT_NAMESPACE)
    }
}

pub fn forwarded_to(decision: &Decision) -> Option<SocketAddr> {
    match decision {
        Decision::Forward { addr, .. } => Some(*addr),
        _ => None,
    }
}

pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "l4_dataplane=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}

/// A `Service` manifest labeled `app: <name>`.
pub fn service(ns: &str, name: &str, vip: &str, traffic_distribution: Option<&str>) -> String {
    let mut manifest = format!(
        r#"
kind: Service
metadata:
  namespace: {ns}
  name: {name}
  labels:
    app: {name}
spec:
  clusterIP: {vip}
"#
    );
    if let Some(mode) = traffic_distribution {
        manifest.push_str(&format!("  trafficDistribution: {mode}\n"));
    }
    manifest
}

/// An `Endpoints` manifest with one endpoint on `port` per address.
pub fn endpoints<'a>(
    ns: &str,
    name: &str,
    port: u16,
    endpoints: impl IntoIterator<Item = (&'a str, &'a Locality)>,
) -> String {
    let mut items = String::new();
    for (address, locality) in endpoints {
        items.push_str(&format!(
            r#"  - address: {address}
    port: {port}
    locality:
      region: "{}"
      zone: "{}"
      subzone: "{}"
"#,
            locality.region, locality.zone, locality.subzone
        ));
    }
    if items.is_empty() {
        items.push_str("  []\n");
    }

    format!(
        r#"
kind: Endpoints
metadata:
  namespace: {ns}
  name: {name}
endpoints:
{items}"#
    )
}
