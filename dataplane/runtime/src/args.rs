use crate::{
    admin::{self, Admin},
    index::{metrics, AuthzToggle, ClusterInfo, DecisionMetrics, Engine, Index, IndexMetrics},
    manifests::ManifestDir,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "l4-dataplane", about = "An L4 data-plane decision engine")]
pub struct Args {
    #[clap(
        long,
        default_value = "l4_dataplane=info,warn",
        env = "L4_DATAPLANE_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,

    /// Directory of AuthorizationPolicy, Service, and Endpoints manifests.
    ///
    /// When unset, the engine starts empty and every destination passes through.
    #[clap(long, env = "L4_DATAPLANE_MANIFESTS_DIR")]
    manifests_dir: Option<PathBuf>,

    #[clap(long, default_value = "2", value_parser = clap::value_parser!(u64).range(1..))]
    reload_interval_secs: u64,

    /// Policies in this namespace apply to every service in the mesh.
    #[clap(long, default_value = l4_dataplane_core::DEFAULT_ROOT_NAMESPACE)]
    root_namespace: String,

    /// Starts with authorization policy enforcement disabled.
    #[clap(long)]
    authz_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin_addr,
            manifests_dir,
            reload_interval_secs,
            root_namespace,
            authz_disabled,
        } = self;

        log_format.try_init(log_level)?;

        let cluster_info = Arc::new(ClusterInfo { root_namespace });

        let mut prom = <Registry>::default();
        let index_prom = prom.sub_registry_with_prefix("index");
        let index_metrics = IndexMetrics::register(index_prom);
        let (reader, index) = Index::new(cluster_info, index_metrics);
        metrics::register(index_prom, reader.clone());
        let decision_metrics = DecisionMetrics::register(prom.sub_registry_with_prefix("engine"));

        let authz = AuthzToggle::new(!authz_disabled);
        info!(status = %authz, "Authorization policy enforcement");
        let engine = Engine::new(reader, authz, decision_metrics);

        let (shutdown, shutdown_rx) = kubert::shutdown::sigint_or_sigterm()?;
        let (ready_tx, ready_rx) = watch::channel(false);

        match manifests_dir {
            Some(dir) => {
                let interval = Duration::from_secs(reload_interval_secs);
                info!(dir = %dir.display(), ?interval, "Polling manifests");
                tokio::spawn(
                    ManifestDir::new(dir, index)
                        .run(interval, ready_tx, shutdown_rx.clone())
                        .instrument(info_span!("manifests")),
                );
            }
            None => {
                info!("No manifests directory configured");
                ready_tx.send_replace(true);
            }
        }

        let mut admin = tokio::spawn(
            admin::serve(admin_addr, Admin::new(engine, prom, ready_rx), shutdown_rx)
                .instrument(info_span!("admin")),
        );

        tokio::select! {
            res = &mut admin => res.context("admin server failed")??,
            res = shutdown.signaled() => {
                if res.is_err() {
                    bail!("Aborted");
                }
                info!("Shut down");
            }
        }
        Ok(())
    }
}
