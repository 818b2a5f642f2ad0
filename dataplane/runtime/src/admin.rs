use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use l4_dataplane_core::{Connection, Locality};
use l4_dataplane_index::Engine;
use prometheus_client::registry::Registry;
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, info};

/// Serves readiness, metrics, the authorization toggle, and decision debugging.
#[derive(Clone, Debug)]
pub struct Admin {
    engine: Engine,
    prom: Arc<Registry>,
    ready: watch::Receiver<bool>,
}

pub async fn serve(
    addr: SocketAddr,
    admin: Admin,
    shutdown: kubert::shutdown::Watch,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin server on {addr}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP admin server listening");

    tokio::pin! {
        let shutdown = shutdown.signaled();
    }

    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => res?,
            _ = &mut shutdown => {
                debug!("admin server shutting down");
                return Ok(());
            }
        };

        let admin = admin.clone();
        tokio::spawn(async move {
            let svc = service_fn(move |req: Request<Incoming>| {
                std::future::ready(Ok::<_, Infallible>(admin.handle(&req)))
            });
            if let Err(error) = http1::Builder::new()
                .serve_connection(TokioIo::new(io), svc)
                .await
            {
                debug!(%client, %error, "admin connection failed");
            }
        });
    }
}

// === impl Admin ===

impl Admin {
    pub fn new(engine: Engine, prom: Registry, ready: watch::Receiver<bool>) -> Self {
        Self {
            engine,
            prom: Arc::new(prom),
            ready,
        }
    }

    pub fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/ready" => match *req.method() {
                Method::GET | Method::HEAD => self.handle_ready(),
                _ => method_not_allowed(),
            },
            "/authz" => match *req.method() {
                Method::GET => self.authz_status(),
                _ => method_not_allowed(),
            },
            "/authz/enable" => match *req.method() {
                Method::POST => self.set_authz(true),
                _ => method_not_allowed(),
            },
            "/authz/disable" => match *req.method() {
                Method::POST => self.set_authz(false),
                _ => method_not_allowed(),
            },
            "/metrics" => match *req.method() {
                Method::GET => self.handle_metrics(),
                _ => method_not_allowed(),
            },
            "/debug/connect" => match *req.method() {
                Method::GET => self.debug_connect(req.uri().query()),
                _ => method_not_allowed(),
            },
            _ => text(StatusCode::NOT_FOUND, "not found\n"),
        }
    }

    fn handle_ready(&self) -> Response<Full<Bytes>> {
        if *self.ready.borrow() {
            text(StatusCode::OK, "ready\n")
        } else {
            text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
        }
    }

    fn authz_status(&self) -> Response<Full<Bytes>> {
        text(StatusCode::OK, format!("{}\n", self.engine.authz()))
    }

    fn set_authz(&self, enabled: bool) -> Response<Full<Bytes>> {
        let authz = self.engine.authz();
        if authz.set(enabled) {
            info!(status = %authz, "authorization toggled");
        }
        self.authz_status()
    }

    fn handle_metrics(&self) -> Response<Full<Bytes>> {
        let mut buf = String::new();
        if let Err(error) = prometheus_client::encoding::text::encode(&mut buf, &self.prom) {
            tracing::warn!(%error, "failed to encode metrics");
            return text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n");
        }
        rsp(
            StatusCode::OK,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
            buf,
        )
    }

    fn debug_connect(&self, query: Option<&str>) -> Response<Full<Bytes>> {
        let (conn, client) = match parse_connect(query.unwrap_or_default()) {
            Ok(params) => params,
            Err(error) => return text(StatusCode::BAD_REQUEST, format!("{error}\n")),
        };

        let decision = self.engine.connect(conn, &client);
        match serde_json::to_vec(&decision) {
            Ok(body) => rsp(StatusCode::OK, "application/json", body),
            Err(error) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("{error}\n")),
        }
    }
}

/// Parses `src`, `dst`, and `port`, plus the client's optional `region`, `zone`, and `subzone`.
fn parse_connect(query: &str) -> Result<(Connection, Locality)> {
    let mut src = None;
    let mut dst = None;
    let mut port = None;
    let mut client = Locality::default();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "src" => src = Some(parse_param::<IpAddr>(key, value)?),
            "dst" => dst = Some(parse_param::<IpAddr>(key, value)?),
            "port" => port = Some(parse_param::<u16>(key, value)?),
            "region" => client.region = value.to_string(),
            "zone" => client.zone = value.to_string(),
            "subzone" => client.subzone = value.to_string(),
            _ => bail!("unknown parameter {key:?}"),
        }
    }

    let src = src.ok_or_else(|| anyhow!("missing src"))?;
    let dst = dst.ok_or_else(|| anyhow!("missing dst"))?;
    let port = port.ok_or_else(|| anyhow!("missing port"))?;
    Ok((
        Connection {
            src,
            dst: SocketAddr::new(dst, port),
        },
        client,
    ))
}

fn parse_param<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid {key} {value:?}"))
}

fn rsp(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut rsp = Response::new(Full::new(body.into()));
    *rsp.status_mut() = status;
    rsp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    rsp
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    rsp(status, "text/plain", body)
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    rsp(StatusCode::METHOD_NOT_ALLOWED, "text/plain", Bytes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use l4_dataplane_index::{AuthzToggle, ClusterInfo, DecisionMetrics, Index, IndexMetrics};

    fn mk_admin(ready: bool) -> (Admin, watch::Sender<bool>) {
        let (reader, _index) = Index::new(Arc::new(ClusterInfo::default()), IndexMetrics::default());
        let mut prom = Registry::default();
        let metrics = DecisionMetrics::register(&mut prom);
        let engine = Engine::new(reader, AuthzToggle::default(), metrics);
        let (tx, rx) = watch::channel(ready);
        (Admin::new(engine, prom, rx), tx)
    }

    fn req(method: Method, uri: &str) -> Request<()> {
        Request::builder().method(method).uri(uri).body(()).unwrap()
    }

    async fn body(rsp: Response<Full<Bytes>>) -> String {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn readiness() {
        let (admin, tx) = mk_admin(false);
        let rsp = admin.handle(&req(Method::GET, "/ready"));
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        tx.send(true).unwrap();
        let rsp = admin.handle(&req(Method::GET, "/ready"));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, "ready\n");

        let rsp = admin.handle(&req(Method::POST, "/ready"));
        assert_eq!(rsp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn toggles_authz() {
        let (admin, _tx) = mk_admin(true);
        assert_eq!(body(admin.handle(&req(Method::GET, "/authz"))).await, "enabled\n");
        assert_eq!(
            body(admin.handle(&req(Method::POST, "/authz/disable"))).await,
            "disabled\n"
        );
        assert_eq!(body(admin.handle(&req(Method::GET, "/authz"))).await, "disabled\n");
        assert_eq!(
            body(admin.handle(&req(Method::POST, "/authz/enable"))).await,
            "enabled\n"
        );
        assert_eq!(
            admin.handle(&req(Method::GET, "/authz/enable")).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn debug_connect() {
        let (admin, _tx) = mk_admin(true);
        let rsp = admin.handle(&req(
            Method::GET,
            "/debug/connect?src=10.0.0.1&dst=192.0.2.1&port=443&region=r",
        ));
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body(rsp).await, r#"{"decision":"passthrough"}"#);

        for uri in [
            "/debug/connect?src=10.0.0.1&dst=192.0.2.1",
            "/debug/connect?src=nope&dst=192.0.2.1&port=80",
            "/debug/connect?src=10.0.0.1&dst=192.0.2.1&port=80&color=blue",
        ] {
            assert_eq!(
                admin.handle(&req(Method::GET, uri)).status(),
                StatusCode::BAD_REQUEST,
                "{uri}"
            );
        }
    }

    #[tokio::test]
    async fn metrics() {
        let (admin, _tx) = mk_admin(true);
        admin.handle(&req(Method::GET, "/debug/connect?src=10.0.0.1&dst=192.0.2.1&port=443"));
        let text = body(admin.handle(&req(Method::GET, "/metrics"))).await;
        assert!(
            text.contains(r#"connect_decisions_total{outcome="passthrough"} 1"#),
            "{text}"
        );
    }

    #[test]
    fn not_found() {
        let (admin, _tx) = mk_admin(true);
        assert_eq!(
            admin.handle(&req(Method::GET, "/nope")).status(),
            StatusCode::NOT_FOUND
        );
    }
}
