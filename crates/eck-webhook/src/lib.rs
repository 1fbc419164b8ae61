//! The HTTPS server answering validating admission reviews for Elasticsearch
//! clusters and license Secrets.
//!
//! ```no_run
//! # async fn docs(store: eck_operator::client::Client) {
//! use std::{path::PathBuf, sync::Arc};
//!
//! use eck_webhook::{
//!     Options, WebhookServer,
//!     handlers::{self, AdmissionState},
//! };
//!
//! let state = Arc::new(AdmissionState {
//!     store,
//!     operator_namespace: "elastic-system".to_owned(),
//!     enterprise_key: None,
//!     max_name_length: 36,
//! });
//! let options = Options {
//!     socket_addr: ([0, 0, 0, 0], 8443).into(),
//!     cert_dir: PathBuf::from("/tmp/k8s-webhook-server/serving-certs"),
//! };
//! let server = WebhookServer::new(handlers::router(state), &options).unwrap();
//! server.run(std::future::pending()).await.unwrap();
//! # }
//! ```
use std::{future::Future, net::SocketAddr, path::PathBuf};

use axum::{Router, routing::get};
use snafu::{ResultExt, Snafu};

use crate::tls::TlsServer;

pub mod handlers;
pub mod tls;

pub type Result<T, E = WebhookError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WebhookError {
    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: tls::TlsServerError },
}

#[derive(Clone, Debug)]
pub struct Options {
    pub socket_addr: SocketAddr,

    /// Directory holding `tls.crt` and `tls.key`.
    pub cert_dir: PathBuf,
}

pub struct WebhookServer {
    tls_server: TlsServer,
}

impl WebhookServer {
    /// Serves `router` over HTTPS with the certificate found in
    /// [`Options::cert_dir`]. A `/health` route is added.
    pub fn new(router: Router, options: &Options) -> Result<Self> {
        let config = tls::server_config(&options.cert_dir).context(CreateTlsServerSnafu)?;

        tracing::debug!("create core router and merge provided router");
        let tls_server = TlsServer::new(options.socket_addr, with_health(router), config);
        Ok(Self { tls_server })
    }

    /// Serves until `shutdown` completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::debug!("run webhook server");
        self.tls_server.run(shutdown).await.context(RunTlsServerSnafu)
    }
}

fn with_health(router: Router) -> Router {
    router.route("/health", get(|| async { "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use hyper::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn health_route_answers() {
        let response = with_health(Router::new())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[test]
    fn missing_certificate_fails_creation() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options {
            socket_addr: ([127, 0, 0, 1], 0).into(),
            cert_dir: dir.path().to_owned(),
        };
        assert!(matches!(
            WebhookServer::new(Router::new(), &options),
            Err(WebhookError::CreateTlsServer { .. })
        ));
    }
}
