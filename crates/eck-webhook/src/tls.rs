//! TLS termination in front of an axum [`Router`], using the certificate
//! mounted into the operator pod.
use std::{
    future::Future,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{Router, extract::Request};
use futures_util::pin_mut;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
        version::{TLS12, TLS13},
    },
};
use tower::ServiceExt;
use tracing::Instrument;

/// File names inside the certificate directory.
pub const CERTIFICATE_FILE: &str = "tls.crt";
pub const PRIVATE_KEY_FILE: &str = "tls.key";

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to read certificates from {path:?}"))]
    ReadCertificates {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read private key from {path:?}"))]
    ReadPrivateKey {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },

    #[snafu(display("the private key does not match the certificate"))]
    InvalidTlsPrivateKey { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },
}

/// Builds the TLS 1.2/1.3 server configuration from `tls.crt` and `tls.key`
/// in `cert_dir`, offering HTTP/2 and HTTP/1.1.
pub fn server_config(cert_dir: &Path) -> Result<ServerConfig> {
    let cert_path = cert_dir.join(CERTIFICATE_FILE);
    let certificates = CertificateDer::pem_file_iter(&cert_path)
        .and_then(Iterator::collect::<Result<Vec<_>, _>>)
        .context(ReadCertificatesSnafu { path: &cert_path })?;

    let key_path = cert_dir.join(PRIVATE_KEY_FILE);
    let private_key =
        PrivateKeyDer::from_pem_file(&key_path).context(ReadPrivateKeySnafu { path: &key_path })?;

    let mut config = ServerConfig::builder_with_provider(default_provider().into())
        .with_protocol_versions(&[&TLS12, &TLS13])
        .context(SetSafeTlsProtocolVersionsSnafu)?
        .with_no_client_auth()
        .with_single_cert(certificates, private_key)
        .context(InvalidTlsPrivateKeySnafu)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// A server which terminates TLS connections and hands the decrypted HTTP
/// requests to a [`Router`].
pub struct TlsServer {
    config: Arc<ServerConfig>,
    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    pub fn new(socket_addr: SocketAddr, router: Router, config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            socket_addr,
            router,
        }
    }

    /// Accepts connections until `shutdown` completes. Connections already
    /// accepted are served to completion in their own tasks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let tls_acceptor = TlsAcceptor::from(self.config);
        let tcp_listener =
            TcpListener::bind(self.socket_addr)
                .await
                .context(BindTcpListenerSnafu {
                    socket_addr: self.socket_addr,
                })?;
        tracing::info!(socket_addr = %self.socket_addr, "webhook server listening");

        pin_mut!(shutdown);
        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("webhook server shutting down");
                    return Ok(());
                }
                accepted = tcp_listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::trace!(%err, "failed to accept incoming TCP connection");
                        continue;
                    }
                },
            };

            let tls_acceptor = tls_acceptor.clone();
            let router = self.router.clone();
            let span = tracing::debug_span!("serve connection", client.address = %remote_addr);
            tokio::spawn(
                async move {
                    let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::trace!(%err, "error during TLS handshake");
                            return;
                        }
                    };

                    // Hyper has its own IO and service traits, adapt tokio and tower to them.
                    let hyper_service = service_fn(move |request: Request<Incoming>| {
                        router.clone().oneshot(request)
                    });
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), hyper_service)
                        .await
                    {
                        tracing::warn!(%err, "failed to serve connection");
                    }
                }
                .instrument(span),
            );
        }
    }
}
