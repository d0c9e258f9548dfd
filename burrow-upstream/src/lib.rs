//! burrow-upstream - upstream side of the burrow DNS tunnel
//!
//! Exposes a WebSocket endpoint at `/dns` and a liveness probe at
//! `/health`. Each tunnel connection is served independently; each
//! query frame inside a connection spawns its own resolution against
//! the configured list of plain-DNS resolvers.
//!
//! # Example
//!
//! ```no_run
//! use burrow_upstream::{serve, Config};
//!
//! # async fn example() -> burrow_upstream::Result<()> {
//! let config = Config::load("burrow-upstream.toml")?;
//! serve(config).await
//! # }
//! ```

mod config;
mod error;
mod forwarder;
mod session;

pub use config::{Config, DnsConfig, ServerConfig};
pub use error::{Error, Result};
pub use forwarder::Forwarder;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use burrow_protocol::Envelope;

/// Shared state for the tunnel endpoint
pub struct UpstreamCore {
    pub(crate) envelope: Envelope,
    pub(crate) forwarder: Forwarder,
}

impl UpstreamCore {
    /// Build the upstream core from a validated configuration
    pub fn new(config: &Config) -> Result<Arc<Self>> {
        config.validate()?;

        let salt = config.server.salt_bytes()?;
        let envelope = Envelope::new(&config.server.password, &salt);
        let forwarder = Forwarder::new(config.dns.upstream_addrs()?, config.dns.timeout());

        Ok(Arc::new(Self {
            envelope,
            forwarder,
        }))
    }
}

/// Build the two-route application: `/dns` (upgrade) and `/health`
pub fn router(core: Arc<UpstreamCore>) -> Router {
    Router::new()
        .route("/dns", get(tunnel_handler))
        .route("/health", get(health_handler))
        .with_state(core)
}

/// Serve the tunnel endpoint until the process stops
///
/// With `tls_cert`/`tls_key` configured the endpoint speaks `wss://`;
/// otherwise it serves plain `ws://`.
pub async fn serve(config: Config) -> Result<()> {
    let core = UpstreamCore::new(&config)?;
    let listen = config.server.listen;
    let app = router(core).into_make_service_with_connect_info::<SocketAddr>();

    match config.server.tls_paths() {
        Some((cert, key)) => {
            log::info!("tunnel upstream listening on {} (TLS)", listen);
            init_crypto_provider();
            let tls = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::Config(format!("failed to load TLS material: {}", e)))?;
            axum_server::bind_rustls(listen, tls).serve(app).await?;
        }
        None => {
            log::info!("tunnel upstream listening on {} (no TLS)", listen);
            let listener = tokio::net::TcpListener::bind(listen).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

async fn tunnel_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(core): State<Arc<UpstreamCore>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, core, peer))
}

async fn health_handler() -> &'static str {
    "OK"
}

fn init_crypto_provider() {
    static INIT: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::from_toml(
            r#"
[server]
listen = "127.0.0.1:0"
password = "pw"
salt = "00112233445566778899aabbccddeeff"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_core_construction() {
        assert!(UpstreamCore::new(&test_config()).is_ok());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let core = UpstreamCore::new(&test_config()).unwrap();
        let app = router(core).into_make_service_with_connect_info::<SocketAddr>();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            format!("GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", addr)
                .as_bytes(),
        )
        .await
        .unwrap();

        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut response)
            .await
            .unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("OK"));
    }
}
