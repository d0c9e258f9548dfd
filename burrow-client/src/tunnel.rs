//! Tunnel link and reconnect supervisor
//!
//! The link to the upstream peer is held in a single cell: either absent
//! (gate down) or present with a send handle. Query handlers snapshot the
//! cell and short-circuit to SERVFAIL when it is empty. A supervisor task
//! redials after any failure with a fixed delay.

use std::sync::{Arc, OnceLock};

use burrow_protocol::{Frame, Kind};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::ClientCore;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Send handle for the current tunnel connection
///
/// The transport is single-writer: every outgoing message serialises
/// through the sink mutex.
pub struct LinkSender {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
}

impl LinkSender {
    fn new(sink: SplitSink<WsStream, WsMessage>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Write one sealed message to the tunnel
    pub async fn send(&self, sealed: Vec<u8>) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Binary(sealed))
            .await
            .map_err(|e| Error::Tunnel(format!("write failed: {}", e)))
    }
}

/// The connection cell: absent, or present with a send handle
///
/// Presence flag and handle are one atomic cell so observers can never
/// see a half-open state.
#[derive(Default)]
pub struct TunnelLink {
    current: RwLock<Option<Arc<LinkSender>>>,
}

impl TunnelLink {
    /// Create an empty (down) link cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current link; `None` means the gate is down
    pub async fn current(&self) -> Option<Arc<LinkSender>> {
        self.current.read().await.clone()
    }

    /// Whether the tunnel is currently usable
    pub async fn is_up(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn install(&self, sender: Arc<LinkSender>) {
        *self.current.write().await = Some(sender);
    }

    async fn clear(&self) {
        *self.current.write().await = None;
    }
}

/// Endless reconnect supervisor
///
/// Dials, serves the connection until it fails, drops the gate, sleeps
/// the configured delay, and tries again until shutdown.
pub(crate) async fn run_supervisor(
    core: Arc<ClientCore>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let delay = core.config.client.reconnect_delay();

    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => break,
            result = connect_and_serve(&core) => result,
        };

        core.link.clear().await;

        match result {
            Ok(()) => log::info!("tunnel closed, redialing in {:?}", delay),
            Err(e) => log::warn!("tunnel link lost: {}, redialing in {:?}", e, delay),
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    core.link.clear().await;
    log::info!("tunnel supervisor stopped");
}

/// Dial the upstream, install the link, and run the read loop until the
/// connection ends
async fn connect_and_serve(core: &ClientCore) -> Result<()> {
    let url = core.config.client.server_url.as_str();
    log::info!("dialing {}", url);

    let connector = tls_connector(core.config.client.insecure_skip_tls);
    let (stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(connector))
            .await
            .map_err(|e| Error::Tunnel(format!("dial {} failed: {}", url, e)))?;

    let (sink, stream) = stream.split();
    core.link.install(Arc::new(LinkSender::new(sink))).await;
    log::info!("tunnel established to {}", url);

    read_loop(core, stream).await
}

/// Decrypt, decode, and dispatch inbound frames until the stream ends
///
/// A frame that fails to open or decode is dropped and the loop keeps
/// going: the transport delimits messages, so one bad frame cannot
/// desynchronise the stream.
async fn read_loop(core: &ClientCore, mut stream: SplitStream<WsStream>) -> Result<()> {
    while let Some(message) = stream.next().await {
        let message =
            message.map_err(|e| Error::Tunnel(format!("read failed: {}", e)))?;

        let sealed = match message {
            WsMessage::Binary(data) => data,
            WsMessage::Close(_) => return Ok(()),
            // Text is ignored; ping/pong is answered by the transport
            _ => continue,
        };

        let plain = match core.envelope.open(&sealed) {
            Ok(plain) => plain,
            Err(e) => {
                log::warn!("dropping tunnel frame: {}", e);
                continue;
            }
        };

        let frame = match Frame::decode(&plain) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping tunnel frame: {}", e);
                continue;
            }
        };

        dispatch(core, frame).await;
    }

    Ok(())
}

async fn dispatch(core: &ClientCore, frame: Frame) {
    match frame.kind {
        Kind::DNS_RESPONSE => {
            let request_id = frame.request_id;
            if !core.pending.complete(request_id, frame).await {
                log::debug!("response for unknown request {}", request_id);
            }
        }
        Kind::HEARTBEAT_ACK => {}
        kind => log::debug!("ignoring frame of kind {}", kind),
    }
}

fn tls_connector(insecure_skip_tls: bool) -> Connector {
    init_crypto_provider();

    let config = if insecure_skip_tls {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        );
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    Connector::Rustls(Arc::new(config))
}

fn init_crypto_provider() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Certificate verifier that accepts anything (`insecure_skip_tls`)
#[derive(Debug)]
struct NoVerification {
    provider: CryptoProvider,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
