//! Per-connection tunnel session
//!
//! Each accepted WebSocket gets a read loop and a transport-level
//! heartbeat writer. Query frames fan out to independent forwarder
//! tasks, so one slow resolution never stalls the connection; responses
//! come back in completion order and the client correlates them by
//! request id alone.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use burrow_protocol::{Frame, Kind};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hickory_proto::op::Message;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::UpstreamCore;

/// Transport-level ping cadence
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// All writes on one connection funnel through this mutex
type Writer = Arc<Mutex<SplitSink<WebSocket, WsMessage>>>;

/// Serve one tunnel connection until it closes or fails
pub(crate) async fn run(socket: WebSocket, core: Arc<UpstreamCore>, peer: SocketAddr) {
    log::info!("tunnel connection from {}", peer);

    let (sink, mut stream) = socket.split();
    let writer: Writer = Arc::new(Mutex::new(sink));

    let heartbeat = tokio::spawn(run_heartbeat(writer.clone()));

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                log::warn!("read error from {}: {}", peer, e);
                break;
            }
        };

        let sealed = match message {
            WsMessage::Binary(data) => data,
            WsMessage::Close(_) => break,
            // Text is ignored; ping/pong is answered by the transport
            _ => continue,
        };

        let plain = match core.envelope.open(&sealed) {
            Ok(plain) => plain,
            Err(e) => {
                log::warn!("dropping frame from {}: {}", peer, e);
                continue;
            }
        };

        let frame = match Frame::decode(&plain) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping frame from {}: {}", peer, e);
                continue;
            }
        };

        match frame.kind {
            Kind::DNS_QUERY => {
                let core = core.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    handle_dns_query(core, writer, frame, peer).await;
                });
            }
            Kind::HEARTBEAT => {
                if let Err(e) = send_frame(&core, &writer, &Frame::heartbeat_ack()).await {
                    log::warn!("heartbeat ack to {} failed: {}", peer, e);
                }
            }
            kind => log::debug!("ignoring frame of kind {} from {}", kind, peer),
        }
    }

    heartbeat.abort();
    log::info!("tunnel connection closed: {}", peer);
}

/// Send transport pings until a write fails
async fn run_heartbeat(writer: Writer) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // the first tick fires immediately

    loop {
        ticker.tick().await;

        let mut sink = writer.lock().await;
        if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
            return;
        }
    }
}

/// Resolve one tunnelled query and answer on the same connection
async fn handle_dns_query(
    core: Arc<UpstreamCore>,
    writer: Writer,
    frame: Frame,
    peer: SocketAddr,
) {
    let query = match Message::from_vec(&frame.payload) {
        Ok(message) => message,
        Err(e) => {
            // Malformed query: no tunnel reply
            log::warn!("unparseable DNS query from {}: {}", peer, e);
            return;
        }
    };

    let name = query
        .queries()
        .first()
        .map(|q| q.name().to_string())
        .unwrap_or_default();
    log::debug!("query {} from {} (request {})", name, peer, frame.request_id);

    let response = match core.forwarder.resolve(&query, &frame.payload).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("no response for {}: {}", name, e);
            return;
        }
    };

    if let Err(e) = send_frame(
        &core,
        &writer,
        &Frame::dns_response(frame.request_id, response),
    )
    .await
    {
        log::warn!("response send to {} failed: {}", peer, e);
    }
}

/// Encode, seal, and write a frame through the connection writer
async fn send_frame(core: &UpstreamCore, writer: &Writer, frame: &Frame) -> Result<()> {
    let sealed = core.envelope.seal(&frame.encode())?;

    let mut sink = writer.lock().await;
    sink.send(WsMessage::Binary(sealed))
        .await
        .map_err(|e| Error::Tunnel(format!("write failed: {}", e)))
}
