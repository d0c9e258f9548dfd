//! Local DNS resolver front-end
//!
//! Answers standard DNS queries over UDP by forwarding them through the
//! tunnel. A query that parses always gets an answer: either a valid
//! DNS response or SERVFAIL, regardless of what failed internally.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_protocol::Frame;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::ClientCore;

/// Maximum DNS message size for UDP
const MAX_DNS_MESSAGE_SIZE: usize = 4096;

/// How long a waiter blocks on the tunnel before giving up
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the UDP listener until shutdown
///
/// Each datagram is handled on its own task so a slow tunnel response
/// never blocks the listener.
pub(crate) async fn run(
    core: Arc<ClientCore>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listen = core.config.client.dns_listen;
    let socket = UdpSocket::bind(listen)
        .await
        .map_err(|e| Error::Dns(format!("failed to bind DNS listener to {}: {}", listen, e)))?;

    log::info!("DNS listener on {}", listen);

    let socket = Arc::new(socket);
    let mut buf = vec![0u8; MAX_DNS_MESSAGE_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("DNS listener shutting down");
                break;
            }

            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, src)) => {
                        let query = buf[..len].to_vec();
                        let core = core.clone();
                        let socket = socket.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_query(&core, &socket, &query, src).await {
                                log::debug!("DNS query from {} failed: {}", src, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("DNS listener recv error: {}", e);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Handle a single DNS query from `src`
async fn handle_query(
    core: &ClientCore,
    socket: &UdpSocket,
    raw: &[u8],
    src: SocketAddr,
) -> Result<()> {
    let query = match Message::from_vec(raw) {
        Ok(message) => message,
        Err(e) => {
            // Malformed query: drop without replying
            log::debug!("unparseable DNS query from {}: {}", src, e);
            return Ok(());
        }
    };
    let name = question_name(&query);

    if let Some(cache) = &core.cache {
        if let Some(cached) = cache.lookup(&name).await {
            if let Some(reply) = rewrite_id(&cached, query.id()) {
                log::debug!("cache hit for {}", name);
                socket.send_to(&reply, src).await?;
                return Ok(());
            }
        }
    }

    let link = match core.link.current().await {
        Some(link) => link,
        None => {
            // Never touches the pending table and never blocks
            log::debug!("tunnel down, SERVFAIL for {}", name);
            return reply_servfail(socket, src, &query).await;
        }
    };

    let request_id = core.next_request_id();
    let packed = query
        .to_vec()
        .map_err(|e| Error::Dns(format!("failed to pack query: {}", e)))?;

    let mut slot = core.pending.register(request_id).await;

    if let Err(e) = core
        .send_frame(&link, &Frame::dns_query(request_id, packed))
        .await
    {
        core.pending.remove(request_id).await;
        log::warn!("tunnel send failed for {}: {}", name, e);
        return reply_servfail(socket, src, &query).await;
    }

    log::debug!("forwarded {} (request {})", name, request_id);

    let outcome = tokio::time::timeout(REQUEST_TIMEOUT, slot.recv()).await;
    core.pending.remove(request_id).await;

    match outcome {
        Ok(Some(response_frame)) => {
            let mut response = match Message::from_vec(&response_frame.payload) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("unparseable tunnel response for {}: {}", name, e);
                    return Ok(());
                }
            };

            if response.response_code() == ResponseCode::NoError {
                if let Some(cache) = &core.cache {
                    cache
                        .insert(name.clone(), response_frame.payload.clone())
                        .await;
                }
            }

            log::debug!(
                "answered {} with {} records (request {})",
                name,
                response.answers().len(),
                request_id
            );

            response.set_id(query.id());
            let reply = response
                .to_vec()
                .map_err(|e| Error::Dns(format!("failed to pack response: {}", e)))?;
            socket.send_to(&reply, src).await?;
            Ok(())
        }
        _ => {
            log::debug!("timeout for {} (request {})", name, request_id);
            reply_servfail(socket, src, &query).await
        }
    }
}

/// First question name as it appears on the wire; empty if absent
fn question_name(query: &Message) -> String {
    query
        .queries()
        .first()
        .map(|q| q.name().to_string())
        .unwrap_or_default()
}

/// Re-encode cached response bytes under a new transaction id
fn rewrite_id(encoded: &[u8], id: u16) -> Option<Vec<u8>> {
    let mut message = Message::from_vec(encoded).ok()?;
    message.set_id(id);
    message.to_vec().ok()
}

/// Build a SERVFAIL response echoing the query's id and questions
fn servfail_reply(query: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_op_code(query.op_code());
    reply.set_message_type(MessageType::Response);
    reply.set_recursion_desired(query.recursion_desired());
    reply.set_response_code(ResponseCode::ServFail);
    for question in query.queries() {
        reply.add_query(question.clone());
    }
    reply
}

async fn reply_servfail(socket: &UdpSocket, src: SocketAddr, query: &Message) -> Result<()> {
    let reply = servfail_reply(query)
        .to_vec()
        .map_err(|e| Error::Dns(format!("failed to pack SERVFAIL: {}", e)))?;
    socket.send_to(&reply, src).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn make_query(name: &str, id: u16) -> Message {
        let mut message = Message::new();
        message.set_id(id);
        message.set_recursion_desired(true);
        message.add_query(Query::query(
            Name::from_str(name).unwrap(),
            RecordType::A,
        ));
        message
    }

    #[test]
    fn test_question_name_includes_trailing_dot() {
        let query = make_query("example.com.", 1);
        assert_eq!(question_name(&query), "example.com.");
    }

    #[test]
    fn test_question_name_empty_without_questions() {
        let query = Message::new();
        assert_eq!(question_name(&query), "");
    }

    #[test]
    fn test_servfail_reply_echoes_query() {
        let query = make_query("example.com.", 42);
        let reply = servfail_reply(&query);

        assert_eq!(reply.id(), 42);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert!(reply.recursion_desired());
        assert_eq!(reply.queries().len(), 1);
        assert!(reply.answers().is_empty());

        // And it survives the wire
        let bytes = reply.to_vec().unwrap();
        let parsed = Message::from_vec(&bytes).unwrap();
        assert_eq!(parsed.response_code(), ResponseCode::ServFail);
        assert_eq!(parsed.id(), 42);
    }

    #[test]
    fn test_rewrite_id() {
        let response = make_query("example.com.", 100);
        let bytes = response.to_vec().unwrap();

        let rewritten = rewrite_id(&bytes, 7).unwrap();
        let parsed = Message::from_vec(&rewritten).unwrap();
        assert_eq!(parsed.id(), 7);
        assert_eq!(parsed.queries().len(), 1);
    }

    #[test]
    fn test_rewrite_id_rejects_garbage() {
        assert!(rewrite_id(&[0xFF; 3], 7).is_none());
    }
}
