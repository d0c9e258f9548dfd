//! Upstream DNS forwarder
//!
//! Resolves a tunnelled query by trying the configured resolvers in
//! order: the first usable response wins and later resolvers are not
//! consulted. Resolvers are never reordered or health-checked between
//! queries. When every resolver fails, the caller gets a SERVFAIL built
//! over the original query, so the client always receives an answer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Maximum DNS message size accepted from a resolver
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Sequential-failover resolver client
pub struct Forwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder over the given resolvers
    pub fn new(upstreams: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { upstreams, timeout }
    }

    /// Resolve a query, returning packed DNS response bytes
    ///
    /// `packed_query` must be the wire encoding of `query`; it is sent
    /// to the resolvers verbatim so the response keeps the original
    /// transaction id.
    pub async fn resolve(&self, query: &Message, packed_query: &[u8]) -> Result<Vec<u8>> {
        for upstream in &self.upstreams {
            match self.exchange(*upstream, packed_query, query.id()).await {
                Ok(response) => return Ok(response),
                Err(e) => log::warn!("upstream {} failed: {}", upstream, e),
            }
        }

        log::warn!(
            "all {} upstreams failed, answering SERVFAIL",
            self.upstreams.len()
        );
        servfail_reply(query)
            .to_vec()
            .map_err(|e| Error::Dns(format!("failed to pack SERVFAIL: {}", e)))
    }

    /// One UDP exchange against a single resolver
    async fn exchange(
        &self,
        upstream: SocketAddr,
        packed_query: &[u8],
        query_id: u16,
    ) -> Result<Vec<u8>> {
        let bind_addr = if upstream.is_ipv6() {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Dns(format!("failed to bind UDP socket: {}", e)))?;

        socket
            .send_to(packed_query, upstream)
            .await
            .map_err(|e| Error::Dns(format!("send failed: {}", e)))?;

        let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
        let (len, _) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| Error::Dns("exchange timed out".into()))?
            .map_err(|e| Error::Dns(format!("recv failed: {}", e)))?;
        buf.truncate(len);

        // A usable response parses and echoes the query id
        let response = Message::from_vec(&buf)
            .map_err(|e| Error::Dns(format!("unparseable response: {}", e)))?;
        if response.id() != query_id {
            return Err(Error::Dns(format!(
                "response id {} does not match query id {}",
                response.id(),
                query_id
            )));
        }

        Ok(buf)
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::str::FromStr;
    use std::sync::Arc;

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

    /// Bind a resolver that answers every query with one A record
    async fn spawn_fake_resolver(answer: Ipv4Addr) -> SocketAddr {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while let Ok((len, src)) = socket.recv_from(&mut buf).await {
                let query = Message::from_vec(&buf[..len]).unwrap();
                let name = query.queries()[0].name().clone();

                let mut response = Message::new();
                response.set_id(query.id());
                response.set_message_type(MessageType::Response);
                response.set_recursion_desired(true);
                response.set_recursion_available(true);
                response.add_query(query.queries()[0].clone());
                response.add_answer(Record::from_rdata(name, 300, RData::A(A(answer))));

                let bytes = response.to_vec().unwrap();
                let _ = socket.send_to(&bytes, src).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_resolve_happy_path() {
        let resolver = spawn_fake_resolver(Ipv4Addr::new(93, 184, 216, 34)).await;
        let forwarder = Forwarder::new(vec![resolver], Duration::from_secs(2));

        let query = make_query("example.com.", 42);
        let packed = query.to_vec().unwrap();

        let response_bytes = forwarder.resolve(&query, &packed).await.unwrap();
        let response = Message::from_vec(&response_bytes).unwrap();

        assert_eq!(response.id(), 42);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn test_failover_to_second_upstream() {
        // Nothing listens on the first upstream; recv times out there
        let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let alive = spawn_fake_resolver(Ipv4Addr::new(10, 0, 0, 1)).await;

        let forwarder = Forwarder::new(vec![dead, alive], Duration::from_millis(200));

        let query = make_query("example.com.", 7);
        let packed = query.to_vec().unwrap();

        let response_bytes = forwarder.resolve(&query, &packed).await.unwrap();
        let response = Message::from_vec(&response_bytes).unwrap();

        assert_eq!(response.id(), 7);
        assert_eq!(response.response_code(), ResponseCode::NoError);
    }

    #[tokio::test]
    async fn test_all_upstreams_failed_gives_servfail() {
        let dead_a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let dead_b: SocketAddr = "127.0.0.1:2".parse().unwrap();

        let forwarder = Forwarder::new(vec![dead_a, dead_b], Duration::from_millis(100));

        let query = make_query("example.com.", 9);
        let packed = query.to_vec().unwrap();

        let response_bytes = forwarder.resolve(&query, &packed).await.unwrap();
        let response = Message::from_vec(&response_bytes).unwrap();

        assert_eq!(response.id(), 9);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert!(response.answers().is_empty());
        assert_eq!(response.queries().len(), 1);
    }

    #[test]
    fn test_servfail_reply_echoes_query() {
        let query = make_query("example.com.", 1234);
        let reply = servfail_reply(&query);

        assert_eq!(reply.id(), 1234);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(reply.queries(), query.queries());
    }
}
