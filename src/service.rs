use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable, BinEncoder};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::cache::AnswerCache;
use crate::pending::PendingTable;

/// Classic DNS/UDP payload limit. Larger datagrams arrive truncated and
/// fail decode, which drops them.
const MAX_DATAGRAM: usize = 512;

/// 代理核心：监听循环 + 查询路由 + 转发/应答。
/// Cheap to clone; one clone travels into each per-packet task.
#[derive(Clone)]
pub struct DnsService {
    socket: Arc<UdpSocket>,
    upstream: SocketAddr,
    cache: AnswerCache,
    pending: Arc<PendingTable>,
}

impl DnsService {
    pub fn new(
        socket: Arc<UdpSocket>,
        upstream: SocketAddr,
        cache: AnswerCache,
        pending: Arc<PendingTable>,
    ) -> Self {
        Self {
            socket,
            upstream,
            cache,
            pending,
        }
    }

    /// Receive loop. One task per datagram; read errors keep the loop
    /// running, only process shutdown ends it.
    pub async fn run(self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    let packet = Bytes::copy_from_slice(&buf[..len]);
                    let service = self.clone();
                    tokio::spawn(async move {
                        service.handle_packet(packet, peer).await;
                    });
                }
                Err(err) => {
                    warn!(error = %err, "read from udp failed");
                }
            }
        }
    }

    /// Route one decoded packet. A query and its eventual upstream answer
    /// arrive as two unrelated datagrams; the response flag decides which
    /// side of the correlation this one is.
    async fn handle_packet(&self, packet: Bytes, peer: SocketAddr) {
        let message = match Message::from_bytes(&packet) {
            Ok(message) => message,
            Err(err) => {
                debug!(client = %peer, error = %err, "dropping undecodable datagram");
                return;
            }
        };
        // Zero questions: malformed or non-query noise, silently discarded.
        let Some(question) = message.queries().first() else {
            debug!(client = %peer, id = message.id(), "dropping message without question");
            return;
        };
        let qname = question.name().to_string();

        if message.message_type() == MessageType::Response {
            self.handle_answer(message, qname).await;
        } else {
            self.handle_query(message, qname, peer).await;
        }
    }

    /// Upstream answer: cache it, then reunite it with the pending client
    /// whose transaction ID it carries. An unmatched answer stays cached
    /// with no immediate recipient.
    async fn handle_answer(&self, message: Message, qname: String) {
        self.cache.insert(qname.clone(), message.clone());

        match self.pending.take(&qname, message.id()) {
            Some(client) => {
                info!(
                    event = "dns_response",
                    qname = %qname,
                    id = message.id(),
                    client = %client,
                    cache = false,
                    "relaying upstream answer"
                );
                // ID already matches the client's query, it round-tripped.
                self.respond(&message, client).await;
            }
            None => {
                debug!(qname = %qname, id = message.id(), "answer cached, no pending query matched");
            }
        }
    }

    /// Client query: serve a live cache entry with the transaction ID
    /// rewritten, otherwise enqueue the client and forward upstream. A hit
    /// does not forward; the cached answer fully satisfies the query.
    async fn handle_query(&self, message: Message, qname: String, peer: SocketAddr) {
        if let Some(mut cached) = self.cache.get(&qname) {
            cached.set_id(message.id());
            info!(
                event = "dns_response",
                qname = %qname,
                id = message.id(),
                client = %peer,
                cache = true,
                "cache hit"
            );
            self.respond(&cached, peer).await;
            return;
        }

        debug!(qname = %qname, id = message.id(), client = %peer, "cache miss, forwarding upstream");
        self.pending.enqueue(&qname, message.id(), peer);
        self.forward(&message).await;
    }

    /// Send the query, unmodified, to the fixed upstream resolver.
    async fn forward(&self, message: &Message) {
        let packed = match encode(message) {
            Ok(packed) => packed,
            Err(err) => {
                warn!(id = message.id(), error = %err, "encode for upstream failed");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&packed, self.upstream).await {
            warn!(upstream = %self.upstream, error = %err, "forward to upstream failed");
        }
    }

    /// Send an answer back to one client. No retry on failure; the client's
    /// own resolver handles the silence.
    async fn respond(&self, message: &Message, client: SocketAddr) {
        let packed = match encode(message) {
            Ok(packed) => packed,
            Err(err) => {
                warn!(id = message.id(), error = %err, "encode for client failed");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&packed, client).await {
            warn!(client = %client, error = %err, "response to client failed");
        }
    }
}

fn encode(message: &Message) -> Result<Vec<u8>, ProtoError> {
    let mut out = Vec::with_capacity(MAX_DATAGRAM);
    {
        let mut encoder = BinEncoder::new(&mut out);
        message.emit(&mut encoder)?;
    }
    Ok(out)
}
