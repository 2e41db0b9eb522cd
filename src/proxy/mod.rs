//! Proxy session: the RESP-originating half of the bridge. Mirrors
//! `client::BridgeClient`'s shape from the other end of the wire - it
//! answers REQs instead of sending them, and never initiates a send on
//! its own.

pub mod cache;
pub mod collaborators;
pub mod dispatch;
pub mod net;
pub mod socket_table;

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::framer::FrameDecoder;
use crate::packet::{self, PacketType};
use crate::value::{self, Value};

use cache::ResponseCache;
use dispatch::Collaborators;
use socket_table::SocketTable;

const POLL_CHUNK: usize = 2048;

/// The REQ-answering half of the bridge, generic over any transport
/// implementing `AsyncRead + AsyncWrite`.
pub struct ProxySession<T> {
    port: T,
    decoder: FrameDecoder,
    cache: ResponseCache,
    table: SocketTable,
    collab: Collaborators,
    read_buf: Box<[u8; POLL_CHUNK]>,
}

impl<T> ProxySession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(port: T, collab: Collaborators) -> Self {
        Self {
            port,
            decoder: FrameDecoder::default(),
            cache: ResponseCache::new(),
            table: SocketTable::new(),
            collab,
            read_buf: Box::new([0u8; POLL_CHUNK]),
        }
    }

    /// Run forever, answering REQs until the transport closes or errors.
    pub async fn run(&mut self) -> io::Result<()> {
        while self.pump().await? {}
        Ok(())
    }

    /// Block for one read and process every frame it yields. Returns
    /// `false` once the transport reports EOF.
    async fn pump(&mut self) -> io::Result<bool> {
        let n = self.port.read(&mut *self.read_buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let frames = self.decoder.feed(&self.read_buf[..n]);
        for frame in frames {
            self.handle_frame(frame).await?;
        }
        Ok(true)
    }

    async fn handle_frame(&mut self, frame: Vec<u8>) -> io::Result<()> {
        let Some((ty, seq, payload)) = packet::unpack(&frame) else {
            return Ok(());
        };

        match ty {
            PacketType::Ack => {
                trace!(seq, "ACK received, dropping cached response");
                self.cache.remove(seq);
            }
            PacketType::Req => {
                self.handle_req(seq, &payload).await?;
            }
            PacketType::Resp => {
                // the proxy never originates nor answers REQs aimed at it
            }
        }
        Ok(())
    }

    async fn handle_req(&mut self, seq: u16, payload: &[u8]) -> io::Result<()> {
        if let Some(cached) = self.cache.get(seq) {
            debug!(seq, "replaying cached response for retransmitted REQ");
            self.port.write_all(&cached.to_vec()).await?;
            return Ok(());
        }

        let response = match value::decode::<Value>(payload) {
            Ok(req) => self.dispatch_one(req).await,
            Err(e) => value::map(vec![
                ("ok", Value::Bool(false)),
                ("error", Value::Text("bad_payload".to_string())),
                ("detail", Value::Text(e.to_string())),
            ]),
        };

        let resp_payload = value::encode(&response).unwrap_or_default();
        let frame = packet::pack(PacketType::Resp, seq, &resp_payload);
        self.cache.insert(seq, frame.clone());
        self.port.write_all(&frame).await?;
        Ok(())
    }

    async fn dispatch_one(&mut self, req: Value) -> Value {
        match dispatch::parse(&req) {
            Ok(op) => match dispatch::dispatch(op, &mut self.table, &self.collab).await {
                Ok(result) => value::map(vec![("ok", Value::Bool(true)), ("result", result)]),
                Err(e) => {
                    warn!(tag = e.tag(), "dispatch failed");
                    e.into_response()
                }
            },
            Err(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BridgeClient;
    use collaborators::{AddrInfoEntry, Clock, NtpClient, Resolver, SystemClock, WifiState, WifiStatus};
    use net::PeerAddr;
    use std::sync::Arc;
    use tokio::io::duplex;

    struct NoWifi;
    impl WifiStatus for NoWifi {
        fn status(&self) -> WifiState {
            WifiState { connected: false, ifconfig: None }
        }
    }

    struct NoNtp;
    #[async_trait::async_trait]
    impl NtpClient for NoNtp {
        async fn sync(&self, _host: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct NoResolver;
    #[async_trait::async_trait]
    impl Resolver for NoResolver {
        async fn resolve(
            &self,
            host: &str,
            port: u16,
            _family: i64,
            _socktype: i64,
            _protocol: i64,
        ) -> Result<Vec<AddrInfoEntry>, String> {
            Ok(vec![AddrInfoEntry {
                family: 2,
                socktype: 1,
                protocol: 6,
                canonname: host.to_string(),
                addr: PeerAddr { host: "127.0.0.1".to_string(), port },
            }])
        }
    }

    fn test_collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(SystemClock::default()),
            Arc::new(NoWifi),
            Arc::new(NoNtp),
            Arc::new(NoResolver),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ping_round_trips_through_a_real_proxy_session() {
        let (client_port, proxy_port) = duplex(4096);
        let mut proxy = ProxySession::new(proxy_port, test_collaborators());
        tokio::spawn(async move {
            let _ = proxy.run().await;
        });

        let mut client = BridgeClient::new(client_port);
        let result = client.call("ping", value::map(vec![]), 2000, 50).await.unwrap();
        assert_eq!(value::get(&result, "pong").and_then(|v| v.as_bool()), Some(true));
    }

    #[tokio::test]
    async fn unknown_op_surfaces_as_a_remote_error() {
        let (client_port, proxy_port) = duplex(4096);
        let mut proxy = ProxySession::new(proxy_port, test_collaborators());
        tokio::spawn(async move {
            let _ = proxy.run().await;
        });

        let mut client = BridgeClient::new(client_port);
        let err = client
            .call("frobnicate", value::map(vec![]), 2000, 50)
            .await
            .unwrap_err();
        match err {
            crate::error::BridgeError::Remote { error, .. } => assert_eq!(error, "unknown_op"),
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_req_after_resp_is_sent_replays_the_cache_without_redispatch() {
        // drive the proxy one frame at a time so we can inject a retransmitted
        // REQ with the same seq before the client's ACK would normally arrive.
        let mut proxy = {
            let (_c, p) = duplex(4096);
            ProxySession::new(p, test_collaborators())
        };

        let req = value::map(vec![("op", Value::Text("ping".into())), ("args", value::map(vec![]))]);
        let payload = value::encode(&req).unwrap();
        let frame = packet::pack(PacketType::Req, 42, &payload);

        let first_frames = proxy.decoder.feed(&frame);
        assert_eq!(first_frames.len(), 1);
        proxy.handle_frame(first_frames.into_iter().next().unwrap()).await.unwrap();
        assert!(proxy.cache.contains(42));

        // a second, identical REQ (a retransmit) must hit the cache path,
        // not re-run dispatch - the ping handler has no observable side
        // effect here, but the cache contents should be stable across it.
        let cached_before = proxy.cache.get(42).unwrap().to_vec();
        let second_frames = proxy.decoder.feed(&frame);
        proxy.handle_frame(second_frames.into_iter().next().unwrap()).await.unwrap();
        assert_eq!(proxy.cache.get(42).unwrap(), cached_before.as_slice());
    }
}
