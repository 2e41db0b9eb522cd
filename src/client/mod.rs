//! Client session: the REQ originator. Owns the transport and runs the
//! reliable request/response/ACK session: one call in flight at a time,
//! timed retransmission, response deduplication via the proxy's cache.

mod resp_cache;
pub mod socket;

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::framer::FrameDecoder;
use crate::packet::{self, PacketType};
use crate::value::{self, Value};

use resp_cache::RespCache;

const MAX_ACKED: usize = 100;
const POLL_CHUNK: usize = 2048;

/// Margin added on top of an inner socket timeout so the outer
/// `call()` deadline always outlives it - the client's own timeout must
/// exceed any inner socket timeout it wraps, or the outer call would
/// give up before the inner operation had a chance to fail cleanly.
pub const DEFAULT_OUTER_MARGIN_MS: u64 = 2000;

pub fn outer_timeout(inner_ms: u64) -> u64 {
    inner_ms + DEFAULT_OUTER_MARGIN_MS
}

/// The REQ-originating half of the bridge. Generic over any transport
/// implementing `AsyncRead + AsyncWrite` - a real serial port in
/// production, an in-memory duplex pipe in tests.
pub struct BridgeClient<T> {
    port: T,
    seq: u16,
    acked: HashSet<u16>,
    resp: RespCache,
    decoder: FrameDecoder,
    read_buf: Box<[u8; POLL_CHUNK]>,
}

impl<T> BridgeClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(port: T) -> Self {
        Self {
            port,
            seq: 1,
            acked: HashSet::new(),
            resp: RespCache::new(),
            decoder: FrameDecoder::default(),
            read_buf: Box::new([0u8; POLL_CHUNK]),
        }
    }

    fn next_seq(&mut self) -> u16 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        s
    }

    /// Issue one request and block (asynchronously) until a response
    /// arrives, is rejected by the remote, or `timeout_ms` elapses.
    ///
    /// Only one call may be outstanding at a time; the bridge does not
    /// multiplex concurrent in-flight requests.
    pub async fn call(
        &mut self,
        op: &str,
        args: Value,
        timeout_ms: u64,
        resend_ms: u64,
    ) -> BridgeResult<Value> {
        if op.is_empty() {
            return Err(BridgeError::InvalidOp(op.to_string()));
        }

        let seq = self.next_seq();
        let req_obj = value::map(vec![("op", Value::Text(op.to_string())), ("args", args)]);
        let payload = value::encode(&req_obj)?;
        let req_frame = packet::pack(PacketType::Req, seq, &payload);

        self.acked.remove(&seq);
        self.resp.remove(seq);

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut next_send: Option<Instant> = None;

        loop {
            if Instant::now() >= deadline {
                return Err(BridgeError::Timeout { op: op.to_string() });
            }

            let now = Instant::now();
            if next_send.map_or(true, |t| now >= t) {
                self.port.write_all(&req_frame).await?;
                next_send = Some(now + Duration::from_millis(resend_ms));
                trace!(op, seq, "sent REQ");
            }

            self.pump().await?;

            if let Some(resp) = self.resp.remove(seq) {
                return Self::resolve(op, resp);
            }
        }
    }

    fn resolve(op: &str, resp: Value) -> BridgeResult<Value> {
        let ok = value::get(&resp, "ok").and_then(|v| v.as_bool()).unwrap_or(false);
        if !ok {
            let error = value::get_str(&resp, "error").unwrap_or("remote_error").to_string();
            let detail = value::get_str(&resp, "detail").unwrap_or("").to_string();
            warn!(op, error, "call rejected by remote");
            return Err(BridgeError::Remote { error, detail });
        }
        Ok(value::get(&resp, "result").cloned().unwrap_or(Value::Null))
    }

    /// Drain whatever bytes are currently available on the port (waiting
    /// at most 1ms, which also yields briefly between retransmission
    /// checks), feed them through the framer, and handle every
    /// completed frame.
    async fn pump(&mut self) -> BridgeResult<()> {
        match tokio::time::timeout(Duration::from_millis(1), self.port.read(&mut *self.read_buf))
            .await
        {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(n)) => {
                let frames = self.decoder.feed(&self.read_buf[..n]);
                for frame in frames {
                    self.handle_frame(frame).await?;
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Ok(()),
        }
    }

    async fn handle_frame(&mut self, frame: Vec<u8>) -> BridgeResult<()> {
        let Some((ty, seq, payload)) = packet::unpack(&frame) else {
            return Ok(());
        };

        match ty {
            PacketType::Ack => {
                self.acked.insert(seq);
                if self.acked.len() > MAX_ACKED {
                    self.acked.clear();
                }
            }
            PacketType::Resp => {
                let ack_frame = packet::pack(PacketType::Ack, seq, &[]);
                self.port.write_all(&ack_frame).await?;

                let obj = if payload.is_empty() {
                    value::map(vec![("ok", Value::Bool(false))])
                } else {
                    match value::decode::<Value>(&payload) {
                        Ok(v) => v,
                        Err(e) => value::map(vec![
                            ("ok", Value::Bool(false)),
                            ("error", Value::Text("bad_payload".into())),
                            ("detail", Value::Text(e.to_string())),
                        ]),
                    }
                };
                self.resp.insert(seq, obj);
            }
            PacketType::Req => {
                // the client never originates nor answers REQs
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// A minimal echo proxy double: ACKs every REQ it sees and answers
    /// with a canned response, used to exercise `call()` end-to-end
    /// without a real `ProxySession`.
    async fn canned_proxy(mut port: impl AsyncRead + AsyncWrite + Unpin, times_before_respond: u32) {
        let mut decoder = FrameDecoder::default();
        let mut buf = [0u8; 1024];
        let mut seen = 0u32;
        loop {
            let n = match port.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for frame in decoder.feed(&buf[..n]) {
                let Some((PacketType::Req, seq, _payload)) = packet::unpack(&frame) else {
                    continue;
                };
                seen += 1;
                if seen <= times_before_respond {
                    continue; // simulate a dropped/corrupted REQ
                }
                let resp = value::map(vec![
                    ("ok", Value::Bool(true)),
                    (
                        "result",
                        value::map(vec![("pong", Value::Bool(true))]),
                    ),
                ]);
                let payload = value::encode(&resp).unwrap();
                let frame = packet::pack(PacketType::Resp, seq, &payload);
                let _ = port.write_all(&frame).await;
            }
        }
    }

    #[tokio::test]
    async fn call_returns_result_on_first_try() {
        let (client_port, proxy_port) = duplex(4096);
        tokio::spawn(canned_proxy(proxy_port, 0));
        let mut client = BridgeClient::new(client_port);
        let result = client
            .call("ping", value::map(vec![]), 2000, 50)
            .await
            .unwrap();
        assert_eq!(value::get(&result, "pong").and_then(|v| v.as_bool()), Some(true));
    }

    #[tokio::test]
    async fn call_retransmits_until_proxy_responds() {
        let (client_port, proxy_port) = duplex(4096);
        tokio::spawn(canned_proxy(proxy_port, 2));
        let mut client = BridgeClient::new(client_port);
        let result = client
            .call("ping", value::map(vec![]), 2000, 30)
            .await
            .unwrap();
        assert_eq!(value::get(&result, "pong").and_then(|v| v.as_bool()), Some(true));
    }

    #[tokio::test]
    async fn call_times_out_when_nobody_answers() {
        let (client_port, _proxy_port) = duplex(4096);
        let mut client = BridgeClient::new(client_port);
        let err = client
            .call("ping", value::map(vec![]), 50, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn call_surfaces_remote_error() {
        let (client_port, mut proxy_port) = duplex(4096);
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::default();
            let mut buf = [0u8; 1024];
            let n = proxy_port.read(&mut buf).await.unwrap();
            let frame = decoder.feed(&buf[..n]).pop().unwrap();
            let (_, seq, _) = packet::unpack(&frame).unwrap();
            let resp = value::map(vec![
                ("ok", Value::Bool(false)),
                ("error", Value::Text("invalid_sid".into())),
                ("detail", Value::Text("sid 9 not found".into())),
            ]);
            let payload = value::encode(&resp).unwrap();
            let frame = packet::pack(PacketType::Resp, seq, &payload);
            proxy_port.write_all(&frame).await.unwrap();
        });
        let mut client = BridgeClient::new(client_port);
        let err = client
            .call("sock_send", value::map(vec![]), 2000, 50)
            .await
            .unwrap_err();
        match err {
            BridgeError::Remote { error, .. } => assert_eq!(error, "invalid_sid"),
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[test]
    fn seq_allocation_skips_zero_and_wraps() {
        let (port, _b) = tokio::io::duplex(1);
        let mut client = BridgeClient::new(port);
        client.seq = 0xFFFF;
        assert_eq!(client.next_seq(), 0xFFFF);
        assert_eq!(client.next_seq(), 1);
    }
}
