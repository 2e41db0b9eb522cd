//! Convenience socket-like handle layered over [`BridgeClient::call`],
//! mirroring the ergonomics of the original bridge's `ProxySocket`: a
//! small stateful wrapper that remembers a `sid` and talks `sock_*`
//! dispatch ops on the caller's behalf. Not part of the wire protocol -
//! purely a client-side convenience.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{outer_timeout, BridgeClient};
use crate::error::BridgeResult;
use crate::value::{self, Value};

const DEFAULT_CALL_TIMEOUT_MS: u64 = 8000;

/// A remote socket handle, borrowing the client for its lifetime since
/// only one call may be in flight on the bridge at a time.
pub struct RemoteSocket<'a, T> {
    client: &'a mut BridgeClient<T>,
    sid: i64,
    closed: bool,
}

impl<'a, T> RemoteSocket<'a, T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn open(client: &'a mut BridgeClient<T>, family: i64, ty: i64, proto: i64) -> BridgeResult<Self> {
        let args = value::map(vec![
            ("family", Value::Integer(family.into())),
            ("type", Value::Integer(ty.into())),
            ("proto", Value::Integer(proto.into())),
        ]);
        let result = client.call("sock_open", args, DEFAULT_CALL_TIMEOUT_MS, 200).await?;
        let sid = value::get(&result, "sid")
            .and_then(|v| v.as_integer())
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(0);
        Ok(Self { client, sid, closed: false })
    }

    pub fn sid(&self) -> i64 {
        self.sid
    }

    pub async fn connect(&mut self, host: &str, port: u16, ssl: bool, timeout_ms: u64) -> BridgeResult<()> {
        let args = value::map(vec![
            ("sid", Value::Integer(self.sid.into())),
            ("host", Value::Text(host.to_string())),
            ("port", Value::Integer((port as i64).into())),
            ("ssl", Value::Bool(ssl)),
            ("timeout_ms", Value::Integer((timeout_ms as i64).into())),
        ]);
        self.client.call("sock_connect", args, outer_timeout(timeout_ms), 200).await?;
        Ok(())
    }

    pub async fn send(&mut self, data: &[u8]) -> BridgeResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let args = value::map(vec![
            ("sid", Value::Integer(self.sid.into())),
            ("data", Value::Bytes(data.to_vec())),
        ]);
        let result = self.client.call("sock_send", args, DEFAULT_CALL_TIMEOUT_MS, 200).await?;
        Ok(value::get(&result, "n")
            .and_then(|v| v.as_integer())
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(0) as usize)
    }

    pub async fn recv(&mut self, n: usize, ssl: bool, timeout_ms: u64) -> BridgeResult<Vec<u8>> {
        let args = value::map(vec![
            ("sid", Value::Integer(self.sid.into())),
            ("n", Value::Integer((n as i64).into())),
            ("ssl", Value::Bool(ssl)),
            ("timeout_ms", Value::Integer((timeout_ms as i64).into())),
        ]);
        let result = self
            .client
            .call("sock_recv", args, outer_timeout(timeout_ms), 200)
            .await?;
        Ok(value::get(&result, "data")
            .and_then(|v| v.as_bytes())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let args = value::map(vec![("sid", Value::Integer(self.sid.into()))]);
        let _ = self.client.call("sock_close", args, 2000, 200).await;
    }
}
