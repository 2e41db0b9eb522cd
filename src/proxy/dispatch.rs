//! RPC dispatch table. The wire `op` string is decoded once into a
//! closed tagged sum ([`Op`]) and handled by a single `match`, per the
//! design notes - no dynamic op registration, no string comparisons
//! scattered through the handler bodies.

use std::sync::Arc;

use thiserror::Error;

use crate::proxy::collaborators::{Clock, NtpClient, Resolver, WifiStatus};
use crate::proxy::net::{default_tls_connector, NetSocket, PeerAddr, TcpNetSocket, UdpNetSocket};
use crate::proxy::socket_table::SocketTable;
use crate::value::{self, Value};

/// Everything a handler needs that isn't the socket table itself -
/// Wi-Fi, clock, NTP, and DNS collaborators, passed by reference instead
/// of sitting behind process-wide globals.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub wifi: Arc<dyn WifiStatus>,
    pub ntp: Arc<dyn NtpClient>,
    pub resolver: Arc<dyn Resolver>,
    pub tls_connector: Arc<tokio_rustls::TlsConnector>,
}

impl Collaborators {
    pub fn new(
        clock: Arc<dyn Clock>,
        wifi: Arc<dyn WifiStatus>,
        ntp: Arc<dyn NtpClient>,
        resolver: Arc<dyn Resolver>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            clock,
            wifi,
            ntp,
            resolver,
            tls_connector: default_tls_connector()?,
        })
    }
}

#[derive(Debug)]
pub enum Op {
    Ping,
    GetTime,
    SetTime { host: Option<String> },
    WifiStatus,
    Dns { host: String, port: i64, family: i64, socktype: i64, protocol: i64 },
    SockOpen { family: i64, socktype: i64, protocol: i64 },
    SockSettimeout { sid: i64 },
    SockConnect { sid: i64, host: String, port: i64, ssl: bool, timeout_ms: i64 },
    SockSend { sid: i64, data: Vec<u8> },
    SockRecv { sid: i64, n: i64, ssl: bool, timeout_ms: i64 },
    SockClose { sid: i64 },
    SockBind { sid: i64, host: String, port: i64 },
    SockListen { sid: i64, backlog: i64 },
    SockAccept { sid: i64, timeout_ms: i64 },
    SockSendto { sid: i64, data: Vec<u8>, host: String, port: i64 },
    SockRecvfrom { sid: i64, n: i64, timeout_ms: i64 },
    SockWrapSsl { sid: i64, server_hostname: Option<String> },
    SockReset,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown_op")]
    UnknownOp(String),
    #[error("missing required parameter: sid")]
    MissingSid,
    #[error("missing required parameter: host")]
    MissingHost,
    #[error("missing required parameter: data")]
    MissingData,
    #[error("socket {0} not found")]
    InvalidSid(i64),
    #[error("dns lookup failed: {0}")]
    DnsError(String),
    #[error("ntp host {0} unreachable")]
    NtpUnreachable(String),
    #[error("sock_open failed: {0}")]
    SockOpenError(String),
    #[error("sock_settimeout failed: {0}")]
    SockSettimeoutError(String),
    #[error("sock_connect failed: {0}")]
    SockConnectError(String),
    #[error("sock_send failed: {0}")]
    SockSendError(String),
    #[error("sock_recv failed: {0}")]
    SockRecvError(String),
    #[error("sock_close failed: {0}")]
    SockCloseError(String),
    #[error("sock_bind failed: {0}")]
    SockBindError(String),
    #[error("sock_listen failed: {0}")]
    SockListenError(String),
    #[error("sock_accept failed: {0}")]
    SockAcceptError(String),
    #[error("sock_sendto failed: {0}")]
    SockSendtoError(String),
    #[error("sock_recvfrom failed: {0}")]
    SockRecvfromError(String),
    #[error("sock_wrap_ssl failed: {0}")]
    SockWrapSslError(String),
    #[error("{0}")]
    Exception(String),
}

impl DispatchError {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::UnknownOp(_) => "unknown_op",
            Self::MissingSid => "missing_sid",
            Self::MissingHost => "missing_host",
            Self::MissingData => "missing_data",
            Self::InvalidSid(_) => "invalid_sid",
            Self::DnsError(_) => "dns_error",
            Self::NtpUnreachable(_) => "ntp_unreachable",
            Self::SockOpenError(_) => "sock_open_error",
            Self::SockSettimeoutError(_) => "sock_settimeout_error",
            Self::SockConnectError(_) => "sock_connect_error",
            Self::SockSendError(_) => "sock_send_error",
            Self::SockRecvError(_) => "sock_recv_error",
            Self::SockCloseError(_) => "sock_close_error",
            Self::SockBindError(_) => "sock_bind_error",
            Self::SockListenError(_) => "sock_listen_error",
            Self::SockAcceptError(_) => "sock_accept_error",
            Self::SockSendtoError(_) => "sock_sendto_error",
            Self::SockRecvfromError(_) => "sock_recvfrom_error",
            Self::SockWrapSslError(_) => "sock_wrap_ssl_error",
            Self::Exception(_) => "exception",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::UnknownOp(op) => op.clone(),
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Value {
        value::map(vec![
            ("ok", Value::Bool(false)),
            ("error", Value::Text(self.tag().to_string())),
            ("detail", Value::Text(self.detail())),
        ])
    }
}

fn require_sid(args: &Value) -> Result<i64, DispatchError> {
    value::get(args, "sid")
        .and_then(|v| v.as_integer())
        .and_then(|i| i64::try_from(i).ok())
        .ok_or(DispatchError::MissingSid)
}

fn require_host(args: &Value) -> Result<String, DispatchError> {
    value::get_str(args, "host")
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or(DispatchError::MissingHost)
}

fn require_data(args: &Value) -> Result<Vec<u8>, DispatchError> {
    value::get(args, "data")
        .and_then(|v| v.as_bytes())
        .cloned()
        .ok_or(DispatchError::MissingData)
}

fn optional_string(args: &Value, key: &str) -> Option<String> {
    value::get_str(args, key).map(str::to_string)
}

/// Parse the wire `{op, args}` request object into a closed [`Op`].
/// Unknown operation names and missing required parameters are
/// reported here, before any handler runs.
pub fn parse(req: &Value) -> Result<Op, DispatchError> {
    let op = value::get_str(req, "op").unwrap_or("").to_string();
    let empty_args = Value::Map(vec![]);
    let args = value::get(req, "args").unwrap_or(&empty_args).clone();

    match op.as_str() {
        "ping" => Ok(Op::Ping),
        "get_time" => Ok(Op::GetTime),
        "set_time" => Ok(Op::SetTime { host: optional_string(&args, "host") }),
        "wifi_status" => Ok(Op::WifiStatus),
        "dns" => Ok(Op::Dns {
            host: require_host(&args)?,
            port: value::get_i64_or(&args, "port", 80),
            family: value::get_i64_or(&args, "family", 0),
            socktype: value::get_i64_or(&args, "type", 0),
            protocol: value::get_i64_or(&args, "proto", 0),
        }),
        "sock_open" => Ok(Op::SockOpen {
            family: value::get_i64_or(&args, "family", 2),
            socktype: value::get_i64_or(&args, "type", 1),
            protocol: value::get_i64_or(&args, "proto", 0),
        }),
        "sock_settimeout" => Ok(Op::SockSettimeout { sid: require_sid(&args)? }),
        "sock_connect" => Ok(Op::SockConnect {
            sid: require_sid(&args)?,
            host: require_host(&args)?,
            port: value::get_i64_or(&args, "port", 80),
            ssl: value::get(&args, "ssl").and_then(|v| v.as_bool()).unwrap_or(false),
            timeout_ms: value::get_i64_or(&args, "timeout_ms", 5000),
        }),
        "sock_send" => Ok(Op::SockSend { sid: require_sid(&args)?, data: require_data(&args)? }),
        "sock_recv" => Ok(Op::SockRecv {
            sid: require_sid(&args)?,
            n: value::get_i64_or(&args, "n", 512),
            ssl: value::get(&args, "ssl").and_then(|v| v.as_bool()).unwrap_or(false),
            timeout_ms: value::get_i64_or(&args, "timeout_ms", 5000),
        }),
        "sock_close" => Ok(Op::SockClose { sid: require_sid(&args)? }),
        "sock_bind" => Ok(Op::SockBind {
            sid: require_sid(&args)?,
            host: optional_string(&args, "host").unwrap_or_default(),
            port: value::get_i64_or(&args, "port", 0),
        }),
        "sock_listen" => Ok(Op::SockListen {
            sid: require_sid(&args)?,
            backlog: value::get_i64_or(&args, "backlog", 5),
        }),
        "sock_accept" => Ok(Op::SockAccept {
            sid: require_sid(&args)?,
            timeout_ms: value::get_i64_or(&args, "timeout_ms", 5000),
        }),
        "sock_sendto" => Ok(Op::SockSendto {
            sid: require_sid(&args)?,
            data: require_data(&args)?,
            host: require_host(&args)?,
            port: value::get_i64_or(&args, "port", 0),
        }),
        "sock_recvfrom" => Ok(Op::SockRecvfrom {
            sid: require_sid(&args)?,
            n: value::get_i64_or(&args, "n", 512),
            timeout_ms: value::get_i64_or(&args, "timeout_ms", 5000),
        }),
        "sock_wrap_ssl" => Ok(Op::SockWrapSsl {
            sid: require_sid(&args)?,
            server_hostname: optional_string(&args, "server_hostname"),
        }),
        "sock_reset" => Ok(Op::SockReset),
        other => Err(DispatchError::UnknownOp(other.to_string())),
    }
}

fn addr_to_value(addr: &PeerAddr) -> Value {
    Value::Array(vec![Value::Text(addr.host.clone()), Value::Integer((addr.port as i64).into())])
}

/// Run one operation to completion. Never surfaces a plain `Err` up to
/// the wire - the proxy session converts the returned `Result` into a
/// response object either way.
pub async fn dispatch(
    op: Op,
    table: &mut SocketTable,
    collab: &Collaborators,
) -> Result<Value, DispatchError> {
    match op {
        Op::Ping => Ok(value::map(vec![
            ("pong", Value::Bool(true)),
            ("t_ms", Value::Integer((collab.clock.monotonic_millis() as i64).into())),
            ("echo", Value::Text("I see you, you see me".to_string())),
        ])),

        Op::GetTime => Ok(value::map(vec![(
            "time",
            Value::Integer((collab.clock.unix_time_secs() as i64).into()),
        )])),

        Op::SetTime { host } => {
            let host = host.unwrap_or_else(|| "pool.ntp.org".to_string());
            collab
                .ntp
                .sync(&host)
                .await
                .map_err(|_| DispatchError::NtpUnreachable(host.clone()))?;
            Ok(value::map(vec![(
                "time",
                Value::Integer((collab.clock.unix_time_secs() as i64).into()),
            )]))
        }

        Op::WifiStatus => {
            let status = collab.wifi.status();
            let ifconfig = match status.ifconfig {
                Some([ip, subnet, gateway, dns]) => Value::Array(vec![
                    Value::Text(ip),
                    Value::Text(subnet),
                    Value::Text(gateway),
                    Value::Text(dns),
                ]),
                None => Value::Null,
            };
            Ok(value::map(vec![
                ("connected", Value::Bool(status.connected)),
                ("ifconfig", ifconfig),
            ]))
        }

        Op::Dns { host, port, family, socktype, protocol } => {
            let entries = collab
                .resolver
                .resolve(&host, port as u16, family, socktype, protocol)
                .await
                .map_err(DispatchError::DnsError)?;
            Ok(Value::Array(
                entries
                    .into_iter()
                    .map(|e| {
                        Value::Array(vec![
                            Value::Integer(e.family.into()),
                            Value::Integer(e.socktype.into()),
                            Value::Integer(e.protocol.into()),
                            Value::Text(e.canonname),
                            addr_to_value(&e.addr),
                        ])
                    })
                    .collect(),
            ))
        }

        Op::SockOpen { socktype, .. } => {
            let socket: Box<dyn NetSocket> = if socktype == 2 {
                Box::new(
                    UdpNetSocket::new()
                        .await
                        .map_err(|e| DispatchError::SockOpenError(e.to_string()))?,
                )
            } else {
                Box::new(TcpNetSocket::new(collab.tls_connector.clone()))
            };
            let sid = table
                .insert(socket)
                .ok_or_else(|| DispatchError::SockOpenError("socket table full".to_string()))?;
            Ok(value::map(vec![("sid", Value::Integer(sid.into()))]))
        }

        Op::SockSettimeout { sid } => {
            // Per-operation timeouts are threaded through each sock_*
            // call's own timeout_ms argument; this op only validates
            // that the sid is live, matching the wire contract.
            if !table.contains(sid) {
                return Err(DispatchError::InvalidSid(sid));
            }
            Ok(Value::Bool(true))
        }

        Op::SockConnect { sid, host, port, ssl, timeout_ms } => {
            let result = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.connect(&host, port as u16, timeout_ms as u64).await
            };
            if let Err(e) = result {
                table.close(sid);
                return Err(DispatchError::SockConnectError(e.to_string()));
            }
            if ssl {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                if let Err(e) = sock.wrap_ssl(Some(&host)).await {
                    table.close(sid);
                    return Err(DispatchError::SockConnectError(e.to_string()));
                }
            }
            Ok(Value::Bool(true))
        }

        Op::SockSend { sid, data } => {
            let result = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.send(&data).await
            };
            match result {
                Ok(n) => Ok(value::map(vec![("n", Value::Integer((n as i64).into()))])),
                Err(e) => {
                    table.close(sid);
                    Err(DispatchError::SockSendError(e.to_string()))
                }
            }
        }

        Op::SockRecv { sid, n, timeout_ms, .. } => {
            let result = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.recv(n.max(0) as usize, timeout_ms as u64).await
            };
            match result {
                Ok((data, eof)) => Ok(value::map(vec![
                    ("data", Value::Bytes(data.clone())),
                    ("n", Value::Integer((data.len() as i64).into())),
                    ("eof", Value::Bool(eof)),
                ])),
                Err(e) => {
                    table.close(sid);
                    Err(DispatchError::SockRecvError(e.to_string()))
                }
            }
        }

        Op::SockClose { sid } => {
            table.close(sid);
            Ok(Value::Bool(true))
        }

        Op::SockBind { sid, host, port } => {
            let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
            sock.bind(&host, port as u16)
                .await
                .map_err(|e| DispatchError::SockBindError(e.to_string()))?;
            Ok(Value::Bool(true))
        }

        Op::SockListen { sid, backlog } => {
            let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
            sock.listen(backlog.max(0) as u32)
                .await
                .map_err(|e| DispatchError::SockListenError(e.to_string()))?;
            Ok(Value::Bool(true))
        }

        Op::SockAccept { sid, timeout_ms } => {
            let (new_socket, peer) = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.accept(timeout_ms as u64)
                    .await
                    .map_err(|e| DispatchError::SockAcceptError(e.to_string()))?
            };
            let new_sid = table
                .insert(new_socket)
                .ok_or_else(|| DispatchError::SockAcceptError("socket table full".to_string()))?;
            Ok(value::map(vec![
                ("sid", Value::Integer(new_sid.into())),
                ("addr", addr_to_value(&peer)),
            ]))
        }

        Op::SockSendto { sid, data, host, port } => {
            let result = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.sendto(&data, &host, port as u16).await
            };
            match result {
                Ok(n) => Ok(value::map(vec![("n", Value::Integer((n as i64).into()))])),
                Err(e) => {
                    table.close(sid);
                    Err(DispatchError::SockSendtoError(e.to_string()))
                }
            }
        }

        Op::SockRecvfrom { sid, n, timeout_ms } => {
            let result = {
                let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
                sock.recvfrom(n.max(0) as usize, timeout_ms as u64).await
            };
            match result {
                Ok((data, addr)) => Ok(value::map(vec![
                    ("data", Value::Bytes(data.clone())),
                    ("n", Value::Integer((data.len() as i64).into())),
                    ("addr", addr_to_value(&addr)),
                ])),
                Err(e) => {
                    table.close(sid);
                    Err(DispatchError::SockRecvfromError(e.to_string()))
                }
            }
        }

        Op::SockWrapSsl { sid, server_hostname } => {
            let sock = table.get_mut(sid).ok_or(DispatchError::InvalidSid(sid))?;
            sock.wrap_ssl(server_hostname.as_deref())
                .await
                .map_err(|e| DispatchError::SockWrapSslError(e.to_string()))?;
            Ok(Value::Bool(true))
        }

        Op::SockReset => {
            table.close_all();
            Ok(Value::Bool(true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::collaborators::{AddrInfoEntry, WifiState};

    struct FixedClock;
    impl Clock for FixedClock {
        fn unix_time_secs(&self) -> u64 {
            1_700_000_000
        }
        fn monotonic_millis(&self) -> u64 {
            123
        }
    }

    struct FixedWifi(WifiState);
    impl WifiStatus for FixedWifi {
        fn status(&self) -> WifiState {
            self.0.clone()
        }
    }

    struct FlakyNtp;
    #[async_trait::async_trait]
    impl NtpClient for FlakyNtp {
        async fn sync(&self, host: &str) -> Result<(), String> {
            if host == "pool.ntp.org" {
                Ok(())
            } else {
                Err("unreachable".to_string())
            }
        }
    }

    struct FixedResolver;
    #[async_trait::async_trait]
    impl Resolver for FixedResolver {
        async fn resolve(
            &self,
            host: &str,
            port: u16,
            _family: i64,
            _socktype: i64,
            _protocol: i64,
        ) -> Result<Vec<AddrInfoEntry>, String> {
            if host.is_empty() {
                return Err("bad host".to_string());
            }
            Ok(vec![AddrInfoEntry {
                family: 2,
                socktype: 1,
                protocol: 6,
                canonname: host.to_string(),
                addr: PeerAddr { host: "93.184.216.34".to_string(), port },
            }])
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(FixedClock),
            Arc::new(FixedWifi(WifiState { connected: true, ifconfig: None })),
            Arc::new(FlakyNtp),
            Arc::new(FixedResolver),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ping_returns_expected_shape() {
        let mut table = SocketTable::new();
        let result = dispatch(Op::Ping, &mut table, &collaborators()).await.unwrap();
        assert_eq!(value::get(&result, "pong").and_then(|v| v.as_bool()), Some(true));
    }

    #[tokio::test]
    async fn unknown_op_is_rejected_at_parse_time() {
        let req = value::map(vec![("op", Value::Text("frobnicate".into()))]);
        let err = parse(&req).unwrap_err();
        assert_eq!(err.tag(), "unknown_op");
        assert_eq!(err.detail(), "frobnicate");
    }

    #[tokio::test]
    async fn sock_send_on_unknown_sid_is_invalid_sid() {
        let mut table = SocketTable::new();
        let err = dispatch(
            Op::SockSend { sid: 99, data: vec![1] },
            &mut table,
            &collaborators(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.tag(), "invalid_sid");
    }

    #[tokio::test]
    async fn sock_connect_failure_closes_the_socket() {
        let mut table = SocketTable::new();
        let sid = table
            .insert(Box::new(TcpNetSocket::new(collaborators().tls_connector.clone())))
            .unwrap();
        let err = dispatch(
            Op::SockConnect {
                sid,
                host: "203.0.113.1".to_string(),
                port: 9,
                ssl: false,
                timeout_ms: 1,
            },
            &mut table,
            &collaborators(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.tag(), "sock_connect_error");
        assert!(!table.contains(sid));
    }

    #[tokio::test]
    async fn dns_missing_host_is_rejected_at_parse_time() {
        let req = value::map(vec![("op", Value::Text("dns".into()))]);
        let err = parse(&req).unwrap_err();
        assert_eq!(err.tag(), "missing_host");
    }

    #[tokio::test]
    async fn set_time_surfaces_ntp_unreachable() {
        let req_args = value::map(vec![("host", Value::Text("bad.example".into()))]);
        let op = parse(&value::map(vec![("op", Value::Text("set_time".into())), ("args", req_args)])).unwrap();
        let mut table = SocketTable::new();
        let err = dispatch(op, &mut table, &collaborators()).await.unwrap_err();
        assert_eq!(err.tag(), "ntp_unreachable");
    }
}
