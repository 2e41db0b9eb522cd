//! The production and test-double implementations of the socket seam the
//! dispatch handlers borrow from [`super::socket_table::SocketTable`].
//! Operating-system sockets are an out-of-scope collaborator; this module
//! is the thin, swappable adapter onto them (real sockets via `tokio`,
//! TLS via `tokio-rustls`), not a reimplementation of socket semantics.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A resolved peer address, carried back to the client as a CBOR tuple.
#[derive(Debug, Clone)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// The socket operations the dispatch table needs, independent of
/// whether the underlying transport is TCP or UDP, plain or TLS. A
/// single flat interface standing in for a duck-typed socket handle,
/// so `SocketTable` can hold any kind behind one boxed trait object.
#[async_trait]
pub trait NetSocket: Send {
    async fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> io::Result<()>;
    async fn send(&mut self, data: &[u8]) -> io::Result<usize>;
    async fn recv(&mut self, n: usize, timeout_ms: u64) -> io::Result<(Vec<u8>, bool)>;
    async fn bind(&mut self, host: &str, port: u16) -> io::Result<()>;
    async fn listen(&mut self, backlog: u32) -> io::Result<()>;
    async fn accept(&mut self, timeout_ms: u64) -> io::Result<(Box<dyn NetSocket>, PeerAddr)>;
    async fn sendto(&mut self, data: &[u8], host: &str, port: u16) -> io::Result<usize>;
    async fn recvfrom(&mut self, n: usize, timeout_ms: u64) -> io::Result<(Vec<u8>, PeerAddr)>;
    async fn wrap_ssl(&mut self, server_hostname: Option<&str>) -> io::Result<()>;
}

fn unsupported(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("{op} not valid for this socket kind"))
}

async fn resolve_one(host: &str, port: u16) -> io::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses for host"))
}

/// TCP-backed socket. Starts unconnected (mirrors a freshly-`socket()`'d
/// fd); `connect` or `bind`+`listen` determine what it becomes.
enum TcpState {
    Unconnected,
    Stream(TcpStream),
    TlsStream(Box<TlsStream<TcpStream>>),
    Listener(TcpListener),
}

pub struct TcpNetSocket {
    state: TcpState,
    tls_connector: Arc<TlsConnector>,
}

impl TcpNetSocket {
    pub fn new(tls_connector: Arc<TlsConnector>) -> Self {
        Self {
            state: TcpState::Unconnected,
            tls_connector,
        }
    }

    fn from_stream(stream: TcpStream, tls_connector: Arc<TlsConnector>) -> Self {
        Self {
            state: TcpState::Stream(stream),
            tls_connector,
        }
    }
}

#[async_trait]
impl NetSocket for TcpNetSocket {
    async fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> io::Result<()> {
        let addr = resolve_one(host, port).await?;
        let stream = timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        self.state = TcpState::Stream(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        use tokio::io::AsyncWriteExt;
        match &mut self.state {
            TcpState::Stream(s) => s.write(data).await,
            TcpState::TlsStream(s) => s.write(data).await,
            _ => Err(unsupported("send")),
        }
    }

    async fn recv(&mut self, n: usize, timeout_ms: u64) -> io::Result<(Vec<u8>, bool)> {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; n];
        let read = match &mut self.state {
            TcpState::Stream(s) => {
                timeout(Duration::from_millis(timeout_ms), s.read(&mut buf))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "recv timed out"))??
            }
            TcpState::TlsStream(s) => {
                timeout(Duration::from_millis(timeout_ms), s.read(&mut buf))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "recv timed out"))??
            }
            _ => return Err(unsupported("recv")),
        };
        buf.truncate(read);
        Ok((buf, read == 0))
    }

    async fn bind(&mut self, host: &str, port: u16) -> io::Result<()> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr = resolve_one(host, port).await?;
        self.state = TcpState::Listener(TcpListener::bind(addr).await?);
        Ok(())
    }

    async fn listen(&mut self, _backlog: u32) -> io::Result<()> {
        match &self.state {
            TcpState::Listener(_) => Ok(()),
            _ => Err(unsupported("listen (call bind first)")),
        }
    }

    async fn accept(&mut self, timeout_ms: u64) -> io::Result<(Box<dyn NetSocket>, PeerAddr)> {
        match &self.state {
            TcpState::Listener(listener) => {
                let (stream, addr) = timeout(Duration::from_millis(timeout_ms), listener.accept())
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "accept timed out"))??;
                Ok((
                    Box::new(TcpNetSocket::from_stream(stream, self.tls_connector.clone())),
                    addr.into(),
                ))
            }
            _ => Err(unsupported("accept (call bind+listen first)")),
        }
    }

    async fn sendto(&mut self, _data: &[u8], _host: &str, _port: u16) -> io::Result<usize> {
        Err(unsupported("sendto"))
    }

    async fn recvfrom(&mut self, _n: usize, _timeout_ms: u64) -> io::Result<(Vec<u8>, PeerAddr)> {
        Err(unsupported("recvfrom"))
    }

    async fn wrap_ssl(&mut self, server_hostname: Option<&str>) -> io::Result<()> {
        let stream = match std::mem::replace(&mut self.state, TcpState::Unconnected) {
            TcpState::Stream(s) => s,
            other => {
                self.state = other;
                return Err(unsupported("wrap_ssl (socket is not a connected TCP stream)"));
            }
        };
        let name = server_hostname.unwrap_or("localhost").to_string();
        let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let tls = self
            .tls_connector
            .connect(server_name, stream)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.state = TcpState::TlsStream(Box::new(tls));
        Ok(())
    }
}

/// UDP-backed socket. Bound to an ephemeral port at construction time
/// (mirroring the implicit bind a real `socket()` + first send performs)
/// so it can `sendto`/`recvfrom` immediately; an explicit `sock_bind`
/// rebinds it to the requested address.
pub struct UdpNetSocket {
    socket: UdpSocket,
}

impl UdpNetSocket {
    pub async fn new() -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind("0.0.0.0:0").await?,
        })
    }
}

#[async_trait]
impl NetSocket for UdpNetSocket {
    async fn connect(&mut self, host: &str, port: u16, _timeout_ms: u64) -> io::Result<()> {
        let addr = resolve_one(host, port).await?;
        self.socket.connect(addr).await
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    async fn recv(&mut self, n: usize, timeout_ms: u64) -> io::Result<(Vec<u8>, bool)> {
        let mut buf = vec![0u8; n];
        let read = timeout(Duration::from_millis(timeout_ms), self.socket.recv(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "recv timed out"))??;
        buf.truncate(read);
        Ok((buf, read == 0))
    }

    async fn bind(&mut self, host: &str, port: u16) -> io::Result<()> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr = resolve_one(host, port).await?;
        self.socket = UdpSocket::bind(addr).await?;
        Ok(())
    }

    async fn listen(&mut self, _backlog: u32) -> io::Result<()> {
        Err(unsupported("listen"))
    }

    async fn accept(&mut self, _timeout_ms: u64) -> io::Result<(Box<dyn NetSocket>, PeerAddr)> {
        Err(unsupported("accept"))
    }

    async fn sendto(&mut self, data: &[u8], host: &str, port: u16) -> io::Result<usize> {
        let addr = resolve_one(host, port).await?;
        self.socket.send_to(data, addr).await
    }

    async fn recvfrom(&mut self, n: usize, timeout_ms: u64) -> io::Result<(Vec<u8>, PeerAddr)> {
        let mut buf = vec![0u8; n];
        let (read, from) = timeout(
            Duration::from_millis(timeout_ms),
            self.socket.recv_from(&mut buf),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "recvfrom timed out"))??;
        buf.truncate(read);
        Ok((buf, from.into()))
    }

    async fn wrap_ssl(&mut self, _server_hostname: Option<&str>) -> io::Result<()> {
        Err(unsupported("wrap_ssl (DTLS is not supported)"))
    }
}

/// Build the TLS connector shared by every TCP socket, using the host's
/// native trust roots.
pub fn default_tls_connector() -> io::Result<Arc<TlsConnector>> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    for cert in certs {
        let _ = roots.add(cert);
    }
    let config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(TlsConnector::from(Arc::new(config))))
}
