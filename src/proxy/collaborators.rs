//! Small seams over the proxy's other out-of-scope collaborators
//! (Wi-Fi interface, NTP client, DNS resolver, wall clock), modeled as
//! traits per the design notes rather than process-wide globals, so the
//! dispatcher can be exercised without real Wi-Fi hardware.

use async_trait::async_trait;

use crate::proxy::net::PeerAddr;

#[derive(Debug, Clone)]
pub struct WifiState {
    pub connected: bool,
    /// (ip, subnet, gateway, dns), mirroring `network.WLAN.ifconfig()`.
    pub ifconfig: Option<[String; 4]>,
}

pub trait WifiStatus: Send + Sync {
    fn status(&self) -> WifiState;
}

pub trait Clock: Send + Sync {
    fn unix_time_secs(&self) -> u64;
    fn monotonic_millis(&self) -> u64;
}

#[async_trait]
pub trait NtpClient: Send + Sync {
    async fn sync(&self, host: &str) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct AddrInfoEntry {
    pub family: i64,
    pub socktype: i64,
    pub protocol: i64,
    pub canonname: String,
    pub addr: PeerAddr,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: i64,
        socktype: i64,
        protocol: i64,
    ) -> Result<Vec<AddrInfoEntry>, String>;
}

/// Default wall-clock collaborator, backed by `std::time`.
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Clock for SystemClock {
    fn unix_time_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn monotonic_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Default DNS resolver collaborator, backed by `dns-lookup`'s
/// `getaddrinfo` binding - the same primitive the original's
/// `socket.getaddrinfo` call wraps.
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: i64,
        socktype: i64,
        protocol: i64,
    ) -> Result<Vec<AddrInfoEntry>, String> {
        let host = host.to_string();
        tokio::task::spawn_blocking(move || {
            use dns_lookup::{AddrInfoHints, getaddrinfo};
            let hints = AddrInfoHints {
                socktype: socktype as i32,
                protocol: protocol as i32,
                address: family as i32,
                flags: 0,
            };
            let results = getaddrinfo(Some(&host), Some(&port.to_string()), Some(hints))
                .map_err(|e| e.to_string())?;
            let mut out = Vec::new();
            for info in results {
                let info = info.map_err(|e| e.to_string())?;
                out.push(AddrInfoEntry {
                    family: info.address as i64,
                    socktype: info.socktype as i64,
                    protocol: info.protocol as i64,
                    canonname: info.canonname.unwrap_or_default(),
                    addr: info.sockaddr.into(),
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}
