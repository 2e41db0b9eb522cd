//! Proxy binary: owns the UART port and Wi-Fi-side collaborators, and
//! answers REQs from the client end of the bridge until the port
//! closes or errors.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;

use clap::Parser;
use tokio_serial::SerialPortBuilderExt;
use tracing_subscriber::EnvFilter;

use uart_bridge::config::Config;
use uart_bridge::proxy::collaborators::{
    Clock, NtpClient, Resolver, SystemClock, SystemResolver, WifiState, WifiStatus,
};
use uart_bridge::proxy::dispatch::Collaborators;
use uart_bridge::proxy::ProxySession;

/// Reports Wi-Fi connectivity by checking whether the host has a route
/// to the outside world, using the routed-UDP-socket trick to read back
/// the local interface address without sending any packets.
struct HostWifiStatus;

impl WifiStatus for HostWifiStatus {
    fn status(&self) -> WifiState {
        let probe = StdUdpSocket::bind("0.0.0.0:0")
            .and_then(|s| s.connect("8.8.8.8:80").map(|_| s))
            .and_then(|s| s.local_addr());
        match probe {
            Ok(addr) => WifiState {
                connected: true,
                ifconfig: Some([
                    addr.ip().to_string(),
                    "255.255.255.0".to_string(),
                    "0.0.0.0".to_string(),
                    "0.0.0.0".to_string(),
                ]),
            },
            Err(_) => WifiState { connected: false, ifconfig: None },
        }
    }
}

/// `set_time` is meant to sync the proxy's view of time against NTP;
/// on this host the OS clock is already NTP-disciplined, so syncing is
/// a no-op that always succeeds.
struct NoopNtpClient;

#[async_trait::async_trait]
impl NtpClient for NoopNtpClient {
    async fn sync(&self, _host: &str) -> Result<(), String> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = tokio_serial::new(config.device_path.as_str(), config.baud_rate).open_native_async()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
    let wifi: Arc<dyn WifiStatus> = Arc::new(HostWifiStatus);
    let ntp: Arc<dyn NtpClient> = Arc::new(NoopNtpClient);
    let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver);
    let collaborators = Collaborators::new(clock, wifi, ntp, resolver)?;

    tracing::info!(device = %config.device_path, baud = config.baud_rate, "proxy listening on UART");
    let mut session = ProxySession::new(port, collaborators);
    session.run().await?;
    Ok(())
}
