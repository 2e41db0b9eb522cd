//! Client binary: opens the UART port and drives a small connectivity
//! and fetch demo loop, mirroring the shape of the original
//! microcontroller application's main loop.

use clap::Parser;
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use uart_bridge::client::socket::RemoteSocket;
use uart_bridge::client::BridgeClient;
use uart_bridge::config::Config;
use uart_bridge::value;

async fn check_connectivity<T>(client: &mut BridgeClient<T>, timeout_ms: u64)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match client.call("ping", value::map(vec![]), timeout_ms, 200).await {
        Ok(result) => {
            let t_ms = value::get(&result, "t_ms").and_then(|v| v.as_integer());
            info!(?t_ms, "ping ok");
        }
        Err(e) => error!(error = %e, "ping failed"),
    }

    match client.call("wifi_status", value::map(vec![]), timeout_ms, 200).await {
        Ok(result) => {
            let connected = value::get(&result, "connected").and_then(|v| v.as_bool()).unwrap_or(false);
            info!(connected, "wifi status");
        }
        Err(e) => error!(error = %e, "wifi_status failed"),
    }
}

async fn fetch_demo<T>(client: &mut BridgeClient<T>)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut sock = match RemoteSocket::open(client, 2, 1, 0).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "sock_open failed");
            return;
        }
    };

    if let Err(e) = sock.connect("example.com", 80, false, 10_000).await {
        error!(error = %e, "connect failed");
        sock.close().await;
        return;
    }

    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n";
    if let Err(e) = sock.send(request).await {
        error!(error = %e, "send failed");
        sock.close().await;
        return;
    }

    match sock.recv(512, false, 5_000).await {
        Ok(data) => info!(bytes = data.len(), "fetched response"),
        Err(e) => error!(error = %e, "recv failed"),
    }

    sock.close().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = tokio_serial::new(config.device_path.as_str(), config.baud_rate).open_native_async()?;
    let mut client = BridgeClient::new(port);

    info!(device = %config.device_path, baud = config.baud_rate, "client connected to UART");

    let mut ticks = 0u64;
    loop {
        check_connectivity(&mut client, config.timeout_ms).await;
        if ticks % 5 == 0 {
            fetch_demo(&mut client).await;
        }
        ticks += 1;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    }
}
