//! Command-line configuration, shared shape between the client and
//! proxy binaries. Mirrors the handful of tunables the original
//! implementation hardcoded at the top of each script, lifted into a
//! `clap`-derived struct so they're overridable per deployment.

use clap::Parser;

fn default_response_cache_size() -> usize {
    crate::proxy::cache::ResponseCache::CAPACITY
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Config {
    /// Serial device path, e.g. /dev/ttyUSB0 or COM4.
    #[arg(long, env = "BRIDGE_DEVICE_PATH")]
    pub device_path: String,

    /// UART baud rate.
    #[arg(long, env = "BRIDGE_BAUD_RATE", default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Per-call deadline in milliseconds, client side only.
    #[arg(long, env = "BRIDGE_TIMEOUT_MS", default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// REQ retransmission interval in milliseconds, client side only.
    #[arg(long, env = "BRIDGE_RESEND_MS", default_value_t = 250)]
    pub resend_ms: u64,

    /// Maximum accepted frame size in bytes, before stuffing.
    #[arg(long, env = "BRIDGE_MAX_FRAME_SIZE", default_value_t = crate::framer::DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Proxy-side response cache capacity, in distinct seqs.
    #[arg(long, env = "BRIDGE_RESPONSE_CACHE_SIZE", default_value_t = default_response_cache_size())]
    pub response_cache_size: usize,

    /// Log filter passed to `tracing_subscriber::EnvFilter`, e.g. "info" or "uart_bridge=debug".
    #[arg(long, env = "BRIDGE_LOG", default_value = "info")]
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_device_path_and_applies_defaults() {
        let cfg = Config::parse_from(["uart-bridge", "--device-path", "/dev/ttyUSB0"]);
        assert_eq!(cfg.device_path, "/dev/ttyUSB0");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.timeout_ms, 5_000);
        assert_eq!(cfg.resend_ms, 250);
    }

    #[test]
    fn overrides_are_honored() {
        let cfg = Config::parse_from([
            "uart-bridge",
            "--device-path",
            "/dev/ttyACM0",
            "--baud-rate",
            "921600",
            "--timeout-ms",
            "8000",
        ]);
        assert_eq!(cfg.baud_rate, 921_600);
        assert_eq!(cfg.timeout_ms, 8_000);
    }
}
