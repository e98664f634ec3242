//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

use url::Url;

use crate::http::ProxyMethod;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    /// Command scheduler settings
    pub engine: EngineConfig,
    /// Connect/transfer timeouts, caps, and proxy
    pub network: NetworkConfig,
    /// Peer admission bounds and thresholds
    pub bt: BtConfig,
}

/// Command scheduler configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between scheduler generations in which no command made progress
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// Network communication configuration.
///
/// Controls connect and transfer timeouts, bandwidth caps, buffer sizing,
/// and the optional HTTP proxy.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout for HTTP origins and proxies
    pub connect_timeout: Duration,
    /// Deadline for a single request/response exchange
    pub transfer_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// Read buffer size for response bodies
    pub read_buffer_size: usize,
    /// Download bandwidth cap in bytes per second (0 = unlimited)
    pub max_download_speed: u64,
    /// Upload bandwidth cap in bytes per second (0 = unlimited)
    pub max_upload_speed: u64,
    /// Optional HTTP proxy for origin requests
    pub proxy: Option<ProxyConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(60),
            user_agent: "undertow/0.1.0",
            read_buffer_size: 16384, // 16 KiB
            max_download_speed: 0,   // Unlimited by default
            max_upload_speed: 0,     // Unlimited by default
            proxy: None,
        }
    }
}

/// HTTP proxy configuration.
///
/// The method controls how plain-HTTP requests traverse the proxy;
/// TLS-like protocols always tunnel regardless of this setting.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy endpoint, e.g. `http://proxy.example.org:8080`
    pub url: Url,
    /// Forwarding modality for plain HTTP requests
    pub method: ProxyMethod,
}

/// BitTorrent peer admission configuration.
///
/// Controls the connection caps and speed thresholds consulted by the
/// active peer-connection controller.
#[derive(Debug, Clone)]
pub struct BtConfig {
    /// Per-download speed below which more peers are requested, bytes/s
    pub request_peer_speed_limit: u64,
    /// Hard cap on simultaneous peer connections
    pub max_peers: u32,
    /// Lower bound under which new connections are always attempted
    pub min_peers: u32,
    /// Peer connections opened per controller tick
    pub new_connection_batch: usize,
    /// Interval between controller evaluations
    pub check_interval: Duration,
    /// TCP connect timeout for peer connections
    pub peer_connect_timeout: Duration,
}

impl Default for BtConfig {
    fn default() -> Self {
        Self {
            request_peer_speed_limit: 51200, // 50 KiB/s
            max_peers: 55,
            min_peers: 40,
            new_connection_batch: 5,
            check_interval: Duration::from_secs(10),
            peer_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(limit) = std::env::var("UNDERTOW_REQUEST_PEER_SPEED_LIMIT") {
            if let Ok(bytes) = limit.parse::<u64>() {
                config.bt.request_peer_speed_limit = bytes;
            }
        }

        if let Ok(max) = std::env::var("UNDERTOW_MAX_PEERS") {
            if let Ok(count) = max.parse::<u32>() {
                config.bt.max_peers = count;
            }
        }

        if let Ok(timeout) = std::env::var("UNDERTOW_CONNECT_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.network.connect_timeout = Duration::from_secs(seconds);
            }
        }

        config
    }
}
