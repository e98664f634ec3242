//! HTTP connection initiation: DNS, proxy negotiation, request dispatch.
//!
//! The full HTTP grammar lives outside this crate; these commands carry
//! a transfer exactly far enough to exercise connection establishment,
//! socket pooling, and the proxy modalities.

pub mod connection;
pub mod initiate;
pub mod proxy;
pub mod request;

pub use connection::{HttpConnection, ResponseHeader};
pub use initiate::HttpInitiateConnectionCommand;
pub use proxy::HttpProxyRequestCommand;
pub use request::HttpRequestCommand;

use url::Url;

use crate::download::DownloadError;

/// How a request traverses an HTTP proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMethod {
    /// CONNECT-established pipe to the origin
    Tunnel,
    /// Absolute-form forwarding of the request itself
    Get,
}

/// Resolves the proxy modality for a request scheme.
///
/// Protocols that carry their own framing or encryption must tunnel;
/// plain HTTP follows the configured preference. The mapping is a closed
/// table so an unsupported scheme fails loudly instead of being
/// forwarded wrongly.
///
/// # Errors
///
/// - `DownloadError::Protocol` - no proxy modality exists for the scheme
pub fn resolve_proxy_method(
    scheme: &str,
    configured: ProxyMethod,
) -> Result<ProxyMethod, DownloadError> {
    match scheme {
        "https" | "ftp" => Ok(ProxyMethod::Tunnel),
        "http" => Ok(configured),
        other => Err(DownloadError::Protocol {
            reason: format!("no proxy method for scheme {other}"),
        }),
    }
}

/// Port of a URI, falling back to the scheme default.
pub(crate) fn default_port(uri: &Url) -> u16 {
    uri.port_or_known_default().unwrap_or(80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_always_tunnels() {
        assert_eq!(
            resolve_proxy_method("https", ProxyMethod::Get).unwrap(),
            ProxyMethod::Tunnel
        );
        assert_eq!(
            resolve_proxy_method("https", ProxyMethod::Tunnel).unwrap(),
            ProxyMethod::Tunnel
        );
    }

    #[test]
    fn test_http_follows_configuration() {
        assert_eq!(
            resolve_proxy_method("http", ProxyMethod::Get).unwrap(),
            ProxyMethod::Get
        );
        assert_eq!(
            resolve_proxy_method("http", ProxyMethod::Tunnel).unwrap(),
            ProxyMethod::Tunnel
        );
    }

    #[test]
    fn test_unknown_scheme_is_protocol_error() {
        let result = resolve_proxy_method("gopher", ProxyMethod::Get);
        assert!(matches!(result, Err(DownloadError::Protocol { .. })));
    }

    #[test]
    fn test_default_port_falls_back_per_scheme() {
        let http = Url::parse("http://origin/file").unwrap();
        let https = Url::parse("https://origin/file").unwrap();
        let explicit = Url::parse("http://origin:8080/file").unwrap();

        assert_eq!(default_port(&http), 80);
        assert_eq!(default_port(&https), 443);
        assert_eq!(default_port(&explicit), 8080);
    }
}
