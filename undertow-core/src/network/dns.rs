//! Host name resolution for connection-initiation commands.

use std::net::IpAddr;

use tokio::net::lookup_host;

use crate::download::DownloadError;

/// Resolves a host name to its addresses, in resolver preference order.
///
/// Connection attempts always start with the first address; later
/// entries exist so pooled sockets to any alias can be matched.
///
/// # Errors
///
/// - `DownloadError::Dns` - the resolver failed or returned no addresses
pub async fn resolve_host(host: &str, port: u16) -> Result<Vec<IpAddr>, DownloadError> {
    let addrs: Vec<IpAddr> = lookup_host((host, port))
        .await
        .map_err(|_| DownloadError::Dns {
            host: host.to_string(),
        })?
        .map(|addr| addr.ip())
        .collect();

    if addrs.is_empty() {
        return Err(DownloadError::Dns {
            host: host.to_string(),
        });
    }
    Ok(addrs)
}
