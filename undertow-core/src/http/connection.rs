//! Request formatting and response-header framing over one socket.

use std::io;

use url::Url;

use crate::config::UndertowConfig;
use crate::download::DownloadError;
use crate::engine::Cuid;
use crate::network::Socket;

/// Response headers larger than this are treated as a protocol error.
const MAX_HEADER_SIZE: usize = 16384;

/// Parsed first part of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Status code from the status line
    pub status: u16,
    /// Declared body length, when the server sent one
    pub content_length: Option<u64>,
    /// Body bytes that arrived in the same reads as the header
    pub body_prefix: Vec<u8>,
}

/// One HTTP exchange bound to a socket.
///
/// Only the framing the engine core needs is implemented here: the GET
/// request line in origin or absolute form, and the status line plus
/// `Content-Length` of the response. Everything else in the header block
/// is carried opaquely.
#[derive(Debug)]
pub struct HttpConnection {
    cuid: Cuid,
    socket: Socket,
    user_agent: &'static str,
}

impl HttpConnection {
    /// Wraps an established socket for one exchange.
    pub fn new(cuid: Cuid, socket: Socket, config: &UndertowConfig) -> Self {
        Self {
            cuid,
            socket,
            user_agent: config.network.user_agent,
        }
    }

    /// Cuid of the command driving this exchange.
    pub fn cuid(&self) -> Cuid {
        self.cuid
    }

    /// Builds the GET request for a URI.
    ///
    /// `absolute_form` selects the proxy-forwarding request line that
    /// names the full URI instead of just the path.
    pub fn build_request(&self, uri: &Url, absolute_form: bool) -> String {
        let target = if absolute_form {
            uri.as_str().to_string()
        } else {
            let mut target = uri.path().to_string();
            if let Some(query) = uri.query() {
                target.push('?');
                target.push_str(query);
            }
            target
        };
        let host = host_header(uri);
        format!(
            "GET {target} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {}\r\nAccept: */*\r\n\r\n",
            self.user_agent
        )
    }

    /// Sends the GET request for a URI.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - the socket rejected the write
    pub async fn send_request(&mut self, uri: &Url, absolute_form: bool) -> io::Result<()> {
        let request = self.build_request(uri, absolute_form);
        self.socket.write_all(request.as_bytes()).await
    }

    /// Sends pre-formatted bytes, e.g. a CONNECT request.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - the socket rejected the write
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.socket.write_all(bytes).await
    }

    /// Reads until the header/body boundary and parses the status line
    /// and `Content-Length`.
    ///
    /// # Errors
    ///
    /// - `DownloadError::Network` - the connection closed before the
    ///   header completed
    /// - `DownloadError::Protocol` - malformed status line or oversized
    ///   header block
    pub async fn read_response_header(&mut self) -> Result<ResponseHeader, DownloadError> {
        let mut collected = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            if let Some(boundary) = find_boundary(&collected) {
                return parse_header(&collected, boundary);
            }
            if collected.len() > MAX_HEADER_SIZE {
                return Err(DownloadError::Protocol {
                    reason: "response header too large".to_string(),
                });
            }
            let read = self.socket.read(&mut chunk).await?;
            if read == 0 {
                return Err(DownloadError::Network(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response header",
                )));
            }
            collected.extend_from_slice(&chunk[..read]);
        }
    }

    /// Reads the next slice of response body into `buf`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - the socket read failed
    pub async fn read_body_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf).await
    }

    /// Releases the underlying socket, e.g. for pooling or a tunnel.
    pub fn into_socket(self) -> Socket {
        self.socket
    }
}

fn host_header(uri: &Url) -> String {
    let host = uri.host_str().unwrap_or_default();
    match uri.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn find_boundary(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_header(bytes: &[u8], boundary: usize) -> Result<ResponseHeader, DownloadError> {
    let head = String::from_utf8_lossy(&bytes[..boundary]);
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| DownloadError::Protocol {
            reason: format!("malformed status line: {status_line:?}"),
        })?;

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok());

    Ok(ResponseHeader {
        status,
        content_length,
        body_prefix: bytes[boundary + 4..].to_vec(),
    })
}
