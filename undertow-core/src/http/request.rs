//! The request/response phase of one HTTP transfer.

use std::io;
use std::rc::Rc;
use std::time::Instant;

use async_trait::async_trait;
use url::Url;

use crate::config::UndertowConfig;
use crate::download::{DownloadError, DownloadOutcome, RequestGroup};
use crate::engine::{Command, CommandScope, Cuid, EngineContext, Execution, PoolKind};
use crate::http::connection::HttpConnection;
use crate::http::default_port;
use crate::http::initiate::HttpInitiateConnectionCommand;

#[derive(Clone, Copy)]
enum Phase {
    SendRequest,
    ReadResponse,
    Stream { remaining: Option<u64> },
}

/// Issues the GET request and drains the response body.
///
/// A pooled socket may have been closed silently by its previous remote;
/// that surfaces as a failure before any response byte arrives, in which
/// case the request is reissued once on a fresh connection instead of
/// failing the URI. On completion the idle socket is donated back to the
/// pool under the origin key, keeping its tunnel tag.
pub struct HttpRequestCommand {
    cuid: Cuid,
    request: Url,
    scope: CommandScope,
    connection: Option<HttpConnection>,
    proxy_request: Option<Url>,
    reused: bool,
    pool_kind: PoolKind,
    deadline: Instant,
    buffer_size: usize,
    received: u64,
    phase: Phase,
}

impl HttpRequestCommand {
    /// Creates the command over an established connection.
    ///
    /// `reused` marks a connection that came out of the socket pool;
    /// `pool_kind` is carried through to any later donation.
    pub fn new(
        cuid: Cuid,
        request: Url,
        group: Rc<RequestGroup>,
        connection: HttpConnection,
        config: &UndertowConfig,
        reused: bool,
        pool_kind: PoolKind,
    ) -> Self {
        Self {
            cuid,
            request,
            scope: CommandScope::attach(group),
            connection: Some(connection),
            proxy_request: None,
            reused,
            pool_kind,
            deadline: Instant::now() + config.network.transfer_timeout,
            buffer_size: config.network.read_buffer_size,
            received: 0,
            phase: Phase::SendRequest,
        }
    }

    /// Attaches the proxy request so the request line carries the
    /// absolute-form URI.
    pub fn set_proxy_request(&mut self, proxy: Url) {
        self.proxy_request = Some(proxy);
    }

    /// Bytes of response body received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Reissues the whole request on a fresh connection, bypassing the
    /// already-consumed pool entry.
    fn reissue_on_fresh_socket(&self, ctx: &mut EngineContext) {
        tracing::debug!(
            "command {}: pooled connection to {} was dead, retrying on a fresh socket",
            self.cuid,
            self.request.host_str().unwrap_or_default()
        );
        let command = HttpInitiateConnectionCommand::new(
            self.cuid,
            self.request.clone(),
            Rc::clone(self.scope.group()),
        );
        ctx.enqueue(Box::new(command));
    }

    fn account(&mut self, bytes: u64) {
        self.received += bytes;
        self.scope.group().record_download(bytes);
    }

    /// Records the finished URI and, when the connection is still sound,
    /// donates it for reuse.
    fn finish(&mut self, ctx: &mut EngineContext, donate: bool) {
        let group = self.scope.group();
        group.add_uri_result(self.request.as_str(), DownloadOutcome::Finished);
        if let Some(store) = group.piece_store() {
            store.mark_pieces_through(self.received);
        }
        tracing::info!(
            "command {}: {} complete, {} bytes",
            self.cuid,
            self.request,
            self.received
        );
        if let Some(connection) = self.connection.take() {
            if donate {
                let socket = connection.into_socket();
                let host = self.request.host_str().unwrap_or_default().to_string();
                ctx.push_pooled_socket(socket, &host, default_port(&self.request), self.pool_kind);
            }
        }
    }
}

fn not_connected() -> DownloadError {
    DownloadError::Network(io::ErrorKind::NotConnected.into())
}

#[async_trait(?Send)]
impl Command for HttpRequestCommand {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    async fn execute(&mut self, ctx: &mut EngineContext) -> Result<Execution, DownloadError> {
        if Instant::now() >= self.deadline {
            return Err(DownloadError::Timeout {
                uri: self.request.to_string(),
            });
        }

        match self.phase {
            Phase::SendRequest => {
                let absolute_form = self.proxy_request.is_some();
                let outcome = {
                    let Some(connection) = self.connection.as_mut() else {
                        return Err(not_connected());
                    };
                    connection.send_request(&self.request, absolute_form).await
                };
                match outcome {
                    Ok(()) => {
                        self.phase = Phase::ReadResponse;
                        Ok(Execution::Requeue)
                    }
                    Err(_) if self.reused => {
                        self.reissue_on_fresh_socket(ctx);
                        Ok(Execution::Done)
                    }
                    Err(source) => Err(DownloadError::Network(source)),
                }
            }
            Phase::ReadResponse => {
                let outcome = {
                    let Some(connection) = self.connection.as_mut() else {
                        return Err(not_connected());
                    };
                    connection.read_response_header().await
                };
                let header = match outcome {
                    Err(DownloadError::Network(_)) if self.reused => {
                        self.reissue_on_fresh_socket(ctx);
                        return Ok(Execution::Done);
                    }
                    Err(error) => return Err(error),
                    Ok(header) => header,
                };

                if header.status == 404 {
                    return Err(DownloadError::ResourceNotFound {
                        uri: self.request.to_string(),
                    });
                }
                if !(200..300).contains(&header.status) {
                    return Err(DownloadError::Protocol {
                        reason: format!(
                            "unexpected status {} from {}",
                            header.status, self.request
                        ),
                    });
                }

                // The response arrived: this is a live connection now
                self.reused = false;
                let prefix = header.body_prefix.len() as u64;
                self.account(prefix);

                let remaining = header.content_length.map(|len| len.saturating_sub(prefix));
                if remaining == Some(0) {
                    self.finish(ctx, true);
                    return Ok(Execution::Done);
                }
                self.phase = Phase::Stream { remaining };
                Ok(Execution::Requeue)
            }
            Phase::Stream { remaining } => {
                let read = {
                    let Some(connection) = self.connection.as_mut() else {
                        return Err(not_connected());
                    };
                    let mut buf = vec![0u8; self.buffer_size];
                    connection
                        .read_body_chunk(&mut buf)
                        .await
                        .map_err(DownloadError::Network)?
                };
                if read == 0 {
                    return match remaining {
                        // Without a declared length, EOF is the end of the payload
                        None => {
                            self.finish(ctx, false);
                            Ok(Execution::Done)
                        }
                        Some(_) => Err(DownloadError::Network(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-body",
                        ))),
                    };
                }
                self.account(read as u64);
                match remaining {
                    Some(left) => {
                        let left = left.saturating_sub(read as u64);
                        if left == 0 {
                            self.finish(ctx, true);
                            return Ok(Execution::Done);
                        }
                        self.phase = Phase::Stream {
                            remaining: Some(left),
                        };
                        Ok(Execution::Requeue)
                    }
                    None => Ok(Execution::Requeue),
                }
            }
        }
    }

    fn request_group(&self) -> Option<&Rc<RequestGroup>> {
        Some(self.scope.group())
    }

    fn target_uri(&self) -> Option<&Url> {
        Some(&self.request)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::engine::DownloadEngine;
    use crate::network::Socket;

    async fn connected_pair(
        response: &'static [u8],
    ) -> (Socket, u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let read = stream.read(&mut request).await.unwrap();
            request.truncate(read);
            stream.write_all(response).await.unwrap();
            request
        });
        let mut socket = Socket::new();
        socket
            .establish_connection(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(5))
            .await
            .unwrap();
        (socket, port, server)
    }

    fn command_for(
        socket: Socket,
        port: u16,
        config: &Rc<UndertowConfig>,
        reused: bool,
    ) -> (HttpRequestCommand, Rc<RequestGroup>) {
        let group = Rc::new(RequestGroup::new(Rc::clone(config), Vec::new()));
        let uri = Url::parse(&format!("http://127.0.0.1:{port}/payload")).unwrap();
        let connection = HttpConnection::new(Cuid(1), socket, config);
        let command = HttpRequestCommand::new(
            Cuid(1),
            uri,
            Rc::clone(&group),
            connection,
            config,
            reused,
            PoolKind::Plain,
        );
        (command, group)
    }

    #[tokio::test]
    async fn test_complete_exchange_records_finished_and_donates_socket() {
        let (socket, port, server) =
            connected_pair(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let config = Rc::new(UndertowConfig::default());
        let mut engine = DownloadEngine::new(Rc::clone(&config));
        let (mut command, group) = command_for(socket, port, &config, false);

        let mut execution = command.execute(engine.context_mut()).await.unwrap();
        while execution == Execution::Requeue {
            execution = command.execute(engine.context_mut()).await.unwrap();
        }

        assert_eq!(execution, Execution::Done);
        assert_eq!(command.received(), 5);
        let results = group.uri_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, DownloadOutcome::Finished);
        assert_eq!(group.calculate_stat().session_download_length, 5);
        // The idle socket went back to the pool under the origin key
        assert!(engine
            .context_mut()
            .pop_pooled_socket("127.0.0.1", port)
            .is_some());

        let sent = server.await.unwrap();
        let sent = String::from_utf8_lossy(&sent);
        assert!(sent.starts_with("GET /payload HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_missing_resource_surfaces_not_found() {
        let (socket, port, _server) =
            connected_pair(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;
        let config = Rc::new(UndertowConfig::default());
        let mut engine = DownloadEngine::new(Rc::clone(&config));
        let (mut command, _group) = command_for(socket, port, &config, false);

        let mut outcome = command.execute(engine.context_mut()).await;
        while matches!(outcome, Ok(Execution::Requeue)) {
            outcome = command.execute(engine.context_mut()).await;
        }

        assert!(matches!(
            outcome,
            Err(DownloadError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dead_pooled_socket_reissues_on_fresh_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut socket = Socket::new();
        socket
            .establish_connection(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(5))
            .await
            .unwrap();
        // The remote accepts and immediately drops the connection
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
        drop(listener);

        let config = Rc::new(UndertowConfig::default());
        let mut engine = DownloadEngine::new(Rc::clone(&config));
        let (mut command, group) = command_for(socket, port, &config, true);

        let mut execution = command.execute(engine.context_mut()).await.unwrap();
        while execution == Execution::Requeue {
            execution = command.execute(engine.context_mut()).await.unwrap();
        }

        assert_eq!(execution, Execution::Done);
        // A fresh initiate command was queued instead of failing the URI
        assert_eq!(engine.context_mut().pending_len(), 1);
        assert!(group.uri_results().is_empty());
    }
}
