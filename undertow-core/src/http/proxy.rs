//! CONNECT negotiation with an HTTP proxy.

use std::rc::Rc;
use std::time::Instant;

use async_trait::async_trait;
use url::Url;

use crate::config::UndertowConfig;
use crate::download::{DownloadError, RequestGroup};
use crate::engine::{Command, CommandScope, Cuid, EngineContext, Execution, PoolKind};
use crate::http::connection::HttpConnection;
use crate::http::default_port;
use crate::http::request::HttpRequestCommand;

#[derive(Clone, Copy)]
enum Phase {
    SendConnect,
    ReadResponse,
}

/// Issues CONNECT and, on success, hands the resulting plain pipe to an
/// HTTP request command.
///
/// The socket that comes out of a 2xx CONNECT is logically connected to
/// the origin; the follow-on command therefore uses the origin-form
/// request line and pools the socket as tunneled-to-origin.
pub struct HttpProxyRequestCommand {
    cuid: Cuid,
    request: Url,
    scope: CommandScope,
    proxy: Url,
    connection: Option<HttpConnection>,
    deadline: Instant,
    phase: Phase,
}

impl HttpProxyRequestCommand {
    /// Creates the command over a connection already established to the
    /// proxy.
    pub fn new(
        cuid: Cuid,
        request: Url,
        group: Rc<RequestGroup>,
        proxy: Url,
        connection: HttpConnection,
        config: &UndertowConfig,
    ) -> Self {
        Self {
            cuid,
            request,
            scope: CommandScope::attach(group),
            proxy,
            connection: Some(connection),
            deadline: Instant::now() + config.network.transfer_timeout,
            phase: Phase::SendConnect,
        }
    }

    fn origin_authority(&self) -> String {
        format!(
            "{}:{}",
            self.request.host_str().unwrap_or_default(),
            default_port(&self.request)
        )
    }
}

#[async_trait(?Send)]
impl Command for HttpProxyRequestCommand {
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
            Phase::SendConnect => {
                let authority = self.origin_authority();
                let connect = format!(
                    "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: keep-alive\r\n\r\n"
                );
                let Some(connection) = self.connection.as_mut() else {
                    return Err(DownloadError::Network(
                        std::io::ErrorKind::NotConnected.into(),
                    ));
                };
                connection
                    .send_raw(connect.as_bytes())
                    .await
                    .map_err(DownloadError::Network)?;
                self.phase = Phase::ReadResponse;
                Ok(Execution::Requeue)
            }
            Phase::ReadResponse => {
                let header = {
                    let Some(connection) = self.connection.as_mut() else {
                        return Err(DownloadError::Network(
                            std::io::ErrorKind::NotConnected.into(),
                        ));
                    };
                    connection.read_response_header().await?
                };
                if !(200..300).contains(&header.status) {
                    return Err(DownloadError::Protocol {
                        reason: format!(
                            "proxy {} refused CONNECT to {} with status {}",
                            self.proxy.host_str().unwrap_or_default(),
                            self.origin_authority(),
                            header.status
                        ),
                    });
                }

                tracing::info!(
                    "command {}: tunnel to {} established via {}",
                    self.cuid,
                    self.origin_authority(),
                    self.proxy.host_str().unwrap_or_default()
                );

                let Some(connection) = self.connection.take() else {
                    return Err(DownloadError::Network(
                        std::io::ErrorKind::NotConnected.into(),
                    ));
                };
                let config = Rc::clone(ctx.config());
                let socket = connection.into_socket();
                let command = HttpRequestCommand::new(
                    self.cuid,
                    self.request.clone(),
                    Rc::clone(self.scope.group()),
                    HttpConnection::new(self.cuid, socket, &config),
                    &config,
                    false,
                    PoolKind::TunneledToOrigin,
                );
                ctx.enqueue(Box::new(command));
                Ok(Execution::Done)
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
