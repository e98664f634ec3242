//! Turns a resolved URI into an established transport and its follow-on
//! command.

use std::net::IpAddr;
use std::rc::Rc;

use async_trait::async_trait;
use url::Url;

use crate::config::UndertowConfig;
use crate::download::{DownloadError, RequestGroup, ServerHost};
use crate::engine::{Command, CommandScope, Cuid, EngineContext, Execution, PoolKind};
use crate::http::connection::HttpConnection;
use crate::http::proxy::HttpProxyRequestCommand;
use crate::http::request::HttpRequestCommand;
use crate::http::{default_port, resolve_proxy_method, ProxyMethod};
use crate::network::dns::resolve_host;
use crate::network::Socket;

enum Phase {
    ResolveDns,
    Connect { addrs: Vec<IpAddr> },
}

/// Command that carries one URI from name resolution to an established
/// transport, then hands off to the protocol command that will speak on
/// it.
///
/// With a proxy configured, socket reuse is keyed on the origin — a
/// tunneled socket is logically a pipe to the origin, not to the proxy.
/// Without one, reuse matches any resolved address of the origin host.
pub struct HttpInitiateConnectionCommand {
    cuid: Cuid,
    request: Url,
    scope: CommandScope,
    phase: Phase,
}

impl HttpInitiateConnectionCommand {
    /// Creates the command for one request URI.
    pub fn new(cuid: Cuid, request: Url, group: Rc<RequestGroup>) -> Self {
        Self {
            cuid,
            request,
            scope: CommandScope::attach(group),
            phase: Phase::ResolveDns,
        }
    }

    /// Applies the §connection policy: pool lookup, connect on miss, and
    /// construction of the proxy or plain request follow-on.
    async fn create_next_command(
        &self,
        ctx: &mut EngineContext,
        addrs: &[IpAddr],
    ) -> Result<(), DownloadError> {
        debug_assert!(!addrs.is_empty(), "connect phase requires resolved addresses");
        let Some(&first_addr) = addrs.first() else {
            return Err(DownloadError::Dns {
                host: self.request.host_str().unwrap_or_default().to_string(),
            });
        };

        let config = Rc::clone(ctx.config());
        let origin_host = self.request.host_str().unwrap_or_default().to_string();
        let origin_port = default_port(&self.request);
        let group = Rc::clone(self.scope.group());

        match &config.network.proxy {
            Some(proxy) => {
                let method = resolve_proxy_method(self.request.scheme(), proxy.method)?;
                // Reuse keys on the origin, not the proxy address
                if let Some(pooled) = ctx.pop_pooled_socket(&origin_host, origin_port) {
                    let connection = HttpConnection::new(self.cuid, pooled.socket, &config);
                    let mut command = HttpRequestCommand::new(
                        self.cuid,
                        self.request.clone(),
                        group,
                        connection,
                        &config,
                        true,
                        pooled.kind,
                    );
                    // A tunneled socket already pipes to the origin, so only
                    // GET forwarding over a plain socket names the proxy
                    if method == ProxyMethod::Get && pooled.kind == PoolKind::Plain {
                        command.set_proxy_request(proxy.url.clone());
                    }
                    ctx.enqueue(Box::new(command));
                    return Ok(());
                }

                let proxy_port = default_port(&proxy.url);
                tracing::info!(
                    "command {}: connecting to proxy {}:{}",
                    self.cuid,
                    proxy.url.host_str().unwrap_or_default(),
                    proxy_port
                );
                let mut socket = Socket::new();
                socket
                    .establish_connection(first_addr, proxy_port, config.network.connect_timeout)
                    .await?;

                match method {
                    ProxyMethod::Tunnel => {
                        let command = HttpProxyRequestCommand::new(
                            self.cuid,
                            self.request.clone(),
                            group,
                            proxy.url.clone(),
                            HttpConnection::new(self.cuid, socket, &config),
                            &config,
                        );
                        ctx.enqueue(Box::new(command));
                    }
                    ProxyMethod::Get => {
                        let connection = HttpConnection::new(self.cuid, socket, &config);
                        let mut command = HttpRequestCommand::new(
                            self.cuid,
                            self.request.clone(),
                            group,
                            connection,
                            &config,
                            false,
                            PoolKind::Plain,
                        );
                        command.set_proxy_request(proxy.url.clone());
                        ctx.enqueue(Box::new(command));
                    }
                }
            }
            None => {
                let (socket, reused, kind) =
                    match ctx.pop_pooled_socket_any(addrs, origin_port) {
                        Some(pooled) => (pooled.socket, true, pooled.kind),
                        None => {
                            tracing::info!(
                                "command {}: connecting to {}:{}",
                                self.cuid,
                                origin_host,
                                origin_port
                            );
                            let mut socket = Socket::new();
                            socket
                                .establish_connection(
                                    first_addr,
                                    origin_port,
                                    config.network.connect_timeout,
                                )
                                .await?;
                            (socket, false, PoolKind::Plain)
                        }
                    };
                let connection = HttpConnection::new(self.cuid, socket, &config);
                let command = HttpRequestCommand::new(
                    self.cuid,
                    self.request.clone(),
                    group,
                    connection,
                    &config,
                    reused,
                    kind,
                );
                ctx.enqueue(Box::new(command));
            }
        }
        Ok(())
    }

    fn resolve_target(&self, config: &UndertowConfig) -> Result<(String, u16), DownloadError> {
        match &config.network.proxy {
            Some(proxy) => Ok((
                proxy
                    .url
                    .host_str()
                    .ok_or_else(|| DownloadError::Protocol {
                        reason: "proxy URI has no host".to_string(),
                    })?
                    .to_string(),
                default_port(&proxy.url),
            )),
            None => Ok((
                self.request
                    .host_str()
                    .ok_or_else(|| DownloadError::Protocol {
                        reason: format!("URI has no host: {}", self.request),
                    })?
                    .to_string(),
                default_port(&self.request),
            )),
        }
    }
}

#[async_trait(?Send)]
impl Command for HttpInitiateConnectionCommand {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    async fn execute(&mut self, ctx: &mut EngineContext) -> Result<Execution, DownloadError> {
        match std::mem::replace(&mut self.phase, Phase::ResolveDns) {
            Phase::ResolveDns => {
                let (host, port) = self.resolve_target(ctx.config())?;
                let addrs = resolve_host(&host, port).await?;
                let origin = self.request.host_str().unwrap_or_default().to_string();
                self.scope
                    .group()
                    .register_server_host(ServerHost::new(self.cuid, origin));
                self.phase = Phase::Connect { addrs };
                Ok(Execution::Requeue)
            }
            Phase::Connect { addrs } => {
                self.create_next_command(ctx, &addrs).await?;
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
