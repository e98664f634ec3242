//! The single-threaded cooperative command scheduler.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::rc::Rc;

use crate::config::UndertowConfig;
use crate::download::{DownloadError, DownloadResult, RequestGroup};
use crate::engine::command::{Command, Cuid, Execution};
use crate::engine::socket_pool::{PoolKind, PooledSocket, SocketPool};
use crate::network::Socket;

/// Engine state commands may touch while executing.
///
/// Split from [`DownloadEngine`] so a command borrowed out of the queue
/// can still allocate cuids, enqueue successors, and use the socket pool.
pub struct EngineContext {
    next_cuid: u64,
    socket_pool: SocketPool,
    pending: Vec<Box<dyn Command>>,
    config: Rc<UndertowConfig>,
}

impl EngineContext {
    fn new(config: Rc<UndertowConfig>) -> Self {
        Self {
            next_cuid: 1,
            socket_pool: SocketPool::new(),
            pending: Vec::new(),
            config,
        }
    }

    /// Allocates the next command unique id.
    ///
    /// Strictly monotonically increasing; ids are never reused within a
    /// process lifetime.
    pub fn new_cuid(&mut self) -> Cuid {
        let cuid = Cuid(self.next_cuid);
        self.next_cuid += 1;
        cuid
    }

    /// Appends a command for execution after the current tick.
    pub fn enqueue(&mut self, command: Box<dyn Command>) {
        self.pending.push(command);
    }

    /// Shared configuration.
    pub fn config(&self) -> &Rc<UndertowConfig> {
        &self.config
    }

    /// Removes and returns the idle socket pooled under `(host, port)`.
    pub fn pop_pooled_socket(&mut self, host: &str, port: u16) -> Option<PooledSocket> {
        self.socket_pool.pop(host, port)
    }

    /// Removes and returns an idle socket connected to any of `addrs` on
    /// the given port.
    pub fn pop_pooled_socket_any(&mut self, addrs: &[IpAddr], port: u16) -> Option<PooledSocket> {
        self.socket_pool.pop_any(addrs, port)
    }

    /// Donates an idle socket for later reuse.
    pub fn push_pooled_socket(&mut self, socket: Socket, host: &str, port: u16, kind: PoolKind) {
        self.socket_pool.push(socket, host, port, kind);
    }

    /// Number of successor commands enqueued this tick and not yet moved
    /// onto the engine queue.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn take_pending(&mut self) -> Vec<Box<dyn Command>> {
        std::mem::take(&mut self.pending)
    }
}

/// Owns the command queue and drives every download.
///
/// Exactly one executor: commands run strictly serialized in FIFO order,
/// so no state shared between them needs locking. A command that returns
/// [`Execution::Requeue`] lands after everything already queued,
/// including successors it enqueued this tick.
pub struct DownloadEngine {
    commands: VecDeque<Box<dyn Command>>,
    context: EngineContext,
    groups: Vec<Rc<RequestGroup>>,
    results: Vec<DownloadResult>,
}

impl DownloadEngine {
    /// Creates an engine with an empty queue and registry.
    pub fn new(config: Rc<UndertowConfig>) -> Self {
        Self {
            commands: VecDeque::new(),
            context: EngineContext::new(config),
            groups: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Shared engine state.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Shared engine state, mutably.
    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    /// Registers a request group; the engine reaps it into a
    /// [`DownloadResult`] once its last bound command is gone.
    pub fn add_request_group(&mut self, group: Rc<RequestGroup>) {
        self.groups.push(group);
    }

    /// Appends a command at the queue tail.
    pub fn enqueue(&mut self, command: Box<dyn Command>) {
        self.commands.push_back(command);
    }

    /// Number of commands currently queued.
    pub fn queue_len(&self) -> usize {
        self.commands.len()
    }

    /// Drains the command queue until nothing can make further progress,
    /// then returns the rolled-up result of every registered group.
    ///
    /// Each loop iteration processes one generation (the queue length at
    /// entry) so re-enqueued commands wait for their siblings. A
    /// generation in which every command merely re-enqueued sleeps one
    /// tick interval before the next pass.
    pub async fn run(&mut self) -> Vec<DownloadResult> {
        while !self.commands.is_empty() {
            let generation = self.commands.len();
            let mut progressed = false;

            for _ in 0..generation {
                let Some(mut command) = self.commands.pop_front() else {
                    break;
                };
                let outcome = command.execute(&mut self.context).await;

                let followers = self.context.take_pending();
                progressed |= !followers.is_empty();
                self.commands.extend(followers);

                match outcome {
                    Ok(Execution::Requeue) => self.commands.push_back(command),
                    Ok(Execution::Done) => progressed = true,
                    Err(error) => {
                        progressed = true;
                        Self::report_abort(command.as_ref(), &error);
                    }
                }
            }

            self.reap_finished_groups();

            if !progressed && !self.commands.is_empty() {
                tokio::time::sleep(self.context.config.engine.tick_interval).await;
            }
        }

        self.reap_finished_groups();
        std::mem::take(&mut self.results)
    }

    /// Rolls up and removes every group with no live commands left.
    fn reap_finished_groups(&mut self) {
        let mut index = 0;
        while index < self.groups.len() {
            if self.groups[index].num_command() == 0 {
                let group = self.groups.remove(index);
                let result = group.create_download_result();
                tracing::info!(
                    "download {} finished with {:?}",
                    result.file_path,
                    result.result
                );
                self.results.push(result);
            } else {
                index += 1;
            }
        }
    }

    /// Records an aborted command's outcome against its target URI.
    fn report_abort(command: &dyn Command, error: &DownloadError) {
        tracing::warn!("command {} aborted: {}", command.cuid(), error);
        if let (Some(group), Some(uri)) = (command.request_group(), command.target_uri()) {
            group.add_uri_result(uri.as_str(), error.outcome());
        }
    }
}
