//! The unit of work driven by the download engine.

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use url::Url;

use crate::download::{DownloadError, RequestGroup};
use crate::engine::EngineContext;

/// Command unique id.
///
/// Allocated by the engine from a monotonically increasing counter and
/// never reused within a process lifetime. Also tags the peers and server
/// hosts a command discovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cuid(pub u64);

impl Cuid {
    /// Returns the underlying id value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the engine should do with a command after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The command is terminal; drop it
    Done,
    /// Re-append the command at the queue tail for another tick
    Requeue,
}

/// One schedulable state-machine work unit.
///
/// A command advances at most one phase boundary per `execute` tick and
/// must never block outside a single awaited readiness point. Successor
/// commands are enqueued through the context; the command itself is
/// re-enqueued by returning [`Execution::Requeue`].
#[async_trait(?Send)]
pub trait Command {
    /// This command's unique id.
    fn cuid(&self) -> Cuid;

    /// Advances the command by one tick.
    ///
    /// # Errors
    ///
    /// - `DownloadError` - the command aborted; the engine records the
    ///   error's outcome against the command's target URI and drops it
    async fn execute(&mut self, ctx: &mut EngineContext) -> Result<Execution, DownloadError>;

    /// The request group this command is bound to, if any.
    fn request_group(&self) -> Option<&Rc<RequestGroup>> {
        None
    }

    /// The URI this command is fetching, if any.
    fn target_uri(&self) -> Option<&Url> {
        None
    }
}

/// Scoped binding of a command to its request group.
///
/// Construction increments the group's active-command count and `Drop`
/// decrements it, so the count stays exact on every exit path, abort
/// included.
pub struct CommandScope {
    group: Rc<RequestGroup>,
}

impl CommandScope {
    /// Binds to a group, incrementing its active-command count.
    pub fn attach(group: Rc<RequestGroup>) -> Self {
        group.increase_num_command();
        Self { group }
    }

    /// The bound group.
    pub fn group(&self) -> &Rc<RequestGroup> {
        &self.group
    }
}

impl Drop for CommandScope {
    fn drop(&mut self) {
        self.group.decrease_num_command();
    }
}
