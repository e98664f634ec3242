//! The cooperative command scheduler and its shared resources.
//!
//! The engine owns a FIFO queue of commands, each a small state machine
//! advanced one phase per tick. Everything runs on a single executor:
//! commands never overlap, so the state they share (groups, stores,
//! runtime counters) needs no locking. The socket pool and the cuid
//! allocator live here because both belong to the engine rather than to
//! any one download.

mod command;
mod core;
#[cfg(test)]
mod integration_tests;
mod socket_pool;

pub use command::{Command, CommandScope, Cuid, Execution};
pub use core::{DownloadEngine, EngineContext};
pub use socket_pool::{PoolKind, PooledSocket, SocketPool};
