//! The authoritative state container for one logical download.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use url::Url;

use crate::config::UndertowConfig;
use crate::download::piece_store::PieceStore;
use crate::download::{DownloadContext, DownloadOutcome, DownloadResult, ServerHost, UriResult};
use crate::engine::Cuid;
use crate::transfer::{TransferCounter, TransferStat};

/// Aggregate state of a single logical download.
///
/// Holds the remaining URIs, the per-URI attempt results, the discovered
/// server hosts, the piece store, and the live-command refcount. Owned by
/// the engine's group registry; commands hold non-owning-by-construction
/// `Rc` handles (no group ever owns a command, so no cycle can form).
/// All interior mutability is `Cell`/`RefCell` because the engine runs
/// exactly one executor.
pub struct RequestGroup {
    config: Rc<UndertowConfig>,
    uris: RefCell<VecDeque<Url>>,
    uri_results: RefCell<Vec<UriResult>>,
    server_hosts: RefCell<HashMap<Cuid, ServerHost>>,
    context: RefCell<Option<Rc<DownloadContext>>>,
    piece_store: RefCell<Option<Rc<PieceStore>>>,
    num_command: Cell<usize>,
    in_memory: Cell<bool>,
    transfer: RefCell<TransferCounter>,
    max_download_speed_limit: Cell<u64>,
    max_upload_speed_limit: Cell<u64>,
    created_at: Instant,
}

impl RequestGroup {
    /// Creates a group for the given source URIs.
    ///
    /// Speed caps snapshot from the configuration; 0 means unlimited.
    pub fn new(config: Rc<UndertowConfig>, uris: impl IntoIterator<Item = Url>) -> Self {
        let max_download = config.network.max_download_speed;
        let max_upload = config.network.max_upload_speed;
        Self {
            config,
            uris: RefCell::new(uris.into_iter().collect()),
            uri_results: RefCell::new(Vec::new()),
            server_hosts: RefCell::new(HashMap::new()),
            context: RefCell::new(None),
            piece_store: RefCell::new(None),
            num_command: Cell::new(0),
            in_memory: Cell::new(false),
            transfer: RefCell::new(TransferCounter::new()),
            max_download_speed_limit: Cell::new(max_download),
            max_upload_speed_limit: Cell::new(max_upload),
            created_at: Instant::now(),
        }
    }

    /// Shared configuration snapshot for this group.
    pub fn config(&self) -> &Rc<UndertowConfig> {
        &self.config
    }

    /// Attaches the payload description.
    pub fn set_download_context(&self, context: Rc<DownloadContext>) {
        *self.context.borrow_mut() = Some(context);
    }

    /// Payload description, once attached.
    pub fn download_context(&self) -> Option<Rc<DownloadContext>> {
        self.context.borrow().clone()
    }

    /// Constructs the piece store from the download context.
    ///
    /// A no-op until a context has been attached.
    pub fn init_piece_storage(&self) {
        if let Some(context) = self.context.borrow().as_ref() {
            *self.piece_store.borrow_mut() = Some(Rc::new(PieceStore::from_context(context)));
        }
    }

    /// Piece store, once initialized.
    pub fn piece_store(&self) -> Option<Rc<PieceStore>> {
        self.piece_store.borrow().clone()
    }

    // --- server host registry -------------------------------------------

    /// Inserts a discovered host; last writer wins on id collision.
    pub fn register_server_host(&self, host: ServerHost) {
        self.server_hosts.borrow_mut().insert(host.id, host);
    }

    /// Looks up a discovered host by the cuid that found it.
    pub fn search_server_host(&self, id: Cuid) -> Option<ServerHost> {
        self.server_hosts.borrow().get(&id).cloned()
    }

    /// Removes a registry entry; absent ids are ignored.
    pub fn remove_server_host(&self, id: Cuid) {
        self.server_hosts.borrow_mut().remove(&id);
    }

    // --- URI bookkeeping ------------------------------------------------

    /// Drops every remaining URI whose host equals `hostname`, preserving
    /// the relative order of survivors.
    pub fn remove_uri_whose_hostname_is(&self, hostname: &str) {
        self.uris
            .borrow_mut()
            .retain(|uri| uri.host_str() != Some(hostname));
    }

    /// Insertion-ordered snapshot of the not-yet-attempted URIs.
    pub fn remaining_uris(&self) -> Vec<Url> {
        self.uris.borrow().iter().cloned().collect()
    }

    /// Takes the next URI to attempt, front first.
    pub fn pop_uri(&self) -> Option<Url> {
        self.uris.borrow_mut().pop_front()
    }

    /// Appends an attempt record; duplicate URIs are permitted.
    pub fn add_uri_result(&self, uri: impl Into<String>, outcome: DownloadOutcome) {
        self.uri_results.borrow_mut().push(UriResult {
            uri: uri.into(),
            outcome,
        });
    }

    /// Moves every record with the given outcome into `out`, preserving
    /// relative order on both sides of the partition.
    pub fn extract_uri_result(&self, out: &mut Vec<UriResult>, outcome: DownloadOutcome) {
        let mut results = self.uri_results.borrow_mut();
        let mut remaining = Vec::with_capacity(results.len());
        for record in results.drain(..) {
            if record.outcome == outcome {
                out.push(record);
            } else {
                remaining.push(record);
            }
        }
        *results = remaining;
    }

    /// Snapshot of all attempt records, in insertion order.
    pub fn uri_results(&self) -> Vec<UriResult> {
        self.uri_results.borrow().clone()
    }

    // --- paths and flags ------------------------------------------------

    /// Destination path; `[MEMORY]` + basename once the download has been
    /// marked in-memory.
    pub fn file_path(&self) -> String {
        let path = self
            .context
            .borrow()
            .as_ref()
            .map(|context| context.path().to_string())
            .unwrap_or_default();
        if self.in_memory.get() {
            let basename = Path::new(&path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("[MEMORY]{basename}")
        } else {
            path
        }
    }

    /// Flags the payload as held in memory rather than on disk.
    pub fn mark_in_memory_download(&self) {
        self.in_memory.set(true);
    }

    // --- transfer accounting --------------------------------------------

    /// Records downloaded bytes against this group.
    pub fn record_download(&self, bytes: u64) {
        self.transfer.borrow_mut().record_download(bytes);
    }

    /// Records uploaded bytes against this group.
    pub fn record_upload(&self, bytes: u64) {
        self.transfer.borrow_mut().record_upload(bytes);
    }

    /// Computes a point-in-time transfer snapshot.
    pub fn calculate_stat(&self) -> TransferStat {
        self.transfer.borrow_mut().stat()
    }

    /// Download cap in bytes per second; 0 means unlimited.
    pub fn max_download_speed_limit(&self) -> u64 {
        self.max_download_speed_limit.get()
    }

    /// Upload cap in bytes per second; 0 means unlimited.
    pub fn max_upload_speed_limit(&self) -> u64 {
        self.max_upload_speed_limit.get()
    }

    /// Overrides the download cap; 0 means unlimited.
    pub fn set_max_download_speed_limit(&self, bytes_per_second: u64) {
        self.max_download_speed_limit.set(bytes_per_second);
    }

    /// Overrides the upload cap; 0 means unlimited.
    pub fn set_max_upload_speed_limit(&self, bytes_per_second: u64) {
        self.max_upload_speed_limit.set(bytes_per_second);
    }

    // --- command refcount -----------------------------------------------

    /// Notes one more live command bound to this group.
    pub fn increase_num_command(&self) {
        self.num_command.set(self.num_command.get() + 1);
    }

    /// Notes one fewer live command bound to this group.
    pub fn decrease_num_command(&self) {
        let current = self.num_command.get();
        debug_assert!(current > 0, "command refcount underflow");
        self.num_command.set(current.saturating_sub(1));
    }

    /// Number of live commands currently bound to this group.
    pub fn num_command(&self) -> usize {
        self.num_command.get()
    }

    // --- rollup ---------------------------------------------------------

    /// Rolls the group's state up into a final result.
    ///
    /// Outcome precedence: a fully completed piece store wins outright;
    /// otherwise the outcome of the **last** recorded URI result is taken
    /// (the most recently observed failure class is the most informative);
    /// otherwise the result is `UnknownError`.
    pub fn create_download_result(&self) -> DownloadResult {
        let finished = self
            .piece_store
            .borrow()
            .as_ref()
            .is_some_and(|store| store.all_pieces_done());
        let result = if finished {
            DownloadOutcome::Finished
        } else {
            self.uri_results
                .borrow()
                .last()
                .map(|record| record.outcome)
                .unwrap_or(DownloadOutcome::UnknownError)
        };

        let uris = self.uris.borrow();
        DownloadResult {
            file_path: self.file_path(),
            total_length: self
                .context
                .borrow()
                .as_ref()
                .map(|context| context.total_length())
                .unwrap_or(0),
            uri: uris
                .front()
                .map(|uri| uri.as_str().to_string())
                .unwrap_or_default(),
            num_uri: uris.len(),
            session_download_length: self.transfer.borrow().session_download_length(),
            session_time: self.created_at.elapsed(),
            result,
        }
    }
}

impl std::fmt::Debug for RequestGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGroup")
            .field("remaining_uris", &self.uris.borrow().len())
            .field("num_command", &self.num_command.get())
            .field("file_path", &self.file_path())
            .finish()
    }
}
