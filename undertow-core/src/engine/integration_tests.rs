//! End-to-end scheduler tests driving real sockets on localhost.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use crate::config::UndertowConfig;
use crate::download::{DownloadContext, DownloadError, DownloadOutcome, PieceStore, RequestGroup};
use crate::engine::{Command, Cuid, DownloadEngine, EngineContext, Execution};
use crate::http::HttpInitiateConnectionCommand;
use crate::torrent::{ActivePeerConnectionCommand, BtAnnounce, BtContext, BtRuntime, InfoHash, Peer, PeerStore};

async fn one_shot_http_server(body: &'static str) -> (u16, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = stream.read(&mut request).await.unwrap();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });
    (port, server)
}

#[tokio::test]
async fn test_engine_downloads_payload_end_to_end() {
    let (port, server) = one_shot_http_server("hello world").await;

    let config = Rc::new(UndertowConfig::default());
    let mut engine = DownloadEngine::new(Rc::clone(&config));
    let uri = Url::parse(&format!("http://127.0.0.1:{port}/payload.bin")).unwrap();
    let group = Rc::new(RequestGroup::new(Rc::clone(&config), vec![uri]));
    group.set_download_context(Rc::new(DownloadContext::new(4, 11, "/tmp/payload.bin")));
    group.init_piece_storage();

    let uri = group.pop_uri().unwrap();
    let cuid = engine.context_mut().new_cuid();
    engine.add_request_group(Rc::clone(&group));
    engine.enqueue(Box::new(HttpInitiateConnectionCommand::new(
        cuid,
        uri,
        Rc::clone(&group),
    )));

    let results = engine.run().await;
    server.await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, DownloadOutcome::Finished);
    assert_eq!(results[0].session_download_length, 11);
    assert_eq!(results[0].file_path, "/tmp/payload.bin");
    assert!(group.piece_store().unwrap().all_pieces_done());
}

#[tokio::test]
async fn test_failed_download_rolls_up_last_outcome() {
    // Nothing listens here, so the connect is refused
    let config = Rc::new(UndertowConfig::default());
    let mut engine = DownloadEngine::new(Rc::clone(&config));
    let uri = Url::parse("http://127.0.0.1:1/payload.bin").unwrap();
    let group = Rc::new(RequestGroup::new(Rc::clone(&config), vec![uri.clone()]));

    let cuid = engine.context_mut().new_cuid();
    engine.add_request_group(Rc::clone(&group));
    engine.enqueue(Box::new(HttpInitiateConnectionCommand::new(
        cuid,
        uri,
        Rc::clone(&group),
    )));

    let results = engine.run().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, DownloadOutcome::UnknownError);
    assert_eq!(group.uri_results().len(), 1);
}

/// Test-only command that requests a halt after a fixed number of ticks.
struct HaltAfter {
    cuid: Cuid,
    runtime: Rc<BtRuntime>,
    ticks_left: usize,
}

#[async_trait(?Send)]
impl Command for HaltAfter {
    fn cuid(&self) -> Cuid {
        self.cuid
    }

    async fn execute(&mut self, _ctx: &mut EngineContext) -> Result<Execution, DownloadError> {
        if self.ticks_left == 0 {
            self.runtime.request_halt();
            return Ok(Execution::Done);
        }
        self.ticks_left -= 1;
        Ok(Execution::Requeue)
    }
}

#[tokio::test]
async fn test_peer_admission_runs_until_halt() {
    let mut config = UndertowConfig::default();
    config.bt.check_interval = Duration::ZERO;
    config.bt.peer_connect_timeout = Duration::from_secs(1);
    config.engine.tick_interval = Duration::from_millis(1);
    let config = Rc::new(config);

    let mut engine = DownloadEngine::new(Rc::clone(&config));
    let group = Rc::new(RequestGroup::new(Rc::clone(&config), Vec::new()));
    let runtime = Rc::new(BtRuntime::new(config.bt.max_peers, config.bt.min_peers));
    let peer_store = Rc::new(PeerStore::new());
    // A port that was just released: connects are refused immediately
    let closed_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    for index in 0..3u8 {
        peer_store.add_peer(Rc::new(Peer::new(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, index + 1)),
            closed_port,
        ))));
    }
    let piece_store = Rc::new(PieceStore::new(16384, 1024 * 1024));
    let announce = Rc::new(BtAnnounce::new(Duration::from_secs(1800)));

    let controller_cuid = engine.context_mut().new_cuid();
    let controller = ActivePeerConnectionCommand::new(
        controller_cuid,
        Rc::clone(&group),
        Rc::new(BtContext::new(InfoHash::new([9u8; 20]))),
        Rc::clone(&runtime),
        Rc::clone(&peer_store),
        Rc::clone(&piece_store),
        Rc::clone(&announce),
    );
    let halter_cuid = engine.context_mut().new_cuid();
    engine.add_request_group(Rc::clone(&group));
    engine.enqueue(Box::new(controller));
    engine.enqueue(Box::new(HaltAfter {
        cuid: halter_cuid,
        runtime: Rc::clone(&runtime),
        ticks_left: 3,
    }));

    let results = engine.run().await;

    // Everything wound down cooperatively
    assert!(runtime.is_halt());
    assert_eq!(runtime.connections(), 0);
    assert_eq!(group.num_command(), 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, DownloadOutcome::UnknownError);
}
