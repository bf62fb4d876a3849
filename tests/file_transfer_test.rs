use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use sendfile::file_transfer::{
    FileRequest, FileTransferCodec, Requester, Responder, SessionOptions, SizeHeader,
    TransferError,
};
use sendfile::network::{FileServer, ServeSummary, TcpTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<ServeSummary, TransferError>>,
}

impl TestServer {
    async fn start(root: &Path) -> Self {
        Self::start_with(root, SessionOptions::default(), Duration::from_secs(5)).await
    }

    async fn start_with(root: &Path, options: SessionOptions, grace: Duration) -> Self {
        let responder = Responder::new(root, options);
        let server = FileServer::bind_with(
            &TcpTransport::new(),
            "127.0.0.1:0".parse().unwrap(),
            responder,
            grace,
        )
        .await
        .expect("bind test server");
        let addr = server.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));
        Self { addr, stop, handle }
    }

    fn addr(&self) -> String {
        self.addr.to_string()
    }

    async fn shutdown(self) -> ServeSummary {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap()
    }
}

fn requester() -> Requester<TcpTransport> {
    Requester::new(TcpTransport::new(), SessionOptions::default())
}

fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Larger than loopback socket buffers can absorb, so the responder blocks
/// while the requester is not reading
const LARGE_FILE: usize = 32 * 1024 * 1024;

/// Send a request on a raw connection and read back the size header
async fn request_raw(addr: &str, name: &str) -> (TcpStream, SizeHeader) {
    let codec = FileTransferCodec::new();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    codec
        .write_request(&mut stream, &FileRequest::new(name))
        .await
        .unwrap();
    let size = codec.read_size(&mut stream).await.unwrap();
    (stream, size)
}

#[tokio::test]
async fn test_fetch_small_text_file() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    tokio::fs::write(served.path().join("report.txt"), b"hello world")
        .await
        .unwrap();
    let server = TestServer::start(served.path()).await;

    let destination = local.path().join("report-copy.txt");
    let report = requester()
        .fetch(&server.addr(), "report.txt", &destination)
        .await
        .unwrap();

    assert_eq!(report.bytes, 11);
    assert_eq!(report.name, "report.txt");
    assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"hello world");

    let summary = server.shutdown().await;
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn test_fetch_missing_file_reports_not_found() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let server = TestServer::start(served.path()).await;

    let destination = local.path().join("missing.bin");
    let result = requester()
        .fetch(&server.addr(), "missing.bin", &destination)
        .await;

    match result {
        Err(TransferError::RemoteFileNotFound { name }) => assert_eq!(name, "missing.bin"),
        other => panic!("expected not found, got {:?}", other),
    }
    assert!(!destination.exists(), "no local file should be created");

    let summary = server.shutdown().await;
    assert_eq!(summary.not_found, 1);
}

#[tokio::test]
async fn test_fetch_zero_length_file() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    tokio::fs::write(served.path().join("empty.dat"), b"").await.unwrap();
    let server = TestServer::start(served.path()).await;

    let destination = local.path().join("empty.dat");
    let report = requester()
        .fetch(&server.addr(), "empty.dat", &destination)
        .await
        .unwrap();

    assert_eq!(report.bytes, 0);
    assert_eq!(tokio::fs::metadata(&destination).await.unwrap().len(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_fetch_truncates_previous_destination() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    tokio::fs::write(served.path().join("short.txt"), b"new").await.unwrap();
    let destination = local.path().join("short.txt");
    tokio::fs::write(&destination, b"much longer old contents")
        .await
        .unwrap();
    let server = TestServer::start(served.path()).await;

    requester()
        .fetch(&server.addr(), "short.txt", &destination)
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"new");
    server.shutdown().await;
}

#[tokio::test]
async fn test_same_file_twice_gives_identical_copies() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let payload = patterned(300 * 1024 + 17, 3);
    tokio::fs::write(served.path().join("data.bin"), &payload)
        .await
        .unwrap();
    let server = TestServer::start(served.path()).await;

    let first = local.path().join("first.bin");
    let second = local.path().join("second.bin");
    requester().fetch(&server.addr(), "data.bin", &first).await.unwrap();
    requester().fetch(&server.addr(), "data.bin", &second).await.unwrap();

    let first = tokio::fs::read(&first).await.unwrap();
    let second = tokio::fs::read(&second).await.unwrap();
    assert_eq!(first, payload);
    assert_eq!(first, second);

    let summary = server.shutdown().await;
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn test_concurrent_clients_get_their_own_files() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let alpha = patterned(2 * 1024 * 1024, 1);
    let beta = patterned(2 * 1024 * 1024 + 5, 200);
    tokio::fs::write(served.path().join("alpha.bin"), &alpha).await.unwrap();
    tokio::fs::write(served.path().join("beta.bin"), &beta).await.unwrap();
    let server = TestServer::start(served.path()).await;

    let addr = server.addr();
    let alpha_dest = local.path().join("alpha.bin");
    let beta_dest = local.path().join("beta.bin");
    let alpha_requester = requester();
    let beta_requester = requester();

    let (a, b) = tokio::join!(
        alpha_requester.fetch(&addr, "alpha.bin", &alpha_dest),
        beta_requester.fetch(&addr, "beta.bin", &beta_dest),
    );
    assert_eq!(a.unwrap().bytes, alpha.len() as u64);
    assert_eq!(b.unwrap().bytes, beta.len() as u64);

    assert_eq!(tokio::fs::read(&alpha_dest).await.unwrap(), alpha);
    assert_eq!(tokio::fs::read(&beta_dest).await.unwrap(), beta);

    let summary = server.shutdown().await;
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn test_connection_dropped_mid_payload() {
    const TOTAL: u64 = 10 * 1024 * 1024;
    const SENT: usize = 4 * 1024 * 1024;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // a responder that announces 10 MB but hangs up after 4 MB
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = FileTransferCodec::new();
        codec.read_request(&mut stream).await.unwrap();
        codec
            .write_size(&mut stream, sendfile::SizeHeader::Found(TOTAL))
            .await
            .unwrap();
        stream.write_all(&vec![0x5a; SENT]).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let local = tempfile::tempdir().unwrap();
    let destination = local.path().join("big.bin");
    let result = requester()
        .fetch(&addr.to_string(), "big.bin", &destination)
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.achieved_offset(), Some(SENT as u64));
    match err {
        TransferError::IncompleteTransfer { offset, total, .. } => {
            assert_eq!(offset, SENT as u64);
            assert_eq!(total, TOTAL);
        }
        other => panic!("expected incomplete transfer, got {:?}", other),
    }
    assert_eq!(
        tokio::fs::metadata(&destination).await.unwrap().len(),
        SENT as u64
    );
}

#[tokio::test]
async fn test_path_traversal_is_not_found() {
    let parent = tempfile::tempdir().unwrap();
    let served = parent.path().join("public");
    tokio::fs::create_dir(&served).await.unwrap();
    tokio::fs::write(parent.path().join("secret.txt"), b"top secret")
        .await
        .unwrap();
    let server = TestServer::start(&served).await;

    let local = tempfile::tempdir().unwrap();
    let destination = local.path().join("stolen.txt");
    let result = requester()
        .fetch(&server.addr(), "../secret.txt", &destination)
        .await;

    assert!(matches!(result, Err(TransferError::RemoteFileNotFound { .. })));
    assert!(!destination.exists());
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    // grab a free port, then close it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let local = tempfile::tempdir().unwrap();
    let result = requester()
        .fetch(&addr.to_string(), "anything", &local.path().join("x"))
        .await;
    assert!(matches!(result, Err(TransferError::Transport(_))));
}

#[tokio::test]
async fn test_unusable_name_is_rejected_before_connecting() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let server = TestServer::start(served.path()).await;

    let destination = local.path().join("out");
    let empty = requester().fetch(&server.addr(), "", &destination).await;
    assert!(matches!(empty, Err(TransferError::InvalidRequest(_))));

    let long_name = "n".repeat(sendfile::protocol::MAX_NAME_LEN + 1);
    let long = requester()
        .fetch(&server.addr(), long_name.as_str(), &destination)
        .await;
    assert!(matches!(long, Err(TransferError::InvalidRequest(_))));
    assert!(!destination.exists());

    let summary = server.shutdown().await;
    assert_eq!(summary.accepted, 0);
}

#[tokio::test]
async fn test_requester_hanging_up_mid_payload_fails_only_its_session() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    tokio::fs::write(served.path().join("large.bin"), patterned(LARGE_FILE, 9))
        .await
        .unwrap();
    tokio::fs::write(served.path().join("small.txt"), b"still serving")
        .await
        .unwrap();
    let server = TestServer::start(served.path()).await;

    let (mut stream, size) = request_raw(&server.addr(), "large.bin").await;
    assert_eq!(size, SizeHeader::Found(LARGE_FILE as u64));
    let mut first = vec![0u8; 64 * 1024];
    stream.read_exact(&mut first).await.unwrap();
    // unread data makes the close a reset for the responder
    drop(stream);

    let destination = local.path().join("small.txt");
    requester()
        .fetch(&server.addr(), "small.txt", &destination)
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"still serving");

    let summary = server.shutdown().await;
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.aborted, 0);
}

#[tokio::test]
async fn test_sessions_past_shutdown_grace_are_aborted() {
    let served = tempfile::tempdir().unwrap();
    tokio::fs::write(served.path().join("large.bin"), patterned(LARGE_FILE, 4))
        .await
        .unwrap();
    let server = TestServer::start_with(
        served.path(),
        SessionOptions::default(),
        Duration::from_millis(200),
    )
    .await;

    // the responder is now streaming and will block once buffers fill
    let (stalled, size) = request_raw(&server.addr(), "large.bin").await;
    assert_eq!(size, SizeHeader::Found(LARGE_FILE as u64));

    let summary = tokio::time::timeout(Duration::from_secs(10), server.shutdown())
        .await
        .expect("shutdown should finish after the grace period");
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.completed, 0);
    drop(stalled);
}

#[tokio::test]
async fn test_idle_timeout_closes_silent_session() {
    let served = tempfile::tempdir().unwrap();
    let options = SessionOptions {
        idle_timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let server = TestServer::start_with(served.path(), options, Duration::from_secs(5)).await;

    // connect and never send a request
    let mut silent = TcpStream::connect(server.addr()).await.unwrap();
    let mut reply = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), silent.read_to_end(&mut reply))
        .await
        .expect("responder should give up on the idle connection");
    assert_eq!(read.unwrap(), 0);
    assert!(reply.is_empty());

    let summary = server.shutdown().await;
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.failed, 1);
}
