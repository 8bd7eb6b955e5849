//! 루프백 서버를 상대로 한 전체 전송 테스트

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use tftp::{Client, Config, Error, ErrorCode, Packet, Request, Server, ServerStats};

fn fast_config() -> Config {
    Config::new().with_timing(Duration::from_secs(2), Duration::from_millis(300))
}

async fn start_server(root: &Path, config: Config) -> (SocketAddr, Server, JoinHandle<()>) {
    let bound = Server::new(root, config)
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = bound.local_addr().unwrap();
    let server = bound.server().clone();
    let handle = tokio::spawn(async move {
        let _ = bound.serve().await;
    });
    (addr, server, handle)
}

/// 핸들러 태스크는 클라이언트보다 늦게 끝날 수 있으므로 통계를 폴링
async fn wait_for_stats(server: &Server, done: impl Fn(&ServerStats) -> bool) -> ServerStats {
    for _ in 0..200 {
        let stats = server.stats();
        if done(&stats) {
            return stats;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("server stats never settled: {:?}", server.stats());
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = vec![0u8; 2048];
    let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no reply from server")
        .unwrap();
    (Packet::decode(&buf[..len]).unwrap(), from)
}

#[tokio::test]
async fn test_get_file() {
    let dir = tempfile::tempdir().unwrap();
    let content = random_bytes(1000);
    std::fs::write(dir.path().join("hello.bin"), &content).unwrap();

    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let (data, stats) = client.get_bytes("hello.bin").await.unwrap();
    assert_eq!(data, content);
    assert_eq!(stats.total_bytes, 1000);
    assert_eq!(stats.total_blocks, 2);

    let server_stats = wait_for_stats(&server, |s| s.completed == 1).await;
    assert_eq!(server_stats.accepted, 1);
    assert_eq!(server_stats.failed, 0);
    assert_eq!(server_stats.in_flight(), 0);
    assert_eq!(server_stats.bytes_sent, 1000);
    assert_eq!(server.active_transfers(), 0);
    assert_eq!(server.root(), dir.path());

    handle.abort();
}

#[tokio::test]
async fn test_get_exact_multiple_of_block_size() {
    let dir = tempfile::tempdir().unwrap();
    let content = random_bytes(1024);
    std::fs::write(dir.path().join("even.bin"), &content).unwrap();

    let (addr, _server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let (data, stats) = client.get_bytes("even.bin").await.unwrap();
    assert_eq!(data, content);
    // 512 + 512 + 빈 마지막 블록
    assert_eq!(stats.total_blocks, 3);

    handle.abort();
}

#[tokio::test]
async fn test_get_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty"), b"").unwrap();

    let (addr, _server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let (data, stats) = client.get_bytes("empty").await.unwrap();
    assert!(data.is_empty());
    assert_eq!(stats.total_blocks, 1);

    handle.abort();
}

#[tokio::test]
async fn test_put_file() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let content = random_bytes(1024);
    let stats = client.put_bytes("upload.bin", &content).await.unwrap();
    assert_eq!(stats.total_bytes, 1024);
    assert_eq!(stats.total_blocks, 3);

    let server_stats = wait_for_stats(&server, |s| s.completed == 1).await;
    assert_eq!(server_stats.bytes_received, 1024);
    assert_eq!(std::fs::read(dir.path().join("upload.bin")).unwrap(), content);

    handle.abort();
}

#[tokio::test]
async fn test_put_then_get_with_block_size() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config().with_block_size(1428));

    let content = random_bytes(5000);
    let put = client.put_bytes("roundtrip.bin", &content).await.unwrap();
    assert_eq!(put.block_size, 1428);
    assert_eq!(put.total_blocks, 4);

    let (data, get) = client.get_bytes("roundtrip.bin").await.unwrap();
    assert_eq!(data, content);
    assert_eq!(get.block_size, 1428);
    assert_eq!(get.total_blocks, 4);

    handle.abort();
}

#[tokio::test]
async fn test_server_clamps_block_size() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), random_bytes(3000)).unwrap();

    let mut server_config = fast_config();
    server_config.max_block_size = 1024;
    let (addr, server, handle) = start_server(dir.path(), server_config).await;

    // 서버가 1024로 줄인 OACK를 보내면 클라이언트는 협상 실패로 중단
    let client = Client::new(addr, fast_config().with_block_size(2048));
    let err = client.get_bytes("f").await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::BlockSizeMismatch {
                requested: 2048,
                offered: 1024
            }
        ),
        "{:?}",
        err
    );

    // 서버는 클라이언트의 에러 패킷(code 8)을 받고 실패로 기록
    let server_stats = wait_for_stats(&server, |s| s.failed == 1).await;
    assert_eq!(server_stats.completed, 0);

    handle.abort();
}

#[tokio::test]
async fn test_server_oack_raw() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), random_bytes(100)).unwrap();

    let mut server_config = fast_config();
    server_config.max_block_size = 1024;
    let (addr, _server, handle) = start_server(dir.path(), server_config).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::ReadRequest(Request::new("f").with_block_size(4096));
    socket.send_to(&rrq.encode(), addr).await.unwrap();

    let (oack, tid) = recv_packet(&socket).await;
    assert_ne!(tid, addr, "transfer must use a fresh socket");
    assert_eq!(oack, Packet::option_ack_block_size(1024));

    socket.send_to(&Packet::Ack { block: 0 }.encode(), tid).await.unwrap();
    let (data, from) = recv_packet(&socket).await;
    assert_eq!(from, tid);
    match data {
        Packet::Data { block, data } => {
            assert_eq!(block, 1);
            assert_eq!(data.len(), 100);
        }
        other => panic!("expected DATA, got {:?}", other),
    }
    socket.send_to(&Packet::Ack { block: 1 }.encode(), tid).await.unwrap();

    handle.abort();
}

#[tokio::test]
async fn test_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let err = client.get_bytes("missing.bin").await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Remote {
                code: ErrorCode::FileNotFound,
                ..
            }
        ),
        "{:?}",
        err
    );

    wait_for_stats(&server, |s| s.failed == 1).await;
    handle.abort();
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let outer = tempfile::tempdir().unwrap();
    let root = outer.path().join("root");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(outer.path().join("secret"), b"top secret").unwrap();

    let (addr, _server, handle) = start_server(&root, fast_config()).await;
    let client = Client::new(addr, fast_config());

    for name in ["../secret", "/etc/passwd"] {
        let err = client.get_bytes(name).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Remote {
                    code: ErrorCode::AccessViolation,
                    ..
                }
            ),
            "{}: {:?}",
            name,
            err
        );
    }

    let err = client.put_bytes("../escape", b"x").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Remote {
            code: ErrorCode::AccessViolation,
            ..
        }
    ));
    assert!(!outer.path().join("escape").exists());

    handle.abort();
}

#[tokio::test]
async fn test_unsupported_mode() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"data").unwrap();
    let (addr, _server, handle) = start_server(dir.path(), fast_config()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut request = Request::new("f");
    request.mode = "mail".to_string();
    socket
        .send_to(&Packet::ReadRequest(request).encode(), addr)
        .await
        .unwrap();

    let (reply, _) = recv_packet(&socket).await;
    assert!(matches!(
        reply,
        Packet::Error {
            code: ErrorCode::IllegalOperation,
            ..
        }
    ));

    handle.abort();
}

#[tokio::test]
async fn test_duplicate_request_dropped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("small"), b"hello").unwrap();
    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::ReadRequest(Request::new("small")).encode();
    socket.send_to(&rrq, addr).await.unwrap();

    let (first, tid) = recv_packet(&socket).await;
    assert!(matches!(first, Packet::Data { block: 1, .. }));

    // 첫 전송이 ACK를 기다리는 동안 같은 요청을 다시 보냄
    socket.send_to(&rrq, addr).await.unwrap();
    let stats = wait_for_stats(&server, |s| s.dropped == 1).await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.in_flight(), 1);

    socket.send_to(&Packet::Ack { block: 1 }.encode(), tid).await.unwrap();
    wait_for_stats(&server, |s| s.completed == 1).await;
    assert_eq!(server.active_transfers(), 0);

    handle.abort();
}

#[tokio::test]
async fn test_server_retransmits_data() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("small"), b"hello").unwrap();
    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&Packet::ReadRequest(Request::new("small")).encode(), addr)
        .await
        .unwrap();

    // ACK 없이 기다리면 같은 DATA가 다시 옴
    let (first, tid) = recv_packet(&socket).await;
    let (second, from) = recv_packet(&socket).await;
    assert_eq!(from, tid);
    assert_eq!(first, second);

    socket.send_to(&Packet::Ack { block: 1 }.encode(), tid).await.unwrap();
    wait_for_stats(&server, |s| s.completed == 1).await;

    handle.abort();
}

#[tokio::test]
async fn test_non_request_packets_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"still serving").unwrap();
    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&Packet::Ack { block: 3 }.encode(), addr).await.unwrap();
    socket.send_to(&[0x00, 0x09, 0x00], addr).await.unwrap();
    wait_for_stats(&server, |s| s.dropped == 2).await;

    let client = Client::new(addr, fast_config());
    let (data, _) = client.get_bytes("f").await.unwrap();
    assert_eq!(data, b"still serving");

    handle.abort();
}

#[tokio::test]
async fn test_concurrent_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let content = random_bytes(20_000);
    std::fs::write(dir.path().join("shared.bin"), &content).unwrap();

    let (addr, server, handle) = start_server(dir.path(), fast_config()).await;
    let client = Client::new(addr, fast_config());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                client.get_bytes("shared.bin").await.map(|(data, _)| data)
            } else {
                let upload = vec![i as u8; 3000];
                client
                    .put_bytes(&format!("up-{}.bin", i), &upload)
                    .await
                    .map(|_| upload)
            }
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let data = task.await.unwrap().unwrap();
        if i % 2 == 0 {
            assert_eq!(data, content);
        } else {
            let written = std::fs::read(dir.path().join(format!("up-{}.bin", i))).unwrap();
            assert_eq!(written, data);
        }
    }

    let stats = wait_for_stats(&server, |s| s.completed == 8).await;
    assert_eq!(stats.in_flight(), 0);
    assert_eq!(stats.bytes_sent, 4 * 20_000);
    assert_eq!(stats.bytes_received, 4 * 3000);

    handle.abort();
}

#[tokio::test]
async fn test_client_times_out_without_server() {
    // 아무도 응답하지 않는 포트
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let config = Config::new().with_timing(Duration::from_millis(300), Duration::from_millis(100));
    let client = Client::new(addr, config);

    let err = client.get_bytes("anything").await.unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
}
