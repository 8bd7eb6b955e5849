//! 서버 (요청 디스패처)
//!
//! 리슨 소켓 하나에서 요청만 받음. 요청마다 요청자에게 connect된 새 소켓을 열고
//! 독립 태스크로 핸들러를 실행하며, 디스패처는 핸들러를 기다리지 않음.

pub mod handler;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::packet::{Packet, Request};
use crate::stats::TransferStats;
use crate::{Config, Result};

pub use handler::{resolve_path, TransferKind};

/// 요청 데이터그램 최대 크기
const MAX_REQUEST_SIZE: usize = 65535;

/// 서버 전체 통계
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// 수락한 전송 수
    pub accepted: u64,

    /// 성공한 전송 수
    pub completed: u64,

    /// 실패한 전송 수
    pub failed: u64,

    /// 버린 데이터그램 수 (디코딩 실패, 요청 아님, 중복 요청)
    pub dropped: u64,

    /// 읽기 전송으로 보낸 바이트
    pub bytes_sent: u64,

    /// 쓰기 전송으로 받은 바이트
    pub bytes_received: u64,
}

impl ServerStats {
    fn record_success(&mut self, kind: TransferKind, stats: &TransferStats) {
        self.completed += 1;
        match kind {
            TransferKind::Read => self.bytes_sent += stats.total_bytes,
            TransferKind::Write => self.bytes_received += stats.total_bytes,
        }
    }

    /// 진행 중인 전송 수
    pub fn in_flight(&self) -> u64 {
        self.accepted - self.completed - self.failed
    }
}

struct Shared {
    /// 서빙 루트 (읽기 전용)
    root: PathBuf,

    config: Config,

    /// 진행 중인 전송 (요청자 주소 기준)
    active: DashMap<SocketAddr, TransferKind>,

    stats: RwLock<ServerStats>,
}

/// TFTP 서버
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// 새 서버 생성
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                root: root.into(),
                config,
                active: DashMap::new(),
                stats: RwLock::new(ServerStats::default()),
            }),
        }
    }

    /// 서빙 루트
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// 통계 반환
    pub fn stats(&self) -> ServerStats {
        self.shared.stats.read().clone()
    }

    /// 진행 중인 전송 수
    pub fn active_transfers(&self) -> usize {
        self.shared.active.len()
    }

    /// 리슨 소켓 바인드
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(BoundServer {
            socket,
            server: self,
        })
    }

    /// 바인드 후 서비스 (리슨 소켓 에러 전까지 반환하지 않음)
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        self.bind(addr).await?.serve().await
    }

    /// 요청 하나를 독립 태스크로 넘김
    fn dispatch(&self, kind: TransferKind, request: Request, peer: SocketAddr, local_ip: IpAddr) {
        match self.shared.active.entry(peer) {
            Entry::Occupied(_) => {
                debug!("진행 중인 전송의 중복 요청 무시: {}", peer);
                self.shared.stats.write().dropped += 1;
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(kind);
            }
        }
        self.shared.stats.write().accepted += 1;

        let guard = ActiveGuard {
            shared: self.shared.clone(),
            peer,
        };
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let filename = request.filename.clone();
            let result = handler::handle(
                &shared.root,
                shared.config.clone(),
                kind,
                request,
                peer,
                local_ip,
            )
            .await;
            drop(guard);

            match result {
                Ok(stats) => shared.stats.write().record_success(kind, &stats),
                Err(e) => {
                    warn!("{:?} 전송 실패: {} ({}): {}", kind, filename, peer, e);
                    shared.stats.write().failed += 1;
                }
            }
        });
    }
}

/// 핸들러가 어떤 경로로 끝나든 진행 중 목록에서 제거
struct ActiveGuard {
    shared: Arc<Shared>,
    peer: SocketAddr,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.active.remove(&self.peer);
    }
}

/// 리슨 소켓이 바인드된 서버
pub struct BoundServer {
    socket: UdpSocket,
    server: Server,
}

impl BoundServer {
    /// 실제 바인드 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 서버 핸들 (통계 조회용)
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// 요청 수신 루프
    ///
    /// 잘못된 데이터그램은 로그 후 버림. 리슨 소켓 자체의 IO 에러에서만 반환.
    pub async fn serve(self) -> Result<()> {
        let local_addr = self.socket.local_addr()?;
        let local_ip = local_addr.ip();
        info!(
            "TFTP 서버 시작: {} (root={:?})",
            local_addr, self.server.shared.root
        );

        let mut buf = vec![0u8; MAX_REQUEST_SIZE];

        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;

            let (kind, request) = match Packet::decode(&buf[..len]) {
                Ok(Packet::ReadRequest(request)) => (TransferKind::Read, request),
                Ok(Packet::WriteRequest(request)) => (TransferKind::Write, request),
                Ok(other) => {
                    warn!("요청이 아닌 패킷 무시: {} from {}", other.name(), peer);
                    self.server.shared.stats.write().dropped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("잘못된 패킷 무시 ({}): {}", peer, e);
                    self.server.shared.stats.write().dropped += 1;
                    continue;
                }
            };

            self.server.dispatch(kind, request, peer, local_ip);
        }
    }
}
