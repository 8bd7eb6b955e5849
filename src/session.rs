//! 전송 세션
//!
//! 세션 하나 = 상대 하나 + 전용 소켓 하나. 블록 카운터, 협상된 블록 크기,
//! 누적 통계를 가지고 자기 태스크 안에서만 변경됨. 세션이 drop되면 소켓도 해제.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::packet::{ErrorCode, Packet};
use crate::stats::TransferStats;
use crate::timer::{RetransmitTimer, TimerEvent};
use crate::{Config, Error, Result, DEFAULT_BLOCK_SIZE};

/// 전송 세션
pub struct Session {
    /// 이 전송 전용 소켓
    socket: UdpSocket,

    /// 상대 주소 (TID 포함)
    peer: SocketAddr,

    /// 상대 TID 확정 여부
    /// 클라이언트는 첫 응답을 받을 때까지 서버의 리슨 주소만 알고 있음
    peer_locked: bool,

    /// 소켓이 상대에게 connect 되었는지
    connected: bool,

    /// 현재 블록 번호 (0 = 요청/협상 단계)
    block: u16,

    /// 협상된 블록 크기
    block_size: u16,

    config: Config,

    stats: TransferStats,

    /// 지금 기다리는 응답의 데드라인
    /// 응답을 기대하는 패킷을 보낼 때만 다시 잡히고, 무시한 패킷으로는 밀리지 않음
    reply_deadline: Instant,

    /// 수신 버퍼
    buf: Vec<u8>,
}

impl Session {
    /// 서버측 세션: 리슨 IP의 임시 포트에 바인드하고 요청자에게 connect
    pub async fn server(local_ip: IpAddr, peer: SocketAddr, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        socket.connect(peer).await?;

        Ok(Self::with_socket(socket, peer, true, true, config))
    }

    /// 클라이언트측 세션: 새 임시 소켓을 열고 서버 리슨 주소를 임시 상대로 둠
    pub async fn client(bind_addr: SocketAddr, server_addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = if config.reuse_port {
            bind_reuse_port(bind_addr)?
        } else {
            UdpSocket::bind(bind_addr).await?
        };

        Ok(Self::with_socket(socket, server_addr, false, false, config))
    }

    fn with_socket(
        socket: UdpSocket,
        peer: SocketAddr,
        peer_locked: bool,
        connected: bool,
        config: Config,
    ) -> Self {
        let buf = vec![0u8; config.recv_buffer_size()];
        let reply_deadline = deadline_after(config.timeout());
        Self {
            socket,
            peer,
            peer_locked,
            connected,
            block: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            config,
            stats: TransferStats::new(DEFAULT_BLOCK_SIZE),
            reply_deadline,
            buf,
        }
    }

    /// 상대 주소
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 현재 블록 번호
    pub fn block(&self) -> u16 {
        self.block
    }

    /// 다음 블록 번호 (65535 다음은 0)
    pub fn next_block(&self) -> u16 {
        self.block.wrapping_add(1)
    }

    /// 블록 번호 전진
    pub fn advance_block(&mut self) -> u16 {
        self.block = self.next_block();
        self.block
    }

    /// 협상된 블록 크기
    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    /// 블록 크기 확정
    pub fn set_block_size(&mut self, block_size: u16) {
        self.block_size = block_size;
        self.stats.block_size = block_size;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    /// 세션 종료: 경과 시간을 고정하고 통계 반환 (소켓은 여기서 해제)
    pub fn finish(mut self) -> TransferStats {
        self.stats.finish();
        self.stats
    }

    /// 패킷 전송
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        self.send_bytes(&packet.encode()).await
    }

    /// 인코딩된 바이트 전송
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        if self.connected {
            self.socket.send(bytes).await?;
        } else {
            self.socket.send_to(bytes, self.peer).await?;
        }
        Ok(())
    }

    /// 응답을 기다릴 패킷 전송. 보낸 시점부터 [`Session::recv`] 데드라인을 다시 잼.
    pub async fn send_awaiting_reply(&mut self, packet: &Packet) -> Result<()> {
        self.send(packet).await?;
        self.reply_deadline = deadline_after(self.config.timeout());
        Ok(())
    }

    /// 에러 패킷 전송 (전송 실패는 로그만)
    pub async fn send_error(&self, code: ErrorCode, message: &str) {
        if let Err(e) = self.send(&Packet::error(code, message)).await {
            debug!("에러 패킷 전송 실패 ({}): {}", self.peer, e);
        }
    }

    /// 패킷 하나 수신 (재전송 없음, 데드라인만 적용)
    ///
    /// 데드라인은 마지막 [`Session::send_awaiting_reply`] 기준이라 여러 번 불러도 늘어나지 않음.
    /// 다른 TID에서 온 데이터그램은 UnknownTransferId로 응답하고 무시.
    /// 디코딩 실패는 프로토콜 위반으로 에러 반환.
    pub async fn recv(&mut self) -> Result<Packet> {
        let deadline = self.reply_deadline;

        loop {
            let received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buf)).await;
            let (len, addr) = match received {
                Ok(result) => result?,
                Err(_) => return Err(Error::Timeout { block: self.block }),
            };

            if !self.admit(addr).await {
                continue;
            }

            return Ok(Packet::decode(&self.buf[..len])?);
        }
    }

    /// 패킷을 보내고 `accept`가 받아들이는 응답이 올 때까지 대기
    ///
    /// - 재전송 간격 만료: 같은 바이트를 다시 보냄 (데드라인은 그대로)
    /// - 데드라인 만료: `Error::Timeout`, 이후 아무것도 보내지 않음
    /// - `accept`가 `None`을 돌려준 패킷, 디코딩 실패: 잡음으로 무시
    /// - 상대의 ERROR 패킷: `Error::Remote`로 중단
    pub async fn exchange<T, F>(&mut self, outgoing: Bytes, mut accept: F) -> Result<T>
    where
        F: FnMut(&Packet) -> Option<T>,
    {
        let mut timer = RetransmitTimer::start(self.config.timeout(), self.config.retransmit_interval());
        self.send_bytes(&outgoing).await?;

        loop {
            tokio::select! {
                event = timer.next_event() => match event {
                    TimerEvent::Retransmit => {
                        debug!("재전송: peer={}, block={}", self.peer, self.block);
                        self.send_bytes(&outgoing).await?;
                        self.stats.retransmits += 1;
                    }
                    TimerEvent::Deadline => {
                        warn!(
                            "응답 타임아웃: peer={}, block={}, 재전송 {}회",
                            self.peer,
                            self.block,
                            timer.retransmits()
                        );
                        return Err(Error::Timeout { block: self.block });
                    }
                },
                received = self.socket.recv_from(&mut self.buf) => {
                    let (len, addr) = received?;
                    if !self.admit(addr).await {
                        continue;
                    }

                    match Packet::decode(&self.buf[..len]) {
                        Ok(Packet::Error { code, message }) => {
                            return Err(Error::Remote { code, message });
                        }
                        Ok(packet) => {
                            if let Some(reply) = accept(&packet) {
                                return Ok(reply);
                            }
                            debug!("무시된 패킷: {:?} (block={})", packet.opcode(), self.block);
                        }
                        Err(e) => {
                            debug!("디코딩 실패, 무시: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// 수신 주소 검사. 첫 응답이면 상대 TID를 확정.
    async fn admit(&mut self, addr: SocketAddr) -> bool {
        if self.peer_locked {
            if addr == self.peer {
                return true;
            }
            debug!("알 수 없는 TID에서 수신: {} (상대 {})", addr, self.peer);
            let reply = Packet::error(ErrorCode::UnknownTransferId, "unknown transfer id").encode();
            if let Err(e) = self.socket.send_to(&reply, addr).await {
                debug!("UnknownTransferId 응답 실패: {}", e);
            }
            return false;
        }

        if addr.ip() != self.peer.ip() {
            debug!("서버가 아닌 주소에서 수신: {}", addr);
            return false;
        }

        self.peer = addr;
        self.peer_locked = true;
        true
    }
}

/// 지금부터 `timeout` 뒤. 너무 큰 값은 사실상 무한(30년)으로 취급.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// 블록 하나 분량 읽기. EOF가 아니면 버퍼를 꽉 채움. 읽은 바이트 수 반환.
pub(crate) async fn read_block<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// SO_REUSEADDR/SO_REUSEPORT를 켠 UDP 소켓 바인드
fn bind_reuse_port(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}
