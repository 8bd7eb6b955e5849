//! 클라이언트
//!
//! - GetFile: RRQ → (OACK → ACK 0) → DATA/ACK 반복
//! - PutFile: WRQ → ACK 0 또는 OACK → DATA/ACK 반복
//!
//! 클라이언트는 재전송하지 않음. 재전송은 서버 쪽 책임이고, 클라이언트는
//! 응답 하나를 기다리는 동안 데드라인만 적용.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::packet::{is_valid_block_size, ErrorCode, Packet, Request};
use crate::session::{read_block, Session};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, DEFAULT_BLOCK_SIZE};

/// TFTP 클라이언트
///
/// 전송마다 새 임시 소켓(TID)을 열기 때문에 여러 태스크에서 공유해도 됨.
#[derive(Debug, Clone)]
pub struct Client {
    /// 서버 리슨 주소
    server_addr: SocketAddr,

    /// 로컬 바인드 주소
    bind_addr: SocketAddr,

    config: Config,
}

impl Client {
    /// 새 클라이언트 생성 (서버 주소 체계에 맞는 임의 포트에 바인드)
    pub fn new(server_addr: SocketAddr, config: Config) -> Self {
        let bind_addr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        Self {
            server_addr,
            bind_addr,
            config,
        }
    }

    /// 로컬 바인드 주소 지정
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 요청할 blksize (기본값이면 옵션 생략)
    fn requested_block_size(&self) -> Result<Option<u16>> {
        if !self.config.negotiates_block_size() {
            return Ok(None);
        }
        if !is_valid_block_size(self.config.block_size) {
            return Err(Error::InvalidBlockSize(self.config.block_size));
        }
        Ok(Some(self.config.block_size))
    }

    fn request(&self, filename: &str, block_size: Option<u16>) -> Request {
        let mut request = Request::new(filename);
        request.block_size = block_size;
        request
    }

    async fn open_session(&self) -> Result<Session> {
        Session::client(self.bind_addr, self.server_addr, self.config.clone()).await
    }

    /// 서버에서 파일을 받아 `writer`에 기록
    ///
    /// 반환되는 통계의 바이트 수는 모든 DATA 페이로드 길이의 합.
    pub async fn get_file<W>(&self, filename: &str, writer: &mut W) -> Result<TransferStats>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let requested = self.requested_block_size()?;
        let mut session = self.open_session().await?;
        let mut settled = requested.is_none();

        session
            .send_awaiting_reply(&Packet::ReadRequest(self.request(filename, requested)))
            .await?;
        debug!("RRQ 전송: {} -> {}", filename, self.server_addr);

        loop {
            match session.recv().await? {
                Packet::OptionAck(options) if session.block() == 0 => {
                    accept_option_ack(&mut session, &options, requested).await?;
                    settled = true;
                    session.send_awaiting_reply(&Packet::Ack { block: 0 }).await?;
                }
                Packet::OptionAck(_) => {
                    debug!("늦게 도착한 OACK 무시");
                }
                Packet::Data { block, data } => {
                    if !settled {
                        // 옵션을 무시한 서버: 512로 조용히 바꾸지 않고 실패 처리
                        return Err(reject_block_size(&session, requested).await);
                    }

                    if block == session.next_block() {
                        let block_size = session.block_size() as usize;
                        if data.len() > block_size {
                            session
                                .send_error(ErrorCode::IllegalOperation, "block too large")
                                .await;
                            return Err(Error::BlockTooLarge {
                                len: data.len(),
                                max: block_size,
                            });
                        }

                        session.send_awaiting_reply(&Packet::Ack { block }).await?;
                        writer.write_all(&data).await?;
                        session.advance_block();
                        session.stats_mut().record_block(data.len());

                        if data.len() < block_size {
                            writer.flush().await?;
                            break;
                        }
                    } else if session.stats().total_blocks > 0 && block == session.block() {
                        // 우리 ACK가 유실되어 서버가 재전송한 블록
                        debug!("중복 블록 {} 재응답", block);
                        session.stats_mut().duplicate_blocks += 1;
                        session.send(&Packet::Ack { block }).await?;
                    } else {
                        debug!("예상 밖 블록 무시: got {}, expected {}", block, session.next_block());
                    }
                }
                Packet::Error { code, message } => {
                    return Err(Error::Remote { code, message });
                }
                other => {
                    return Err(Error::UnexpectedPacket {
                        expected: "DATA",
                        got: other.name(),
                    });
                }
            }
        }

        let stats = session.finish();
        info!("다운로드 완료: {} | {}", filename, stats.summary());
        Ok(stats)
    }

    /// 서버에서 파일을 받아 메모리로 반환
    pub async fn get_bytes(&self, filename: &str) -> Result<(Vec<u8>, TransferStats)> {
        let mut data = Vec::new();
        let stats = self.get_file(filename, &mut data).await?;
        Ok((data, stats))
    }

    /// `reader`의 내용을 서버에 업로드
    ///
    /// 파일 크기가 블록 크기의 배수면 길이 0인 마지막 DATA를 보냄.
    pub async fn put_file<R>(&self, filename: &str, reader: &mut R) -> Result<TransferStats>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let requested = self.requested_block_size()?;
        let mut session = self.open_session().await?;
        let mut chunk = vec![0u8; requested.unwrap_or(DEFAULT_BLOCK_SIZE) as usize];
        let mut last_sent = false;

        session
            .send_awaiting_reply(&Packet::WriteRequest(self.request(filename, requested)))
            .await?;
        debug!("WRQ 전송: {} -> {}", filename, self.server_addr);

        loop {
            match session.recv().await? {
                Packet::OptionAck(options) if session.block() == 0 => {
                    accept_option_ack(&mut session, &options, requested).await?;
                }
                Packet::Ack { block } if block == session.block() => {
                    if block == 0 && requested.is_some() && session.stats().total_blocks == 0 {
                        return Err(reject_block_size(&session, requested).await);
                    }
                }
                Packet::Ack { block } => {
                    debug!("ACK 무시: got {}, expected {}", block, session.block());
                    continue;
                }
                Packet::OptionAck(_) => {
                    debug!("늦게 도착한 OACK 무시");
                    continue;
                }
                Packet::Error { code, message } => {
                    return Err(Error::Remote { code, message });
                }
                other => {
                    return Err(Error::UnexpectedPacket {
                        expected: "ACK",
                        got: other.name(),
                    });
                }
            }

            if last_sent {
                break;
            }

            let block_size = session.block_size() as usize;
            let n = read_block(reader, &mut chunk[..block_size]).await?;
            let block = session.advance_block();
            session
                .send_awaiting_reply(&Packet::Data {
                    block,
                    data: Bytes::copy_from_slice(&chunk[..n]),
                })
                .await?;
            session.stats_mut().record_block(n);

            if n < block_size {
                last_sent = true;
            }
        }

        let stats = session.finish();
        info!("업로드 완료: {} | {}", filename, stats.summary());
        Ok(stats)
    }

    /// 메모리의 데이터를 업로드
    pub async fn put_bytes(&self, filename: &str, data: &[u8]) -> Result<TransferStats> {
        let mut reader = data;
        self.put_file(filename, &mut reader).await
    }
}

/// 서버 OACK 검증. 요청한 blksize와 다르면 옵션 협상 실패로 중단.
async fn accept_option_ack(
    session: &mut Session,
    options: &BTreeMap<String, String>,
    requested: Option<u16>,
) -> Result<()> {
    let offered = match Packet::option_ack_block_size_value(options) {
        Ok(offered) => offered,
        Err(e) => {
            session
                .send_error(ErrorCode::OptionNegotiation, "invalid blksize")
                .await;
            return Err(e.into());
        }
    };

    match (requested, offered) {
        (Some(requested), Some(offered)) if requested == offered => {
            session.set_block_size(offered);
            debug!("blksize 협상 완료: {}", offered);
            Ok(())
        }
        (None, None) => Ok(()),
        (requested, offered) => {
            let requested = requested.unwrap_or(DEFAULT_BLOCK_SIZE);
            let offered = offered.unwrap_or(DEFAULT_BLOCK_SIZE);
            session
                .send_error(ErrorCode::OptionNegotiation, "blksize mismatch")
                .await;
            Err(Error::BlockSizeMismatch { requested, offered })
        }
    }
}

/// blksize를 요청했는데 서버가 OACK 없이 응답한 경우
async fn reject_block_size(session: &Session, requested: Option<u16>) -> Error {
    session
        .send_error(ErrorCode::OptionNegotiation, "blksize not acknowledged")
        .await;
    Error::BlockSizeMismatch {
        requested: requested.unwrap_or(DEFAULT_BLOCK_SIZE),
        offered: DEFAULT_BLOCK_SIZE,
    }
}
