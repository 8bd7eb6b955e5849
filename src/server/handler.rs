//! 전송별 핸들러 (서버측)
//!
//! - 읽기: 파일 → 클라이언트. DATA를 보내고 ACK를 받을 때까지 재전송
//! - 쓰기: 클라이언트 → 파일. ACK(또는 OACK)를 보내고 다음 DATA를 받을 때까지 재전송

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::packet::{Packet, Request, MODE_NETASCII, MODE_OCTET};
use crate::session::{read_block, Session};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, MIN_BLOCK_SIZE};

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// RRQ: 서버 → 클라이언트
    Read,

    /// WRQ: 클라이언트 → 서버
    Write,
}

/// 요청 하나 처리. 세션(소켓)은 어떤 경로로 끝나든 여기서 해제됨.
pub async fn handle(
    root: &Path,
    config: Config,
    kind: TransferKind,
    request: Request,
    peer: SocketAddr,
    local_ip: IpAddr,
) -> Result<TransferStats> {
    let mut session = Session::server(local_ip, peer, config).await?;
    info!(
        "{:?} 요청: {} (mode={}, blksize={:?}) from {}",
        kind, request.filename, request.mode, request.block_size, peer
    );

    let result = match kind {
        TransferKind::Read => send_file(&mut session, root, &request).await,
        TransferKind::Write => receive_file(&mut session, root, &request).await,
    };

    if let Err(e) = &result {
        // 타임아웃이나 상대가 먼저 보낸 에러에는 응답하지 않음
        if !matches!(e, Error::Timeout { .. } | Error::Remote { .. }) {
            let code = e.to_error_code();
            session.send_error(code, &code.to_string()).await;
        }
    }
    result?;

    let stats = session.finish();
    info!("{:?} 완료: {} ({}) | {}", kind, request.filename, peer, stats.summary());
    Ok(stats)
}

/// 서빙 루트 아래의 경로로 변환
///
/// 절대 경로, `..`, 드라이브 prefix는 거부.
pub fn resolve_path(root: &Path, filename: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0;

    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(filename.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(Error::InvalidPath(filename.to_string()));
    }
    Ok(resolved)
}

fn check_mode(request: &Request) -> Result<()> {
    if request.mode.eq_ignore_ascii_case(MODE_OCTET)
        || request.mode.eq_ignore_ascii_case(MODE_NETASCII)
    {
        Ok(())
    } else {
        Err(Error::UnsupportedMode(request.mode.clone()))
    }
}

/// blksize 협상. 옵션이 있으면 최대값으로 줄여 세션에 반영하고 OACK에 쓸 값을 반환.
fn negotiate(session: &mut Session, request: &Request) -> Result<Option<u16>> {
    let Some(requested) = request.block_size else {
        return Ok(None);
    };
    if requested < MIN_BLOCK_SIZE {
        return Err(Error::InvalidBlockSize(requested));
    }

    let block_size = requested.min(session.config().max_block_size.max(MIN_BLOCK_SIZE));
    if block_size != requested {
        debug!("blksize {} → {}로 조정", requested, block_size);
    }
    session.set_block_size(block_size);
    Ok(Some(block_size))
}

fn ack_for(block: u16) -> impl FnMut(&Packet) -> Option<()> {
    move |packet| match packet {
        Packet::Ack { block: b } if *b == block => Some(()),
        _ => None,
    }
}

/// 읽기 핸들러: 파일을 블록 단위로 보내고 블록마다 ACK 대기
async fn send_file(session: &mut Session, root: &Path, request: &Request) -> Result<()> {
    check_mode(request)?;
    let path = resolve_path(root, &request.filename)?;
    let mut file = File::open(&path).await?;
    if !file.metadata().await?.is_file() {
        return Err(Error::InvalidPath(request.filename.clone()));
    }

    if let Some(block_size) = negotiate(session, request)? {
        let oack = Packet::option_ack_block_size(block_size).encode();
        session.exchange(oack, ack_for(0)).await?;
    }

    let block_size = session.block_size() as usize;
    let mut buf = vec![0u8; block_size];

    loop {
        let n = read_block(&mut file, &mut buf).await?;
        let block = session.advance_block();
        let data = Packet::Data {
            block,
            data: Bytes::copy_from_slice(&buf[..n]),
        }
        .encode();

        session.exchange(data, ack_for(block)).await?;
        session.stats_mut().record_block(n);

        // 마지막 블록 (길이 0 포함)까지 ACK 받음
        if n < block_size {
            return Ok(());
        }
    }
}

/// 쓰기 핸들러: DATA를 받아 기록하고 블록마다 ACK
async fn receive_file(session: &mut Session, root: &Path, request: &Request) -> Result<()> {
    check_mode(request)?;
    let path = resolve_path(root, &request.filename)?;
    let negotiated = negotiate(session, request)?;
    let mut file = File::create(&path).await?;

    let result = write_blocks(session, &mut file, negotiated).await;
    if result.is_err() {
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("불완전한 파일 삭제 실패 {:?}: {}", path, e);
        }
    }
    result
}

async fn write_blocks(session: &mut Session, file: &mut File, negotiated: Option<u16>) -> Result<()> {
    let block_size = session.block_size() as usize;
    let mut reply = match negotiated {
        Some(size) => Packet::option_ack_block_size(size).encode(),
        None => Packet::Ack { block: 0 }.encode(),
    };

    loop {
        let expected = session.next_block();
        let data = session
            .exchange(reply, move |packet| match packet {
                Packet::Data { block, data } if *block == expected => Some(data.clone()),
                _ => None,
            })
            .await?;

        if data.len() > block_size {
            return Err(Error::BlockTooLarge {
                len: data.len(),
                max: block_size,
            });
        }

        file.write_all(&data).await?;
        session.advance_block();
        session.stats_mut().record_block(data.len());

        let ack = Packet::Ack { block: expected };
        if data.len() < block_size {
            file.flush().await?;
            session.send(&ack).await?;
            return Ok(());
        }
        reply = ack.encode();
    }
}
