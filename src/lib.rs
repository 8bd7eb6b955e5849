//! # tftp
//!
//! UDP 기반 lockstep 파일 전송 (TFTP, RFC 1350 + RFC 2347/2348 blksize 옵션)
//!
//! ## 핵심 특징
//! - **Lockstep**: DATA 하나 보내고 해당 ACK를 받아야 다음 블록 전송
//! - **블록 크기 협상**: `blksize` 옵션으로 512 이외의 크기 합의
//! - **재전송 타이머**: 재전송 간격과 전체 데드라인을 경쟁시켜 손실 보정
//! - **전송별 소켓 분리**: 서버는 요청마다 새 소켓(TID)을 열어 독립 태스크로 처리

pub mod client;
pub mod config;
pub mod error;
pub mod packet;
pub mod server;
pub mod session;
pub mod stats;
pub mod timer;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use packet::{DecodeError, ErrorCode, Packet, Request};
pub use server::{BoundServer, Server, ServerStats};
pub use session::Session;
pub use stats::TransferStats;
pub use timer::{RetransmitTimer, TimerEvent};

/// 기본 블록 크기 (RFC 1350)
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// 최소 블록 크기 (RFC 2348)
pub const MIN_BLOCK_SIZE: u16 = 8;

/// 최대 블록 크기 (RFC 2348)
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 6900;
