//! 전송 설정

use std::time::Duration;

use crate::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};

/// 클라이언트/서버 공용 전송 설정
///
/// 타이밍 값은 인스턴스마다 따로 가지므로 테스트에서 짧게 줄일 수 있음.
#[derive(Debug, Clone)]
pub struct Config {
    /// 클라이언트가 요청할 블록 크기 (바이트)
    /// 512가 아니면 요청에 `blksize` 옵션을 붙임
    pub block_size: u16,

    /// 서버가 허용하는 최대 블록 크기
    /// 더 큰 요청은 이 값으로 줄여서 OACK
    pub max_block_size: u16,

    /// 응답 대기 전체 데드라인 (밀리초)
    pub timeout_ms: u64,

    /// 재전송 간격 (밀리초)
    pub retransmit_ms: u64,

    /// 클라이언트 소켓에 SO_REUSEADDR/SO_REUSEPORT 설정
    pub reuse_port: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
            timeout_ms: 20_000,  // 20초
            retransmit_ms: 5000, // 5초
            reuse_port: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 블록 크기 지정
    pub fn with_block_size(mut self, block_size: u16) -> Self {
        self.block_size = block_size;
        self
    }

    /// 데드라인과 재전송 간격 지정
    pub fn with_timing(mut self, timeout: Duration, retransmit: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.retransmit_ms = u64::try_from(retransmit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 전체 데드라인
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 재전송 간격
    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_ms)
    }

    /// blksize 옵션을 붙여야 하는지
    pub fn negotiates_block_size(&self) -> bool {
        self.block_size != DEFAULT_BLOCK_SIZE
    }

    /// 수신 버퍼 크기 (최대 블록 + 헤더)
    pub fn recv_buffer_size(&self) -> usize {
        self.block_size.max(self.max_block_size).max(DEFAULT_BLOCK_SIZE) as usize
            + crate::packet::HEADER_SIZE
    }

    /// 같은 LAN 안의 빠른 전송용 설정
    pub fn low_latency() -> Self {
        Self {
            block_size: 1428, // 이더넷 MTU에 맞춤
            max_block_size: MAX_BLOCK_SIZE,
            timeout_ms: 3000,
            retransmit_ms: 500,
            reuse_port: false,
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_block_size: 1428,
            timeout_ms: 60_000,
            retransmit_ms: 2000,
            reuse_port: false,
        }
    }
}
