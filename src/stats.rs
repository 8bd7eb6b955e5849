//! 전송 통계

use std::time::{Duration, Instant};

/// 전송 하나의 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 완료 시 고정된 경과 시간
    finished: Option<Duration>,

    /// 총 페이로드 바이트 (DATA 페이로드 합)
    pub total_bytes: u64,

    /// 주고받은 DATA 블록 수
    pub total_blocks: u64,

    /// 재전송 횟수
    pub retransmits: u64,

    /// 중복 수신 블록 수
    pub duplicate_blocks: u64,

    /// 협상된 블록 크기
    pub block_size: u16,
}

impl TransferStats {
    pub fn new(block_size: u16) -> Self {
        Self {
            start_time: Instant::now(),
            finished: None,
            total_bytes: 0,
            total_blocks: 0,
            retransmits: 0,
            duplicate_blocks: 0,
            block_size,
        }
    }

    /// 블록 하나 기록
    pub fn record_block(&mut self, len: usize) {
        self.total_blocks += 1;
        self.total_bytes += len as u64;
    }

    /// 경과 시간 고정
    pub fn finish(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(self.start_time.elapsed());
        }
    }

    /// 완료 여부
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// 경과 시간 (완료 후에는 고정값)
    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.start_time.elapsed())
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.3}s | Bytes: {} | Blocks: {} (blksize {}) | Retransmits: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.total_blocks,
            self.block_size,
            self.retransmits,
            self.throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(crate::DEFAULT_BLOCK_SIZE)
    }
}
