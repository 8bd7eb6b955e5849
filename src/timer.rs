//! 재전송 타이머
//!
//! 응답을 기다리는 동안 두 타이머를 경쟁시킴:
//! - 재전송 간격: 만료되면 같은 패킷을 다시 보내고 간격만 재시작
//! - 데드라인: 전송 전체 인내 한도. 재전송과 무관하게 계속 흐름
//!
//! 응답 수신과의 경쟁은 [`crate::session::Session::exchange`]에서 `select!`로 처리.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// 타이머 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// 재전송 간격 만료 (간격 타이머는 이미 다시 시작됨)
    Retransmit,

    /// 데드라인 만료
    Deadline,
}

/// 블록 하나의 응답 대기용 타이머 쌍
pub struct RetransmitTimer {
    deadline: Pin<Box<Sleep>>,
    retransmit: Pin<Box<Sleep>>,
    interval: Duration,
    retransmits: u32,
}

impl RetransmitTimer {
    /// 두 타이머를 지금부터 시작
    pub fn start(timeout: Duration, interval: Duration) -> Self {
        Self {
            deadline: Box::pin(sleep(timeout)),
            retransmit: Box::pin(sleep(interval)),
            interval,
            retransmits: 0,
        }
    }

    /// 다음 타이머 이벤트까지 대기
    ///
    /// 취소해도 안전함: 타이머 상태는 구조체에 남고, 다시 호출하면 이어서 기다림.
    /// 두 타이머가 동시에 만료되면 데드라인이 우선.
    pub async fn next_event(&mut self) -> TimerEvent {
        tokio::select! {
            biased;
            _ = self.deadline.as_mut() => TimerEvent::Deadline,
            _ = self.retransmit.as_mut() => {
                let next = Instant::now() + self.interval;
                self.retransmit.as_mut().reset(next);
                self.retransmits += 1;
                TimerEvent::Retransmit
            }
        }
    }

    /// 지금까지 발생한 재전송 이벤트 수
    pub fn retransmits(&self) -> u32 {
        self.retransmits
    }

    /// 데드라인 시각
    pub fn deadline(&self) -> Instant {
        self.deadline.deadline()
    }
}
