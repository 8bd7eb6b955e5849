//! 에러 타입 정의

use thiserror::Error;

use crate::packet::{DecodeError, ErrorCode};

/// 전송 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("패킷 디코딩 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("예상하지 못한 패킷: expected {expected}, got {got}")]
    UnexpectedPacket {
        expected: &'static str,
        got: &'static str,
    },

    #[error("전송 타임아웃: block={block}")]
    Timeout { block: u16 },

    #[error("상대측 에러 ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("블록 크기 협상 실패: requested {requested}, offered {offered}")]
    BlockSizeMismatch { requested: u16, offered: u16 },

    #[error("유효하지 않은 블록 크기: {0}")]
    InvalidBlockSize(u16),

    #[error("허용되지 않는 경로: {0}")]
    InvalidPath(String),

    #[error("지원하지 않는 전송 모드: {0}")]
    UnsupportedMode(String),

    #[error("블록 크기 초과: {len} bytes (최대 {max})")]
    BlockTooLarge { len: usize, max: usize },
}

impl Error {
    /// 상대측에 돌려줄 에러 패킷 코드
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
                std::io::ErrorKind::AlreadyExists => ErrorCode::FileAlreadyExists,
                _ => ErrorCode::NotDefined,
            },
            Error::InvalidPath(_) => ErrorCode::AccessViolation,
            Error::BlockSizeMismatch { .. } | Error::InvalidBlockSize(_) => {
                ErrorCode::OptionNegotiation
            }
            Error::Decode(_)
            | Error::UnexpectedPacket { .. }
            | Error::UnsupportedMode(_)
            | Error::BlockTooLarge { .. } => ErrorCode::IllegalOperation,
            Error::Timeout { .. } | Error::Remote { .. } => ErrorCode::NotDefined,
        }
    }

    /// 타임아웃 여부
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
