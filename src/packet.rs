//! TFTP 패킷 정의
//!
//! RFC 1350 (TFTP rev. 2) + RFC 2347 (옵션 확장) + RFC 2348 (blksize)
//!
//! 모든 정수 필드는 big-endian. 문자열 필드는 NUL(0x00)로 끝남.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// `blksize` 옵션 이름
pub const OPTION_BLKSIZE: &str = "blksize";

/// 클라이언트가 보내는 기본 전송 모드
pub const MODE_OCTET: &str = "octet";

/// netascii 모드 (변환 없이 바이트 그대로 전송)
pub const MODE_NETASCII: &str = "netascii";

/// opcode(2) + block(2)
pub const HEADER_SIZE: usize = 4;

/// 디코딩 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("잘못된 패킷 형식: {0}")]
    Malformed(&'static str),

    #[error("알 수 없는 opcode: {0}")]
    UnknownOpcode(u16),
}

/// 패킷 opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// 읽기 요청 (RRQ)
    Rrq = 1,

    /// 쓰기 요청 (WRQ)
    Wrq = 2,

    /// 데이터 (DATA)
    Data = 3,

    /// 응답 (ACK)
    Ack = 4,

    /// 에러 (ERROR)
    Error = 5,

    /// 옵션 응답 (OACK)
    Oack = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// ERROR 패킷 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileAlreadyExists,
    NoSuchUser,
    /// RFC 2347 옵션 협상 실패
    OptionNegotiation,
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionNegotiation,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTransferId => 5,
            ErrorCode::FileAlreadyExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::OptionNegotiation => 8,
            ErrorCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotDefined => "not defined",
            ErrorCode::FileNotFound => "file not found",
            ErrorCode::AccessViolation => "access violation",
            ErrorCode::DiskFull => "disk full",
            ErrorCode::IllegalOperation => "illegal operation",
            ErrorCode::UnknownTransferId => "unknown transfer id",
            ErrorCode::FileAlreadyExists => "file already exists",
            ErrorCode::NoSuchUser => "no such user",
            ErrorCode::OptionNegotiation => "option negotiation failed",
            ErrorCode::Unknown(code) => return write!(f, "code {}", code),
        };
        f.write_str(name)
    }
}

/// RRQ/WRQ 본문
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// 요청 파일 이름
    pub filename: String,

    /// 전송 모드 ("octet", "netascii" ...)
    pub mode: String,

    /// 요청 블록 크기 (`blksize` 옵션)
    pub block_size: Option<u16>,
}

impl Request {
    /// octet 모드 요청 생성
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mode: MODE_OCTET.to_string(),
            block_size: None,
        }
    }

    /// blksize 옵션 지정
    pub fn with_block_size(mut self, block_size: u16) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

/// TFTP 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest(Request),
    WriteRequest(Request),
    Data { block: u16, data: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
    OptionAck(BTreeMap<String, String>),
}

impl Packet {
    /// opcode 반환
    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::ReadRequest(_) => Opcode::Rrq,
            Packet::WriteRequest(_) => Opcode::Wrq,
            Packet::Data { .. } => Opcode::Data,
            Packet::Ack { .. } => Opcode::Ack,
            Packet::Error { .. } => Opcode::Error,
            Packet::OptionAck(_) => Opcode::Oack,
        }
    }

    /// 로그/에러 메시지용 이름
    pub fn name(&self) -> &'static str {
        match self {
            Packet::ReadRequest(_) => "RRQ",
            Packet::WriteRequest(_) => "WRQ",
            Packet::Data { .. } => "DATA",
            Packet::Ack { .. } => "ACK",
            Packet::Error { .. } => "ERROR",
            Packet::OptionAck(_) => "OACK",
        }
    }

    /// 에러 패킷 생성
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Packet::Error {
            code,
            message: message.into(),
        }
    }

    /// blksize 하나만 담은 OACK 생성
    pub fn option_ack_block_size(block_size: u16) -> Self {
        let mut options = BTreeMap::new();
        options.insert(OPTION_BLKSIZE.to_string(), block_size.to_string());
        Packet::OptionAck(options)
    }

    /// OACK가 알려준 blksize 값
    ///
    /// 옵션 이름은 대소문자를 구분하지 않음. 값이 숫자가 아니면 `Malformed`.
    pub fn option_ack_block_size_value(
        options: &BTreeMap<String, String>,
    ) -> Result<Option<u16>, DecodeError> {
        options
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(OPTION_BLKSIZE))
            .map(|(_, value)| parse_block_size(value))
            .transpose()
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16(self.opcode() as u16);

        match self {
            Packet::ReadRequest(req) | Packet::WriteRequest(req) => {
                put_str(&mut buf, &req.filename);
                put_str(&mut buf, &req.mode);
                if let Some(block_size) = req.block_size {
                    put_str(&mut buf, OPTION_BLKSIZE);
                    put_str(&mut buf, &block_size.to_string());
                }
            }
            Packet::Data { block, data } => {
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            Packet::Ack { block } => {
                buf.put_u16(*block);
            }
            Packet::Error { code, message } => {
                buf.put_u16((*code).into());
                put_str(&mut buf, message);
            }
            Packet::OptionAck(options) => {
                for (name, value) in options {
                    put_str(&mut buf, name);
                    put_str(&mut buf, value);
                }
            }
        }

        buf.freeze()
    }

    fn encoded_len(&self) -> usize {
        match self {
            Packet::ReadRequest(req) | Packet::WriteRequest(req) => {
                2 + req.filename.len() + req.mode.len() + 2 + 16
            }
            Packet::Data { data, .. } => HEADER_SIZE + data.len(),
            Packet::Ack { .. } => HEADER_SIZE,
            Packet::Error { message, .. } => HEADER_SIZE + message.len() + 1,
            Packet::OptionAck(options) => {
                2 + options
                    .iter()
                    .map(|(name, value)| name.len() + value.len() + 2)
                    .sum::<usize>()
            }
        }
    }

    /// 바이트에서 역직렬화
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError::Malformed("2바이트 미만 패킷"));
        }

        let opcode = Opcode::try_from(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let body = &bytes[2..];

        match opcode {
            Opcode::Rrq => Ok(Packet::ReadRequest(decode_request(body)?)),
            Opcode::Wrq => Ok(Packet::WriteRequest(decode_request(body)?)),
            Opcode::Data => {
                let block = read_u16(body, "DATA 블록 번호 누락")?;
                Ok(Packet::Data {
                    block,
                    data: Bytes::copy_from_slice(&body[2..]),
                })
            }
            Opcode::Ack => Ok(Packet::Ack {
                block: read_u16(body, "ACK 블록 번호 누락")?,
            }),
            Opcode::Error => {
                let code = read_u16(body, "ERROR 코드 누락")?;
                let rest = &body[2..];
                // NUL이 없으면 나머지 전체를 메시지로 취급
                let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                Ok(Packet::Error {
                    code: code.into(),
                    message: String::from_utf8_lossy(&rest[..end]).into_owned(),
                })
            }
            Opcode::Oack => {
                let mut fields = NulFields::new(body);
                let mut options = BTreeMap::new();
                while let Some(name) = fields.next_field()? {
                    let value = fields
                        .next_field()?
                        .ok_or(DecodeError::Malformed("OACK 옵션 값 누락"))?;
                    options.insert(name.to_string(), value.to_string());
                }
                Ok(Packet::OptionAck(options))
            }
        }
    }
}

fn decode_request(body: &[u8]) -> Result<Request, DecodeError> {
    let mut fields = NulFields::new(body);
    let filename = fields
        .next_field()?
        .ok_or(DecodeError::Malformed("요청에 파일 이름 누락"))?;
    let mode = fields
        .next_field()?
        .ok_or(DecodeError::Malformed("요청에 전송 모드 누락"))?;

    let mut block_size = None;
    while let Some(name) = fields.next_field()? {
        let value = fields
            .next_field()?
            .ok_or(DecodeError::Malformed("요청 옵션 값 누락"))?;
        if name.eq_ignore_ascii_case(OPTION_BLKSIZE) {
            block_size = Some(parse_block_size(value)?);
        }
        // 알 수 없는 옵션은 무시 (RFC 2347)
    }

    Ok(Request {
        filename: filename.to_string(),
        mode: mode.to_string(),
        block_size,
    })
}

fn parse_block_size(value: &str) -> Result<u16, DecodeError> {
    value
        .parse::<u16>()
        .map_err(|_| DecodeError::Malformed("blksize 값이 숫자가 아님"))
}

/// 블록 크기가 RFC 2348 범위 안인지 확인
pub fn is_valid_block_size(block_size: u16) -> bool {
    (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
}

fn read_u16(body: &[u8], reason: &'static str) -> Result<u16, DecodeError> {
    match body {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(DecodeError::Malformed(reason)),
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// NUL로 끝나는 문자열 필드 순회
struct NulFields<'a> {
    rest: &'a [u8],
}

impl<'a> NulFields<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    /// 다음 필드. 남은 바이트가 없으면 `None`, NUL로 끝나지 않으면 `Malformed`.
    fn next_field(&mut self) -> Result<Option<&'a str>, DecodeError> {
        if self.rest.is_empty() {
            return Ok(None);
        }
        let end = self
            .rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Malformed("NUL로 끝나지 않는 필드"))?;
        let field = std::str::from_utf8(&self.rest[..end])
            .map_err(|_| DecodeError::Malformed("UTF-8이 아닌 필드"))?;
        self.rest = &self.rest[end + 1..];
        Ok(Some(field))
    }
}
