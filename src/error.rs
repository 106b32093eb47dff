//! 에러 타입 정의

use thiserror::Error;

/// 에러 분류
///
/// 요청 단위 에러는 모두 이 분류 중 하나로 수렴하며, 서버는 분류에 맞는
/// 프로토콜 실패 토큰으로 응답한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 파일 / 피어 없음
    NotFound,
    /// 중복 JOIN / 중복 파일
    Conflict,
    /// 잘못된 정규식, 잘못된 명령 인자
    InvalidInput,
    /// 소켓 / 디스크 실패
    Io,
    /// 해석 불가능한 메시지
    Protocol,
}

/// PeerShare 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("이미 참가한 피어: {addr}")]
    AlreadyJoined { addr: String },

    #[error("참가하지 않은 피어: {addr}")]
    NotJoined { addr: String },

    #[error("중복 파일: {addr} 이미 {filename} 보유")]
    DuplicateFile { addr: String, filename: String },

    #[error("파일 없음: {filename}")]
    FileNotFound { filename: String },

    #[error("유효하지 않은 정규식: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("트래커가 거부한 검색 패턴: {pattern}")]
    PatternRejected { pattern: String },

    #[error("잘못된 명령: {0}")]
    MalformedCommand(String),

    #[error("알 수 없는 명령: {0}")]
    UnknownCommand(String),

    #[error("프레임 크기 초과: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("유효하지 않은 범위: start={start}, end={end:?}, len={len}")]
    InvalidRange {
        start: u64,
        end: Option<u64>,
        len: u64,
    },

    #[error("피어가 거부한 범위: {filename} start={start}, end={end:?}")]
    RangeRejected {
        filename: String,
        start: u64,
        end: Option<u64>,
    },

    #[error("허용되지 않은 경로: {0}")]
    PathRejected(String),

    #[error("예상하지 못한 응답: {0}")]
    UnexpectedReply(String),

    #[error("타임아웃")]
    Timeout,

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 에러 분류 반환
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileNotFound { .. } | Error::NotJoined { .. } => ErrorKind::NotFound,
            Error::AlreadyJoined { .. } | Error::DuplicateFile { .. } => ErrorKind::Conflict,
            Error::InvalidRegex(_)
            | Error::PatternRejected { .. }
            | Error::MalformedCommand(_)
            | Error::InvalidRange { .. }
            | Error::RangeRejected { .. }
            | Error::PathRejected(_) => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Json(_) | Error::Timeout | Error::ConnectionClosed => {
                ErrorKind::Io
            }
            Error::UnknownCommand(_)
            | Error::FrameTooLarge { .. }
            | Error::UnexpectedReply(_) => ErrorKind::Protocol,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::DuplicateFile {
            addr: "1.2.3.4".into(),
            filename: "a.txt".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = Error::FileNotFound {
            filename: "a.txt".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = regex::Regex::new("(").map(|_| ()).unwrap_err();
        assert_eq!(Error::from(err).kind(), ErrorKind::InvalidInput);

        assert_eq!(Error::UnknownCommand("FOO".into()).kind(), ErrorKind::Protocol);

        let err = Error::RangeRejected {
            filename: "f".into(),
            start: 30,
            end: Some(5),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.to_string().contains("len"));
    }
}
