//! 와이어 프로토콜 정의
//!
//! 트래커와 피어가 공유하는 공백 구분 ASCII 명령/응답 문법.
//! 모든 요청과 트래커 응답은 하나의 프레임으로 전송된다:
//!
//! ```text
//! +----------------+-------------------------+
//! | len: u32 (BE)  | payload: UTF-8 (len B)  |
//! +----------------+-------------------------+
//! ```
//!
//! GET 응답만 예외로, 헤더 프레임(`DATA <n>`) 뒤에 n 바이트의 원시 데이터가 이어진다.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result, FRAME_HEADER_LEN};

/// 클라이언트 → 서버 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 트래커 참가 (인자는 로그용, 신원은 연결의 원격 IP)
    Join { addr: String },

    /// 파일 등록
    CreateFile { filename: String, size: u64 },

    /// 파일 등록 해제
    DeleteFile { filename: String },

    /// 정규식 파일명 검색
    Search { pattern: String },

    /// 전체 파일 목록
    ListFiles,

    /// 트래커 이탈
    Leave,

    /// 바이트 범위 요청 (피어 간, 별도 포트)
    Get {
        filename: String,
        start: u64,
        end: Option<u64>,
    },
}

impl Command {
    /// 명령 키워드
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Join { .. } => "JOIN",
            Command::CreateFile { .. } => "CREATEFILE",
            Command::DeleteFile { .. } => "DELETEFILE",
            Command::Search { .. } => "SEARCH",
            Command::ListFiles => "LISTFILES",
            Command::Leave => "LEAVE",
            Command::Get { .. } => "GET",
        }
    }
}

fn expect_args(keyword: &str, args: &[&str], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(Error::MalformedCommand(format!(
            "{} 인자 수 {} (허용 {}~{})",
            keyword,
            args.len(),
            min,
            max
        )));
    }
    Ok(())
}

fn parse_u64(keyword: &str, field: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::MalformedCommand(format!("{} {}: 정수 아님 '{}'", keyword, field, value)))
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let keyword = tokens
            .next()
            .ok_or_else(|| Error::MalformedCommand("빈 명령".into()))?;
        let args: Vec<&str> = tokens.collect();

        match keyword {
            "JOIN" => {
                expect_args(keyword, &args, 1, 1)?;
                Ok(Command::Join {
                    addr: args[0].to_string(),
                })
            }
            "CREATEFILE" => {
                expect_args(keyword, &args, 2, 2)?;
                Ok(Command::CreateFile {
                    filename: args[0].to_string(),
                    size: parse_u64(keyword, "size", args[1])?,
                })
            }
            "DELETEFILE" => {
                expect_args(keyword, &args, 1, 1)?;
                Ok(Command::DeleteFile {
                    filename: args[0].to_string(),
                })
            }
            "SEARCH" => {
                expect_args(keyword, &args, 1, 1)?;
                Ok(Command::Search {
                    pattern: args[0].to_string(),
                })
            }
            "LISTFILES" => {
                expect_args(keyword, &args, 0, 0)?;
                Ok(Command::ListFiles)
            }
            "LEAVE" => {
                expect_args(keyword, &args, 0, 0)?;
                Ok(Command::Leave)
            }
            "GET" => {
                expect_args(keyword, &args, 2, 3)?;
                let start = parse_u64(keyword, "start", args[1])?;
                let end = match args.get(2) {
                    Some(value) => Some(parse_u64(keyword, "end", value)?),
                    None => None,
                };
                Ok(Command::Get {
                    filename: args[0].to_string(),
                    start,
                    end,
                })
            }
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Join { addr } => write!(f, "JOIN {}", addr),
            Command::CreateFile { filename, size } => write!(f, "CREATEFILE {} {}", filename, size),
            Command::DeleteFile { filename } => write!(f, "DELETEFILE {}", filename),
            Command::Search { pattern } => write!(f, "SEARCH {}", pattern),
            Command::ListFiles => f.write_str("LISTFILES"),
            Command::Leave => f.write_str("LEAVE"),
            Command::Get {
                filename,
                start,
                end: Some(end),
            } => write!(f, "GET {} {} {}", filename, start, end),
            Command::Get {
                filename,
                start,
                end: None,
            } => write!(f, "GET {} {}", filename, start),
        }
    }
}

/// `FILE <name> <owner-addr> <size>` 한 줄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    pub filename: String,
    pub owner: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(filename: impl Into<String>, owner: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            owner: owner.into(),
            size,
        }
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILE {} {} {}", self.filename, self.owner, self.size)
    }
}

impl FromStr for FileEntry {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["FILE", filename, owner, size] => Ok(FileEntry {
                filename: filename.to_string(),
                owner: owner.to_string(),
                size: size
                    .parse()
                    .map_err(|_| Error::UnexpectedReply(line.to_string()))?,
            }),
            _ => Err(Error::UnexpectedReply(line.to_string())),
        }
    }
}

/// 트래커 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    ConfirmJoin,
    ClientAlreadyConnected,
    ConfirmCreateFile(String),
    FileAlreadyExists,
    ConfirmDeleteFile(String),
    FileNotFound,
    /// SEARCH / LISTFILES 결과 (항상 1개 이상)
    Files(Vec<FileEntry>),
    InvalidRegex,
    /// LISTFILES: 레지스트리가 비어 있음
    AnyFile,
    ConfirmLeave,
    /// JOIN 전에 파일 변경 명령을 보냄
    NotJoined,
    /// 레지스트리 영속화 실패
    StorageError,
    ProtocolError(String),
}

impl Reply {
    /// 요청 처리 에러를 실패 토큰으로 변환
    ///
    /// 응답 상세는 ASCII 로만 구성한다.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::AlreadyJoined { .. } => Reply::ClientAlreadyConnected,
            Error::DuplicateFile { .. } => Reply::FileAlreadyExists,
            Error::FileNotFound { .. } => Reply::FileNotFound,
            Error::NotJoined { .. } => Reply::NotJoined,
            Error::InvalidRegex(_) | Error::PatternRejected { .. } => Reply::InvalidRegex,
            Error::Io(_) | Error::Json(_) => Reply::StorageError,
            Error::UnknownCommand(cmd) => {
                Reply::ProtocolError(format!("unknown command {}", cmd.escape_default()))
            }
            Error::MalformedCommand(_) => Reply::ProtocolError("malformed command".into()),
            Error::FrameTooLarge { max, .. } => {
                Reply::ProtocolError(format!("frame exceeds {} bytes", max))
            }
            _ => Reply::ProtocolError("bad request".into()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::ConfirmJoin => f.write_str("CONFIRMJOIN"),
            Reply::ClientAlreadyConnected => f.write_str("CLIENTALREADYCONNECTED"),
            Reply::ConfirmCreateFile(name) => write!(f, "CONFIRMCREATEFILE {}", name),
            Reply::FileAlreadyExists => f.write_str("FILEALREADYEXISTS"),
            Reply::ConfirmDeleteFile(name) => write!(f, "CONFIRMDELETEFILE {}", name),
            Reply::FileNotFound => f.write_str("FILENOTFOUND"),
            Reply::Files(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}", entry)?;
                }
                Ok(())
            }
            Reply::InvalidRegex => f.write_str("INVALIDREGEX"),
            Reply::AnyFile => f.write_str("ANYFILE"),
            Reply::ConfirmLeave => f.write_str("CONFIRMLEAVE"),
            Reply::NotJoined => f.write_str("NOTJOINED"),
            Reply::StorageError => f.write_str("STORAGEERROR"),
            Reply::ProtocolError(detail) => write!(f, "PROTOCOLERROR {}", detail),
        }
    }
}

impl FromStr for Reply {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        let (keyword, rest) = match text.split_once(' ') {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (text, ""),
        };

        let reply = match (keyword, rest.is_empty()) {
            ("CONFIRMJOIN", true) => Reply::ConfirmJoin,
            ("CLIENTALREADYCONNECTED", true) => Reply::ClientAlreadyConnected,
            ("CONFIRMCREATEFILE", false) => Reply::ConfirmCreateFile(rest.to_string()),
            ("FILEALREADYEXISTS", true) => Reply::FileAlreadyExists,
            ("CONFIRMDELETEFILE", false) => Reply::ConfirmDeleteFile(rest.to_string()),
            ("FILENOTFOUND", true) => Reply::FileNotFound,
            ("INVALIDREGEX", true) => Reply::InvalidRegex,
            ("ANYFILE", true) => Reply::AnyFile,
            ("CONFIRMLEAVE", true) => Reply::ConfirmLeave,
            ("NOTJOINED", true) => Reply::NotJoined,
            ("STORAGEERROR", true) => Reply::StorageError,
            ("PROTOCOLERROR", _) => Reply::ProtocolError(rest.to_string()),
            ("FILE", false) => Reply::Files(
                text.lines()
                    .map(str::parse::<FileEntry>)
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => return Err(Error::UnexpectedReply(text.to_string())),
        };
        Ok(reply)
    }
}

/// GET 응답 헤더 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferHeader {
    /// 이어서 n 바이트 전송
    Data(u64),
    FileNotFound,
    InvalidRange,
    ProtocolError(String),
}

impl fmt::Display for TransferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferHeader::Data(len) => write!(f, "DATA {}", len),
            TransferHeader::FileNotFound => f.write_str("FILENOTFOUND"),
            TransferHeader::InvalidRange => f.write_str("INVALIDRANGE"),
            TransferHeader::ProtocolError(detail) => write!(f, "PROTOCOLERROR {}", detail),
        }
    }
}

impl FromStr for TransferHeader {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim();
        match text.split_once(' ') {
            Some(("DATA", len)) => len
                .trim()
                .parse()
                .map(TransferHeader::Data)
                .map_err(|_| Error::UnexpectedReply(text.to_string())),
            Some(("PROTOCOLERROR", detail)) => Ok(TransferHeader::ProtocolError(detail.to_string())),
            None if text == "FILENOTFOUND" => Ok(TransferHeader::FileNotFound),
            None if text == "INVALIDRANGE" => Ok(TransferHeader::InvalidRange),
            None if text == "PROTOCOLERROR" => Ok(TransferHeader::ProtocolError(String::new())),
            _ => Err(Error::UnexpectedReply(text.to_string())),
        }
    }
}

/// 프레임 전송
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload.as_bytes());

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// 프레임 수신
///
/// 프레임 시작 전에 상대가 연결을 닫으면 `Ok(None)`.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_size {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(e)
        }
    })?;

    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| Error::MalformedCommand("UTF-8 아님".into()))
}
