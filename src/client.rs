//! 피어 클라이언트
//!
//! - `TrackerClient`: 트래커 명령 (명령 하나 = 연결 하나)
//! - `PeerConnector`: 다른 피어의 파일 서버에서 바이트 범위 수신

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::inventory::{validate_filename, SharedDir};
use crate::message::{read_frame, write_frame, Command, FileEntry, Reply, TransferHeader};
use crate::{Config, Error, Result};

async fn connect(addr: SocketAddr, config: &Config) -> Result<TcpStream> {
    tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::from)
}

/// 동기화 단계 하나의 실패 원인
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    /// 트래커가 실패 토큰으로 응답
    Rejected(Reply),
    /// 연결 / 타임아웃 등 응답을 받지 못함
    Transport(String),
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::Rejected(reply) => write!(f, "{}", reply),
            SyncFailure::Transport(reason) => write!(f, "전송 실패: {}", reason),
        }
    }
}

/// 파일 목록 동기화 결과
///
/// 실패한 단계는 되돌리지 않고 기록만 한 뒤 나머지 단계를 계속한다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// 새로 등록한 파일
    pub created: Vec<String>,

    /// 등록 해제한 파일
    pub deleted: Vec<String>,

    /// 실패한 파일과 원인
    pub failed: Vec<(String, SyncFailure)>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record_failure(&mut self, keyword: &str, filename: &str, outcome: Result<Reply>) {
        let failure = match outcome {
            Ok(reply) => SyncFailure::Rejected(reply),
            Err(e) => SyncFailure::Transport(e.to_string()),
        };
        warn!("{} {} 실패: {}", keyword, filename, failure);
        self.failed.push((filename.to_string(), failure));
    }
}

/// 트래커 클라이언트
#[derive(Debug, Clone)]
pub struct TrackerClient {
    tracker_addr: SocketAddr,
    config: Config,
}

impl TrackerClient {
    pub fn new(tracker_addr: SocketAddr, config: Config) -> Self {
        Self {
            tracker_addr,
            config,
        }
    }

    pub fn tracker_addr(&self) -> SocketAddr {
        self.tracker_addr
    }

    /// 명령 하나 전송 후 응답 수신, 트래커가 본 로컬 IP 도 함께 반환
    async fn exchange(&self, command: &Command) -> Result<(Reply, IpAddr)> {
        let mut stream = connect(self.tracker_addr, &self.config).await?;
        let local_ip = stream.local_addr()?.ip();

        write_frame(&mut stream, &command.to_string()).await?;
        let text = tokio::time::timeout(
            self.config.read_timeout(),
            read_frame(&mut stream, self.config.max_reply_size),
        )
        .await
        .map_err(|_| Error::Timeout)??
        .ok_or(Error::ConnectionClosed)?;

        debug!(tracker = %self.tracker_addr, command = command.keyword(), "reply received");
        Ok((text.parse()?, local_ip))
    }

    /// 명령 하나 전송 후 응답 수신
    pub async fn request(&self, command: &Command) -> Result<Reply> {
        self.exchange(command).await.map(|(reply, _)| reply)
    }

    pub async fn join(&self) -> Result<Reply> {
        self.request(&Command::Join {
            addr: self.tracker_addr.ip().to_string(),
        })
        .await
    }

    pub async fn leave(&self) -> Result<Reply> {
        self.request(&Command::Leave).await
    }

    pub async fn create_file(&self, filename: &str, size: u64) -> Result<Reply> {
        self.request(&Command::CreateFile {
            filename: filename.to_string(),
            size,
        })
        .await
    }

    pub async fn delete_file(&self, filename: &str) -> Result<Reply> {
        self.request(&Command::DeleteFile {
            filename: filename.to_string(),
        })
        .await
    }

    /// 정규식 검색 (결과 없음은 빈 목록)
    pub async fn search(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        let reply = self
            .request(&Command::Search {
                pattern: pattern.to_string(),
            })
            .await?;

        match reply {
            Reply::Files(entries) => Ok(entries),
            Reply::FileNotFound => Ok(Vec::new()),
            Reply::InvalidRegex => Err(Error::PatternRejected {
                pattern: pattern.to_string(),
            }),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// 전체 파일 목록 (레지스트리가 비면 빈 목록)
    pub async fn list_files(&self) -> Result<Vec<FileEntry>> {
        self.list_files_as_seen().await.map(|(entries, _)| entries)
    }

    async fn list_files_as_seen(&self) -> Result<(Vec<FileEntry>, IpAddr)> {
        let (reply, local_ip) = self.exchange(&Command::ListFiles).await?;
        match reply {
            Reply::Files(entries) => Ok((entries, local_ip)),
            Reply::AnyFile => Ok((Vec::new(), local_ip)),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// 공유 디렉토리와 트래커의 내 파일 목록 동기화
    ///
    /// 1. LISTFILES 로 내 주소 소유 파일 수집
    /// 2. 로컬 목록과 차집합 계산
    /// 3. 로컬에만 있으면 CREATEFILE, 트래커에만 있으면 DELETEFILE
    pub async fn update_file_list(&self, shared: &SharedDir) -> Result<SyncReport> {
        let local: BTreeMap<String, u64> = shared
            .scan()?
            .into_iter()
            .map(|f| (f.filename, f.size))
            .collect();

        let (entries, local_ip) = self.list_files_as_seen().await?;
        let owner = local_ip.to_string();
        let remote: BTreeSet<String> = entries
            .into_iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.filename)
            .collect();

        let mut report = SyncReport::default();

        for (filename, size) in local.iter().filter(|(name, _)| !remote.contains(*name)) {
            match self.create_file(filename, *size).await {
                Ok(Reply::ConfirmCreateFile(_)) => report.created.push(filename.clone()),
                outcome => report.record_failure("CREATEFILE", filename, outcome),
            }
        }

        for filename in remote.iter().filter(|name| !local.contains_key(*name)) {
            match self.delete_file(filename).await {
                Ok(Reply::ConfirmDeleteFile(_)) => report.deleted.push(filename.clone()),
                outcome => report.record_failure("DELETEFILE", filename, outcome),
            }
        }

        info!(
            owner = %owner,
            created = report.created.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "file list synchronized"
        );
        Ok(report)
    }
}

/// 다른 피어의 파일 서버 접속기
#[derive(Debug, Clone)]
pub struct PeerConnector {
    config: Config,
}

impl PeerConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// 바이트 범위 수신 (`end` 없으면 파일 끝까지)
    pub async fn fetch_range(
        &self,
        peer: SocketAddr,
        filename: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Bytes> {
        let mut stream = connect(peer, &self.config).await?;
        let command = Command::Get {
            filename: filename.to_string(),
            start,
            end,
        };
        write_frame(&mut stream, &command.to_string()).await?;

        let header = tokio::time::timeout(
            self.config.read_timeout(),
            read_frame(&mut stream, self.config.max_frame_size),
        )
        .await
        .map_err(|_| Error::Timeout)??
        .ok_or(Error::ConnectionClosed)?;

        let len = match header.parse::<TransferHeader>()? {
            TransferHeader::Data(len) => len,
            TransferHeader::FileNotFound => {
                return Err(Error::FileNotFound {
                    filename: filename.to_string(),
                })
            }
            TransferHeader::InvalidRange => {
                return Err(Error::RangeRejected {
                    filename: filename.to_string(),
                    start,
                    end,
                })
            }
            TransferHeader::ProtocolError(detail) => return Err(Error::UnexpectedReply(detail)),
        };

        let capacity = usize::try_from(len).unwrap_or(usize::MAX).min(self.config.transfer_buffer_size);
        let mut data = BytesMut::with_capacity(capacity);
        let mut body = stream.take(len);
        loop {
            let read = tokio::time::timeout(self.config.read_timeout(), body.read_buf(&mut data))
                .await
                .map_err(|_| Error::Timeout)??;
            if read == 0 {
                break;
            }
        }

        if (data.len() as u64) < len {
            return Err(Error::ConnectionClosed);
        }

        debug!(%peer, filename, start, bytes = data.len(), "range fetched");
        Ok(data.freeze())
    }

    /// 바이트 범위를 받아 `dest` 디렉토리에 `filename` 으로 저장
    pub async fn download(
        &self,
        peer: SocketAddr,
        filename: &str,
        start: u64,
        end: Option<u64>,
        dest: &SharedDir,
    ) -> Result<PathBuf> {
        validate_filename(filename)?;
        let data = self.fetch_range(peer, filename, start, end).await?;

        let path = dest.target_path(filename)?;
        tokio::fs::write(&path, &data).await?;
        info!(%peer, filename, bytes = data.len(), "downloaded to {:?}", path);
        Ok(path)
    }
}
