//! 바이트 범위 파일 서버 (피어측)
//!
//! - 연결 하나 = GET 요청 하나
//! - 응답: 헤더 프레임(`DATA <n>` 또는 실패 토큰) + 원시 바이트 n개, 이후 연결 종료
//! - 공유 디렉토리 밖의 파일은 존재 여부도 노출하지 않음 (`FILENOTFOUND`)

use std::future::Future;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::inventory::SharedDir;
use crate::message::{read_frame, write_frame, Command, TransferHeader};
use crate::stats::ServiceStats;
use crate::{Config, Error, Result};

/// 요청 범위의 실제 전송 길이
///
/// `end` 가 파일 길이를 넘으면 파일 끝까지로 자른다.
pub fn range_len(start: u64, end: Option<u64>, file_len: u64) -> Result<u64> {
    let invalid = || Error::InvalidRange {
        start,
        end,
        len: file_len,
    };

    if start > file_len {
        return Err(invalid());
    }
    match end {
        Some(end) if end < start => Err(invalid()),
        Some(end) => Ok(end.min(file_len) - start),
        None => Ok(file_len - start),
    }
}

/// 파일을 열고 시작 위치로 이동, 전송할 바이트 수 반환
async fn open_range(
    shared: &SharedDir,
    filename: &str,
    start: u64,
    end: Option<u64>,
) -> Result<(File, u64)> {
    let path = shared.resolve(filename)?;
    let mut file = File::open(&path).await?;
    let file_len = file.metadata().await?.len();

    let len = range_len(start, end, file_len)?;
    file.seek(SeekFrom::Start(start)).await?;
    Ok((file, len))
}

/// 파일 서버
pub struct FileServer {
    config: Config,
    listener: TcpListener,
    shared: Arc<SharedDir>,
    stats: Arc<ServiceStats>,
    limiter: Arc<Semaphore>,
}

impl FileServer {
    /// 리스닝 소켓 바인딩
    pub async fn bind(config: Config, shared: SharedDir) -> Result<Self> {
        let listener = TcpListener::bind(config.peer_addr).await?;
        info!(
            "File server listening on {}, sharing {:?}",
            listener.local_addr()?,
            shared.root()
        );

        Ok(Self {
            limiter: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
            listener,
            shared: Arc::new(shared),
            stats: Arc::new(ServiceStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        self.stats.clone()
    }

    /// 무기한 실행
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// `shutdown` 이 끝날 때까지 연결 수락
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.limiter.clone().acquire_owned() => {
                    permit.map_err(|_| Error::ConnectionClosed)?
                }
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept 실패: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            self.stats.record_accept();

            let shared = self.shared.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = serve_request(stream, peer, &shared, &stats, &config).await {
                    warn!(%peer, "전송 실패: {}", e);
                    stats.record_drop();
                }
            });
        }

        info!("File server stopped: {}", self.stats.summary());
        Ok(())
    }
}

async fn serve_request(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: &SharedDir,
    stats: &ServiceStats,
    config: &Config,
) -> Result<()> {
    let request = tokio::time::timeout(
        config.read_timeout(),
        read_frame(&mut stream, config.max_frame_size),
    )
    .await
    .map_err(|_| Error::Timeout)??;

    let Some(request) = request else {
        return Ok(());
    };

    let (filename, start, end) = match request.parse::<Command>() {
        Ok(Command::Get {
            filename,
            start,
            end,
        }) => (filename, start, end),
        Ok(other) => {
            stats.record_protocol_error();
            let header = TransferHeader::ProtocolError(format!(
                "{} is served by the tracker",
                other.keyword()
            ));
            write_frame(&mut stream, &header.to_string()).await?;
            return Ok(());
        }
        Err(e) => {
            stats.record_protocol_error();
            warn!(%peer, "잘못된 요청 '{}': {}", request, e);
            let header = TransferHeader::ProtocolError("malformed request".into());
            write_frame(&mut stream, &header.to_string()).await?;
            return Ok(());
        }
    };

    stats.record_command();
    debug!(%peer, filename = %filename, start, ?end, "GET");

    let (file, len) = match open_range(shared, &filename, start, end).await {
        Ok(opened) => opened,
        Err(e) => {
            debug!(%peer, "GET 거부: {}", e);
            let header = match e {
                Error::InvalidRange { .. } => TransferHeader::InvalidRange,
                _ => TransferHeader::FileNotFound,
            };
            write_frame(&mut stream, &header.to_string()).await?;
            return Ok(());
        }
    };

    write_frame(&mut stream, &TransferHeader::Data(len).to_string()).await?;

    let mut body = BufReader::with_capacity(config.transfer_buffer_size, file.take(len));
    let copied = tokio::io::copy_buf(&mut body, &mut stream).await?;
    stream.shutdown().await?;
    stats.record_bytes(copied);

    if copied < len {
        // 전송 도중 파일이 줄어듦
        warn!(%peer, filename = %filename, expected = len, copied, "short transfer");
        return Err(Error::ConnectionClosed);
    }

    info!(%peer, filename = %filename, start, bytes = copied, "transfer complete");
    Ok(())
}
