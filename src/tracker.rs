//! 트래커 서비스
//!
//! - 연결마다 태스크 하나 (세마포어로 동시 연결 수 제한)
//! - 연결당 상태 없음: 피어 신원은 원격 IP
//! - 명령 하나 = 프레임 하나 = 응답 하나
//! - 프로토콜 에러는 `PROTOCOLERROR` 로 응답하고 루프 유지
//! - 크기 초과 프레임은 `PROTOCOLERROR` 응답 후 연결 종료

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::message::{read_frame, write_frame, Command, Reply};
use crate::registry::Registry;
use crate::stats::ServiceStats;
use crate::{Config, Error, Result};

/// 크기 초과 프레임에서 버릴 최대 페이로드 (바이트)
const MAX_DISCARD: u64 = 1024 * 1024;

/// 명령 하나를 레지스트리에 적용하고 응답 생성
///
/// 레지스트리가 디스크에 동기 기록하므로 비동기 컨텍스트에서는
/// `spawn_blocking` 안에서 호출한다.
pub fn execute(registry: &Registry, peer: &str, command: Command) -> Reply {
    match command {
        Command::Join { addr } => {
            debug!(peer, announced = %addr, "JOIN");
            match registry.join(peer) {
                Ok(()) => Reply::ConfirmJoin,
                Err(e) => Reply::from_error(&e),
            }
        }
        Command::CreateFile { filename, size } => {
            match registry.create_file(peer, &filename, size) {
                Ok(()) => Reply::ConfirmCreateFile(filename),
                Err(e) => Reply::from_error(&e),
            }
        }
        Command::DeleteFile { filename } => match registry.delete_file(peer, &filename) {
            Ok(_) => Reply::ConfirmDeleteFile(filename),
            Err(e) => Reply::from_error(&e),
        },
        Command::Search { pattern } => match registry.search(&pattern) {
            Ok(entries) if entries.is_empty() => Reply::FileNotFound,
            Ok(entries) => Reply::Files(entries),
            Err(e) => Reply::from_error(&e),
        },
        Command::ListFiles => {
            let entries = registry.list_all();
            if entries.is_empty() {
                Reply::AnyFile
            } else {
                Reply::Files(entries)
            }
        }
        Command::Leave => match registry.leave(peer) {
            Ok(_) => Reply::ConfirmLeave,
            Err(e) => Reply::from_error(&e),
        },
        Command::Get { .. } => Reply::ProtocolError("GET is served on the peer port".into()),
    }
}

/// 트래커 서버
pub struct Tracker {
    config: Config,
    listener: TcpListener,
    registry: Arc<Registry>,
    stats: Arc<ServiceStats>,
    limiter: Arc<Semaphore>,
}

impl Tracker {
    /// 리스닝 소켓 바인딩
    ///
    /// 바인드 실패는 시작 단계의 유일한 치명적 에러.
    pub async fn bind(config: Config, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(config.tracker_addr).await?;
        info!("Tracker listening on {}", listener.local_addr()?);

        Ok(Self {
            limiter: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
            listener,
            registry,
            stats: Arc::new(ServiceStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        self.stats.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
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
            // 빈 슬롯이 생길 때까지 accept 하지 않음
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
            debug!(%peer, "connection accepted");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                let _permit = permit;
                handle_connection(stream, peer, registry, stats, config).await;
            });
        }

        info!("Tracker stopped: {}", self.stats.summary());
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    stats: Arc<ServiceStats>,
    config: Config,
) {
    let peer_ip = peer.ip().to_string();

    loop {
        let read = tokio::time::timeout(
            config.read_timeout(),
            read_frame(&mut stream, config.max_frame_size),
        )
        .await;

        let reply = match read {
            Err(_) => {
                debug!(%peer, "read timeout, closing");
                stats.record_drop();
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(text))) => match text.parse::<Command>() {
                Ok(command) => {
                    debug!(%peer, command = command.keyword(), "dispatch");
                    stats.record_command();
                    dispatch(&registry, &peer_ip, command).await
                }
                Err(e) => {
                    warn!(%peer, "잘못된 명령 '{}': {}", text, e);
                    stats.record_protocol_error();
                    Reply::from_error(&e)
                }
            },
            // 페이로드는 모두 읽혔으므로 연결 유지
            Ok(Err(e @ Error::MalformedCommand(_))) => {
                warn!(%peer, "잘못된 프레임: {}", e);
                stats.record_protocol_error();
                Reply::from_error(&e)
            }
            Ok(Err(e @ Error::FrameTooLarge { .. })) => {
                warn!(%peer, "프레임 거부: {}", e);
                stats.record_protocol_error();
                if let Err(e) = reject_oversized(&mut stream, &e, &config).await {
                    debug!(%peer, "거부 응답 실패: {}", e);
                }
                break;
            }
            Ok(Err(e)) => {
                warn!(%peer, "연결 에러: {}", e);
                stats.record_drop();
                break;
            }
        };

        if let Err(e) = write_frame(&mut stream, &reply.to_string()).await {
            warn!(%peer, "응답 전송 실패: {}", e);
            stats.record_drop();
            break;
        }
    }

    debug!(%peer, "connection closed");
}

/// 남은 페이로드를 버리고 실패 토큰 전송 후 송신측 종료
///
/// 읽지 않은 데이터가 남은 채로 닫으면 상대는 응답 대신 RST 를 받는다.
async fn reject_oversized(stream: &mut TcpStream, err: &Error, config: &Config) -> Result<()> {
    if let Error::FrameTooLarge { size, .. } = err {
        let mut payload = (&mut *stream).take((*size as u64).min(MAX_DISCARD));
        tokio::time::timeout(
            config.read_timeout(),
            tokio::io::copy(&mut payload, &mut tokio::io::sink()),
        )
        .await
        .map_err(|_| Error::Timeout)??;
    }

    write_frame(stream, &Reply::from_error(err).to_string()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn dispatch(registry: &Arc<Registry>, peer: &str, command: Command) -> Reply {
    let registry = registry.clone();
    let peer = peer.to_string();

    match tokio::task::spawn_blocking(move || execute(&registry, &peer, command)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("레지스트리 작업 실패: {}", e);
            Reply::StorageError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FileEntry;
    use tokio::sync::oneshot;

    fn test_config() -> Config {
        Config {
            tracker_addr: "127.0.0.1:0".parse().unwrap(),
            read_timeout_ms: 2_000,
            ..Config::default()
        }
    }

    fn cmd(line: &str) -> Command {
        line.parse().unwrap()
    }

    #[test]
    fn test_execute_scenario() {
        let registry = Registry::in_memory();
        let peer = "1.2.3.4";

        assert_eq!(execute(&registry, peer, cmd("JOIN 1.2.3.4")), Reply::ConfirmJoin);
        assert_eq!(
            execute(&registry, peer, cmd("JOIN 1.2.3.4")),
            Reply::ClientAlreadyConnected
        );
        assert_eq!(
            execute(&registry, peer, cmd("CREATEFILE a.txt 100")).to_string(),
            "CONFIRMCREATEFILE a.txt"
        );
        assert_eq!(
            execute(&registry, peer, cmd("CREATEFILE a.txt 100")),
            Reply::FileAlreadyExists
        );
        assert_eq!(
            execute(&registry, peer, Command::ListFiles).to_string(),
            "FILE a.txt 1.2.3.4 100"
        );
        assert_eq!(
            execute(&registry, peer, cmd("DELETEFILE a.txt")).to_string(),
            "CONFIRMDELETEFILE a.txt"
        );
        assert_eq!(execute(&registry, peer, Command::ListFiles), Reply::AnyFile);
        assert_eq!(
            execute(&registry, peer, cmd("DELETEFILE a.txt")),
            Reply::FileNotFound
        );
    }

    #[test]
    fn test_execute_search_replies() {
        let registry = Registry::in_memory();
        execute(&registry, "10.0.0.1", cmd("JOIN t"));
        execute(&registry, "10.0.0.1", cmd("CREATEFILE report.pdf 9"));

        assert_eq!(
            execute(&registry, "10.0.0.2", cmd("SEARCH ^rep")),
            Reply::Files(vec![FileEntry::new("report.pdf", "10.0.0.1", 9)])
        );
        assert_eq!(
            execute(&registry, "10.0.0.2", cmd("SEARCH ^zzz")),
            Reply::FileNotFound
        );
        assert_eq!(
            execute(&registry, "10.0.0.2", cmd("SEARCH (")),
            Reply::InvalidRegex
        );
    }

    #[test]
    fn test_execute_leave_and_gating() {
        let registry = Registry::in_memory();

        assert_eq!(execute(&registry, "5.5.5.5", Command::Leave), Reply::ConfirmLeave);
        assert_eq!(
            execute(&registry, "5.5.5.5", cmd("CREATEFILE a 1")),
            Reply::NotJoined
        );
        assert_eq!(registry.peer_count(), 0);

        execute(&registry, "5.5.5.5", cmd("JOIN t"));
        execute(&registry, "5.5.5.5", cmd("CREATEFILE a 1"));
        assert_eq!(execute(&registry, "5.5.5.5", Command::Leave), Reply::ConfirmLeave);
        assert_eq!(execute(&registry, "5.5.5.5", Command::Leave), Reply::ConfirmLeave);
        assert_eq!(execute(&registry, "5.5.5.5", Command::ListFiles), Reply::AnyFile);
    }

    #[test]
    fn test_execute_rejects_get() {
        let registry = Registry::in_memory();
        assert!(matches!(
            execute(&registry, "1.1.1.1", cmd("GET f 0")),
            Reply::ProtocolError(_)
        ));
    }

    async fn request(stream: &mut TcpStream, line: &str) -> String {
        write_frame(stream, line).await.unwrap();
        read_frame(stream, 64 * 1024).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_tracker_session_over_tcp() {
        let registry = Arc::new(Registry::in_memory());
        let tracker = Tracker::bind(test_config(), registry.clone()).await.unwrap();
        let addr = tracker.local_addr().unwrap();
        let stats = tracker.stats();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(tracker.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut stream, "JOIN 127.0.0.1").await, "CONFIRMJOIN");
        assert_eq!(
            request(&mut stream, "CREATEFILE a.txt 100").await,
            "CONFIRMCREATEFILE a.txt"
        );
        assert_eq!(
            request(&mut stream, "LISTFILES").await,
            "FILE a.txt 127.0.0.1 100"
        );

        // 알 수 없는 명령 후에도 연결 유지
        assert_eq!(
            request(&mut stream, "FETCH a.txt").await,
            "PROTOCOLERROR unknown command FETCH"
        );
        assert_eq!(
            request(&mut stream, "CREATEFILE b.txt").await,
            "PROTOCOLERROR malformed command"
        );
        assert_eq!(request(&mut stream, "LEAVE").await, "CONFIRMLEAVE");
        assert_eq!(request(&mut stream, "LISTFILES").await, "ANYFILE");
        drop(stream);

        assert_eq!(registry.peer_count(), 0);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(
            stats
                .protocol_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_tracker_closes_idle_connection() {
        let config = Config {
            read_timeout_ms: 100,
            ..test_config()
        };
        let tracker = Tracker::bind(config, Arc::new(Registry::in_memory()))
            .await
            .unwrap();
        let addr = tracker.local_addr().unwrap();
        let server = tokio::spawn(tracker.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            read_frame(&mut stream, 1024),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(closed, None);

        server.abort();
    }

    #[tokio::test]
    async fn test_tracker_drops_oversized_frame() {
        let config = Config {
            max_frame_size: 32,
            ..test_config()
        };
        let tracker = Tracker::bind(config, Arc::new(Registry::in_memory()))
            .await
            .unwrap();
        let addr = tracker.local_addr().unwrap();
        let server = tokio::spawn(tracker.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &format!("SEARCH {}", "a".repeat(64)))
            .await
            .unwrap();
        let reply = read_frame(&mut stream, 1024).await.unwrap();
        assert_eq!(reply.as_deref(), Some("PROTOCOLERROR frame exceeds 32 bytes"));
        assert_eq!(read_frame(&mut stream, 1024).await.unwrap(), None);

        server.abort();
    }

    #[tokio::test]
    async fn test_tracker_answers_large_oversized_frame() {
        let tracker = Tracker::bind(test_config(), Arc::new(Registry::in_memory()))
            .await
            .unwrap();
        let addr = tracker.local_addr().unwrap();
        let server = tokio::spawn(tracker.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &format!("SEARCH {}", "a".repeat(70_000)))
            .await
            .unwrap();
        let reply = read_frame(&mut stream, 1024).await.unwrap();
        assert_eq!(
            reply.as_deref(),
            Some("PROTOCOLERROR frame exceeds 65536 bytes")
        );

        server.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_are_linearized() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        let registry = Arc::new(Registry::open(&path).unwrap());
        let tracker = Tracker::bind(test_config(), registry.clone()).await.unwrap();
        let addr = tracker.local_addr().unwrap();
        let server = tokio::spawn(tracker.run());

        let run_all = move |lines: Vec<String>| async move {
            let tasks: Vec<_> = lines
                .into_iter()
                .map(|line| {
                    tokio::spawn(async move {
                        let mut stream = TcpStream::connect(addr).await.unwrap();
                        request(&mut stream, &line).await
                    })
                })
                .collect();
            let mut replies = Vec::new();
            for task in tasks {
                replies.push(task.await.unwrap());
            }
            replies
        };

        let joins = run_all(vec!["JOIN 127.0.0.1".to_string(); 16]).await;
        assert_eq!(joins.iter().filter(|r| *r == "CONFIRMJOIN").count(), 1);
        assert_eq!(
            joins.iter().filter(|r| *r == "CLIENTALREADYCONNECTED").count(),
            15
        );

        let creates = run_all(
            (0..32)
                .map(|i| format!("CREATEFILE f{:02} {}", i, i))
                .collect(),
        )
        .await;
        assert!(creates.iter().all(|r| r.starts_with("CONFIRMCREATEFILE")));

        // 같은 이름은 정확히 한 번만 등록
        let dups = run_all(vec!["CREATEFILE same 1".to_string(); 16]).await;
        assert_eq!(dups.iter().filter(|r| *r == "CONFIRMCREATEFILE same").count(), 1);
        assert_eq!(dups.iter().filter(|r| *r == "FILEALREADYEXISTS").count(), 15);

        let files = registry.files_of("127.0.0.1").unwrap();
        assert_eq!(files.len(), 33);

        // 디스크 스냅샷도 메모리와 동일
        let reopened = Registry::open(&path).unwrap();
        assert_eq!(reopened.files_of("127.0.0.1").unwrap(), files);
        assert_eq!(reopened.list_all(), registry.list_all());

        server.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connection_limit_defers_extra_peer() {
        let config = Config {
            max_connections: 2,
            read_timeout_ms: 10_000,
            ..test_config()
        };
        let tracker = Tracker::bind(config, Arc::new(Registry::in_memory()))
            .await
            .unwrap();
        let addr = tracker.local_addr().unwrap();
        let server = tokio::spawn(tracker.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut first, "LISTFILES").await, "ANYFILE");
        assert_eq!(request(&mut second, "LISTFILES").await, "ANYFILE");

        // 두 연결이 슬롯을 차지하는 동안 세 번째는 처리되지 않음
        let mut third = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut third, "LISTFILES").await.unwrap();
        let pending =
            tokio::time::timeout(Duration::from_millis(300), read_frame(&mut third, 1024)).await;
        assert!(pending.is_err());

        drop(first);
        let reply = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut third, 1024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.as_deref(), Some("ANYFILE"));

        server.abort();
    }
}
