//! 트래커 / 피어 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_PEER_PORT, DEFAULT_TRACKER_PORT, MAX_FRAME_SIZE, MAX_REPLY_SIZE};

/// PeerShare 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 트래커 바인드 주소
    pub tracker_addr: SocketAddr,

    /// 피어 파일 서버 바인드 주소
    pub peer_addr: SocketAddr,

    /// 레지스트리 스냅샷 경로 (트래커)
    pub registry_path: PathBuf,

    /// 참가한 트래커 주소록 경로 (피어)
    pub address_book_path: PathBuf,

    /// 공유 디렉토리 (피어)
    pub shared_dir: PathBuf,

    /// 최대 동시 연결 수
    pub max_connections: usize,

    /// 프레임 수신 타임아웃 (밀리초)
    pub read_timeout_ms: u64,

    /// 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 최대 요청 프레임 크기 (바이트)
    pub max_frame_size: usize,

    /// 최대 응답 프레임 크기 (바이트, 클라이언트측)
    pub max_reply_size: usize,

    /// 파일 전송 버퍼 크기 (바이트)
    pub transfer_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TRACKER_PORT)),
            peer_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PEER_PORT)),
            registry_path: PathBuf::from("data.json"),
            address_book_path: PathBuf::from("servers.json"),
            shared_dir: PathBuf::from("./public"),
            max_connections: 64,
            read_timeout_ms: 30_000,     // 30초
            connect_timeout_ms: 5_000,   // 5초
            max_frame_size: MAX_FRAME_SIZE,
            max_reply_size: MAX_REPLY_SIZE,
            transfer_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            max_connections: 8,
            read_timeout_ms: 10_000,
            max_frame_size: 16 * 1024,
            transfer_buffer_size: 8 * 1024,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = Config::default();
        assert_eq!(config.tracker_addr.port(), 1234);
        assert_eq!(config.peer_addr.port(), 1235);
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert!(config.max_reply_size > config.max_frame_size);
    }

    #[test]
    fn test_low_spec_keeps_addresses() {
        let config = Config::low_spec();
        assert!(config.max_connections < Config::default().max_connections);
        assert_eq!(config.tracker_addr, Config::default().tracker_addr);
    }
}
