//! 서비스 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 트래커 / 파일 서버 공용 카운터
#[derive(Debug)]
pub struct ServiceStats {
    /// 시작 시간
    start_time: Instant,

    /// 수락한 연결 수
    pub connections_accepted: AtomicU64,

    /// 타임아웃 / IO 에러로 끊긴 연결 수
    pub connections_dropped: AtomicU64,

    /// 처리한 명령 수
    pub commands_handled: AtomicU64,

    /// 프로토콜 에러 응답 수
    pub protocol_errors: AtomicU64,

    /// 전송한 파일 바이트
    pub bytes_served: AtomicU64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            connections_dropped: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
        }
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.connections_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Uptime: {:.1}s | Connections: {} (dropped {}) | Commands: {} | Protocol errors: {} | Bytes served: {}",
            self.elapsed().as_secs_f64(),
            self.connections_accepted.load(Ordering::Relaxed),
            self.connections_dropped.load(Ordering::Relaxed),
            self.commands_handled.load(Ordering::Relaxed),
            self.protocol_errors.load(Ordering::Relaxed),
            self.bytes_served.load(Ordering::Relaxed),
        )
    }
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let stats = ServiceStats::new();
        stats.record_accept();
        stats.record_accept();
        stats.record_command();
        stats.record_bytes(10);

        let summary = stats.summary();
        assert!(summary.contains("Connections: 2 (dropped 0)"));
        assert!(summary.contains("Commands: 1"));
        assert!(summary.contains("Bytes served: 10"));
    }
}
