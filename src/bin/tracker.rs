//! PeerShare 트래커
//!
//! 피어 주소 → 파일 목록 레지스트리를 유지하고 위치 메타데이터만 중개한다.
//!
//! 사용법:
//!   cargo run --release --bin peershare-tracker -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트(1234), ./data.json
//!   cargo run --release --bin peershare-tracker
//!
//!   # 다른 포트 + 스냅샷 경로
//!   cargo run --release --bin peershare-tracker -- --bind 0.0.0.0:4000 --data /var/lib/peershare/data.json

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peershare::{Config, Registry, Tracker};

fn parse_args() -> Result<Config, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind" | "-b", Some(value)) => {
                config.tracker_addr = value.parse()?;
                i += 1;
            }
            ("--data" | "-d", Some(value)) => {
                config.registry_path = PathBuf::from(value);
                i += 1;
            }
            ("--max-connections" | "-m", Some(value)) => {
                config.max_connections = value.parse()?;
                i += 1;
            }
            ("--timeout-ms", Some(value)) => {
                config.read_timeout_ms = value.parse()?;
                i += 1;
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"PeerShare Tracker

피어별 공유 파일 목록을 관리하는 랑데부 서버

사용법:
  cargo run --release --bin peershare-tracker -- [OPTIONS]

옵션:
  -b, --bind <ADDR>            바인드 주소 (기본: 0.0.0.0:1234)
  -d, --data <PATH>            레지스트리 스냅샷 경로 (기본: data.json)
  -m, --max-connections <N>    최대 동시 연결 수 (기본: 64)
  --timeout-ms <MS>            명령 대기 타임아웃 (기본: 30000)
  -h, --help                   이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            (flag, None) if flag.starts_with('-') => {
                return Err(format!("{} 값이 필요합니다", flag).into());
            }
            (other, _) => {
                return Err(format!("알 수 없는 인자: {}", other).into());
            }
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args()?;

    info!("PeerShare Tracker starting...");
    info!("Bind address: {}", config.tracker_addr);
    info!("Registry snapshot: {:?}", config.registry_path);
    info!("Max connections: {}", config.max_connections);

    let registry = Arc::new(Registry::open(&config.registry_path)?);
    let tracker = Tracker::bind(config, registry).await?;

    tracker
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
