//! PeerShare 피어
//!
//! 트래커에 공유 파일 목록을 등록/조회하고, 다른 피어에게 파일을 바이트 범위로 제공한다.
//!
//! 사용법:
//!   cargo run --release --bin peershare-peer -- [OPTIONS] <COMMAND> [ARGS]
//!
//! 예시:
//!   # 파일 서버 실행
//!   cargo run --release --bin peershare-peer -- --shared ./public serve
//!
//!   # 트래커 참가 후 공유 목록 동기화
//!   cargo run --release --bin peershare-peer -- -t 192.168.1.10 join
//!   cargo run --release --bin peershare-peer -- -t 192.168.1.10 sync
//!
//!   # 검색 후 10~20 바이트 다운로드
//!   cargo run --release --bin peershare-peer -- -t 192.168.1.10 search '\.mkv$'
//!   cargo run --release --bin peershare-peer -- get 192.168.1.20 movie.mkv 10 20

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peershare::{
    Command, Config, FileServer, PeerAddressBook, PeerConnector, SharedDir, TrackerClient,
    DEFAULT_PEER_PORT, DEFAULT_TRACKER_PORT,
};

/// 피어 실행 설정
struct PeerArgs {
    tracker: SocketAddr,
    config: Config,
    command: Vec<String>,
}

/// `IP` 또는 `IP:PORT`
fn parse_endpoint(value: &str, default_port: u16) -> Result<SocketAddr, Box<dyn Error>> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = value.parse()?;
    Ok(SocketAddr::new(ip, default_port))
}

fn print_help() {
    println!(
        r#"PeerShare Peer

트래커 클라이언트 + 바이트 범위 파일 서버

사용법:
  cargo run --release --bin peershare-peer -- [OPTIONS] <COMMAND> [ARGS]

옵션:
  -t, --tracker <ADDR>    트래커 주소 (기본: 127.0.0.1:1234)
  -b, --bind <ADDR>       파일 서버 바인드 주소 (기본: 0.0.0.0:1235)
  -s, --shared <DIR>      공유 디렉토리 (기본: ./public)
  --servers <PATH>        참가한 트래커 주소록 (기본: servers.json)
  -h, --help              이 도움말 출력

명령:
  serve                               파일 서버 실행 (Ctrl-C 로 종료)
  join                                트래커 참가 + 주소록 기록
  leave                               트래커 이탈
  sync                                공유 디렉토리와 트래커 목록 동기화
  search <PATTERN>                    정규식 파일명 검색
  list                                트래커의 전체 파일 목록
  delete <NAME>                       파일 등록 해제
  get <PEER> <NAME> <START> [END]     피어에서 바이트 범위 다운로드
  servers                             주소록 출력
"#
    );
}

fn parse_args() -> Result<PeerArgs, Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut tracker = SocketAddr::from(([127, 0, 0, 1], DEFAULT_TRACKER_PORT));
    let mut config = Config::default();
    let mut command = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--tracker" | "-t", Some(value)) => {
                tracker = parse_endpoint(value, DEFAULT_TRACKER_PORT)?;
                i += 1;
            }
            ("--bind" | "-b", Some(value)) => {
                config.peer_addr = value.parse()?;
                i += 1;
            }
            ("--shared" | "-s", Some(value)) => {
                config.shared_dir = PathBuf::from(value);
                i += 1;
            }
            ("--servers", Some(value)) => {
                config.address_book_path = PathBuf::from(value);
                i += 1;
            }
            ("--help" | "-h", _) => {
                print_help();
                std::process::exit(0);
            }
            (flag, None) if flag.starts_with("--") => {
                return Err(format!("{} 값이 필요합니다", flag).into());
            }
            _ => {
                // 첫 위치 인자부터는 명령
                command.extend(args[i..].iter().cloned());
                break;
            }
        }
        i += 1;
    }

    Ok(PeerArgs {
        tracker,
        config,
        command,
    })
}

fn parse_offset(value: &str) -> Result<u64, Box<dyn Error>> {
    value
        .parse()
        .map_err(|_| format!("오프셋은 0 이상의 정수여야 합니다: {}", value).into())
}

async fn run_command(args: PeerArgs) -> Result<(), Box<dyn Error>> {
    let PeerArgs {
        tracker,
        config,
        command,
    } = args;
    let client = TrackerClient::new(tracker, config.clone());
    let words: Vec<&str> = command.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["serve"] => {
            let shared = SharedDir::open(&config.shared_dir)?;
            let server = FileServer::bind(config, shared).await?;
            server
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await?;
        }
        ["join"] => {
            let reply = client.join().await?;
            println!("{}", reply);

            let mut book = PeerAddressBook::load(&config.address_book_path)?;
            if book.insert(tracker.ip().to_string()) {
                book.save()?;
            }
        }
        ["leave"] => println!("{}", client.leave().await?),
        ["sync"] => {
            let shared = SharedDir::open(&config.shared_dir)?;
            let report = client.update_file_list(&shared).await?;
            for name in &report.created {
                println!("CONFIRMCREATEFILE {}", name);
            }
            for name in &report.deleted {
                println!("CONFIRMDELETEFILE {}", name);
            }
            for (name, failure) in &report.failed {
                println!("{}: {}", name, failure);
            }
        }
        ["search", pattern] => {
            let reply = client
                .request(&Command::Search {
                    pattern: pattern.to_string(),
                })
                .await?;
            println!("{}", reply);
        }
        ["list"] => println!("{}", client.request(&Command::ListFiles).await?),
        ["delete", name] => println!("{}", client.delete_file(name).await?),
        ["get", peer, name, start, rest @ ..] if rest.len() <= 1 => {
            let peer = parse_endpoint(peer, DEFAULT_PEER_PORT)?;
            let start = parse_offset(start)?;
            let end = rest.first().map(|end| parse_offset(end)).transpose()?;

            let shared = SharedDir::open(&config.shared_dir)?;
            let path = PeerConnector::new(config)
                .download(peer, name, start, end, &shared)
                .await?;
            println!("File {} downloaded successfully to {:?}", name, path);
        }
        ["servers"] => {
            let book = PeerAddressBook::load(&config.address_book_path)?;
            if book.addresses().is_empty() {
                println!("You don't have any servers saved.");
            }
            for (i, addr) in book.addresses().iter().enumerate() {
                println!("[{}] {}", i + 1, addr);
            }
        }
        [] => {
            print_help();
        }
        other => {
            return Err(format!("알 수 없는 명령: {}", other.join(" ")).into());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;
    info!("Tracker address: {}", args.tracker);

    run_command(args).await
}
