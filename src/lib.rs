//! # PeerShare
//!
//! 트래커 중개형 P2P 파일 공유
//!
//! ## 구성
//! - **트래커**: 피어 주소 → 광고 파일 목록 레지스트리, 위치 메타데이터만 중개
//! - **피어**: 트래커에 파일 목록을 등록/조회하고, 다른 피어에게 바이트 범위 파일 제공
//! - **와이어 프로토콜**: 길이 접두 프레임 안의 공백 구분 ASCII 명령
//! - **레지스트리**: 단일 락 + 변경마다 JSON 스냅샷 기록 (write-through)
//! - **파일 서버**: 공유 디렉토리 밖으로의 경로 탈출 차단
//!
//! 흐름: 피어 → 트래커 (등록/검색) → 소유 피어 주소 확인 → 소유 피어 파일 서버 (GET)

pub mod address_book;
pub mod client;
pub mod config;
pub mod error;
pub mod inventory;
pub mod message;
pub mod registry;
pub mod stats;
pub mod tracker;
pub mod transfer;

pub use address_book::PeerAddressBook;
pub use client::{PeerConnector, SyncFailure, SyncReport, TrackerClient};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use inventory::{LocalFile, SharedDir};
pub use message::{Command, FileEntry, Reply, TransferHeader};
pub use registry::{FileRecord, Registry};
pub use stats::ServiceStats;
pub use tracker::Tracker;
pub use transfer::FileServer;

/// 트래커 기본 포트
pub const DEFAULT_TRACKER_PORT: u16 = 1234;

/// 피어 파일 서버 기본 포트
pub const DEFAULT_PEER_PORT: u16 = 1235;

/// 기본 최대 프레임 크기 (바이트)
pub const MAX_FRAME_SIZE: usize = 64 * 1024; // 64KB

/// 기본 최대 응답 프레임 크기 (바이트)
///
/// LISTFILES / SEARCH 응답은 레지스트리 크기에 비례하므로 요청 한도와 분리한다.
pub const MAX_REPLY_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// 프레임 길이 헤더 크기 (u32 BE)
pub const FRAME_HEADER_LEN: usize = 4;
