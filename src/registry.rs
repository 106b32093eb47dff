//! 트래커 레지스트리
//!
//! - 피어 주소 → 파일 목록 매핑
//! - 모든 변경은 단일 쓰기 락 아래에서 직렬화
//! - 변경마다 스냅샷 전체를 디스크에 기록 (write-through)
//! - 기록 실패 시 메모리 변경을 되돌림

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::message::FileEntry;
use crate::{Error, Result};

/// 피어 하나가 광고하는 파일 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
}

impl FileRecord {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }
}

/// 디스크 스냅샷 형식: `{ "<addr>": [{"filename": .., "size": ..}, ..] }`
pub type Snapshot = BTreeMap<String, Vec<FileRecord>>;

/// JSON 스냅샷 파일
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 스냅샷 로드 (파일이 없으면 빈 레지스트리)
    pub fn load(&self) -> Result<Snapshot> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Snapshot::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// 스냅샷 전체 기록
    ///
    /// 임시 파일에 쓴 뒤 rename 하므로 중간에 죽어도 이전 스냅샷이 남는다.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut tmp: OsString = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// 피어 주소 → 파일 목록 레지스트리
pub struct Registry {
    /// 모든 피어 상태 (단일 락 도메인)
    peers: RwLock<Snapshot>,

    /// 영속 저장소 (None이면 메모리 전용)
    store: Option<SnapshotFile>,
}

impl Registry {
    /// 스냅샷 파일에서 레지스트리 열기
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = SnapshotFile::new(path);
        let peers = store.load()?;
        info!(
            "Registry loaded from {:?}: {} peers",
            store.path(),
            peers.len()
        );

        Ok(Self {
            peers: RwLock::new(peers),
            store: Some(store),
        })
    }

    /// 메모리 전용 레지스트리
    pub fn in_memory() -> Self {
        Self {
            peers: RwLock::new(Snapshot::new()),
            store: None,
        }
    }

    fn persist(&self, peers: &Snapshot) -> Result<()> {
        match &self.store {
            Some(store) => store.save(peers).map_err(|e| {
                warn!("레지스트리 저장 실패: {}", e);
                e
            }),
            None => Ok(()),
        }
    }

    /// 피어 참가
    pub fn join(&self, addr: &str) -> Result<()> {
        let mut peers = self.peers.write();
        if peers.contains_key(addr) {
            return Err(Error::AlreadyJoined {
                addr: addr.to_string(),
            });
        }

        peers.insert(addr.to_string(), Vec::new());
        if let Err(e) = self.persist(&peers) {
            peers.remove(addr);
            return Err(e);
        }

        debug!(peer = addr, "joined");
        Ok(())
    }

    /// 피어 이탈 (없는 주소면 no-op, 제거 여부 반환)
    pub fn leave(&self, addr: &str) -> Result<bool> {
        let mut peers = self.peers.write();
        let Some(files) = peers.remove(addr) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&peers) {
            peers.insert(addr.to_string(), files);
            return Err(e);
        }

        debug!(peer = addr, files = files.len(), "left");
        Ok(true)
    }

    /// 파일 등록
    pub fn create_file(&self, addr: &str, filename: &str, size: u64) -> Result<()> {
        let mut peers = self.peers.write();
        let files = peers.get_mut(addr).ok_or_else(|| Error::NotJoined {
            addr: addr.to_string(),
        })?;

        if files.iter().any(|f| f.filename == filename) {
            return Err(Error::DuplicateFile {
                addr: addr.to_string(),
                filename: filename.to_string(),
            });
        }

        files.push(FileRecord::new(filename, size));
        if let Err(e) = self.persist(&peers) {
            if let Some(files) = peers.get_mut(addr) {
                files.pop();
            }
            return Err(e);
        }

        debug!(peer = addr, filename, size, "file created");
        Ok(())
    }

    /// 파일 등록 해제 (제거된 레코드 반환)
    pub fn delete_file(&self, addr: &str, filename: &str) -> Result<FileRecord> {
        let mut peers = self.peers.write();
        let files = peers.get_mut(addr).ok_or_else(|| Error::NotJoined {
            addr: addr.to_string(),
        })?;

        let index = files
            .iter()
            .position(|f| f.filename == filename)
            .ok_or_else(|| Error::FileNotFound {
                filename: filename.to_string(),
            })?;

        let record = files.remove(index);
        if let Err(e) = self.persist(&peers) {
            if let Some(files) = peers.get_mut(addr) {
                files.insert(index, record);
            }
            return Err(e);
        }

        debug!(peer = addr, filename, "file deleted");
        Ok(record)
    }

    /// 정규식 파일명 검색 (부분 일치)
    pub fn search(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        let regex = Regex::new(pattern)?;
        let peers = self.peers.read();

        Ok(peers
            .iter()
            .flat_map(|(owner, files)| {
                files
                    .iter()
                    .filter(|f| regex.is_match(&f.filename))
                    .map(move |f| FileEntry::new(f.filename.clone(), owner.clone(), f.size))
            })
            .collect())
    }

    /// 전체 파일 목록
    pub fn list_all(&self) -> Vec<FileEntry> {
        let peers = self.peers.read();
        peers
            .iter()
            .flat_map(|(owner, files)| {
                files
                    .iter()
                    .map(move |f| FileEntry::new(f.filename.clone(), owner.clone(), f.size))
            })
            .collect()
    }

    /// 특정 피어의 파일 목록
    pub fn files_of(&self, addr: &str) -> Option<Vec<FileRecord>> {
        self.peers.read().get(addr).cloned()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.read().contains_key(addr)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}
