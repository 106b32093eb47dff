//! 참가한 트래커 주소록 (피어측)
//!
//! JSON 문자열 배열로 저장되며 삽입 순서를 유지한다.

use std::io;
use std::path::{Path, PathBuf};

use crate::Result;

/// 트래커 주소록
#[derive(Debug, Clone)]
pub struct PeerAddressBook {
    path: PathBuf,
    addresses: Vec<String>,
}

impl PeerAddressBook {
    /// 주소록 로드 (파일이 없으면 빈 목록)
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let addresses = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, addresses })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// 주소 추가 (이미 있으면 false)
    pub fn insert(&mut self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        if self.addresses.contains(&addr) {
            return false;
        }
        self.addresses.push(addr);
        true
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.addresses)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insert_keeps_order_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut book = PeerAddressBook::load(dir.path().join("servers.json")).unwrap();
        assert!(book.addresses().is_empty());

        assert!(book.insert("10.0.0.2"));
        assert!(book.insert("10.0.0.1"));
        assert!(!book.insert("10.0.0.2"));
        assert_eq!(book.addresses(), ["10.0.0.2", "10.0.0.1"]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.json");

        let mut book = PeerAddressBook::load(&path).unwrap();
        book.insert("192.168.0.10");
        book.save().unwrap();

        let raw: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["192.168.0.10".to_string()]);

        let book = PeerAddressBook::load(&path).unwrap();
        assert_eq!(book.addresses(), ["192.168.0.10"]);
    }
}
