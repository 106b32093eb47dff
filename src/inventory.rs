//! 로컬 공유 디렉토리
//!
//! 피어가 제공하는 파일 목록의 원천. 디렉토리 바로 아래의 일반 파일만 대상이며
//! 모든 파일 접근은 디렉토리 안으로 제한된다.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Error, Result};

/// 공유 디렉토리의 파일 하나
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalFile {
    pub filename: String,
    pub size: u64,
}

/// 와이어에 실을 수 있는 단일 파일명인지 검사
///
/// 경로 구분자, 공백, 제어 문자, `.`/`..` 는 거부.
pub fn validate_filename(name: &str) -> Result<()> {
    let rejected = name.is_empty()
        || name == "."
        || name == ".."
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());

    if rejected {
        return Err(Error::PathRejected(name.to_string()));
    }
    Ok(())
}

/// 공유 디렉토리
#[derive(Debug, Clone)]
pub struct SharedDir {
    /// 정규화된 루트 경로
    root: PathBuf,
}

impl SharedDir {
    /// 디렉토리 열기 (없으면 생성)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let root = path.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 공유 파일 목록 (이름순)
    pub fn scan(&self) -> Result<Vec<LocalFile>> {
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                warn!("UTF-8 이 아닌 파일명 건너뜀: {:?}", entry.file_name());
                continue;
            };
            if validate_filename(&filename).is_err() {
                warn!("프로토콜로 표현할 수 없는 파일명 건너뜀: {:?}", filename);
                continue;
            }

            files.push(LocalFile {
                filename,
                size: metadata.len(),
            });
        }

        files.sort();
        Ok(files)
    }

    /// 파일명을 루트 안의 실제 경로로 변환
    ///
    /// 심볼릭 링크로 루트 밖을 가리키는 경우도 거부한다.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;

        let candidate = self.root.join(name);
        let canonical = match candidate.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::FileNotFound {
                    filename: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !canonical.starts_with(&self.root) {
            return Err(Error::PathRejected(name.to_string()));
        }
        if !canonical.is_file() {
            return Err(Error::FileNotFound {
                filename: name.to_string(),
            });
        }

        Ok(canonical)
    }

    /// 다운로드 저장 경로 (파일이 아직 없어도 됨)
    pub fn target_path(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;
        Ok(self.root.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::open(dir.path().join("public")).unwrap();
        assert!(shared.root().is_dir());
        assert!(shared.scan().unwrap().is_empty());
    }

    #[test]
    fn test_scan_lists_immediate_files() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("b.bin"), [0u8; 5]).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("has space.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.txt"), b"x").unwrap();

        let files = shared.scan().unwrap();
        assert_eq!(
            files,
            vec![
                LocalFile {
                    filename: "a.txt".into(),
                    size: 5
                },
                LocalFile {
                    filename: "b.bin".into(),
                    size: 5
                },
            ]
        );
    }

    #[test]
    fn test_resolve_confines_to_root() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::open(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"s").unwrap();
        std::fs::write(shared.root().join("ok.txt"), b"o").unwrap();

        assert!(shared.resolve("ok.txt").is_ok());
        assert!(matches!(
            shared.resolve("../secret.txt"),
            Err(Error::PathRejected(_))
        ));
        assert!(matches!(shared.resolve(".."), Err(Error::PathRejected(_))));
        assert!(matches!(shared.resolve(""), Err(Error::PathRejected(_))));
        assert!(matches!(
            shared.resolve("missing.txt"),
            Err(Error::FileNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let shared = SharedDir::open(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"s").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("secret.txt"),
            shared.root().join("link.txt"),
        )
        .unwrap();

        assert!(matches!(
            shared.resolve("link.txt"),
            Err(Error::PathRejected(_))
        ));
    }
}
