//! Local-directory store for dry runs and tests.
//!
//! The root directory stands in for the server root and the login
//! directory alike.

use super::{RemoteError, RemoteSession, RemoteStore};
use std::fs;
use std::io::Read;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RemoteStore for LocalDirStore {
    fn open(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        fs::create_dir_all(&self.root).map_err(|e| RemoteError::Connect {
            host: self.root.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(LocalSession {
            root: self.root.clone(),
            cwd: self.root.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

struct LocalSession {
    root: PathBuf,
    cwd: PathBuf,
}

impl LocalSession {
    fn child(&self, name: &str) -> Result<PathBuf, RemoteError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(RemoteError::InvalidPath(name.to_string()));
        }
        Ok(self.cwd.join(name))
    }
}

impl RemoteSession for LocalSession {
    fn change_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
        if dir == "/" {
            self.cwd = self.root.clone();
            return Ok(());
        }
        let target = self.child(dir)?;
        if !target.is_dir() {
            return Err(RemoteError::Navigation {
                path: target.display().to_string(),
                message: "no such directory".to_string(),
            });
        }
        self.cwd = target;
        Ok(())
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
        let target = self.child(dir)?;
        fs::create_dir(&target).map_err(|e| RemoteError::Navigation {
            path: target.display().to_string(),
            message: e.to_string(),
        })
    }

    fn store(&mut self, filename: &str, reader: &mut dyn Read) -> Result<u64, RemoteError> {
        let target = self.child(filename)?;
        let transfer_err = |e: std::io::Error| RemoteError::Transfer {
            path: target.display().to_string(),
            message: e.to_string(),
        };
        let mut file = fs::File::create(&target).map_err(transfer_err)?;
        std::io::copy(reader, &mut file).map_err(transfer_err)
    }

    fn close(self: Box<Self>) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemotePath, deliver, ensure_path, with_session};

    #[test]
    fn delivers_into_nested_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let path = RemotePath::parse("/a/b/out.jpg").unwrap();
        deliver(&store, &path, &mut &b"data"[..]).unwrap();
        assert_eq!(fs::read(tmp.path().join("a/b/out.jpg")).unwrap(), b"data");
    }

    #[test]
    fn existing_directories_are_reused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let path = RemotePath::parse("/a/out.jpg").unwrap();
        deliver(&store, &path, &mut &b"1"[..]).unwrap();
        deliver(&store, &path, &mut &b"2"[..]).unwrap();
        assert_eq!(fs::read(tmp.path().join("a/out.jpg")).unwrap(), b"2");
    }

    #[test]
    fn missing_directory_without_create() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let path = RemotePath::parse("/nope/out.jpg").unwrap();
        let err = with_session(&store, |s| ensure_path(s, &path, false)).unwrap_err();
        assert!(matches!(err, RemoteError::Navigation { .. }));
    }

    #[test]
    fn parent_segments_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = LocalDirStore::new(tmp.path());
        let err = with_session(&store, |s| s.change_dir("..")).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidPath(_)));
    }
}
