//! Remote file store client.
//!
//! A [`RemoteStore`] opens [`RemoteSession`]s; a session navigates,
//! creates directories and stores files. Sessions are scoped: every helper
//! here opens one, uses it, and closes it whatever the outcome. Sessions are
//! never shared between jobs or with the log sink.
//!
//! | Store | Transport |
//! |---|---|
//! | [`FtpStore`] | FTP via `suppaftp` (CWD / MKD / STOR, binary mode) |
//! | [`LocalDirStore`] | a local directory, for dry runs |

mod ftp;
mod local;
mod path;

pub use ftp::FtpStore;
pub use local::LocalDirStore;
pub use path::RemotePath;

use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },
    #[error("cannot enter remote directory '{path}': {message}")]
    Navigation { path: String, message: String },
    #[error("transfer of '{path}' failed: {message}")]
    Transfer { path: String, message: String },
    #[error("invalid remote path '{0}'")]
    InvalidPath(String),
}

/// An open connection to the remote store.
pub trait RemoteSession {
    /// Enter `dir`, a single segment or `/` for the root.
    fn change_dir(&mut self, dir: &str) -> Result<(), RemoteError>;

    /// Create `dir` (a single segment) inside the current directory.
    fn make_dir(&mut self, dir: &str) -> Result<(), RemoteError>;

    /// Store `reader`'s bytes as `filename` in the current directory.
    fn store(&mut self, filename: &str, reader: &mut dyn Read) -> Result<u64, RemoteError>;

    /// End the session.
    fn close(self: Box<Self>) -> Result<(), RemoteError>;
}

/// Factory for sessions. Shared across threads by the worker and log sink.
pub trait RemoteStore: Send + Sync {
    fn open(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;

    /// Human-readable target, for logs and status output.
    fn describe(&self) -> String;
}

/// Open a session, run `f`, and close the session regardless of the result.
///
/// An error from `f` wins over an error from closing.
pub fn with_session<T>(
    store: &dyn RemoteStore,
    f: impl FnOnce(&mut dyn RemoteSession) -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let mut session = store.open()?;
    let result = f(session.as_mut());
    let closed = session.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(error = %close_err, "closing remote session failed");
            Err(e)
        }
    }
}

/// Walk to `path`'s directory, creating missing segments when `create` is set.
///
/// Absolute paths start from the root; relative paths from the session's
/// current directory. Existing directories are entered, never recreated.
pub fn ensure_path(
    session: &mut dyn RemoteSession,
    path: &RemotePath,
    create: bool,
) -> Result<(), RemoteError> {
    if path.absolute {
        session.change_dir("/")?;
    }
    for segment in &path.segments {
        if session.change_dir(segment).is_ok() {
            continue;
        }
        if !create {
            return Err(RemoteError::Navigation {
                path: path.directory(),
                message: format!("'{segment}' does not exist"),
            });
        }
        tracing::debug!(dir = %segment, "creating remote directory");
        session
            .make_dir(segment)
            .map_err(|e| RemoteError::Navigation {
                path: path.directory(),
                message: format!("cannot create '{segment}': {e}"),
            })?;
        session.change_dir(segment)?;
    }
    Ok(())
}

/// Create the destination directories and store `reader` at `path`.
pub fn upload(
    session: &mut dyn RemoteSession,
    path: &RemotePath,
    reader: &mut dyn Read,
) -> Result<u64, RemoteError> {
    ensure_path(session, path, true)?;
    session.store(&path.filename, reader)
}

/// One-shot delivery: open a session, upload, close.
pub fn deliver(
    store: &dyn RemoteStore,
    path: &RemotePath,
    reader: &mut dyn Read,
) -> Result<u64, RemoteError> {
    with_session(store, |session| upload(session, path, reader))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub enum RemoteOp {
        Open,
        Cwd(String),
        Mkd(String),
        Stor { path: String, bytes: usize },
        Close,
    }

    #[derive(Default)]
    pub struct MockState {
        pub ops: Vec<RemoteOp>,
        pub dirs: BTreeSet<String>,
        pub files: BTreeMap<String, Vec<u8>>,
        pub fail_connect: bool,
        pub fail_mkdir: bool,
        /// Number of upcoming STORs that fail.
        pub fail_stores: u32,
    }

    /// Store that keeps an in-memory tree and records every operation.
    /// Uses Mutex so it is Send + Sync like the real stores.
    #[derive(Clone, Default)]
    pub struct MockStore {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockStore {
        pub fn ops(&self) -> Vec<RemoteOp> {
            self.state.lock().unwrap().ops.clone()
        }

        pub fn mkdirs(&self) -> Vec<String> {
            self.ops()
                .into_iter()
                .filter_map(|op| match op {
                    RemoteOp::Mkd(d) => Some(d),
                    _ => None,
                })
                .collect()
        }

        pub fn file(&self, path: &str) -> Option<Vec<u8>> {
            self.state.lock().unwrap().files.get(path).cloned()
        }

        pub fn files(&self) -> Vec<String> {
            self.state.lock().unwrap().files.keys().cloned().collect()
        }

        pub fn add_dir(&self, path: &str) {
            self.state.lock().unwrap().dirs.insert(path.to_string());
        }
    }

    fn join(cwd: &str, name: &str) -> String {
        if cwd == "/" {
            format!("/{name}")
        } else {
            format!("{cwd}/{name}")
        }
    }

    struct MockSession {
        state: Arc<Mutex<MockState>>,
        cwd: String,
    }

    impl RemoteSession for MockSession {
        fn change_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
            let mut state = self.state.lock().unwrap();
            state.ops.push(RemoteOp::Cwd(dir.to_string()));
            let target = if dir == "/" {
                "/".to_string()
            } else {
                join(&self.cwd, dir)
            };
            if target == "/" || state.dirs.contains(&target) {
                self.cwd = target;
                Ok(())
            } else {
                Err(RemoteError::Navigation {
                    path: target,
                    message: "550 no such directory".into(),
                })
            }
        }

        fn make_dir(&mut self, dir: &str) -> Result<(), RemoteError> {
            let mut state = self.state.lock().unwrap();
            state.ops.push(RemoteOp::Mkd(dir.to_string()));
            if state.fail_mkdir {
                return Err(RemoteError::Navigation {
                    path: dir.to_string(),
                    message: "550 permission denied".into(),
                });
            }
            let target = join(&self.cwd, dir);
            state.dirs.insert(target);
            Ok(())
        }

        fn store(&mut self, filename: &str, reader: &mut dyn Read) -> Result<u64, RemoteError> {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).unwrap();
            let path = join(&self.cwd, filename);
            let mut state = self.state.lock().unwrap();
            state.ops.push(RemoteOp::Stor {
                path: path.clone(),
                bytes: bytes.len(),
            });
            if state.fail_stores > 0 {
                state.fail_stores -= 1;
                return Err(RemoteError::Transfer {
                    path,
                    message: "451 local error".into(),
                });
            }
            let len = bytes.len() as u64;
            state.files.insert(path, bytes);
            Ok(len)
        }

        fn close(self: Box<Self>) -> Result<(), RemoteError> {
            self.state.lock().unwrap().ops.push(RemoteOp::Close);
            Ok(())
        }
    }

    impl RemoteStore for MockStore {
        fn open(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_connect {
                return Err(RemoteError::Connect {
                    host: "mock".into(),
                    message: "connection refused".into(),
                });
            }
            state.ops.push(RemoteOp::Open);
            Ok(Box::new(MockSession {
                state: Arc::clone(&self.state),
                cwd: "/".to_string(),
            }))
        }

        fn describe(&self) -> String {
            "mock://".to_string()
        }
    }

    // =========================================================================
    // ensure_path
    // =========================================================================

    #[test]
    fn ensure_path_creates_missing_segments() {
        let store = MockStore::default();
        let path = RemotePath::parse("/a/b/x.jpg").unwrap();
        with_session(&store, |s| ensure_path(s, &path, true)).unwrap();
        assert_eq!(store.mkdirs(), vec!["a", "b"]);
        let dirs = store.state.lock().unwrap().dirs.clone();
        assert!(dirs.contains("/a") && dirs.contains("/a/b"));
    }

    #[test]
    fn ensure_path_twice_creates_nothing_new() {
        let store = MockStore::default();
        let path = RemotePath::parse("/a/b/x.jpg").unwrap();
        with_session(&store, |s| ensure_path(s, &path, true)).unwrap();
        with_session(&store, |s| ensure_path(s, &path, true)).unwrap();
        assert_eq!(store.mkdirs().len(), 2);
    }

    #[test]
    fn ensure_path_without_create_fails_on_missing() {
        let store = MockStore::default();
        let path = RemotePath::parse("/missing/x.jpg").unwrap();
        let err = with_session(&store, |s| ensure_path(s, &path, false)).unwrap_err();
        assert!(matches!(err, RemoteError::Navigation { .. }));
        assert!(store.mkdirs().is_empty());
    }

    #[test]
    fn absolute_path_resets_to_root() {
        let store = MockStore::default();
        store.add_dir("/a");
        let path = RemotePath::parse("/a/x.jpg").unwrap();
        with_session(&store, |s| ensure_path(s, &path, true)).unwrap();
        assert_eq!(
            store.ops(),
            vec![
                RemoteOp::Open,
                RemoteOp::Cwd("/".into()),
                RemoteOp::Cwd("a".into()),
                RemoteOp::Close,
            ]
        );
    }

    #[test]
    fn relative_path_starts_at_login_dir() {
        let store = MockStore::default();
        let path = RemotePath::parse("a/x.jpg").unwrap();
        with_session(&store, |s| ensure_path(s, &path, true)).unwrap();
        assert_eq!(store.ops()[1], RemoteOp::Cwd("a".into()));
    }

    #[test]
    fn mkdir_failure_is_navigation_error() {
        let store = MockStore::default();
        store.state.lock().unwrap().fail_mkdir = true;
        let path = RemotePath::parse("/a/x.jpg").unwrap();
        let err = with_session(&store, |s| ensure_path(s, &path, true)).unwrap_err();
        assert!(matches!(err, RemoteError::Navigation { .. }));
    }

    // =========================================================================
    // upload / sessions
    // =========================================================================

    #[test]
    fn deliver_stores_bytes_at_path() {
        let store = MockStore::default();
        let path = RemotePath::parse("/out/2024/final.jpg").unwrap();
        let n = deliver(&store, &path, &mut &b"jpegbytes"[..]).unwrap();
        assert_eq!(n, 9);
        assert_eq!(store.file("/out/2024/final.jpg").unwrap(), b"jpegbytes");
    }

    #[test]
    fn session_closed_after_failed_transfer() {
        let store = MockStore::default();
        store.state.lock().unwrap().fail_stores = 1;
        let path = RemotePath::parse("x.jpg").unwrap();
        let err = deliver(&store, &path, &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, RemoteError::Transfer { .. }));
        assert_eq!(store.ops().last(), Some(&RemoteOp::Close));
    }

    #[test]
    fn connect_failure_surfaces() {
        let store = MockStore::default();
        store.state.lock().unwrap().fail_connect = true;
        let path = RemotePath::parse("x.jpg").unwrap();
        let err = deliver(&store, &path, &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, RemoteError::Connect { .. }));
    }
}
