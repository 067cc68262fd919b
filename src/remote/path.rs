//! Remote path parsing.

use super::RemoteError;
use std::fmt;

/// A destination file on the remote store.
///
/// Absolute paths start from the server root; relative paths resolve against
/// the login directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub absolute: bool,
    pub segments: Vec<String>,
    pub filename: String,
}

impl RemotePath {
    /// Parse `"/a/b/file.jpg"` or `"a/b/file.jpg"`. Empty segments are
    /// ignored; `.` and `..` are rejected.
    ///
    /// # Examples
    /// ```
    /// # use photo_compose::remote::RemotePath;
    /// let p = RemotePath::parse("/school/2024/class-a.jpg").unwrap();
    /// assert!(p.absolute);
    /// assert_eq!(p.segments, vec!["school", "2024"]);
    /// assert_eq!(p.filename, "class-a.jpg");
    /// ```
    pub fn parse(path: &str) -> Result<Self, RemoteError> {
        let absolute = path.starts_with('/');
        let mut parts: Vec<String> = Vec::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." {
                return Err(RemoteError::InvalidPath(path.to_string()));
            }
            parts.push(part.to_string());
        }
        if path.ends_with('/') {
            return Err(RemoteError::InvalidPath(path.to_string()));
        }
        let filename = parts
            .pop()
            .ok_or_else(|| RemoteError::InvalidPath(path.to_string()))?;
        Ok(Self {
            absolute,
            segments: parts,
            filename,
        })
    }

    /// A file named `filename` inside directory `dir`.
    pub fn in_directory(dir: &str, filename: &str) -> Result<Self, RemoteError> {
        let joined = format!("{}/{}", dir.trim_end_matches('/'), filename);
        Self::parse(&joined)
    }

    /// Directory portion as a display string (`"/a/b"` or `"a/b"`).
    pub fn directory(&self) -> String {
        let joined = self.segments.join("/");
        if self.absolute {
            format!("/{joined}")
        } else {
            joined
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        for segment in &self.segments {
            write!(f, "{segment}/")?;
        }
        f.write_str(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path() {
        let p = RemotePath::parse("out/x.jpg").unwrap();
        assert!(!p.absolute);
        assert_eq!(p.segments, vec!["out"]);
        assert_eq!(p.to_string(), "out/x.jpg");
    }

    #[test]
    fn bare_filename() {
        let p = RemotePath::parse("x.jpg").unwrap();
        assert!(p.segments.is_empty());
        assert_eq!(p.directory(), "");
    }

    #[test]
    fn duplicate_slashes_collapse() {
        let p = RemotePath::parse("//a///b/x.jpg").unwrap();
        assert_eq!(p.segments, vec!["a", "b"]);
        assert_eq!(p.directory(), "/a/b");
    }

    #[test]
    fn rejects_directories_and_traversal() {
        assert!(RemotePath::parse("").is_err());
        assert!(RemotePath::parse("/").is_err());
        assert!(RemotePath::parse("/a/b/").is_err());
        assert!(RemotePath::parse("/a/../x.jpg").is_err());
    }

    #[test]
    fn in_directory_joins() {
        let p = RemotePath::in_directory("/logs/", "log_1.jsonl").unwrap();
        assert_eq!(p.to_string(), "/logs/log_1.jsonl");
    }
}
