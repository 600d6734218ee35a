use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CacheError, Result};

static NEXT_FILESYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one filesystem instance (one backend session or root).
///
/// Ids are handed out from a process-wide counter and never derived from the
/// filesystem's description, so two sessions against the same remote root are
/// distinct cache partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileSystemId(u64);

impl FileSystemId {
    /// Allocate a fresh, never before used id.
    pub fn next() -> Self {
        FileSystemId(NEXT_FILESYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs#{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct NameInner {
    scheme: String,
    path: String,
}

/// Canonical identity of a location within one filesystem.
///
/// Cloning is a reference-count bump; the normalized text is never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(Arc<NameInner>);

impl FileName {
    /// Build a name from a scheme and an absolute path.
    ///
    /// Repeated separators and `.` segments are dropped, `..` pops the previous
    /// segment, and a trailing `/` is removed except for the root itself.
    pub fn new(scheme: &str, path: &str) -> Result<Self> {
        let scheme = scheme.trim();
        if scheme.is_empty() {
            return Err(CacheError::InvalidName(format!(
                "missing scheme for path '{}'",
                path
            )));
        }
        if !path.starts_with('/') {
            return Err(CacheError::InvalidName(format!(
                "path '{}' is not absolute",
                path
            )));
        }

        Ok(FileName(Arc::new(NameInner {
            scheme: scheme.to_ascii_lowercase(),
            path: normalize(path)?,
        })))
    }

    pub fn scheme(&self) -> &str {
        &self.0.scheme
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Final path segment, or an empty string for the root.
    pub fn base_name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or("")
    }

    /// Name of the parent directory, `None` for the root.
    pub fn parent(&self) -> Option<FileName> {
        if self.path() == "/" {
            return None;
        }
        let cut = self.path().rfind('/').unwrap_or(0);
        let parent = if cut == 0 { "/" } else { &self.path()[..cut] };
        Some(FileName(Arc::new(NameInner {
            scheme: self.0.scheme.clone(),
            path: parent.to_string(),
        })))
    }

    /// Rendering used in log lines.
    pub fn friendly_uri(&self) -> String {
        format!("{}://{}", self.scheme(), self.path())
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.path())
    }
}

fn normalize(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(CacheError::InvalidName(format!(
                        "path '{}' escapes the root with ..",
                        path
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }
    let mut normalized = String::with_capacity(path.len());
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    Ok(normalized)
}

/// The (filesystem, name) pair identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filesystem: FileSystemId,
    pub name: FileName,
}

impl CacheKey {
    pub fn new(filesystem: FileSystemId, name: FileName) -> Self {
        CacheKey { filesystem, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_equivalent_paths() {
        let a = FileName::new("sftp", "/home//user/./docs/").unwrap();
        let b = FileName::new("SFTP", "/home/user/tmp/../docs").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.path(), "/home/user/docs");
        assert_eq!(a.friendly_uri(), "sftp:///home/user/docs");
    }

    #[test]
    fn test_root_name() {
        let root = FileName::new("file", "///").unwrap();
        assert_eq!(root.path(), "/");
        assert_eq!(root.base_name(), "");
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_parent_and_base_name() {
        let name = FileName::new("ftp", "/pub/releases/v1.tar").unwrap();
        assert_eq!(name.base_name(), "v1.tar");
        let parent = name.parent().unwrap();
        assert_eq!(parent.path(), "/pub/releases");
        assert_eq!(parent.parent().unwrap().parent().unwrap().path(), "/");
    }

    #[test]
    fn test_rejects_contract_violations() {
        assert!(matches!(
            FileName::new("", "/a"),
            Err(CacheError::InvalidName(_))
        ));
        assert!(matches!(
            FileName::new("file", "relative/path"),
            Err(CacheError::InvalidName(_))
        ));
        assert!(matches!(
            FileName::new("file", "/a/../.."),
            Err(CacheError::InvalidName(_))
        ));
    }

    #[test]
    fn test_filesystem_ids_are_unique() {
        let a = FileSystemId::next();
        let b = FileSystemId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
