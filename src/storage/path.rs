//! Path resolution and containment
//!
//! Every key handed to a storage backend is produced here. Segments are
//! joined lexically and normalised; a result that would climb out of the
//! root is rejected with `PathEscape`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{BinaryDataError, Result};

/// A validated path relative to the storage root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(PathBuf);

impl StorageKey {
    /// The storage root itself
    pub fn root() -> Self {
        StorageKey(PathBuf::new())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// Key of the directory containing this key; the root has none
    pub fn parent(&self) -> Option<StorageKey> {
        if self.is_root() {
            return None;
        }
        Some(StorageKey(self.0.parent().map(Path::to_path_buf).unwrap_or_default()))
    }

    /// Last component as UTF-8, if any
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps segments onto keys under a fixed root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `segments` under the root, rejecting anything that escapes it
    pub fn resolve(&self, segments: &[&str]) -> Result<StorageKey> {
        let mut normalized = PathBuf::new();
        for segment in segments {
            for component in Path::new(segment).components() {
                match component {
                    Component::Normal(part) => normalized.push(part),
                    Component::CurDir => {}
                    Component::ParentDir => {
                        if !normalized.pop() {
                            return Err(escape(segments));
                        }
                    }
                    Component::RootDir | Component::Prefix(_) => return Err(escape(segments)),
                }
            }
        }
        Ok(StorageKey(normalized))
    }

    /// On-disk location of `key`
    pub fn absolute(&self, key: &StorageKey) -> PathBuf {
        if key.is_root() {
            self.root.clone()
        } else {
            self.root.join(&key.0)
        }
    }
}

fn escape(segments: &[&str]) -> BinaryDataError {
    BinaryDataError::PathEscape {
        path: segments.join("/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/var/lib/binary-data")
    }

    #[test]
    fn test_resolve_plain_identifier() {
        let key = resolver().resolve(&["exec1abc"]).unwrap();
        assert_eq!(key.as_path(), Path::new("exec1abc"));
        assert_eq!(
            resolver().absolute(&key),
            PathBuf::from("/var/lib/binary-data/exec1abc")
        );
    }

    #[test]
    fn test_resolve_marker_path() {
        let key = resolver().resolve(&["meta", "binarymeta_a_1"]).unwrap();
        assert_eq!(key.as_path(), Path::new("meta/binarymeta_a_1"));
        assert_eq!(key.parent().unwrap().as_path(), Path::new("meta"));
        assert_eq!(key.file_name(), Some("binarymeta_a_1"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let r = resolver();
        for bad in ["../etc/passwd", "..", "a/../../b", "./../x", "meta/../../x"] {
            let err = r.resolve(&[bad]).unwrap_err();
            assert!(matches!(err, BinaryDataError::PathEscape { .. }), "{bad} was accepted");
        }
        assert!(r.resolve(&["meta", "../../x"]).is_err());
    }

    #[test]
    fn test_resolve_rejects_absolute_segments() {
        assert!(resolver().resolve(&["/etc/passwd"]).is_err());
        assert!(resolver().resolve(&["meta", "/tmp/x"]).is_err());
    }

    #[test]
    fn test_resolve_allows_contained_parent_segments() {
        let key = resolver().resolve(&["meta/../exec1abc"]).unwrap();
        assert_eq!(key.as_path(), Path::new("exec1abc"));

        let key = resolver().resolve(&["."]).unwrap();
        assert!(key.is_root());
        assert!(key.parent().is_none());
    }
}
