//! package path normalization
//!
//! package paths are absolute within the archive: `/` separated, leading
//! `/`, no `.` or `..` segments. directories keep exactly one trailing `/`.

use crate::error::{Error, ErrorContext, Result};

/// normalize a path supplied by a caller or read from an archive
pub fn normalize(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(Error::validation(
            "path is empty",
            ErrorContext::new("Path", "\"\"", "non-empty path"),
        ));
    }
    if path.contains('\0') {
        return Err(Error::validation(
            "path contains a nul byte",
            ErrorContext::new("Path", path.escape_default(), "no nul bytes"),
        ));
    }

    let unified = path.replace('\\', "/");
    let is_dir = unified.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::validation(
                        "path escapes the package root",
                        ErrorContext::new("Path", path, "path inside the package root"),
                    ));
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(Error::validation(
            "path names the package root",
            ErrorContext::new("Path", path, "a file or directory below the root"),
        ));
    }

    let mut out = String::with_capacity(unified.len() + 2);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if is_dir {
        out.push('/');
    }
    Ok(out)
}

/// normalize and force directory form
pub fn normalize_dir(path: &str) -> Result<String> {
    let mut out = normalize(path)?;
    if !out.ends_with('/') {
        out.push('/');
    }
    Ok(out)
}

pub fn is_dir(path: &str) -> bool {
    path.ends_with('/')
}

/// the directory containing a normalized path, None at the top level
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        None
    } else {
        Some(&trimmed[..=idx])
    }
}

/// true when `ancestor` is a directory strictly above `path`
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    is_dir(ancestor) && path.len() > ancestor.len() && path.starts_with(ancestor)
}

/// lowercase extension of the last segment
pub fn extension(path: &str) -> Option<String> {
    if is_dir(path) {
        return None;
    }
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/b.txt").unwrap(), "/a/b.txt");
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("a\\b\\c.txt").unwrap(), "/a/b/c.txt");
        assert_eq!(normalize("a//b/").unwrap(), "/a/b/");
        assert_eq!(normalize_dir("a/b").unwrap(), "/a/b/");
    }

    #[test]
    fn test_normalize_rejects() {
        for bad in ["", "  ", "/", ".", "..", "a/../..", "/./"] {
            let err = normalize(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?}", bad);
        }
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/a/b/c.txt"), Some("/a/b/"));
        assert_eq!(parent_dir("/a/b/"), Some("/a/"));
        assert_eq!(parent_dir("/a/"), None);
        assert_eq!(parent_dir("/a.txt"), None);
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor("/a/", "/a/b/"));
        assert!(is_ancestor("/a/", "/a/b.txt"));
        assert!(!is_ancestor("/a/", "/a/"));
        assert!(!is_ancestor("/a", "/a/b"));
        assert!(!is_ancestor("/ab/", "/a/b"));
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/x/photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension("/x/.hidden"), None);
        assert_eq!(extension("/x/noext"), None);
        assert_eq!(extension("/x.d/"), None);
    }
}
