//! directory import
//!
//! walks a source tree, stores every regular file and records filesystem
//! metadata for files, directories and symlinks in the path metadata graph.

use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::libc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::Cancellation;
use crate::error::{Error, ErrorContext, IoResultExt, Result};
use crate::format::{FileSystemMeta, PathEntry, PathMetadataEntry, PathType};
use crate::package::Package;
use crate::path;

/// counts of what an import added
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

/// add the contents of `root` to `pkg`, rooted at the package's `/`
pub fn import_dir(pkg: &mut Package, root: &Path, cancel: &Cancellation) -> Result<ImportReport> {
    let meta = fs::metadata(root).with_path(root)?;
    if !meta.is_dir() {
        return Err(Error::validation(
            "import source is not a directory",
            ErrorContext::new("Source", root.display(), "a directory"),
        ));
    }

    let mut report = ImportReport::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        cancel.check("import directory")?;
        let entry = entry.map_err(|e| Error::Io {
            path: root.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
        })?;

        let fs_path = entry.path();
        let rel = package_path(root, fs_path)?;
        let meta = fs::symlink_metadata(fs_path).with_path(fs_path)?;
        let ft = meta.file_type();

        let mut record = if ft.is_dir() {
            report.directories += 1;
            PathMetadataEntry::directory(&rel)?
        } else if ft.is_symlink() {
            report.symlinks += 1;
            symlink_entry(fs_path, &rel)?
        } else if ft.is_file() {
            let data = fs::read(fs_path).with_path(fs_path)?;
            report.files += 1;
            report.bytes += data.len() as u64;
            pkg.add_file(&rel, data)?;
            PathMetadataEntry::file(&rel)?
        } else {
            debug!(path = %fs_path.display(), "skipping special file");
            continue;
        };

        let link_target = record.filesystem.link_target.take();
        record.filesystem = capture(fs_path, &meta)?;
        record.filesystem.link_target = link_target;
        pkg.path_metadata_mut().insert(record)?;
    }

    pkg.path_metadata_mut().link_parents();
    pkg.relink();

    info!(
        source = %root.display(),
        files = report.files,
        directories = report.directories,
        symlinks = report.symlinks,
        bytes = report.bytes,
        "imported directory"
    );
    Ok(report)
}

fn package_path(root: &Path, fs_path: &Path) -> Result<String> {
    let rel = fs_path.strip_prefix(root).map_err(|_| {
        Error::validation(
            "walked path escaped the import root",
            ErrorContext::new("Path", fs_path.display(), format!("below {}", root.display())),
        )
    })?;
    let rel = rel.to_str().ok_or_else(|| {
        Error::validation(
            "path is not valid UTF-8",
            ErrorContext::new("Path", rel.display(), "a UTF-8 path"),
        )
    })?;
    path::normalize(rel)
}

fn symlink_entry(fs_path: &Path, rel: &str) -> Result<PathMetadataEntry> {
    let target = fs::read_link(fs_path).with_path(fs_path)?;
    // dangling links are recorded as file links
    let points_to_dir = fs::metadata(fs_path).map_or(false, |m| m.is_dir());

    let mut entry = if points_to_dir {
        PathMetadataEntry {
            path: PathEntry {
                path: path::normalize_dir(rel)?,
            },
            path_type: PathType::DirectorySymlink,
            ..PathMetadataEntry::default()
        }
    } else {
        let mut entry = PathMetadataEntry::file(rel)?;
        entry.path_type = PathType::FileSymlink;
        entry
    };
    entry.filesystem.link_target = Some(target.to_string_lossy().into_owned());
    Ok(entry)
}

/// mode, ownership, mtime and xattrs of a path (symlinks are not followed)
fn capture(fs_path: &Path, meta: &Metadata) -> Result<FileSystemMeta> {
    let mod_time = (meta.mtime().max(0) as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(meta.mtime_nsec().max(0) as u64);

    Ok(FileSystemMeta {
        mode: Some(meta.mode()),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        mod_time: Some(mod_time),
        extended_attrs: read_xattrs(fs_path)?,
        ..FileSystemMeta::default()
    })
}

/// read all extended attributes from a path
fn read_xattrs(fs_path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut xattrs = BTreeMap::new();

    let names = match xattr::list(fs_path) {
        Ok(names) => names,
        Err(e) => {
            // no xattr support on this filesystem
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(xattrs);
            }
            return Err(Error::Io {
                path: fs_path.to_path_buf(),
                source: e,
            });
        }
    };

    for name in names {
        let name = name.to_string_lossy().into_owned();
        match xattr::get(fs_path, &name) {
            Ok(Some(value)) => {
                xattrs.insert(name, value);
            }
            // removed between list and get
            Ok(None) => {}
            Err(e) => {
                if e.raw_os_error() != Some(libc::ENODATA) {
                    warn!(path = %fs_path.display(), xattr = %name, error = %e, "failed to read xattr");
                }
            }
        }
    }

    Ok(xattrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tags::TagValueType;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::create_dir_all(dir.path().join("share/doc")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.path().join("bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("share/doc/README"), b"docs").unwrap();
        dir
    }

    #[test]
    fn test_import_files_and_dirs() {
        let src = tree();
        let mut pkg = Package::new();
        let report = import_dir(&mut pkg, src.path(), &Cancellation::new()).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.directories, 3);
        assert_eq!(report.bytes, 14);
        assert_eq!(pkg.file_count(), 2);

        let graph = pkg.path_metadata();
        assert_eq!(graph.len(), 5);
        let tool = graph.get("/bin/tool").unwrap();
        assert!(tool.filesystem.is_executable());
        assert_eq!(tool.parent_path.as_deref(), Some("/bin/"));
        assert!(tool.filesystem.mod_time.is_some());
        assert_eq!(
            graph.get("/share/doc/").unwrap().parent_path.as_deref(),
            Some("/share/")
        );
        assert!(graph.get("/bin/").unwrap().parent_path.is_none());

        let readme = pkg.file_by_path("/share/doc/README").unwrap();
        assert!(readme.path_metadata_links.contains_key("/share/doc/README"));
    }

    #[test]
    fn test_imported_files_inherit_directory_tags() {
        let src = tree();
        let mut pkg = Package::new();
        import_dir(&mut pkg, src.path(), &Cancellation::new()).unwrap();

        pkg.path_metadata_mut()
            .get_mut("/share/")
            .unwrap()
            .properties
            .add("license", "MIT", TagValueType::String)
            .unwrap();

        let tags = pkg.file_tags("/share/doc/README").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value.as_str(), Some("MIT"));
    }

    #[test]
    fn test_import_symlinks() {
        let src = tree();
        symlink("tool", src.path().join("bin/alias")).unwrap();
        symlink("share/doc", src.path().join("docs")).unwrap();

        let mut pkg = Package::new();
        let report = import_dir(&mut pkg, src.path(), &Cancellation::new()).unwrap();
        assert_eq!(report.symlinks, 2);
        assert_eq!(pkg.file_count(), 2);

        let graph = pkg.path_metadata();
        let alias = graph.get("/bin/alias").unwrap();
        assert_eq!(alias.path_type, PathType::FileSymlink);
        assert_eq!(alias.filesystem.link_target.as_deref(), Some("tool"));

        let docs = graph.get("/docs/").unwrap();
        assert_eq!(docs.path_type, PathType::DirectorySymlink);
        assert_eq!(docs.filesystem.link_target.as_deref(), Some("share/doc"));
    }

    #[test]
    fn test_import_requires_directory() {
        let src = tree();
        let err = import_dir(
            &mut Package::new(),
            &src.path().join("bin/tool"),
            &Cancellation::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = import_dir(
            &mut Package::new(),
            &src.path().join("missing"),
            &Cancellation::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_import_cancelled() {
        let src = tree();
        let cancel = Cancellation::new();
        cancel.cancel();
        let mut pkg = Package::new();
        let err = import_dir(&mut pkg, src.path(), &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Context);
        assert_eq!(pkg.file_count(), 0);
    }
}
