//! atomic package writes
//!
//! the image is staged in a uniquely named temp file next to the target and
//! renamed over it, so readers of the target see either the old bytes or the
//! complete new ones. the temp file is gone when `commit` returns, whatever
//! the outcome.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::error::{Error, ErrorContext, IoResultExt, Result};

/// file name prefix of staging files
pub const TEMP_PREFIX: &str = ".nvpk-temp-";

/// images larger than this are streamed instead of buffered
pub const DEFAULT_STREAM_THRESHOLD: u64 = 4 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    Staging,
    Committing,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub overwrite: bool,
    pub stream_threshold: u64,
    /// fsync the staged file and the target directory
    pub sync: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            sync: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteReport {
    pub bytes_written: u64,
    pub streamed: bool,
}

/// removes the staging file unless it was renamed into place
struct TempFile {
    path: PathBuf,
    renamed: bool,
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.renamed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

fn target_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// one staged write of a package image to `target`
#[derive(Debug)]
pub struct SafeWrite {
    target: PathBuf,
    options: WriteOptions,
    state: WriteState,
}

impl SafeWrite {
    pub fn new(target: impl Into<PathBuf>, options: WriteOptions) -> Self {
        Self {
            target: target.into(),
            options,
            state: WriteState::Idle,
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// stage the image produced by `write_image` and move it onto the target
    ///
    /// `size_hint` is the expected image size and only selects between
    /// buffering and streaming.
    pub fn commit<F>(&mut self, size_hint: u64, cancel: &Cancellation, write_image: F) -> Result<WriteReport>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if self.state != WriteState::Idle {
            return Err(Error::validation(
                "write engine already used",
                ErrorContext::new("WriteState", format!("{:?}", self.state), "Idle"),
            ));
        }
        let result = self.run(size_hint, cancel, write_image);
        if let Err(e) = &result {
            debug!(target = %self.target.display(), error = %e, "package write failed");
            self.state = WriteState::Failed;
        }
        result
    }

    fn run<F>(&mut self, size_hint: u64, cancel: &Cancellation, write_image: F) -> Result<WriteReport>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        cancel.check("safe write")?;
        if !self.options.overwrite && fs::symlink_metadata(&self.target).is_ok() {
            return Err(Error::TargetExists(self.target.clone()));
        }

        let dir = target_dir(&self.target);
        let tmp_path = dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        self.state = WriteState::Staging;
        debug!(tmp = %tmp_path.display(), "staging package image");

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .with_path(&tmp_path)?;
        let mut guard = TempFile {
            path: tmp_path.clone(),
            renamed: false,
        };

        let streamed = size_hint > self.options.stream_threshold;
        let (file, bytes_written) = if streamed {
            let mut out = CountingWriter {
                inner: BufWriter::new(file),
                count: 0,
            };
            write_image(&mut out)?;
            cancel.check("safe write")?;
            let file = out
                .inner
                .into_inner()
                .map_err(|e| e.into_error())
                .with_path(&tmp_path)?;
            (file, out.count)
        } else {
            let mut buf = Vec::with_capacity(size_hint as usize);
            write_image(&mut buf)?;
            cancel.check("safe write")?;
            let mut file = file;
            file.write_all(&buf).with_path(&tmp_path)?;
            (file, buf.len() as u64)
        };

        if self.options.sync {
            file.sync_all().with_path(&tmp_path)?;
        }
        drop(file);

        cancel.check("safe write")?;
        self.state = WriteState::Committing;

        if self.options.overwrite {
            fs::rename(&tmp_path, &self.target).with_path(&self.target)?;
            guard.renamed = true;
        } else {
            self.link_no_clobber(&tmp_path, &mut guard)?;
        }
        drop(guard);

        if self.options.sync {
            if let Err(e) = fsync_dir(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to sync target directory");
            }
        }

        self.state = WriteState::Done;
        info!(
            target = %self.target.display(),
            bytes = bytes_written,
            streamed,
            "package written"
        );
        Ok(WriteReport {
            bytes_written,
            streamed,
        })
    }

    /// publish without replacing a target that appeared since the check
    fn link_no_clobber(&self, tmp_path: &Path, guard: &mut TempFile) -> Result<()> {
        match fs::hard_link(tmp_path, &self.target) {
            // guard removes the staging name
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::TargetExists(self.target.clone()))
            }
            Err(e) => {
                // filesystems without hard links fall back to a checked rename
                debug!(error = %e, "hard link unavailable, using rename");
                if fs::symlink_metadata(&self.target).is_ok() {
                    return Err(Error::TargetExists(self.target.clone()));
                }
                fs::rename(tmp_path, &self.target).with_path(&self.target)?;
                guard.renamed = true;
                Ok(())
            }
        }
    }
}

/// write `bytes` to `target` atomically
pub fn write_file(
    target: impl Into<PathBuf>,
    bytes: &[u8],
    options: WriteOptions,
    cancel: &Cancellation,
) -> Result<WriteReport> {
    SafeWrite::new(target, options).commit(bytes.len() as u64, cancel, |w| {
        w.write_all(bytes).with_field("Image", "written successfully")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(TEMP_PREFIX))
            })
            .collect()
    }

    fn streaming() -> WriteOptions {
        WriteOptions {
            stream_threshold: 0,
            ..WriteOptions::default()
        }
    }

    #[test]
    fn test_writes_new_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.nvpk");
        let mut engine = SafeWrite::new(&target, WriteOptions::default());
        assert_eq!(engine.state(), WriteState::Idle);

        let report = engine
            .commit(5, &Cancellation::new(), |w| {
                w.write_all(b"hello").with_field("Image", "ok")
            })
            .unwrap();

        assert_eq!(engine.state(), WriteState::Done);
        assert_eq!(report.bytes_written, 5);
        assert!(!report.streamed);
        assert_eq!(fs::read(&target).unwrap(), b"hello");
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_streamed_and_buffered_match() {
        let dir = tempdir().unwrap();
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        let a = dir.path().join("a.nvpk");
        let b = dir.path().join("b.nvpk");
        let buffered = write_file(&a, &payload, WriteOptions::default(), &Cancellation::new()).unwrap();
        let streamed = write_file(&b, &payload, streaming(), &Cancellation::new()).unwrap();

        assert!(!buffered.streamed);
        assert!(streamed.streamed);
        assert_eq!(streamed.bytes_written, payload.len() as u64);
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.nvpk");
        fs::write(&target, b"old").unwrap();
        write_file(&target, b"new content", WriteOptions::default(), &Cancellation::new()).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new content");
    }

    #[test]
    fn test_overwrite_guard_before_staging() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.nvpk");
        fs::write(&target, b"keep me").unwrap();

        let called = Cell::new(false);
        let options = WriteOptions {
            overwrite: false,
            ..WriteOptions::default()
        };
        let mut engine = SafeWrite::new(&target, options);
        let err = engine
            .commit(3, &Cancellation::new(), |w| {
                called.set(true);
                w.write_all(b"new").with_field("Image", "ok")
            })
            .unwrap_err();

        assert!(matches!(err, Error::TargetExists(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!called.get());
        assert_eq!(engine.state(), WriteState::Failed);
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_no_overwrite_creates_new() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("fresh.nvpk");
        let options = WriteOptions {
            overwrite: false,
            ..WriteOptions::default()
        };
        write_file(&target, b"data", options, &Cancellation::new()).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"data");
        assert!(temp_files(dir.path()).is_empty());
    }

    fn failing_image(w: &mut dyn Write) -> Result<()> {
        w.write_all(&[7u8; 100]).with_field("Image", "ok")?;
        Err(Error::validation(
            "injected failure",
            ErrorContext::new("Image", "100 bytes", "complete image"),
        ))
    }

    #[test]
    fn test_failure_leaves_target_unchanged() {
        for options in [WriteOptions::default(), streaming()] {
            let dir = tempdir().unwrap();
            let target = dir.path().join("out.nvpk");
            fs::write(&target, b"original").unwrap();

            let mut engine = SafeWrite::new(&target, options);
            let err = engine
                .commit(100, &Cancellation::new(), failing_image)
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(engine.state(), WriteState::Failed);
            assert_eq!(fs::read(&target).unwrap(), b"original");
            assert!(temp_files(dir.path()).is_empty());
        }
    }

    #[test]
    fn test_cancel_during_staging_cleans_up() {
        for options in [WriteOptions::default(), streaming()] {
            let dir = tempdir().unwrap();
            let target = dir.path().join("out.nvpk");
            let cancel = Cancellation::new();

            let mut engine = SafeWrite::new(&target, options);
            let err = engine
                .commit(10, &cancel, |w| {
                    w.write_all(b"partial").with_field("Image", "ok")?;
                    cancel.cancel();
                    Ok(())
                })
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Context);
            assert!(!target.exists());
            assert!(temp_files(dir.path()).is_empty());
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.nvpk");
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = write_file(&target, b"x", WriteOptions::default(), &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_engine_single_use() {
        let dir = tempdir().unwrap();
        let mut engine = SafeWrite::new(dir.path().join("x.nvpk"), WriteOptions::default());
        engine
            .commit(0, &Cancellation::new(), |_| Ok(()))
            .unwrap();
        let err = engine
            .commit(0, &Cancellation::new(), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_directory_is_io() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("missing").join("out.nvpk");
        let err = write_file(&target, b"x", WriteOptions::default(), &Cancellation::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
