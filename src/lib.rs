//! novuspack - NovusPack (.nvpk) package format
//!
//! a single-file container holding files, typed tags and per-path filesystem
//! metadata. packages are written atomically: the new image is staged next to
//! the target and renamed over it, so readers see the old package or the new
//! one, never a mix.
//!
//! # Core concepts
//!
//! - **FileEntry**: one logical file, reachable by one or more paths, with
//!   hashes, optional data blobs and a typed tag set
//! - **PathMetadataEntry**: filesystem properties and tags for a path;
//!   directories hand their tags down to descendants
//! - **Package**: header, file entries with data, index, comment and signatures
//! - **SafeWrite**: stage, sync, rename, sync directory
//!
//! # Byte order
//!
//! every integer on disk is little-endian. length and count fields are
//! recomputed on encode and treated as untrusted on decode.
//!
//! # Example usage
//!
//! ```no_run
//! use novuspack::{Cancellation, Package};
//! use novuspack::tags::TagValueType;
//!
//! let cancel = Cancellation::new();
//! let mut pkg = Package::new();
//! pkg.add_file("docs/readme.txt", b"hello".to_vec()).unwrap();
//! pkg.file_by_path_mut("/docs/readme.txt")
//!     .unwrap()
//!     .tags
//!     .add("lang", "en", TagValueType::String)
//!     .unwrap();
//! pkg.safe_write("/tmp/demo.nvpk", true, &cancel).unwrap();
//!
//! let opened = Package::open("/tmp/demo.nvpk", &cancel).unwrap();
//! assert_eq!(opened.read_file("/docs/readme.txt", &cancel).unwrap(), b"hello");
//! ```

mod cancel;
mod config;
mod error;
mod graph;
mod import;
mod package;
mod safe_write;

pub mod compression;
pub mod format;
pub mod path;
pub mod tags;

pub use cancel::Cancellation;
pub use config::{Config, PackageDefaults, WriteConfig};
pub use error::{Error, ErrorContext, ErrorKind, IoResultExt, Result};
pub use graph::PathMetadataGraph;
pub use import::{import_dir, ImportReport};
pub use package::Package;
pub use safe_write::{
    write_file, SafeWrite, WriteOptions, WriteReport, WriteState, DEFAULT_STREAM_THRESHOLD,
    TEMP_PREFIX,
};
