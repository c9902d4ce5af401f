//! compression type selection
//!
//! nothing here compresses data. the advisor looks at package statistics
//! and picks the type a compression executor should use.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path;

/// below this total size the cheapest type is always chosen
pub const SMALL_PACKAGE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// extensions whose content is already entropy dense
pub const PRECOMPRESSED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "mp3", "mp4", "ogg", "flac"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Zstd,
    Lz4,
    Lzma,
}

impl CompressionType {
    pub fn code(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Zstd => 1,
            CompressionType::Lz4 => 2,
            CompressionType::Lzma => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zstd),
            2 => Some(CompressionType::Lz4),
            3 => Some(CompressionType::Lzma),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::Zstd => "zstd",
            CompressionType::Lz4 => "lz4",
            CompressionType::Lzma => "lzma",
        };
        f.write_str(name)
    }
}

/// requested compression; `Auto` defers to the advisor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionSetting {
    #[default]
    Auto,
    None,
    Zstd,
    Lz4,
    Lzma,
}

impl CompressionSetting {
    pub fn resolve(self, stats: &PackageStats) -> CompressionType {
        match self {
            CompressionSetting::Auto => recommend(stats).compression,
            CompressionSetting::None => CompressionType::None,
            CompressionSetting::Zstd => CompressionType::Zstd,
            CompressionSetting::Lz4 => CompressionType::Lz4,
            CompressionSetting::Lzma => CompressionType::Lzma,
        }
    }
}

/// aggregate properties of a package's file set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageStats {
    pub total_size: u64,
    pub file_count: u64,
    /// lowercase extension -> bytes; files without one are counted under ""
    pub extension_bytes: BTreeMap<String, u64>,
}

impl PackageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, size: u64) {
        self.total_size += size;
        self.file_count += 1;
        let ext = path::extension(path).unwrap_or_default();
        *self.extension_bytes.entry(ext).or_default() += size;
    }

    pub fn average_file_size(&self) -> u64 {
        if self.file_count == 0 {
            0
        } else {
            self.total_size / self.file_count
        }
    }

    /// bytes stored in already-compressed media formats
    pub fn precompressed_bytes(&self) -> u64 {
        PRECOMPRESSED_EXTENSIONS
            .iter()
            .filter_map(|ext| self.extension_bytes.get(*ext))
            .sum()
    }
}

impl<'a> FromIterator<(&'a str, u64)> for PackageStats {
    fn from_iter<I: IntoIterator<Item = (&'a str, u64)>>(iter: I) -> Self {
        let mut stats = PackageStats::new();
        for (path, size) in iter {
            stats.add(path, size);
        }
        stats
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    SmallPackage,
    PrecompressedContent,
    Balanced,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reason::SmallPackage => "package is below the small-package threshold",
            Reason::PrecompressedContent => "most bytes are already-compressed media",
            Reason::Balanced => "general content",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recommendation {
    pub compression: CompressionType,
    pub reason: Reason,
}

/// pick a compression type; first matching rule wins and lzma is never chosen
pub fn recommend(stats: &PackageStats) -> Recommendation {
    if stats.total_size < SMALL_PACKAGE_THRESHOLD {
        return Recommendation {
            compression: CompressionType::Lz4,
            reason: Reason::SmallPackage,
        };
    }
    // more than half, measured in bytes
    if stats.precompressed_bytes() * 2 > stats.total_size {
        return Recommendation {
            compression: CompressionType::Lz4,
            reason: Reason::PrecompressedContent,
        };
    }
    Recommendation {
        compression: CompressionType::Zstd,
        reason: Reason::Balanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_small_package_rule_first() {
        let stats: PackageStats = [("/a.txt", 5 * MB)].into_iter().collect();
        let rec = recommend(&stats);
        assert_eq!(rec.compression, CompressionType::Lz4);
        assert_eq!(rec.reason, Reason::SmallPackage);

        // small rule fires even when content is all media
        let stats: PackageStats = [("/a.jpg", 5 * MB)].into_iter().collect();
        assert_eq!(recommend(&stats).reason, Reason::SmallPackage);
    }

    #[test]
    fn test_precompressed_rule() {
        let stats: PackageStats = [
            ("/photos/a.jpg", 20 * MB),
            ("/music/b.MP3", 20 * MB),
            ("/doc.txt", 10 * MB),
        ]
        .into_iter()
        .collect();
        assert_eq!(stats.total_size, 50 * MB);
        assert_eq!(stats.precompressed_bytes(), 40 * MB);
        let rec = recommend(&stats);
        assert_eq!(rec.compression, CompressionType::Lz4);
        assert_eq!(rec.reason, Reason::PrecompressedContent);
    }

    #[test]
    fn test_balanced_default() {
        let stats: PackageStats = [("/a.txt", 30 * MB), ("/b.png", 20 * MB)]
            .into_iter()
            .collect();
        let rec = recommend(&stats);
        assert_eq!(rec.compression, CompressionType::Zstd);
        assert_eq!(rec.reason, Reason::Balanced);
    }

    #[test]
    fn test_exactly_half_is_not_dominant() {
        let stats: PackageStats = [("/a.txt", 25 * MB), ("/b.flac", 25 * MB)]
            .into_iter()
            .collect();
        assert_eq!(recommend(&stats).compression, CompressionType::Zstd);
    }

    #[test]
    fn test_explicit_setting_wins() {
        let stats: PackageStats = [("/a.txt", MB)].into_iter().collect();
        assert_eq!(CompressionSetting::Lzma.resolve(&stats), CompressionType::Lzma);
        assert_eq!(CompressionSetting::Auto.resolve(&stats), CompressionType::Lz4);
    }

    #[test]
    fn test_average_and_codes() {
        let stats: PackageStats = [("/a", 10), ("/b", 30)].into_iter().collect();
        assert_eq!(stats.average_file_size(), 20);
        assert_eq!(PackageStats::new().average_file_size(), 0);
        for code in 0..4 {
            assert_eq!(CompressionType::from_code(code).unwrap().code(), code);
        }
    }
}
