//! Zip archives of a day's scrape output.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ArchiveError;

/// How an archive is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `reddit_scrapes_{date}.zip`, used by the daily scrape-and-upload job.
    Legacy,
    /// `reddit_scrapes_{type}_{date}_{HH-MM-SS}.zip`.
    Typed(String),
    /// `{name}_{date}_{HH-MM-SS}.zip`.
    Custom(String),
}

impl ArchiveKind {
    /// File name for an archive created at `now`.
    pub fn file_name(&self, now: DateTime<Local>) -> String {
        let date = now.format("%Y-%m-%d");
        let time = now.format("%H-%M-%S");
        match self {
            ArchiveKind::Legacy => format!("reddit_scrapes_{}.zip", date),
            ArchiveKind::Typed(kind) => format!("reddit_scrapes_{}_{}_{}.zip", kind, date, time),
            ArchiveKind::Custom(name) => format!("{}_{}_{}.zip", name, date, time),
        }
    }
}

/// What went into an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub file_count: usize,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
    /// Compressed size over original size; 0 when nothing was archived.
    pub compression_ratio: f64,
}

impl ArchiveSummary {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Zips every file under `source_dir` into `dest_dir/name`.
///
/// Entry names are relative to the parent of `source_dir`, so archiving
/// `scrapes/2024-05-01` yields entries like `2024-05-01/subreddits/x.json`.
pub fn create_archive(
    source_dir: &Path,
    dest_dir: &Path,
    name: &str,
    compress_level: u8,
) -> Result<ArchiveSummary, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::SourceMissing(source_dir.to_path_buf()));
    }
    let base = source_dir.parent().unwrap_or(source_dir);

    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(name);
    info!(archive = %path.display(), source = %source_dir.display(), "Creating archive");

    let mut zip = ZipWriter::new(BufWriter::new(File::create(&path)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(compress_level.min(9))));

    let mut file_count = 0usize;
    let mut original_size_bytes = 0u64;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| ArchiveError::OutsideRoot {
                path: entry.path().to_path_buf(),
                root: base.to_path_buf(),
            })?;
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(entry_name.as_str(), options)?;
        let mut reader = BufReader::new(File::open(entry.path())?);
        original_size_bytes += std::io::copy(&mut reader, &mut zip)?;
        file_count += 1;
        debug!(entry = %entry_name, "Added to archive");
    }

    zip.finish()?;

    let compressed_size_bytes = std::fs::metadata(&path)?.len();
    let compression_ratio = if original_size_bytes == 0 {
        0.0
    } else {
        compressed_size_bytes as f64 / original_size_bytes as f64
    };

    info!(
        archive = %path.display(),
        file_count,
        original_size_bytes,
        compressed_size_bytes,
        "Archive created"
    );

    Ok(ArchiveSummary {
        path,
        file_count,
        original_size_bytes,
        compressed_size_bytes,
        compression_ratio,
    })
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String, ArchiveError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_archive_names() {
        let now = at(14, 3, 9);
        assert_eq!(ArchiveKind::Legacy.file_name(now), "reddit_scrapes_2024-05-01.zip");
        assert_eq!(
            ArchiveKind::Typed("daily_scrapes".to_string()).file_name(now),
            "reddit_scrapes_daily_scrapes_2024-05-01_14-03-09.zip"
        );
        assert_eq!(
            ArchiveKind::Custom("manual_scrape".to_string()).file_name(now),
            "manual_scrape_2024-05-01_14-03-09.zip"
        );
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_archive(&dir.path().join("nope"), dir.path(), "a.zip", 6).unwrap_err();
        assert!(matches!(err, ArchiveError::SourceMissing(_)));
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
