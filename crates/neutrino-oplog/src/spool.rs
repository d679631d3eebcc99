//! Spool file naming, gzip encode/decode, and the length-prefix reader.
//!
//! Grounded on `original_source/bson_reader.go` and `oplog_cache.go`: each
//! spool file is a gzip stream whose decompressed body is the concatenation
//! of raw BSON documents. A BSON document's own leading 4-byte little-endian
//! length field doubles as the frame header, so no extra framing is added.

use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use chrono::{DateTime, Utc};
use neutrino_types::OplogEntry;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use crate::error::OplogError;

pub const SPOOL_FILE_SUFFIX: &str = "bson.gz";
const MAX_DOC_SIZE: i32 = 16 * 1024 * 1024;
const MIN_DOC_SIZE: i32 = 5;

/// Builds the `<tag>.<yymmdd.hhmmss.mmm>.bson.gz` name; lexicographic order
/// on this name matches capture order because the timestamp is monotonic.
pub fn spool_file_name(tag: &str, when: DateTime<Utc>) -> String {
    format!(
        "{tag}.{}.{}",
        when.format("%y%m%d.%H%M%S.%3f"),
        SPOOL_FILE_SUFFIX
    )
}

/// Serializes each entry to its native BSON bytes and concatenates them,
/// relying on each document's own length prefix as the frame header.
pub fn encode_entries(entries: &[OplogEntry]) -> Result<Vec<u8>, bson::ser::Error> {
    let mut buffer = Vec::new();
    for entry in entries {
        buffer.extend(bson::to_vec(entry)?);
    }
    Ok(buffer)
}

/// Gzip-compresses `raw` and writes it as a new spool file, returning the
/// path written.
pub async fn write_spool_file(
    dir: &Path,
    tag: &str,
    when: DateTime<Utc>,
    raw: &[u8],
) -> Result<PathBuf, OplogError> {
    let path = dir.join(spool_file_name(tag, when));
    let file = tokio::fs::File::create(&path)
        .await
        .map_err(|source| OplogError::SpoolIo {
            path: path.display().to_string(),
            source,
        })?;
    let mut encoder = GzipEncoder::new(file);
    encoder
        .write_all(raw)
        .await
        .map_err(|source| OplogError::SpoolIo {
            path: path.display().to_string(),
            source,
        })?;
    encoder
        .shutdown()
        .await
        .map_err(|source| OplogError::SpoolIo {
            path: path.display().to_string(),
            source,
        })?;
    Ok(path)
}

/// Reads and fully decompresses one spool file into memory. Files are capped
/// at `CacheDataSizeLimit` before they're flushed, so holding the whole
/// decompressed body at once is bounded.
pub async fn read_spool_file(path: &Path) -> Result<Vec<u8>, OplogError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| OplogError::SpoolIo {
            path: path.display().to_string(),
            source,
        })?;
    let mut decoder = GzipDecoder::new(BufReader::new(file));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .await
        .map_err(|source| OplogError::SpoolIo {
            path: path.display().to_string(),
            source,
        })?;
    Ok(out)
}

/// Lists spool files for `tag`, sorted by name, optionally filtered to
/// strictly after `cursor` (the last file name the drain loop consumed).
pub fn list_spool_files(
    dir: &Path,
    tag: &str,
    cursor: Option<&str>,
) -> Result<Vec<PathBuf>, OplogError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let prefix = format!("{tag}.");
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map_err(|source| OplogError::SpoolIo {
            path: dir.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            name.starts_with(&prefix)
                && name.ends_with(SPOOL_FILE_SUFFIX)
                && cursor.map_or(true, |c| name.as_str() > c)
        })
        .collect();
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Iterates length-prefixed BSON documents out of a decompressed spool file
/// body, matching `BSONReader.Next`'s size sanity check of `[5, 16 MiB]`.
pub struct RawDocumentReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RawDocumentReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for RawDocumentReader<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let remaining = &self.data[self.pos..];
        if remaining.len() < 4 {
            return None;
        }
        let size = i32::from_le_bytes(remaining[0..4].try_into().ok()?);
        if size > MAX_DOC_SIZE || size < MIN_DOC_SIZE {
            return None;
        }
        let size = size as usize;
        if remaining.len() < size {
            return None;
        }
        self.pos += size;
        Some(&remaining[..size])
    }
}

/// Decodes every framed BSON document in `data` as an `OplogEntry`, skipping
/// (and logging) any record that fails to decode rather than aborting the
/// whole file.
pub fn decode_entries(data: &[u8]) -> Vec<OplogEntry> {
    RawDocumentReader::new(data)
        .filter_map(|raw| match bson::from_slice::<OplogEntry>(raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable spool record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Timestamp;
    use neutrino_types::OperationKind;

    fn sample(ns: &str) -> OplogEntry {
        OplogEntry {
            operation: OperationKind::Insert,
            namespace: ns.to_string(),
            document: bson::doc! { "_id": 1 },
            query: None,
            timestamp: Timestamp { time: 1, increment: 1 },
        }
    }

    #[test]
    fn round_trips_entries_through_raw_framing() {
        let entries = vec![sample("db1.a"), sample("db1.b")];
        let raw = encode_entries(&entries).unwrap();
        let decoded = decode_entries(&raw);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].namespace, "db1.a");
        assert_eq!(decoded[1].namespace, "db1.b");
    }

    #[test]
    fn rejects_a_frame_claiming_a_size_past_the_16mib_safety_limit() {
        let mut raw = (MAX_DOC_SIZE + 1).to_le_bytes().to_vec();
        raw.extend(std::iter::repeat(0u8).take(16));
        let mut reader = RawDocumentReader::new(&raw);
        assert!(reader.next().is_none());
    }

    #[test]
    fn rejects_a_frame_below_the_minimum_document_size() {
        let raw = (MIN_DOC_SIZE - 1).to_le_bytes().to_vec();
        let mut reader = RawDocumentReader::new(&raw);
        assert!(reader.next().is_none());
    }

    #[test]
    fn spool_file_name_embeds_tag_and_suffix() {
        let when = DateTime::parse_from_rfc3339("2026-07-28T01:02:03.456Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = spool_file_name("rs0", when);
        assert_eq!(name, "rs0.260728.010203.456.bson.gz");
    }

    #[test]
    fn list_spool_files_filters_by_prefix_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["rs0.260728.000001.000.bson.gz", "rs0.260728.000002.000.bson.gz", "rs1.260728.000001.000.bson.gz"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let all = list_spool_files(dir.path(), "rs0", None).unwrap();
        assert_eq!(all.len(), 2);
        let after = list_spool_files(dir.path(), "rs0", Some("rs0.260728.000001.000.bson.gz")).unwrap();
        assert_eq!(after.len(), 1);
    }
}
