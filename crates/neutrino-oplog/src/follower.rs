//! One follower per upstream replica-set tag: tails the source's operation
//! log, spools it to disk while `Caching`, then transitions to `Live`
//! (drain the spool, then tail-and-apply indefinitely).
//!
//! Grounded on `original_source/oplog_streamer.go`, `oplog_cache.go`, and
//! `oplog_utils.go`'s `GetTailableCursor`/`SkipOplog` (§4.5).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::doc;
use chrono::Utc;
use futures::stream::TryStreamExt;
use mongodb::options::{CursorType, FindOptions};
use mongodb::{Client, Cursor};
use neutrino_types::{ApplyCounts, Include, IncludeSet, OplogEntry};
use neutrino_workspace::Workspace;

use crate::apply::bulk_apply;
use crate::error::OplogError;
use crate::skip::should_skip;
use crate::spool::{decode_entries, encode_entries, list_spool_files, read_spool_file, write_spool_file};

/// Upstream cursor batch size (`OplogBatchSize` in the original tool).
const OPLOG_BATCH_SIZE: u32 = 10_000;
/// In-memory cache buffer ceiling before a spool flush (`CacheDataSizeLimit`).
const CACHE_DATA_SIZE_LIMIT: usize = 64 * 1024 * 1024;
/// Live-apply batch ceiling (`MaxBatchSize`).
const MAX_BATCH_SIZE: usize = 1_000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const LAG_LOG_INTERVAL: Duration = Duration::from_secs(10);
const DRAIN_PAUSE: Duration = Duration::from_millis(50);
const CACHE_POLL_PAUSE: Duration = Duration::from_millis(10);

/// One replica-set follower. `includes` drives both the skip predicate and
/// the bulk applier's rename lookup.
pub struct Follower {
    tag: String,
    source: Client,
    workspace: Workspace,
    spool_dir: PathBuf,
    includes: Vec<Include>,
}

impl Follower {
    pub fn new(tag: impl Into<String>, source: Client, workspace: Workspace, includes: Vec<Include>) -> Self {
        let spool_dir = workspace.spool_dir().to_path_buf();
        Self {
            tag: tag.into(),
            source,
            workspace,
            spool_dir,
            includes,
        }
    }

    /// Runs the full Caching → transition → Live lifecycle until `exit` is
    /// set. `is_cache` is cleared by the orchestrator once the data phase
    /// has drained, signalling this follower to stop spooling and go live.
    pub async fn run(
        &self,
        target: Client,
        is_cache: Arc<AtomicBool>,
        exit: Arc<AtomicBool>,
    ) -> Result<(), OplogError> {
        let include_set = IncludeSet::new(&self.includes);
        let ts0 = bson::Timestamp {
            time: Utc::now().timestamp() as u32,
            increment: 0,
        };
        let last_cached_ts = self.run_caching(&target, &include_set, &is_cache, &exit, ts0).await?;
        if exit.load(Ordering::Relaxed) {
            return Ok(());
        }
        let drained_ts = self.drain_spool(&target).await?;
        let from_ts = drained_ts.or(last_cached_ts).unwrap_or(ts0);
        self.run_live(&target, &include_set, &exit, from_ts).await
    }

    async fn run_caching(
        &self,
        target: &Client,
        include_set: &IncludeSet,
        is_cache: &Arc<AtomicBool>,
        exit: &Arc<AtomicBool>,
        from: bson::Timestamp,
    ) -> Result<Option<bson::Timestamp>, OplogError> {
        tracing::info!(tag = %self.tag, "caching oplog");
        tokio::fs::create_dir_all(&self.spool_dir).await.ok();
        let mut cursor = self.tailable_cursor(from).await?;
        let mut buffer: Vec<OplogEntry> = Vec::new();
        let mut buffer_bytes: usize = 0;
        let mut last_ts: Option<bson::Timestamp> = None;

        while is_cache.load(Ordering::Relaxed) && !exit.load(Ordering::Relaxed) {
            match cursor.try_next().await? {
                Some(entry) => {
                    if should_skip(&entry, include_set) {
                        continue;
                    }
                    last_ts = Some(entry.timestamp);
                    buffer_bytes += bson::to_vec(&entry).map(|v| v.len()).unwrap_or(0);
                    buffer.push(entry);
                    if buffer_bytes >= CACHE_DATA_SIZE_LIMIT {
                        self.flush_buffer(&mut buffer).await?;
                        buffer_bytes = 0;
                    }
                }
                None => tokio::time::sleep(CACHE_POLL_PAUSE).await,
            }
        }

        if !buffer.is_empty() {
            let counts = bulk_apply(target, &buffer, &self.includes).await?;
            log_apply_counts(&self.tag, &counts);
            if let Some(ts) = last_ts {
                self.workspace.save_oplog_timestamp(&self.tag, ts).await?;
            }
        }
        Ok(last_ts)
    }

    async fn flush_buffer(&self, buffer: &mut Vec<OplogEntry>) -> Result<(), OplogError> {
        let raw = encode_entries(buffer)?;
        write_spool_file(&self.spool_dir, &self.tag, Utc::now(), &raw).await?;
        buffer.clear();
        Ok(())
    }

    /// Replays every spooled file not yet consumed, in filename order, in a
    /// loop until a full pass finds nothing new (a concurrent late flush
    /// from `run_caching` could still land after this method starts).
    async fn drain_spool(&self, target: &Client) -> Result<Option<bson::Timestamp>, OplogError> {
        let mut cursor_name: Option<String> = None;
        let mut last_ts: Option<bson::Timestamp> = None;
        loop {
            let files = list_spool_files(&self.spool_dir, &self.tag, cursor_name.as_deref())?;
            if files.is_empty() {
                break;
            }
            for path in files {
                let raw = read_spool_file(&path).await?;
                let entries = decode_entries(&raw);
                if let Some(last) = entries.last() {
                    last_ts = Some(last.timestamp);
                }
                let counts = bulk_apply(target, &entries, &self.includes).await?;
                log_apply_counts(&self.tag, &counts);
                if let Some(ts) = last_ts {
                    self.workspace.save_oplog_timestamp(&self.tag, ts).await?;
                }
                cursor_name = path.file_name().and_then(|n| n.to_str()).map(str::to_string);
                tokio::time::sleep(DRAIN_PAUSE).await;
            }
        }
        Ok(last_ts)
    }

    async fn run_live(
        &self,
        target: &Client,
        include_set: &IncludeSet,
        exit: &Arc<AtomicBool>,
        from: bson::Timestamp,
    ) -> Result<(), OplogError> {
        tracing::info!(tag = %self.tag, "live streaming oplog");
        let mut cursor = self.tailable_cursor(from).await?;
        let mut batch: Vec<OplogEntry> = Vec::new();
        let mut last_ts = from;
        let mut last_flush = Instant::now();
        let mut last_lag_log = Instant::now();

        while !exit.load(Ordering::Relaxed) {
            if let Some(entry) = cursor.try_next().await? {
                last_ts = entry.timestamp;
                if !should_skip(&entry, include_set) {
                    batch.push(entry);
                }
            }
            let should_flush = batch.len() >= MAX_BATCH_SIZE
                || (!batch.is_empty() && last_flush.elapsed() >= FLUSH_INTERVAL);
            if should_flush {
                let counts = bulk_apply(target, &batch, &self.includes).await?;
                log_apply_counts(&self.tag, &counts);
                self.workspace.save_oplog_timestamp(&self.tag, last_ts).await?;
                batch.clear();
                last_flush = Instant::now();
            }
            if last_lag_log.elapsed() >= LAG_LOG_INTERVAL {
                let lag = (Utc::now().timestamp() as u32).saturating_sub(last_ts.time);
                tracing::info!(tag = %self.tag, lag_seconds = lag, "follower lag");
                last_lag_log = Instant::now();
            }
        }
        if !batch.is_empty() {
            let counts = bulk_apply(target, &batch, &self.includes).await?;
            log_apply_counts(&self.tag, &counts);
            self.workspace.save_oplog_timestamp(&self.tag, last_ts).await?;
        }
        Ok(())
    }

    async fn tailable_cursor(&self, from: bson::Timestamp) -> Result<Cursor<OplogEntry>, OplogError> {
        let coll = self.source.database("local").collection::<OplogEntry>("oplog.rs");
        let options = FindOptions::builder()
            .cursor_type(CursorType::TailableAwait)
            .no_cursor_timeout(true)
            .batch_size(OPLOG_BATCH_SIZE)
            .max_await_time(Duration::from_secs(1))
            .build();
        let cursor = coll.find(doc! { "ts": { "$gte": from } }).with_options(options).await?;
        Ok(cursor)
    }
}

fn log_apply_counts(tag: &str, counts: &ApplyCounts) {
    tracing::debug!(
        tag,
        inserted = counts.inserted,
        modified = counts.modified,
        deleted = counts.deleted,
        upserted = counts.upserted,
        "applied oplog batch"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Timestamp};
    use neutrino_types::OperationKind;

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    fn insert_at(ns: &str, id: i32, time: u32) -> OplogEntry {
        OplogEntry {
            operation: OperationKind::Insert,
            namespace: ns.to_string(),
            document: doc! { "_id": id },
            query: None,
            timestamp: Timestamp { time, increment: 0 },
        }
    }

    /// S6: two spool files, drained in filename order regardless of write
    /// order, with the checkpoint landing on the last file's last record.
    #[tokio::test]
    async fn drain_spool_applies_files_in_filename_order() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let db = "neutrino_follower_test";
        client.database(db).drop().await.unwrap();

        let spool_dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(client.clone(), spool_dir.path());
        workspace.drop_meta_db().await.unwrap();
        workspace.create_task_indexes().await.unwrap();

        let tag = "r1";
        let first = encode_entries(&[insert_at(&format!("{db}.widgets"), 1, 100)]).unwrap();
        let second = encode_entries(&[insert_at(&format!("{db}.widgets"), 2, 200)]).unwrap();
        // Write the later file's content under the earlier name first, and
        // vice versa, so a test bug that drained in write order (rather
        // than filename order) would be caught.
        write_spool_file(spool_dir.path(), tag, Utc::now() - chrono::Duration::seconds(10), &first)
            .await
            .unwrap();
        write_spool_file(spool_dir.path(), tag, Utc::now(), &second).await.unwrap();

        let follower = Follower::new(tag, client.clone(), workspace.clone(), vec![]);
        let last_ts = follower.drain_spool(&client).await.unwrap();
        assert_eq!(last_ts, Some(Timestamp { time: 200, increment: 0 }));

        let coll = client.database(db).collection::<bson::Document>("widgets");
        assert_eq!(coll.count_documents(doc! {}).await.unwrap(), 2);

        let checkpoint = workspace.get_oplog_timestamp(tag).await.unwrap();
        assert_eq!(checkpoint, Some(Timestamp { time: 200, increment: 0 }));

        client.database(db).drop().await.unwrap();
        workspace.drop_meta_db().await.unwrap();
    }
}
