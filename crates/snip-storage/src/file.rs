use crate::placement::{place, Placement};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snip_core::error::Result;
use snip_core::{
    CompactionReport, DeleteTarget, Entry, EntryStore, NewEntry, PostOutcome, ShortCode, Stat,
    StoreError,
};
use snip_generator::{AlphaGenerator, Generator};
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One line of the JSON-lines log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    #[serde(default)]
    uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    correlation_id: String,
    #[serde(default)]
    short_url: String,
    #[serde(default)]
    original_url: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    is_deleted: bool,
}

impl From<&Entry> for FileRecord {
    fn from(entry: &Entry) -> Self {
        Self {
            uuid: entry.id.clone(),
            correlation_id: entry.correlation_id.clone(),
            short_url: entry.short_code.to_string(),
            original_url: entry.original_url.clone(),
            user_id: entry.user_id.clone(),
            is_deleted: entry.deleted,
        }
    }
}

impl From<FileRecord> for Entry {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.uuid,
            correlation_id: record.correlation_id,
            short_code: ShortCode::new_unchecked(record.short_url),
            original_url: record.original_url,
            user_id: record.user_id,
            deleted: record.is_deleted,
        }
    }
}

/// A decoded line together with where it sits in the file.
#[derive(Debug)]
struct LogLine {
    offset: u64,
    /// Byte length without the trailing newline.
    len: usize,
    entry: Entry,
}

#[derive(Debug, Default)]
struct Scan {
    lines: Vec<LogLine>,
    /// The last line is not newline-terminated.
    unterminated: bool,
}

impl Scan {
    fn into_entries(self) -> Vec<Entry> {
        self.lines.into_iter().map(|line| line.entry).collect()
    }
}

/// Store backed by an append-only JSON-lines file.
///
/// Every operation takes the file lock and decodes the log from the start,
/// so reads are O(n) and writes are serialized. The dedup scan and the
/// append happen under the same lock.
///
/// Records are always written with an explicit `is_deleted` field, which lets
/// a delete overwrite a line in place: `true` is one byte shorter than
/// `false` and the remainder is padded with spaces. Lines that cannot be
/// patched in place trigger a full rewrite of the log.
#[derive(Debug)]
pub struct FileStore<G = AlphaGenerator> {
    path: PathBuf,
    file: Mutex<Option<File>>,
    generator: G,
}

impl FileStore<AlphaGenerator> {
    /// Opens (creating if needed) the log at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_generator(path, AlphaGenerator::new()).await
    }
}

impl<G: Generator> FileStore<G> {
    /// Opens (creating if needed) the log at `path`, drawing codes from `generator`.
    pub async fn open_with_generator(path: impl AsRef<Path>, generator: G) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = open_log(&path).await?;
        info!(path = %path.display(), "opened file store");

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            generator,
        })
    }

    /// Path of the underlying log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn post_scanned(
        &self,
        file: &mut File,
        entries: &mut Vec<Entry>,
        unterminated: &mut bool,
        new: NewEntry,
    ) -> Result<PostOutcome> {
        match place(entries, new, &self.generator)? {
            Placement::Existing(entry) => Ok(PostOutcome::duplicate(entry)),
            Placement::Fresh(entry) => {
                append(file, &entry, *unterminated).await?;
                *unterminated = false;
                entries.push(entry.clone());
                Ok(PostOutcome::created(entry))
            }
        }
    }
}

async fn open_log(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file)
}

fn encode(entry: &Entry) -> Result<String> {
    serde_json::to_string(&FileRecord::from(entry))
        .map_err(|e| StoreError::InvalidData(format!("cannot encode entry {}: {e}", entry.id)))
}

/// Seeks to the start and decodes every line.
async fn scan(file: &mut File) -> Result<Scan> {
    file.seek(SeekFrom::Start(0)).await?;
    let mut reader = BufReader::new(&mut *file);
    let mut scan = Scan::default();
    let mut buf = String::new();
    let mut offset = 0u64;
    let mut number = 0usize;

    loop {
        buf.clear();
        let read = reader.read_line(&mut buf).await?;
        if read == 0 {
            break;
        }
        number += 1;
        let line_offset = offset;
        offset += read as u64;

        let content = buf.strip_suffix('\n').unwrap_or(&buf);
        scan.unterminated = content.len() == buf.len();
        if content.trim().is_empty() {
            continue;
        }

        let record: FileRecord = serde_json::from_str(content)
            .map_err(|e| StoreError::InvalidData(format!("line {number}: {e}")))?;
        scan.lines.push(LogLine {
            offset: line_offset,
            len: content.len(),
            entry: record.into(),
        });
    }

    Ok(scan)
}

async fn append(file: &mut File, entry: &Entry, unterminated: bool) -> Result<()> {
    let mut line = String::new();
    if unterminated {
        line.push('\n');
    }
    line.push_str(&encode(entry)?);
    line.push('\n');

    file.seek(SeekFrom::End(0)).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Overwrites the line at `offset` with `entry`, padded to `len` bytes.
/// Returns `false` without writing when the new encoding does not fit.
async fn patch(file: &mut File, offset: u64, len: usize, entry: &Entry) -> Result<bool> {
    let mut encoded = encode(entry)?;
    if encoded.len() > len {
        return Ok(false);
    }
    encoded.extend(std::iter::repeat(' ').take(len - encoded.len()));

    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(encoded.as_bytes()).await?;
    file.flush().await?;
    Ok(true)
}

/// Replaces the log with one canonical line per entry, then reopens it.
/// Returns the new size in bytes.
async fn rewrite(path: &Path, file: &mut File, entries: &[Entry]) -> Result<u64> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&encode(entry)?);
        contents.push('\n');
    }

    let mut tmp = File::create(&tmp_path).await?;
    tmp.write_all(contents.as_bytes()).await?;
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);

    tokio::fs::rename(&tmp_path, path).await?;
    *file = open_log(path).await?;
    Ok(contents.len() as u64)
}

#[async_trait]
impl<G: Generator> EntryStore for FileStore<G> {
    async fn get(&self, code: &ShortCode) -> Result<Option<Entry>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let scan = scan(file).await?;
        Ok(scan
            .into_entries()
            .into_iter()
            .find(|e| &e.short_code == code))
    }

    async fn find_by_original_url(
        &self,
        original_url: &str,
        user_id: &str,
    ) -> Result<Option<Entry>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let scan = scan(file).await?;
        Ok(scan
            .into_entries()
            .into_iter()
            .find(|e| e.is_mapping_of(original_url, user_id)))
    }

    async fn post(&self, entry: NewEntry) -> Result<PostOutcome> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let scan = scan(file).await?;
        let mut unterminated = scan.unterminated;
        let mut entries = scan.into_entries();
        self.post_scanned(file, &mut entries, &mut unterminated, entry)
            .await
    }

    async fn post_batch(&self, batch: Vec<NewEntry>) -> Result<Vec<PostOutcome>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let scan = scan(file).await?;
        let mut unterminated = scan.unterminated;
        let mut entries = scan.into_entries();

        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, new) in batch.into_iter().enumerate() {
            let outcome = self
                .post_scanned(file, &mut entries, &mut unterminated, new)
                .await
                .map_err(|err| StoreError::batch(index, err))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<Entry>> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let scan = scan(file).await?;
        Ok(scan
            .into_entries()
            .into_iter()
            .filter(|e| e.user_id == user_id && !e.deleted)
            .collect())
    }

    async fn delete_user_urls(&self, targets: &[DeleteTarget]) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let wanted: HashSet<(&str, &str)> = targets
            .iter()
            .map(|t| (t.user_id.as_str(), t.short_code.as_str()))
            .collect();

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let mut scan = scan(file).await?;

        let mut patched = 0usize;
        let mut needs_rewrite = false;
        for line in scan.lines.iter_mut().filter(|l| !l.entry.deleted) {
            if !wanted.contains(&(line.entry.user_id.as_str(), line.entry.short_code.as_str())) {
                continue;
            }
            line.entry.deleted = true;
            if !needs_rewrite && !patch(file, line.offset, line.len, &line.entry).await? {
                needs_rewrite = true;
            }
            patched += 1;
        }

        if needs_rewrite {
            warn!(path = %self.path.display(), "deleted line does not fit in place, rewriting log");
            let entries = scan.into_entries();
            rewrite(&self.path, file, &entries).await?;
        }

        debug!(requested = targets.len(), deleted = patched, "marked entries deleted");
        Ok(())
    }

    async fn get_stat(&self) -> Result<Stat> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let entries = scan(file).await?.into_entries();
        let users: HashSet<&str> = entries.iter().map(|e| e.user_id.as_str()).collect();
        Ok(Stat {
            urls: entries.len() as u64,
            users: users.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        file.sync_all().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
            file.sync_all().await?;
            info!(path = %self.path.display(), "closed file store");
        }
        Ok(())
    }

    async fn compact(&self) -> Result<CompactionReport> {
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(StoreError::Closed)?;
        let bytes_before = file.metadata().await?.len();
        let entries = scan(file).await?.into_entries();
        let bytes_after = rewrite(&self.path, file, &entries).await?;

        info!(
            path = %self.path.display(),
            entries = entries.len(),
            bytes_before,
            bytes_after,
            "compacted file store"
        );
        Ok(CompactionReport {
            entries: entries.len() as u64,
            bytes_before,
            bytes_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_generator::SeqGenerator;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    async fn store_in(dir: &TempDir) -> FileStore<SeqGenerator> {
        FileStore::open_with_generator(dir.path().join("urls.json"), SeqGenerator::with_prefix("wh"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn post_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("urls.json")).await.unwrap();

        let outcome = store
            .post(NewEntry::new("https://a.example", "u1").with_correlation_id("c1"))
            .await
            .unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.short_code().as_str().len(), 7);
        assert_eq!(outcome.entry.id, "1");

        let got = store.get(outcome.short_code()).await.unwrap().unwrap();
        assert_eq!(got.original_url, "https://a.example");
        assert_eq!(got.correlation_id, "c1");
        assert!(store.get(&code("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_one_json_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        store
            .post(NewEntry::new("https://b.example", "u2"))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"uuid":"1","short_url":"wh000000","original_url":"https://a.example","user_id":"u1","is_deleted":false}"#
        );
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("urls.json");

        let store = FileStore::open(&path).await.unwrap();
        let outcome = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        let got = reopened.get(outcome.short_code()).await.unwrap().unwrap();
        assert_eq!(got.original_url, "https://a.example");

        let dup = reopened
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        assert!(dup.duplicate);
        assert_eq!(dup.short_code(), outcome.short_code());
    }

    #[tokio::test]
    async fn scenario_post_dedup_delete_stat() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let created = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        let again = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(again.short_code(), created.short_code());

        store
            .delete_user_urls(&[DeleteTarget::new("u1", created.short_code().clone())])
            .await
            .unwrap();

        assert!(store.get(created.short_code()).await.unwrap().unwrap().deleted);
        assert!(store.get_user_urls("u1").await.unwrap().is_empty());
        assert_eq!(store.get_stat().await.unwrap(), Stat { urls: 1, users: 1 });
    }

    #[tokio::test]
    async fn delete_patches_line_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let a = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        let b = store
            .post(NewEntry::new("https://b.example", "u1"))
            .await
            .unwrap();
        let size_before = tokio::fs::metadata(store.path()).await.unwrap().len();

        store
            .delete_user_urls(&[DeleteTarget::new("u1", a.short_code().clone())])
            .await
            .unwrap();

        let size_after = tokio::fs::metadata(store.path()).await.unwrap().len();
        assert_eq!(size_before, size_after);
        assert!(store.get(a.short_code()).await.unwrap().unwrap().deleted);
        assert!(!store.get(b.short_code()).await.unwrap().unwrap().deleted);

        let next = store
            .post(NewEntry::new("https://c.example", "u1"))
            .await
            .unwrap();
        assert_eq!(next.entry.id, "3");
    }

    #[tokio::test]
    async fn delete_rewrites_legacy_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        tokio::fs::write(
            &path,
            concat!(
                r#"{"uuid":"1","short_url":"legacy1","original_url":"https://a.example","user_id":"u1"}"#,
                "\n",
                r#"{"uuid":"2","short_url":"legacy2","original_url":"https://b.example","user_id":"u1"}"#,
                "\n",
            ),
        )
        .await
        .unwrap();
        let store = FileStore::open(&path).await.unwrap();

        store
            .delete_user_urls(&[DeleteTarget::new("u1", code("legacy1"))])
            .await
            .unwrap();

        assert!(store.get(&code("legacy1")).await.unwrap().unwrap().deleted);
        let remaining = store.get_user_urls("u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].short_code, code("legacy2"));
    }

    #[tokio::test]
    async fn delete_only_touches_owned_codes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let a = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();

        store
            .delete_user_urls(&[
                DeleteTarget::new("u2", a.short_code().clone()),
                DeleteTarget::new("u1", code("unknown")),
            ])
            .await
            .unwrap();

        assert!(!store.get(a.short_code()).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn batch_stops_at_first_failure_keeping_earlier_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store
            .post(NewEntry::new("https://taken.example", "u0").with_short_code(code("taken")))
            .await
            .unwrap();

        let err = store
            .post_batch(vec![
                NewEntry::new("https://1.example", "u1"),
                NewEntry::new("https://2.example", "u1"),
                NewEntry::new("https://3.example", "u1").with_short_code(code("taken")),
                NewEntry::new("https://4.example", "u1"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Batch { index: 2, .. }));
        assert_eq!(store.get_user_urls("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_tolerates_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let outcomes = store
            .post_batch(vec![
                NewEntry::new("https://a.example", "u1").with_correlation_id("1"),
                NewEntry::new("https://a.example", "u1").with_correlation_id("2"),
            ])
            .await
            .unwrap();

        assert!(!outcomes[0].duplicate);
        assert!(outcomes[1].duplicate);
        assert_eq!(outcomes[0].short_code(), outcomes[1].short_code());
    }

    #[tokio::test]
    async fn malformed_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        tokio::fs::write(&path, "not json\n").await.unwrap();
        let store = FileStore::open(&path).await.unwrap();

        let err = store.get_stat().await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(msg) if msg.starts_with("line 1")));
    }

    #[tokio::test]
    async fn unterminated_last_line_is_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        tokio::fs::write(
            &path,
            r#"{"uuid":"1","short_url":"first01","original_url":"https://a.example","user_id":"u1"}"#,
        )
        .await
        .unwrap();
        let store = FileStore::open(&path).await.unwrap();

        store
            .post(NewEntry::new("https://b.example", "u1"))
            .await
            .unwrap();

        assert_eq!(store.get_stat().await.unwrap().urls, 2);
    }

    #[tokio::test]
    async fn compact_keeps_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let a = store
            .post(NewEntry::new("https://a.example", "u1"))
            .await
            .unwrap();
        store
            .post(NewEntry::new("https://b.example", "u2"))
            .await
            .unwrap();
        store
            .delete_user_urls(&[DeleteTarget::new("u1", a.short_code().clone())])
            .await
            .unwrap();

        let report = store.compact().await.unwrap();

        assert_eq!(report.entries, 2);
        assert!(report.bytes_after < report.bytes_before);
        assert!(store.get(a.short_code()).await.unwrap().unwrap().deleted);
        assert_eq!(store.get_stat().await.unwrap(), Stat { urls: 2, users: 2 });

        // the reopened handle keeps appending to the compacted log
        store
            .post(NewEntry::new("https://c.example", "u3"))
            .await
            .unwrap();
        assert_eq!(store.get_stat().await.unwrap().urls, 3);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        store.ping().await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.ping().await.unwrap_err(), StoreError::Closed));
        assert!(matches!(
            store
                .post(NewEntry::new("https://a.example", "u1"))
                .await
                .unwrap_err(),
            StoreError::Closed
        ));
    }

    #[tokio::test]
    async fn concurrent_posts_of_same_url_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir).await);
        let mut handles = vec![];

        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .post(NewEntry::new("https://same.example", "u1"))
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if !handle.await.unwrap().duplicate {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.get_stat().await.unwrap().urls, 1);
    }
}
