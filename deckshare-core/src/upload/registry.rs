use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::{debug, info, warn};

use super::checksum::{parse_checksum, sha256_file, validate_file_name};
use crate::error::{UploadError, UploadResult};

/// Default per-request chunk cap.
pub const DEFAULT_MAX_CHUNK: usize = 1024 * 1024;

/// One request's worth of an upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadChunk<'a> {
    /// SHA-256 of the complete file, hex encoded.
    pub checksum: &'a str,
    pub offset: u64,
    /// More chunks follow this one.
    pub more: bool,
    /// Directory the finished file lands in. Must already exist.
    pub destination: &'a Path,
    /// Final name, required on the terminal chunk only.
    pub file_name: Option<&'a str>,
    pub body: &'a [u8],
}

/// What a successful chunk did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Accepted { received: u64 },
    Completed { path: PathBuf, size: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Temp files removed.
    pub deleted: usize,
    /// Entries whose temp file was already gone.
    pub dropped: usize,
    /// Deletions that failed; those entries stay for the next sweep.
    pub failed: usize,
}

#[derive(Debug)]
struct UploadJob {
    temp_path: PathBuf,
    destination: PathBuf,
    received: u64,
    last_chunk: Instant,
    // Set once the job has left the map; a chunk that was queued on the
    // lock must not touch it afterwards
    closed: bool,
}

type JobSlot = Arc<AsyncMutex<UploadJob>>;

/// In-progress uploads keyed by checksum.
///
/// The map itself sits behind one short-lived mutex; each job has its own
/// async lock so chunks of one upload run strictly one after another while
/// unrelated uploads proceed in parallel.
pub struct UploadRegistry {
    jobs: Mutex<HashMap<String, JobSlot>>,
    max_chunk: usize,
}

impl fmt::Debug for UploadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRegistry")
            .field("jobs", &self.jobs.lock().len())
            .field("max_chunk", &self.max_chunk)
            .finish()
    }
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK)
    }
}

impl UploadRegistry {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            max_chunk,
        }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, checksum: &str) -> bool {
        parse_checksum(checksum)
            .map(|key| self.jobs.lock().contains_key(&key))
            .unwrap_or(false)
    }

    /// Bytes received so far for an in-progress upload.
    pub async fn received(&self, checksum: &str) -> Option<u64> {
        let key = parse_checksum(checksum).ok()?;
        let slot = self.jobs.lock().get(&key).cloned()?;
        let job = slot.lock().await;
        (!job.closed).then_some(job.received)
    }

    /// Apply one chunk.
    ///
    /// Everything that can be checked without the filesystem is checked
    /// first, so a malformed request never creates or touches a file.
    pub async fn receive(
        &self,
        chunk: UploadChunk<'_>,
    ) -> UploadResult<ChunkOutcome> {
        let checksum = parse_checksum(chunk.checksum)?;
        let file_name = match chunk.file_name {
            Some(name) => Some(validate_file_name(name)?),
            None if !chunk.more => {
                return Err(UploadError::MissingField("filename"));
            }
            None => None,
        };
        if chunk.body.len() > self.max_chunk {
            return Err(UploadError::ChunkTooLarge {
                size: chunk.body.len(),
                limit: self.max_chunk,
            });
        }

        let mut job = if chunk.offset == 0 {
            self.begin(&checksum, chunk.destination).await?
        } else {
            self.resume(&checksum, chunk.offset).await?
        };

        append(&mut job, chunk.body).await?;

        if chunk.more {
            debug!(
                checksum = %checksum,
                received = job.received,
                "upload chunk accepted"
            );
            return Ok(ChunkOutcome::Accepted {
                received: job.received,
            });
        }

        // Required above whenever `more` is false
        let Some(file_name) = file_name else {
            return Err(UploadError::MissingField("filename"));
        };
        self.finalize(&checksum, job, file_name).await
    }

    /// Offset 0: create or truncate the temp file and (re)register the job.
    async fn begin(
        &self,
        checksum: &str,
        destination: &Path,
    ) -> UploadResult<OwnedMutexGuard<UploadJob>> {
        let is_dir = fs::metadata(destination)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(UploadError::DestinationMissing(
                destination.to_path_buf(),
            ));
        }

        let temp_path = destination.join(checksum);
        let (mut job, inserted) = loop {
            let mut inserted = false;
            let slot = Arc::clone(
                self.jobs
                    .lock()
                    .entry(checksum.to_string())
                    .or_insert_with(|| {
                        inserted = true;
                        Arc::new(AsyncMutex::new(UploadJob {
                            temp_path: temp_path.clone(),
                            destination: destination.to_path_buf(),
                            received: 0,
                            last_chunk: Instant::now(),
                            closed: false,
                        }))
                    }),
            );
            let job = slot.lock_owned().await;
            if !job.closed {
                break (job, inserted);
            }
        };

        // A job registered by this call must not outlive a failed create
        if let Err(err) = fs::File::create(&temp_path).await {
            if inserted {
                job.closed = true;
                self.forget(checksum, &job);
            }
            return Err(err.into());
        }

        if job.temp_path != temp_path {
            // Restarted into another directory; the old partial is dead
            if let Err(err) = fs::remove_file(&job.temp_path).await
                && err.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    path = %job.temp_path.display(),
                    error = %err,
                    "failed to remove superseded partial upload"
                );
            }
            job.temp_path = temp_path;
            job.destination = destination.to_path_buf();
        }

        job.received = 0;
        job.last_chunk = Instant::now();
        info!(
            checksum,
            temp = %job.temp_path.display(),
            "upload started"
        );
        Ok(job)
    }

    /// Offset > 0: the job must exist and the offset must continue it.
    async fn resume(
        &self,
        checksum: &str,
        offset: u64,
    ) -> UploadResult<OwnedMutexGuard<UploadJob>> {
        let slot = self
            .jobs
            .lock()
            .get(checksum)
            .cloned()
            .ok_or_else(|| UploadError::UnknownUpload(checksum.to_string()))?;

        let job = slot.lock_owned().await;
        if job.closed {
            return Err(UploadError::UnknownUpload(checksum.to_string()));
        }
        if offset != job.received {
            return Err(UploadError::OffsetMismatch {
                expected: job.received,
                got: offset,
            });
        }
        Ok(job)
    }

    async fn finalize(
        &self,
        checksum: &str,
        mut job: OwnedMutexGuard<UploadJob>,
        file_name: &str,
    ) -> UploadResult<ChunkOutcome> {
        let actual = sha256_file(&job.temp_path).await?;
        if actual != checksum {
            warn!(
                checksum,
                actual = %actual,
                temp = %job.temp_path.display(),
                "upload failed integrity check, keeping partial file"
            );
            return Err(UploadError::ChecksumMismatch {
                expected: checksum.to_string(),
                actual,
            });
        }

        let target = job.destination.join(file_name);
        fs::rename(&job.temp_path, &target).await?;

        job.closed = true;
        self.forget(checksum, &job);
        info!(
            checksum,
            path = %target.display(),
            size = job.received,
            "upload completed"
        );
        Ok(ChunkOutcome::Completed {
            path: target,
            size: job.received,
        })
    }

    /// Abort an upload and delete its temp file. Returns whether an upload
    /// was registered; an unknown checksum is not an error.
    pub async fn cancel(&self, checksum: &str) -> UploadResult<bool> {
        let checksum = parse_checksum(checksum)?;
        let Some(slot) = self.jobs.lock().get(&checksum).cloned() else {
            debug!(checksum = %checksum, "cancel for unknown upload");
            return Ok(false);
        };

        let mut job = slot.lock_owned().await;
        if job.closed {
            return Ok(false);
        }
        match fs::remove_file(&job.temp_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        job.closed = true;
        self.forget(&checksum, &job);
        info!(checksum = %checksum, "upload cancelled");
        Ok(true)
    }

    /// Delete the temp file of every registered upload.
    ///
    /// Entries whose file is already gone are dropped. A failed deletion is
    /// logged and the entry kept so a later sweep can retry it.
    pub async fn sweep_orphans(&self) -> SweepReport {
        self.sweep(None).await
    }

    /// Like [`sweep_orphans`](Self::sweep_orphans), limited to uploads that
    /// have not received a chunk for at least `idle`.
    pub async fn sweep_idle(&self, idle: Duration) -> SweepReport {
        self.sweep(Some(idle)).await
    }

    async fn sweep(&self, idle: Option<Duration>) -> SweepReport {
        let slots: Vec<(String, JobSlot)> = self
            .jobs
            .lock()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut report = SweepReport::default();
        for (checksum, slot) in slots {
            let mut job = slot.lock_owned().await;
            if job.closed
                || idle.is_some_and(|idle| job.last_chunk.elapsed() < idle)
            {
                continue;
            }
            match fs::remove_file(&job.temp_path).await {
                Ok(()) => {
                    info!(path = %job.temp_path.display(), "removed incomplete upload");
                    report.deleted += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    report.dropped += 1;
                }
                Err(err) => {
                    warn!(
                        path = %job.temp_path.display(),
                        error = %err,
                        "failed to remove incomplete upload, will retry"
                    );
                    report.failed += 1;
                    continue;
                }
            }
            job.closed = true;
            self.forget(&checksum, &job);
        }

        if report != SweepReport::default() {
            info!(
                deleted = report.deleted,
                dropped = report.dropped,
                failed = report.failed,
                "orphan sweep finished"
            );
        }
        report
    }

    /// Remove `checksum` from the map if it still points at `job`.
    fn forget(&self, checksum: &str, job: &OwnedMutexGuard<UploadJob>) {
        let mut jobs = self.jobs.lock();
        if jobs
            .get(checksum)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(job)))
        {
            jobs.remove(checksum);
        }
    }
}

/// Append `body` to the job's temp file. A failed write is rolled back to
/// the last good length so the file never holds a partial chunk.
async fn append(job: &mut UploadJob, body: &[u8]) -> UploadResult<()> {
    let mut file = OpenOptions::new().append(true).open(&job.temp_path).await?;

    let written = async {
        file.write_all(body).await?;
        file.flush().await
    }
    .await;

    if let Err(err) = written {
        if let Err(rollback) = file.set_len(job.received).await {
            warn!(
                path = %job.temp_path.display(),
                error = %rollback,
                "failed to roll back partial chunk"
            );
        }
        return Err(err.into());
    }

    job.received += body.len() as u64;
    job.last_chunk = Instant::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;

    fn sha(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn chunk<'a>(
        checksum: &'a str,
        destination: &'a Path,
        offset: u64,
        body: &'a [u8],
        final_name: Option<&'a str>,
    ) -> UploadChunk<'a> {
        UploadChunk {
            checksum,
            offset,
            more: final_name.is_none(),
            destination,
            file_name: final_name,
            body,
        }
    }

    #[tokio::test]
    async fn chunks_assemble_into_the_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"hello resumable world";
        let sum = sha(data);
        let registry = UploadRegistry::default();

        let first = registry
            .receive(chunk(&sum, dir.path(), 0, &data[..5], None))
            .await
            .unwrap();
        assert_eq!(first, ChunkOutcome::Accepted { received: 5 });
        assert!(dir.path().join(&sum).exists());
        assert_eq!(registry.received(&sum).await, Some(5));

        registry
            .receive(chunk(&sum, dir.path(), 5, &data[5..12], None))
            .await
            .unwrap();
        let done = registry
            .receive(chunk(&sum, dir.path(), 12, &data[12..], Some("greeting.txt")))
            .await
            .unwrap();

        let target = dir.path().join("greeting.txt");
        assert_eq!(
            done,
            ChunkOutcome::Completed {
                path: target.clone(),
                size: data.len() as u64
            }
        );
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert!(!dir.path().join(&sum).exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn single_chunk_upload_accepts_uppercase_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"one shot").to_ascii_uppercase();
        let registry = UploadRegistry::default();

        let done = registry
            .receive(chunk(&sum, dir.path(), 0, b"one shot", Some("a.bin")))
            .await
            .unwrap();
        assert!(matches!(done, ChunkOutcome::Completed { size: 8, .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_upload_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"x");
        let registry = UploadRegistry::default();

        let err = registry
            .receive(chunk(&sum, dir.path(), 10, b"abc", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownUpload(_)));
        assert!(!dir.path().join(&sum).exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn offset_gaps_and_replays_are_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"abcdef");
        let registry = UploadRegistry::default();
        registry
            .receive(chunk(&sum, dir.path(), 0, b"abc", None))
            .await
            .unwrap();

        for offset in [1, 2, 4, 100] {
            let err = registry
                .receive(chunk(&sum, dir.path(), offset, b"zzz", None))
                .await
                .unwrap_err();
            assert!(
                matches!(err, UploadError::OffsetMismatch { expected: 3, got } if got == offset)
            );
        }
        assert_eq!(std::fs::read(dir.path().join(&sum)).unwrap(), b"abc");
        assert_eq!(registry.received(&sum).await, Some(3));
    }

    #[tokio::test]
    async fn checksum_mismatch_keeps_partial_and_allows_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"expected");
        let registry = UploadRegistry::default();

        let err = registry
            .receive(chunk(&sum, dir.path(), 0, b"tampered", Some("f.txt")))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ChecksumMismatch { .. }));
        assert!(!err.is_protocol_violation());
        assert!(dir.path().join(&sum).exists());
        assert!(!dir.path().join("f.txt").exists());
        assert!(registry.contains(&sum));

        assert!(registry.cancel(&sum).await.unwrap());
        assert!(!dir.path().join(&sum).exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn validation_happens_before_any_disk_access() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadRegistry::new(4);
        let sum = sha(b"data");

        let bad_sum = registry
            .receive(chunk("../../etc", dir.path(), 0, b"d", None))
            .await
            .unwrap_err();
        assert!(matches!(bad_sum, UploadError::InvalidChecksum(_)));

        let bad_name = registry
            .receive(chunk(&sum, dir.path(), 0, b"data", Some("../x")))
            .await
            .unwrap_err();
        assert!(matches!(bad_name, UploadError::InvalidFileName(_)));

        let too_big = registry
            .receive(chunk(&sum, dir.path(), 0, b"toolong", None))
            .await
            .unwrap_err();
        assert!(matches!(
            too_big,
            UploadError::ChunkTooLarge { size: 7, limit: 4 }
        ));

        let no_name = registry
            .receive(UploadChunk {
                more: false,
                ..chunk(&sum, dir.path(), 0, b"data", None)
            })
            .await
            .unwrap_err();
        assert!(matches!(no_name, UploadError::MissingField("filename")));

        let missing = dir.path().join("nope");
        let no_dir = registry
            .receive(chunk(&sum, &missing, 0, b"data", None))
            .await
            .unwrap_err();
        assert!(matches!(no_dir, UploadError::DestinationMissing(_)));

        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn restarting_at_zero_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"fresh");
        let registry = UploadRegistry::default();

        registry
            .receive(chunk(&sum, dir.path(), 0, b"stale bytes", None))
            .await
            .unwrap();
        let done = registry
            .receive(chunk(&sum, dir.path(), 0, b"fresh", Some("f")))
            .await
            .unwrap();
        assert!(matches!(done, ChunkOutcome::Completed { size: 5, .. }));
        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn failed_temp_file_creation_leaves_nothing_registered() {
        let dir = tempfile::tempdir().unwrap();
        let sum = sha(b"blocked");
        let registry = UploadRegistry::default();
        // A directory squatting on the temp name makes the create fail
        std::fs::create_dir(dir.path().join(&sum)).unwrap();

        let err = registry
            .receive(chunk(&sum, dir.path(), 0, b"data", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
        assert!(!registry.contains(&sum));
        assert_eq!(registry.received(&sum).await, None);
        assert_eq!(registry.sweep_orphans().await, SweepReport::default());
        assert!(dir.path().join(&sum).is_dir());

        // Once the name is free the same upload starts normally
        std::fs::remove_dir(dir.path().join(&sum)).unwrap();
        let started = registry
            .receive(chunk(&sum, dir.path(), 0, b"data", None))
            .await
            .unwrap();
        assert_eq!(started, ChunkOutcome::Accepted { received: 4 });
    }

    #[tokio::test]
    async fn failed_restart_keeps_the_existing_upload() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let sum = sha(b"moved");
        let registry = UploadRegistry::default();
        registry
            .receive(chunk(&sum, dir.path(), 0, b"mov", None))
            .await
            .unwrap();
        std::fs::create_dir(other.path().join(&sum)).unwrap();

        let err = registry
            .receive(chunk(&sum, other.path(), 0, b"mov", None))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
        assert_eq!(registry.received(&sum).await, Some(3));
        assert!(dir.path().join(&sum).is_file());

        let done = registry
            .receive(chunk(&sum, dir.path(), 3, b"ed", Some("moved")))
            .await
            .unwrap();
        assert!(matches!(done, ChunkOutcome::Completed { size: 5, .. }));
    }

    #[tokio::test]
    async fn idle_sweep_spares_uploads_that_are_still_receiving() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadRegistry::default();
        let stale = sha(b"stale upload");
        let active = sha(b"active upload");

        registry
            .receive(chunk(&stale, dir.path(), 0, b"sta", None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        registry
            .receive(chunk(&active, dir.path(), 0, b"act", None))
            .await
            .unwrap();

        assert_eq!(
            registry.sweep_idle(Duration::from_secs(3600)).await,
            SweepReport::default()
        );
        let report = registry.sweep_idle(Duration::from_millis(50)).await;
        assert_eq!(
            report,
            SweepReport {
                deleted: 1,
                dropped: 0,
                failed: 0
            }
        );
        assert!(!registry.contains(&stale));
        assert!(!dir.path().join(&stale).exists());
        assert!(registry.contains(&active));

        let next = registry
            .receive(chunk(&active, dir.path(), 3, b"ive", None))
            .await
            .unwrap();
        assert_eq!(next, ChunkOutcome::Accepted { received: 6 });
    }

    #[tokio::test]
    async fn cancel_of_unknown_upload_is_not_an_error() {
        let registry = UploadRegistry::default();
        assert!(!registry.cancel(&sha(b"nothing")).await.unwrap());
        assert!(registry.cancel("not-a-checksum").await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_partials_and_drops_vanished_entries() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UploadRegistry::default();
        let kept = sha(b"kept");
        let vanished = sha(b"vanished");

        for sum in [&kept, &vanished] {
            registry
                .receive(chunk(sum, dir.path(), 0, b"part", None))
                .await
                .unwrap();
        }
        std::fs::remove_file(dir.path().join(&vanished)).unwrap();

        let report = registry.sweep_orphans().await;
        assert_eq!(
            report,
            SweepReport {
                deleted: 1,
                dropped: 1,
                failed: 0
            }
        );
        assert!(!dir.path().join(&kept).exists());
        assert!(registry.is_empty());
        assert_eq!(registry.sweep_orphans().await, SweepReport::default());
    }

    #[tokio::test]
    async fn concurrent_chunks_of_one_upload_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(UploadRegistry::default());
        let sum = sha(b"aaaa");
        registry
            .receive(chunk(&sum, dir.path(), 0, b"aa", None))
            .await
            .unwrap();

        // Two clients racing on the same offset: exactly one wins.
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let sum = sum.clone();
                let dest = dir.path().to_path_buf();
                tokio::spawn(async move {
                    registry
                        .receive(chunk(&sum, &dest, 2, b"aa", None))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            wins += usize::from(task.await.unwrap());
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.received(&sum).await, Some(4));
    }
}
