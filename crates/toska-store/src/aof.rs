//! Append-only log writer and replayer.
//!
//! Every mutation becomes one JSON line appended to the log. On startup the
//! log is replayed on top of the last snapshot; at compaction it is truncated
//! after a fresh snapshot has been committed. Records are never rewritten in
//! place.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::record::AofRecord;

/// Append handle over the AOF file.
pub struct AofLog {
    path: PathBuf,
    file: File,
}

impl AofLog {
    /// Open the log for appending, creating it if absent.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one record as a JSON line. Durability depends on the sync mode;
    /// callers invoke [`AofLog::sync`] per their policy.
    pub fn append(&mut self, record: &AofRecord) -> Result<u64> {
        let mut line = record.to_line()?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(line.len() as u64)
    }

    /// fsync the log file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current byte length of the log.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncate the log to zero length and reopen for append. Only called
    /// after a snapshot has been committed.
    pub fn truncate(&mut self) -> Result<()> {
        // Opening for write with truncate drops the contents; the append
        // handle is then re-established so subsequent writes land at offset 0.
        let truncated = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        debug!(path = %self.path.display(), "truncated AOF");
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay a log file into its surviving records, in byte order.
    ///
    /// Individual bad lines are never fatal: decode failures and checksum
    /// mismatches are skipped with a warning. `set` records whose deadline is
    /// already past are discarded. A missing file replays as empty.
    pub fn replay(path: &Path, now_ms: u64) -> Result<Vec<AofRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = match AofRecord::from_line(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(line = line_no + 1, error = %err, "skipping undecodable AOF line");
                    skipped += 1;
                    continue;
                }
            };
            if !record.verify() {
                warn!(line = line_no + 1, key = %record.key, "skipping AOF record with bad checksum");
                skipped += 1;
                continue;
            }
            if record.expired(now_ms) {
                debug!(key = %record.key, "dropping expired AOF record at replay");
                continue;
            }
            records.push(record);
        }

        if skipped > 0 {
            warn!(skipped, path = %path.display(), "AOF replay skipped corrupt lines");
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AofOp;
    use std::io::Write as _;

    fn temp_log() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toska.aof");
        (dir, path)
    }

    #[test]
    fn test_append_then_replay() {
        let (_dir, path) = temp_log();
        let mut log = AofLog::open(&path).unwrap();
        log.append(&AofRecord::set("a", "1", None)).unwrap();
        log.append(&AofRecord::set("b", "2", None)).unwrap();
        log.append(&AofRecord::del("a")).unwrap();
        log.sync().unwrap();

        let records = AofLog::replay(&path, 0).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[0].op, AofOp::Set);
        assert_eq!(records[2].op, AofOp::Del);
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let (_dir, path) = temp_log();
        let records = AofLog::replay(&path, 0).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_replay_skips_garbage_lines() {
        let (_dir, path) = temp_log();
        {
            let mut log = AofLog::open(&path).unwrap();
            log.append(&AofRecord::set("good", "1", None)).unwrap();
        }
        {
            let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(raw, "{{not json").unwrap();
            writeln!(raw, "12345").unwrap();
        }
        {
            let mut log = AofLog::open(&path).unwrap();
            log.append(&AofRecord::set("also-good", "2", None)).unwrap();
        }

        let records = AofLog::replay(&path, 0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "good");
        assert_eq!(records[1].key, "also-good");
    }

    #[test]
    fn test_replay_skips_bad_checksum() {
        let (_dir, path) = temp_log();
        let mut tampered = AofRecord::set("k", "v", None);
        tampered.checksum = Some("0".repeat(64));
        {
            let mut log = AofLog::open(&path).unwrap();
            log.append(&tampered).unwrap();
            log.append(&AofRecord::set("ok", "v", None)).unwrap();
        }

        let records = AofLog::replay(&path, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "ok");
    }

    #[test]
    fn test_replay_drops_expired_sets() {
        let (_dir, path) = temp_log();
        {
            let mut log = AofLog::open(&path).unwrap();
            log.append(&AofRecord::set("stale", "v", Some(100))).unwrap();
            log.append(&AofRecord::set("fresh", "v", Some(10_000))).unwrap();
        }

        let records = AofLog::replay(&path, 5000).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "fresh");
    }

    #[test]
    fn test_size_grows_with_appends() {
        let (_dir, path) = temp_log();
        let mut log = AofLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        let written = log.append(&AofRecord::set("k", "v", None)).unwrap();
        assert_eq!(log.size().unwrap(), written);
    }

    #[test]
    fn test_truncate_resets_to_zero() {
        let (_dir, path) = temp_log();
        let mut log = AofLog::open(&path).unwrap();
        log.append(&AofRecord::set("k", "v", None)).unwrap();
        assert!(log.size().unwrap() > 0);

        log.truncate().unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(AofLog::replay(&path, 0).unwrap().is_empty());

        // The handle still appends after truncation.
        log.append(&AofRecord::set("after", "v", None)).unwrap();
        let records = AofLog::replay(&path, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "after");
    }

    #[test]
    fn test_byte_offsets_are_strictly_increasing() {
        let (_dir, path) = temp_log();
        let mut log = AofLog::open(&path).unwrap();
        let mut offset = 0u64;
        for i in 0..5 {
            let before = log.size().unwrap();
            assert_eq!(before, offset);
            offset += log
                .append(&AofRecord::set(&format!("k{i}"), "v", None))
                .unwrap();
            assert!(log.size().unwrap() > before);
        }
    }
}
