//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Append-only JSON-lines journal of store mutations."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use reactorsync_common::{Fault, PersistedReading, Reactor, ReactorId, ReactorStatus};
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::{Result, StoreError};

/// Journal format version written into the header line.
pub const JOURNAL_VERSION: u16 = 1;

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        Self {
            version: JOURNAL_VERSION,
            hash: header_hash(JOURNAL_VERSION, &created_at),
            created_at,
        }
    }

    fn verify(&self) -> Result<()> {
        if self.hash == header_hash(self.version, &self.created_at) {
            Ok(())
        } else {
            Err(StoreError::HashMismatch)
        }
    }
}

fn header_hash(version: u16, created_at: &DateTime<Utc>) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(version.to_be_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store mutation captured in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    /// Reactor registered or replaced.
    ReactorUpserted {
        /// Full reactor row after the write.
        reactor: Reactor,
    },
    /// Reactor deleted together with its readings and faults.
    ReactorDeleted {
        /// Deleted reactor.
        reactor_id: ReactorId,
    },
    /// Health score and status refreshed.
    HealthUpdated {
        /// Reactor updated.
        reactor_id: ReactorId,
        /// New score.
        health_score: f64,
        /// New status.
        status: ReactorStatus,
        /// Update time.
        at: DateTime<Utc>,
    },
    /// Reading appended.
    Reading {
        /// Stored row.
        reading: PersistedReading,
    },
    /// Fault created.
    FaultCreated {
        /// Stored fault.
        fault: Fault,
    },
    /// Fault resolved.
    FaultResolved {
        /// Resolved fault id.
        fault_id: u64,
        /// Resolution time.
        at: DateTime<Utc>,
    },
    /// Retention cleanup removed readings older than the cutoff.
    Cleanup {
        /// Cutoff applied.
        before: DateTime<Utc>,
    },
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Recorded mutation.
    pub record: JournalRecord,
}

impl JournalEntry {
    /// Construct an entry with the provided record.
    pub fn new(record: JournalRecord) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            record,
        }
    }
}

/// Append-only writer for the journal.
///
/// Each entry goes out as a single write of one complete line, so a failed
/// append leaves nothing buffered behind for the next one.
pub struct JournalWriter {
    path: PathBuf,
    writer: File,
    next_sequence: u64,
}

impl JournalWriter {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = file;

        if fresh {
            let mut line = serde_json::to_string(&JournalHeader::new())?;
            line.push('\n');
            writer.write_all(line.as_bytes())?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
            });
        }

        let next_sequence = last_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a record and return the assigned sequence number and byte count.
    ///
    /// The sequence number is only consumed when the write succeeds.
    pub fn append(&mut self, record: JournalRecord) -> Result<(u64, usize)> {
        let mut entry = JournalEntry::new(record);
        entry.sequence = self.next_sequence + 1;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.next_sequence = entry.sequence;
        Ok((entry.sequence, line.len()))
    }

    /// Flush the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Append to an already open handle without writing a header.
    #[cfg(test)]
    pub(crate) fn over_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: file,
            next_sequence: 0,
        }
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for JournalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalWriter")
            .field("path", &self.path)
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0u64;
    for entry in JournalReader::open(path)? {
        last = entry?.sequence;
    }
    Ok(last)
}

/// Replay the journal in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    let mut count = 0usize;
    for entry in JournalReader::open(path)? {
        handler(entry?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over journal entries.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open the journal for sequential reading, verifying the header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?;
        let header: JournalHeader = serde_json::from_str(first_line.trim())?;
        header.verify()?;
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lines.next()? {
            Ok(line) if line.trim().is_empty() => self.next(),
            Ok(line) => Some(serde_json::from_str(&line).map_err(StoreError::from)),
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactorsync_common::ReactorFamily;
    use tempfile::tempdir;

    #[test]
    fn append_and_replay_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut writer = JournalWriter::open(&path).unwrap();
        writer
            .append(JournalRecord::ReactorUpserted {
                reactor: Reactor::new(1, "Bruce A", ReactorFamily::Candu, 44.3, -81.6),
            })
            .unwrap();
        writer
            .append(JournalRecord::ReactorDeleted { reactor_id: 1 })
            .unwrap();

        let mut records = Vec::new();
        let count = replay(&path, |entry| {
            records.push(entry.record);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 2);
        assert!(matches!(records[0], JournalRecord::ReactorUpserted { .. }));
        assert_eq!(records[1], JournalRecord::ReactorDeleted { reactor_id: 1 });
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.jsonl");
        {
            let mut writer = JournalWriter::open(&path).unwrap();
            writer
                .append(JournalRecord::ReactorDeleted { reactor_id: 3 })
                .unwrap();
        }
        let mut writer = JournalWriter::open(&path).unwrap();
        let (sequence, bytes) = writer
            .append(JournalRecord::ReactorDeleted { reactor_id: 4 })
            .unwrap();
        assert_eq!(sequence, 2);
        assert!(bytes > 0);

        let sequences: Vec<_> = JournalReader::open(&path)
            .unwrap()
            .map(|entry| entry.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn tampered_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        JournalWriter::open(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let mut header: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        header["version"] = serde_json::json!(7);
        fs::write(&path, format!("{header}\n")).unwrap();

        assert!(matches!(
            JournalReader::open(&path),
            Err(StoreError::HashMismatch)
        ));
    }
}
