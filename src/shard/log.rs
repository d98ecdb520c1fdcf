//! Append-only edge log
//!
//! Every committed edge is appended here before it becomes visible.
//! Record format: [MAGIC][SEQUENCE][LEN][PAYLOAD][CRC32]
//!
//! The payload is the bincode encoding of an [`Edge`]. On open the log is
//! replayed; a torn or corrupted tail ends replay and is truncated away on
//! the next append.

use crate::common::{crc32, Edge, Error, Result, WalSyncPolicy};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOG_MAGIC: [u8; 4] = [0x45, 0x44, 0x47, 0x31]; // "EDG1"
const HEADER_LEN: u64 = 4 + 8 + 4;
const MAX_PAYLOAD: usize = 1 << 20;

/// A replayed log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub sequence: u64,
    pub edge: Edge,
}

/// Append-only, checksummed edge log
pub struct EdgeLog {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
    sync_policy: WalSyncPolicy,
}

impl EdgeLog {
    /// Open or create the log, replaying existing records through `apply`.
    pub fn open<F>(path: impl AsRef<Path>, sync_policy: WalSyncPolicy, mut apply: F) -> Result<Self>
    where
        F: FnMut(LogRecord),
    {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut next_sequence = 0;
        let mut valid_len = 0u64;
        if let Ok(file) = File::open(&path) {
            let mut reader = BufReader::new(file);
            loop {
                match Self::read_record(&mut reader) {
                    Ok(Some((record, len))) => {
                        next_sequence = record.sequence + 1;
                        valid_len += len;
                        apply(record);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Edge log replay stopped at corrupted record: {}", e);
                        break;
                    }
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        // Drop any torn tail so new records follow the last valid one.
        file.set_len(valid_len)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            next_sequence,
            sync_policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append an edge. Returns the sequence number assigned to it.
    pub fn append(&mut self, edge: &Edge) -> Result<u64> {
        let payload = bincode::serialize(edge)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Store(format!(
                "edge record of {} bytes exceeds limit",
                payload.len()
            )));
        }

        let sequence = self.next_sequence;
        let len_bytes = (payload.len() as u32).to_le_bytes();
        let seq_bytes = sequence.to_le_bytes();

        let mut checksum_data = Vec::with_capacity(12 + payload.len());
        checksum_data.extend_from_slice(&seq_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);

        self.writer.write_all(&LOG_MAGIC)?;
        self.writer.write_all(&seq_bytes)?;
        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc32(&checksum_data).to_le_bytes())?;
        self.maybe_sync()?;

        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Sync based on policy
    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_policy {
            WalSyncPolicy::Always => {
                self.writer.flush()?;
                self.writer.get_ref().sync_all()?;
            }
            WalSyncPolicy::Interval => {
                self.writer.flush()?;
            }
            WalSyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read one record and the number of bytes it occupied.
    fn read_record<R: Read>(reader: &mut R) -> Result<Option<(LogRecord, u64)>> {
        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if magic != LOG_MAGIC {
            return Err(Error::Corrupted("invalid edge log magic".into()));
        }

        let mut seq_bytes = [0u8; 8];
        reader.read_exact(&mut seq_bytes)?;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::Corrupted(format!("record length {} too large", len)));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;

        let mut checksum_data = Vec::with_capacity(12 + len);
        checksum_data.extend_from_slice(&seq_bytes);
        checksum_data.extend_from_slice(&len_bytes);
        checksum_data.extend_from_slice(&payload);
        if crc32(&checksum_data) != u32::from_le_bytes(checksum_bytes) {
            return Err(Error::Corrupted("checksum mismatch".into()));
        }

        let edge: Edge = bincode::deserialize(&payload)?;
        let record = LogRecord {
            sequence: u64::from_le_bytes(seq_bytes),
            edge,
        };
        Ok(Some((record, HEADER_LEN + len as u64 + 4)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edges.log");

        {
            let mut log = EdgeLog::open(&path, WalSyncPolicy::Always, |_| {}).unwrap();
            assert_eq!(log.append(&Edge::new("t1", 1, 2, 3)).unwrap(), 0);
            assert_eq!(log.append(&Edge::new("t2", 2, 2, 1)).unwrap(), 1);
        }

        let mut records = Vec::new();
        let log = EdgeLog::open(&path, WalSyncPolicy::Always, |r| records.push(r)).unwrap();
        assert_eq!(log.next_sequence(), 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].edge, Edge::new("t1", 1, 2, 3));
        assert!(records[1].edge.is_self_loop);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edges.log");

        {
            let mut log = EdgeLog::open(&path, WalSyncPolicy::Always, |_| {}).unwrap();
            log.append(&Edge::new("t1", 1, 2, 3)).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&LOG_MAGIC).unwrap();
            file.write_all(&[0xff, 0x01]).unwrap();
        }

        {
            let mut count = 0;
            let mut log = EdgeLog::open(&path, WalSyncPolicy::Always, |_| count += 1).unwrap();
            assert_eq!(count, 1);
            log.append(&Edge::new("t2", 4, 5, 6)).unwrap();
        }

        let mut records = Vec::new();
        EdgeLog::open(&path, WalSyncPolicy::Always, |r| records.push(r)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(records[1].edge.timestamp, "t2");
    }
}
