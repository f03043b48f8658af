use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::{AlignedVec, Deserialize};
use tracing::{error, warn};

use crate::error::StoreError;
use crate::model::LogEntry;

// A record is well under 100 bytes; anything past this is a corrupt length prefix.
const MAX_ENTRY_SIZE: usize = 64 * 1024;

/// Append-only log file of rkyv-encoded [`LogEntry`] values.
///
/// Layout: `[Length (4b LE)][Data (N bytes)]` repeated.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    strict_durability: bool,
    current_offset: u64,
    /// Bytes past `current_offset` may hold a failed append.
    dirty_tail: bool,
}

impl Segment {
    pub fn new(path: &Path, strict_durability: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
           file,
           strict_durability,
           current_offset,
           dirty_tail: false,
        })
    }

    /// Size of the log in bytes.
    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    pub fn strict_durability(&self) -> bool {
        self.strict_durability
    }

    /// Re-targets the segment after its file was renamed to `path`.
    pub fn renamed(mut self, path: &Path, strict_durability: bool) -> Self {
        self.file_path = path.to_path_buf();
        self.strict_durability = strict_durability;
        self
    }

    /// Flushes data and metadata regardless of the durability mode.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Appends an entry and returns its offset. The entry is durable once this
    /// returns in strict mode, and handed to the OS otherwise.
    ///
    /// A failed append leaves the log as it was before the call: the partial
    /// frame is cut off right away, or before the next append if that fails too.
    pub fn append(&mut self, entry: &LogEntry) -> Result<u64, StoreError> {
        let bytes = rkyv::to_bytes::<_, 256>(entry)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        self.clean_tail()?;

        let start = self.current_offset;
        let len = bytes.len() as u32;

        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);

        if let Err(e) = self.write_frame(&frame) {
            self.dirty_tail = true;
            if let Err(rollback) = self.clean_tail() {
                error!(
                    path = %self.file_path.display(),
                    offset = start,
                    error = %rollback,
                    "Could not roll back failed append, retrying on next write"
                );
            }
            return Err(e.into());
        }

        self.current_offset += frame.len() as u64;
        Ok(start)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        if self.strict_durability {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drops whatever a failed append left past the last complete frame.
    fn clean_tail(&mut self) -> Result<(), StoreError> {
        if !self.dirty_tail {
            return Ok(());
        }
        self.file.set_len(self.current_offset)?;
        self.file.sync_all()?;
        self.dirty_tail = false;
        Ok(())
    }

    pub fn read(&self, offset: u64) -> Result<LogEntry, StoreError> {
        self.read_frame(offset).map(|(entry, _)| entry)
    }

    /// Reads the entry at `offset` and returns it with the size of its frame.
    fn read_frame(&self, offset: u64) -> Result<(LogEntry, u64), StoreError> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_SIZE {
            return Err(StoreError::Corrupt { offset, reason: format!("entry length {} exceeds limit", len) });
        }

        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        Ok((decode(offset, &bytes)?, 4 + len as u64))
    }

    /// Reads every entry from the start of the log.
    ///
    /// A torn write at the tail (crash mid-append) is cut off so later appends
    /// land on a clean boundary. That covers a short final frame, a final frame
    /// that fails validation and a zero-filled tail. Corruption anywhere else
    /// is an error.
    pub fn replay(&mut self) -> Result<Vec<(u64, LogEntry)>, StoreError> {
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < self.current_offset {
            let remaining = self.current_offset - offset;
            if remaining < 4 {
                self.truncate_tail(offset)?;
                break;
            }

            match self.read_frame(offset) {
                Ok((entry, frame_len)) => {
                    entries.push((offset, entry));
                    offset += frame_len;
                }
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.truncate_tail(offset)?;
                    break;
                }
                Err(StoreError::Corrupt { .. }) if self.is_torn_tail(offset)? => {
                    self.truncate_tail(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }

    /// True when the bad frame at `offset` is the last thing in the log, or
    /// nothing but zeroes follows it.
    fn is_torn_tail(&self, offset: u64) -> Result<bool, StoreError> {
        let remaining = self.current_offset - offset;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        if 4 + u32::from_le_bytes(len_buf) as u64 >= remaining {
            return Ok(true);
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                return Ok(true);
            }
            if buf[..n].iter().any(|b| *b != 0) {
                return Ok(false);
            }
        }
    }

    fn truncate_tail(&mut self, offset: u64) -> Result<(), StoreError> {
        warn!(
            path = %self.file_path.display(),
            offset,
            dropped = self.current_offset - offset,
            "Truncating incomplete entry at end of log"
        );
        self.file.set_len(offset)?;
        self.file.sync_all()?;
        self.current_offset = offset;
        Ok(())
    }
}

fn decode(offset: u64, bytes: &[u8]) -> Result<LogEntry, StoreError> {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<LogEntry>(&aligned)
    .map_err(|e| StoreError::Corrupt { offset, reason: e.to_string() })?;

    let entry: LogEntry = archived.deserialize(&mut rkyv::Infallible).unwrap_or_else(|e| match e {});
    Ok(entry)
}
