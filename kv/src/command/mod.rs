mod codec;

use std::io::Cursor;

use crate::error::{CResult, Error};
use crate::storage::{Storage, ValueRecord};

/// Opcode for [`Command::Set`] in the commit log.
pub const OPCODE_SET: u16 = 1;
/// Opcode for [`Command::Delete`] in the commit log.
pub const OPCODE_DELETE: u16 = 2;

/// The closed command set executed against the store.
///
/// `Set` and `Delete` are mutating and carry a stable opcode so they can be
/// recorded in the commit log and replayed after a crash. `Get` and the
/// three `Dump*` variants are read-only, never enter the commit log, and
/// have no opcode.
///
/// This is a fixed tagged enum rather than a runtime-discovered class
/// hierarchy: adding an opcode means adding a match arm here and in
/// [`Command::unpack`], which the compiler checks for exhaustiveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: Vec<u8>, flags: u16, exptime: u32, data: Vec<u8> },
    Delete { key: Vec<u8> },
    Get { key: Vec<u8> },
    Dump,
    DumpLog,
    DumpCommit,
}

impl Command {
    /// The commit-log opcode for mutating commands, or `None` for read-only
    /// commands, which never enter the log.
    pub fn opcode(&self) -> Option<u16> {
        match self {
            Command::Set { .. } => Some(OPCODE_SET),
            Command::Delete { .. } => Some(OPCODE_DELETE),
            Command::Get { .. } | Command::Dump | Command::DumpLog | Command::DumpCommit => None,
        }
    }

    /// Applies this command's effect directly to `store`, bypassing
    /// the commit log. Used both by the online path (wrapped by
    /// [`Storage::apply`]) and by crash recovery, which must not
    /// re-append replayed commands to the log.
    pub fn visit(&self, store: &mut Storage) -> CResult<Option<ValueRecord>> {
        match self {
            Command::Set { key, flags, exptime, data } => {
                store.set(key.clone(), ValueRecord { flags: *flags, exptime: *exptime, data: data.clone() });
                Ok(None)
            }
            Command::Delete { key } => {
                store.delete(key)?;
                Ok(None)
            }
            Command::Get { key } => store.get(key).map(Some),
            Command::Dump => {
                log::debug!("dump: {:?}", store.dump_live());
                Ok(None)
            }
            Command::DumpLog => {
                log::debug!("dump_log: {:?}", store.dump_commit_log()?);
                Ok(None)
            }
            Command::DumpCommit => {
                log::debug!("dump_commit: {:?}", store.last_commit_id());
                Ok(None)
            }
        }
    }

    /// Serializes a mutating command's payload. Read-only commands never
    /// enter the commit log and have no packed form.
    pub fn pack(&self) -> CResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Command::Set { key, flags, exptime, data } => {
                codec::write_vls(&mut buf, key)?;
                codec::write_u16(&mut buf, *flags)?;
                codec::write_u32(&mut buf, *exptime)?;
                codec::write_vls(&mut buf, data)?;
            }
            Command::Delete { key } => {
                codec::write_vls(&mut buf, key)?;
            }
            _ => {
                return Err(Error::Internal("read-only commands have no packed form".into()))
            }
        }
        Ok(buf)
    }

    /// Reconstructs a mutating command from its opcode, decoding fields
    /// directly off `cursor` (positioned just past the opcode). Fields are
    /// self-describing (length-prefixed), so no outer payload framing is
    /// needed — this is what lets [`crate::storage::commit_log::CommitLog::replay`]
    /// decode commands straight out of the log without copying a payload
    /// slice first. An unknown opcode is `LogCorrupt` and halts replay at
    /// the caller.
    pub fn unpack(opcode: u16, cursor: &mut Cursor<&[u8]>) -> CResult<Command> {
        match opcode {
            OPCODE_SET => {
                let key = codec::read_vls(cursor)?;
                let flags = codec::read_u16(cursor)?;
                let exptime = codec::read_u32(cursor)?;
                let data = codec::read_vls(cursor)?;
                Ok(Command::Set { key, flags, exptime, data })
            }
            OPCODE_DELETE => {
                let key = codec::read_vls(cursor)?;
                Ok(Command::Delete { key })
            }
            other => Err(Error::LogCorrupt { offset: 0, reason: format!("unknown opcode {other}") }),
        }
    }

    /// Convenience wrapper over [`Command::unpack`] for tests and callers
    /// that already have a standalone payload blob (as produced by
    /// [`Command::pack`]) rather than a live log cursor.
    #[cfg(test)]
    fn unpack_payload(opcode: u16, payload: &[u8]) -> CResult<Command> {
        let mut cursor = Cursor::new(payload);
        Command::unpack(opcode, &mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_round_trips_through_pack_unpack() {
        let cmd = Command::Set { key: b"foo".to_vec(), flags: 1, exptime: 2, data: b"bar".to_vec() };
        let packed = cmd.pack().unwrap();
        let unpacked = Command::unpack_payload(OPCODE_SET, &packed).unwrap();
        assert_eq!(cmd, unpacked);
    }

    #[test]
    fn delete_round_trips_through_pack_unpack() {
        let cmd = Command::Delete { key: b"some_key".to_vec() };
        let packed = cmd.pack().unwrap();
        let unpacked = Command::unpack_payload(OPCODE_DELETE, &packed).unwrap();
        assert_eq!(cmd, unpacked);
    }

    #[test]
    fn set_round_trips_with_empty_key_and_data() {
        let cmd = Command::Set { key: vec![], flags: 0, exptime: 0, data: vec![] };
        let packed = cmd.pack().unwrap();
        let unpacked = Command::unpack_payload(OPCODE_SET, &packed).unwrap();
        assert_eq!(cmd, unpacked);
    }

    #[test]
    fn unknown_opcode_is_log_corrupt() {
        let err = Command::unpack_payload(99, &[]).unwrap_err();
        assert!(matches!(err, Error::LogCorrupt { .. }));
    }

    #[test]
    fn read_only_commands_have_no_packed_form() {
        assert!(Command::Get { key: b"x".to_vec() }.pack().is_err());
        assert!(Command::Dump.pack().is_err());
        assert!(Command::DumpLog.pack().is_err());
        assert!(Command::DumpCommit.pack().is_err());
    }
}
