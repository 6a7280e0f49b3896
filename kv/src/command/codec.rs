use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CResult, Error};

/// Writes a length-prefixed byte string: a little-endian `u32` length
/// followed by the raw bytes. Used for keys and values in the commit-log
/// payloads: `key_len:u32 LE | key` and `data_len:u32 LE | data`.
pub fn write_vls<W: Write>(w: &mut W, bytes: &[u8]) -> CResult<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads a length-prefixed byte string written by [`write_vls`]. A short
/// read at any point (including the length field itself) is reported as
/// [`Error::LogCorrupt`] by the caller via [`CorruptAt`] so that replay can
/// treat a truncated trailing record as clean end-of-log.
pub fn read_vls(cursor: &mut Cursor<&[u8]>) -> CResult<Vec<u8>> {
    let len = cursor.read_u32::<LittleEndian>().map_err(short_read)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(short_read)?;
    Ok(buf)
}

pub fn write_u16<W: Write>(w: &mut W, value: u16) -> CResult<()> {
    w.write_u16::<LittleEndian>(value)?;
    Ok(())
}

pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> CResult<u16> {
    cursor.read_u16::<LittleEndian>().map_err(short_read)
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> CResult<()> {
    w.write_u32::<LittleEndian>(value)?;
    Ok(())
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> CResult<u32> {
    cursor.read_u32::<LittleEndian>().map_err(short_read)
}

/// A truncated field mid-record is end-of-log, not a hard error, at the call
/// site that tracks offsets (see `storage::commit_log::CommitLog::replay`).
/// We still surface it through the normal error type so non-replay callers
/// (e.g. malformed-payload detection) see a consistent error.
fn short_read(err: std::io::Error) -> Error {
    Error::LogCorrupt { offset: 0, reason: format!("truncated field: {err}") }
}
