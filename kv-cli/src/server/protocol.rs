use std::sync::Arc;
use std::time::Instant;

use memkv::{Command, Storage};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

const SEP: &[u8] = b"\r\n";
/// Cap on a single text line before we give up and recover the buffer
/// rather than disconnecting the peer.
const MAX_LINE: usize = 64 * 1024;

/// Drives one client connection until EOF or an unrecoverable I/O error.
/// Every command this loop dispatches runs through [`Storage::apply`],
/// keeping online semantics identical to crash-recovery replay (both
/// paths only ever see `Command::visit`'s effect, never anything special
/// to the wire).
pub async fn handle_connection(socket: TcpStream, storage: Arc<Mutex<Storage>>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match read_line_recovering(&mut reader, &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::warn!("connection read error: {err}");
                break;
            }
        }

        let trimmed = trim_sep(&line);
        if trimmed.is_empty() {
            continue;
        }

        metrics::counter!("kv_bytes_in").increment(line.len() as u64);

        let mut parts = trimmed.split(|&b| b == b' ').filter(|p| !p.is_empty());
        let verb = parts.next().unwrap_or(b"").to_ascii_lowercase();

        let reply = match verb.as_slice() {
            b"set" => handle_set(&mut reader, parts, &storage).await,
            b"get" => Some(handle_get(parts, &storage).await),
            b"delete" => handle_delete(parts, &storage).await,
            b"dump" => handle_dump(Command::Dump, &storage).await,
            b"dumplog" | b"dump_log" => handle_dump(Command::DumpLog, &storage).await,
            b"dumpcommit" | b"dump_commit" => handle_dump(Command::DumpCommit, &storage).await,
            _ => Some(b"ERROR\r\n".to_vec()),
        };

        if let Some(reply) = reply {
            metrics::counter!("kv_bytes_out").increment(reply.len() as u64);
            if writer.write_all(&reply).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    }
}

/// Reads one `\r\n`-delimited line, recovering from lines that exceed
/// `MAX_LINE` by discarding up to (and including) the next delimiter
/// rather than disconnecting. Returns `Ok(0)` on clean EOF.
///
/// Unlike a bare `read_until(b'\n', ..)`, this never lets the buffer grow
/// past `MAX_LINE` before checking: it fills the reader's internal buffer
/// and consumes only the bytes already present, scanning each chunk for
/// the delimiter itself, so a peer that streams data with no `\n` is
/// capped at `MAX_LINE` bytes in flight rather than buffered without
/// bound.
async fn read_line_recovering<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut over_limit = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if over_limit { 0 } else { out.len() });
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !over_limit && out.len() + pos + 1 <= MAX_LINE {
                    out.extend_from_slice(&available[..=pos]);
                    reader.consume(pos + 1);
                    return Ok(out.len());
                }
                reader.consume(pos + 1);
                log::warn!("line exceeded {MAX_LINE} bytes, recovering buffer");
                out.clear();
                over_limit = false;
                continue;
            }
            None => {
                let consumed = available.len();
                if !over_limit && out.len() + consumed <= MAX_LINE {
                    out.extend_from_slice(available);
                } else {
                    over_limit = true;
                }
                reader.consume(consumed);
            }
        }
    }
}

fn trim_sep(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

async fn handle_set<'a, R, I>(reader: &mut R, mut args: I, storage: &Arc<Mutex<Storage>>) -> Option<Vec<u8>>
where
    R: tokio::io::AsyncBufRead + Unpin,
    I: Iterator<Item = &'a [u8]>,
{
    // Wrong arity is `ProtocolMalformed` and always gets an ERROR reply;
    // a present-but-unparseable field is logged and the reply suppressed
    // instead, per the distinction in the error handling design.
    let (Some(raw_key), Some(raw_flags), Some(raw_exptime), Some(raw_datalen)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        return Some(b"ERROR\r\n".to_vec());
    };
    let noreply = args.next() == Some(b"noreply");

    let (Some(flags), Some(exptime), Some(datalen)) =
        (parse_ascii::<u16>(raw_flags), parse_ascii::<u32>(raw_exptime), parse_ascii::<usize>(raw_datalen))
    else {
        log::warn!("malformed SET arguments, suppressing reply");
        return None;
    };
    let key = raw_key.to_vec();

    let mut data = vec![0u8; datalen];
    if reader.read_exact(&mut data).await.is_err() {
        return Some(b"ERROR\r\n".to_vec());
    }
    let mut trailer = [0u8; 2];
    let _ = reader.read_exact(&mut trailer).await;
    metrics::counter!("kv_bytes_in").increment((data.len() + trailer.len()) as u64);

    let command = Command::Set { key, flags, exptime, data };
    let timer = Instant::now();
    let result = storage.lock().await.apply(command);
    metrics::histogram!("kv_request_duration_seconds", "command" => "set").record(timer.elapsed().as_secs_f64());
    if result.is_err() {
        metrics::counter!("kv_request_errors", "command" => "set").increment(1);
        return Some(b"ERROR\r\n".to_vec());
    }

    if noreply {
        None
    } else {
        Some(b"STORED\r\n".to_vec())
    }
}

async fn handle_get<'a, I: Iterator<Item = &'a [u8]>>(args: I, storage: &Arc<Mutex<Storage>>) -> Vec<u8> {
    let mut reply = Vec::new();
    let timer = Instant::now();
    let mut guard = storage.lock().await;
    for key in args {
        if let Ok(Some(item)) = guard.apply(Command::Get { key: key.to_vec() }) {
            reply.extend_from_slice(format!("VALUE {} {} {}\r\n", String::from_utf8_lossy(key), item.flags, item.data.len()).as_bytes());
            reply.extend_from_slice(&item.data);
            reply.extend_from_slice(SEP);
        }
    }
    reply.extend_from_slice(b"END\r\n");
    metrics::histogram!("kv_request_duration_seconds", "command" => "get").record(timer.elapsed().as_secs_f64());
    reply
}

async fn handle_delete<'a, I: Iterator<Item = &'a [u8]>>(mut args: I, storage: &Arc<Mutex<Storage>>) -> Option<Vec<u8>> {
    let Some(key) = args.next() else {
        return Some(b"ERROR\r\n".to_vec());
    };
    let noreply = args.next() == Some(b"noreply");

    let timer = Instant::now();
    let result = storage.lock().await.apply(Command::Delete { key: key.to_vec() });
    metrics::histogram!("kv_request_duration_seconds", "command" => "delete").record(timer.elapsed().as_secs_f64());

    let reply = match result {
        Ok(_) => b"DELETED\r\n".to_vec(),
        Err(memkv::Error::MissingKey) => b"NOT_FOUND\r\n".to_vec(),
        Err(_) => {
            metrics::counter!("kv_request_errors", "command" => "delete").increment(1);
            b"ERROR\r\n".to_vec()
        }
    };

    if noreply {
        None
    } else {
        Some(reply)
    }
}

/// Runs one of the introspection commands (`Dump`/`DumpLog`/`DumpCommit`).
/// These log their effect and never produce a wire reply.
async fn handle_dump(command: Command, storage: &Arc<Mutex<Storage>>) -> Option<Vec<u8>> {
    if let Err(err) = storage.lock().await.apply(command) {
        log::warn!("dump command failed: {err}");
    }
    None
}

fn parse_ascii<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_sep_strips_crlf() {
        assert_eq!(trim_sep(b"GET foo\r\n"), b"GET foo");
        assert_eq!(trim_sep(b"GET foo\n"), b"GET foo");
        assert_eq!(trim_sep(b"GET foo"), b"GET foo");
    }

    #[tokio::test]
    async fn read_line_recovering_returns_ordinary_lines() {
        let mut reader = BufReader::new(&b"GET foo\r\nGET bar\r\n"[..]);
        let mut out = Vec::new();
        let n = read_line_recovering(&mut reader, &mut out).await.unwrap();
        assert_eq!(n, out.len());
        assert_eq!(out, b"GET foo\r\n");
    }

    #[tokio::test]
    async fn read_line_recovering_discards_over_long_line_without_buffering_it() {
        let mut oversized = vec![b'a'; MAX_LINE + 1024];
        oversized.push(b'\n');
        oversized.extend_from_slice(b"GET foo\r\n");
        let mut reader = BufReader::new(&oversized[..]);

        let mut out = Vec::new();
        let n = read_line_recovering(&mut reader, &mut out).await.unwrap();

        assert_eq!(n, out.len());
        assert_eq!(out, b"GET foo\r\n");
    }

    #[tokio::test]
    async fn read_line_recovering_returns_zero_on_clean_eof() {
        let mut reader = BufReader::new(&b""[..]);
        let mut out = Vec::new();
        let n = read_line_recovering(&mut reader, &mut out).await.unwrap();
        assert_eq!(n, 0);
    }
}
