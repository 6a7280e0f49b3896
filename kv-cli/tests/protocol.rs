use std::sync::Arc;

use memkv::Storage;
use memkv_cli::server::protocol::handle_connection;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

async fn spawn_server() -> std::net::SocketAddr {
    let db = NamedTempFile::new().unwrap();
    let log = NamedTempFile::new().unwrap();
    // Deliberately leaked: the temp files must outlive the server task.
    let db_path = Box::leak(Box::new(db));
    let log_path = Box::leak(Box::new(log));

    let storage = Storage::open(db_path.path(), log_path.path()).unwrap();
    let storage = Arc::new(Mutex::new(storage));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let storage = storage.clone();
            tokio::spawn(handle_connection(socket, storage));
        }
    });

    addr
}

#[tokio::test]
async fn set_get_delete_round_trip() {
    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"SET foo 0 0 3\r\nbar\r\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "STORED\r\n");

    write_half.write_all(b"GET foo\r\n").await.unwrap();
    let mut value_line = String::new();
    reader.read_line(&mut value_line).await.unwrap();
    assert_eq!(value_line, "VALUE foo 0 3\r\n");
    let mut data_line = String::new();
    reader.read_line(&mut data_line).await.unwrap();
    assert_eq!(data_line, "bar\r\n");
    let mut end_line = String::new();
    reader.read_line(&mut end_line).await.unwrap();
    assert_eq!(end_line, "END\r\n");

    write_half.write_all(b"DELETE foo\r\n").await.unwrap();
    let mut delete_line = String::new();
    reader.read_line(&mut delete_line).await.unwrap();
    assert_eq!(delete_line, "DELETED\r\n");

    write_half.write_all(b"DELETE foo\r\n").await.unwrap();
    let mut not_found_line = String::new();
    reader.read_line(&mut not_found_line).await.unwrap();
    assert_eq!(not_found_line, "NOT_FOUND\r\n");
}

#[tokio::test]
async fn unknown_verb_replies_error() {
    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"BOGUS\r\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "ERROR\r\n");
}

#[tokio::test]
async fn noreply_set_produces_no_response() {
    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"SET foo 0 0 3 noreply\r\nbar\r\n").await.unwrap();
    write_half.write_all(b"GET foo\r\n").await.unwrap();

    let mut value_line = String::new();
    reader.read_line(&mut value_line).await.unwrap();
    assert_eq!(value_line, "VALUE foo 0 3\r\n");
}

#[tokio::test]
async fn delete_with_no_key_replies_error_instead_of_hanging() {
    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"DELETE\r\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "ERROR\r\n");

    // The connection must still be usable afterwards.
    write_half.write_all(b"SET foo 0 0 3\r\nbar\r\n").await.unwrap();
    let mut stored_line = String::new();
    reader.read_line(&mut stored_line).await.unwrap();
    assert_eq!(stored_line, "STORED\r\n");
}

#[tokio::test]
async fn dump_verbs_produce_no_reply_but_keep_the_connection_open() {
    let addr = spawn_server().await;
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"SET foo 0 0 3\r\nbar\r\n").await.unwrap();
    let mut stored_line = String::new();
    reader.read_line(&mut stored_line).await.unwrap();
    assert_eq!(stored_line, "STORED\r\n");

    write_half.write_all(b"dump\r\n").await.unwrap();
    write_half.write_all(b"dump_log\r\n").await.unwrap();
    write_half.write_all(b"dump_commit\r\n").await.unwrap();
    // None of the three produce a reply; the connection must still be
    // usable for a normal command afterwards.
    write_half.write_all(b"GET foo\r\n").await.unwrap();

    let mut value_line = String::new();
    reader.read_line(&mut value_line).await.unwrap();
    assert_eq!(value_line, "VALUE foo 0 3\r\n");
}
