use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memkv::{Command, Storage};
use tempfile::NamedTempFile;

fn open_store() -> (Storage, NamedTempFile, NamedTempFile) {
    let db = NamedTempFile::new().unwrap();
    let log = NamedTempFile::new().unwrap();
    let store = Storage::open(db.path(), log.path()).unwrap();
    (store, db, log)
}

fn bench_apply_set(c: &mut Criterion) {
    let (mut store, _db, _log) = open_store();
    let mut i: u64 = 0;
    c.bench_function("apply set", |b| {
        b.iter(|| {
            i += 1;
            let key = format!("key-{i}").into_bytes();
            store
                .apply(Command::Set {
                    key: black_box(key),
                    flags: 0,
                    exptime: 0,
                    data: black_box(b"value".to_vec()),
                })
                .unwrap();
        })
    });
}

fn bench_flush(c: &mut Criterion) {
    let (mut store, _db, _log) = open_store();
    c.bench_function("flush 100 keys", |b| {
        b.iter(|| {
            for i in 0..100u32 {
                store
                    .apply(Command::Set {
                        key: format!("key-{i}").into_bytes(),
                        flags: 0,
                        exptime: 0,
                        data: b"value".to_vec(),
                    })
                    .unwrap();
            }
            store.flush().unwrap();
        })
    });
}

criterion_group!(benches, bench_apply_set, bench_flush);
criterion_main!(benches);
