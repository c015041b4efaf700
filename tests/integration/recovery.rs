#![allow(missing_docs)]

mod common;

use std::path::Path;

use radixdb::{
    primitives::wal::{Record, Wal, WriteEntry},
    storage::blob::BlobStore,
    Config, RadixError, Result, Timestamp,
};
use tempfile::tempdir;

fn write(key: &str, value: Option<&str>) -> WriteEntry {
    WriteEntry {
        key: key.as_bytes().to_vec(),
        value: value.map(|v| v.as_bytes().to_vec()),
    }
}

/// Logs a transaction the way a commit does, optionally stopping before its
/// commit record.
fn log_transaction(
    wal: &Wal,
    blobs: &BlobStore,
    ts: Timestamp,
    writes: Vec<WriteEntry>,
    committed: bool,
) -> Result<()> {
    let offsets = writes
        .iter()
        .filter_map(|w| w.value.as_ref().filter(|v| !v.is_empty()))
        .map(|v| blobs.alloc(v.len()))
        .collect::<Result<Vec<_>>>()?;
    wal.append(&Record::StartTransaction { ts, writes })?;
    wal.append(&Record::WriteData { ts, offsets })?;
    if committed {
        wal.append(&Record::CommitTransaction { ts })?;
    }
    Ok(())
}

/// Builds a data directory whose log holds committed and unfinished
/// transactions that were never applied, around a checkpoint.
fn crashed_state(dir: &Path) -> Result<Timestamp> {
    let ts = {
        let db = common::open(dir)?;
        db.set(b"base", b"durable")?;
        db.set(b"shadowed", b"before")?;
        let ts = db.begin(true)?.read_ts();
        db.close()?;
        ts
    };

    let wal = Wal::open(dir, Config::small(dir).wal_file_size)?;
    let blobs = BlobStore::open(dir)?;
    wal.append(&Record::StartCheckpoint { ts, open: vec![] })?;
    wal.append(&Record::EndCheckpoint)?;
    log_transaction(
        &wal,
        &blobs,
        ts + 1,
        vec![write("c1/a", Some("one")), write("c1/empty", Some(""))],
        true,
    )?;
    log_transaction(&wal, &blobs, ts + 2, vec![write("a1/x", Some("lost"))], false)?;
    log_transaction(
        &wal,
        &blobs,
        ts + 3,
        vec![write("base", None), write("shadowed", Some("after"))],
        true,
    )?;
    // A checkpoint that never finished anchors nothing.
    wal.append(&Record::StartCheckpoint {
        ts: ts + 3,
        open: vec![ts + 4],
    })?;
    log_transaction(&wal, &blobs, ts + 4, vec![write("a2/y", Some("lost"))], false)?;
    Ok(ts + 4)
}

fn check_recovered(dir: &Path, last: Timestamp) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let db = common::open(dir)?;
    assert_eq!(db.get(b"c1/a")?, b"one");
    assert_eq!(db.get(b"c1/empty")?, b"");
    assert_eq!(db.get(b"shadowed")?, b"after");
    assert!(matches!(db.get(b"base"), Err(RadixError::NotExist)));
    assert!(matches!(db.get(b"a1/x"), Err(RadixError::NotExist)));
    assert!(matches!(db.get(b"a2/y"), Err(RadixError::NotExist)));
    assert!(db.begin(true)?.read_ts() >= last);

    // New commits land above every logged timestamp.
    db.set(b"after/restart", b"ok")?;
    assert_eq!(db.get(b"after/restart")?, b"ok");
    let pairs = common::dump(&db)?;
    db.close()?;
    Ok(pairs)
}

#[test]
fn replay_redoes_committed_and_voids_unfinished() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let last = crashed_state(dir.path())?;
    check_recovered(dir.path(), last)?;
    Ok(())
}

#[test]
fn replaying_copies_of_one_crash_agrees() -> Result<()> {
    let root = tempdir().expect("tmpdir");
    let original = root.path().join("original");
    let last = crashed_state(&original)?;
    let first = root.path().join("first");
    let second = root.path().join("second");
    common::copy_dir(&original, &first)?;
    common::copy_dir(&original, &second)?;

    let a = check_recovered(&first, last)?;
    let b = check_recovered(&second, last)?;
    assert_eq!(a, b);

    // A second replay of an already recovered directory changes nothing.
    let db = common::open(&first)?;
    assert_eq!(common::dump(&db)?, a);
    Ok(())
}

#[test]
fn checkpoints_truncate_the_log_and_keep_data() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let db = common::open(dir.path())?;
        // Small configs checkpoint every 256 commits.
        for n in 0..1200u32 {
            db.set(format!("key/{n:05}").as_bytes(), &n.to_be_bytes())?;
        }
        assert!(db.stats()?.wal_files <= 3);
    }
    let db = common::open(dir.path())?;
    for n in (0..1200u32).step_by(37) {
        assert_eq!(db.get(format!("key/{n:05}").as_bytes())?, n.to_be_bytes());
    }
    assert_eq!(db.stats()?.wal_files, 1);
    Ok(())
}

#[test]
fn torn_tail_is_the_end_of_the_log() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let db = common::open(dir.path())?;
        db.set(b"kept", b"yes")?;
        db.set(b"last", b"maybe")?;
        assert_eq!(db.stats()?.wal_files, 1);
        db.close()?;
    }
    let path = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|p| p.extension().is_some_and(|ext| ext == "LOG"))
        .expect("a log file");
    let mut bytes = std::fs::read(&path)?;
    let end = bytes.iter().rposition(|&b| b != 0).expect("records");
    // Flip a payload byte of the final record.
    bytes[end] ^= 0xFF;
    std::fs::write(&path, &bytes)?;

    let db = common::open(dir.path())?;
    assert!(db.recovered().torn);
    assert_eq!(db.get(b"kept")?, b"yes");
    Ok(())
}
