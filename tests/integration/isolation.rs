#![allow(missing_docs)]

mod common;

use std::{sync::Arc, thread};

use radixdb::{RadixError, Result};
use tempfile::tempdir;

#[test]
fn snapshot_ignores_later_commits() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"k", b"v1")?;

    let reader = db.begin(true)?;
    db.set(b"k", b"v2")?;
    db.set(b"new", b"x")?;

    assert_eq!(reader.get(b"k")?, b"v1");
    assert!(matches!(reader.get(b"new"), Err(RadixError::NotExist)));
    let keys: Vec<Vec<u8>> = reader
        .forward(b"")?
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(keys, vec![b"k".to_vec()]);
    reader.rollback()?;

    assert_eq!(db.get(b"k")?, b"v2");
    Ok(())
}

#[test]
fn read_then_overwritten_key_conflicts() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"k", b"0")?;

    let mut t1 = db.begin(false)?;
    assert_eq!(t1.get(b"k")?, b"0");

    let mut t2 = db.begin(false)?;
    t2.set(b"k", b"t2")?;
    t2.commit()?;
    assert!(t1.read_ts() < db.begin(true)?.read_ts());

    t1.set(b"k", b"t1")?;
    assert!(matches!(t1.commit(), Err(RadixError::TransactionConflict)));
    assert_eq!(db.get(b"k")?, b"t2");
    Ok(())
}

#[test]
fn reading_a_missing_key_conflicts_with_its_creation() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;

    let mut t1 = db.begin(false)?;
    assert!(matches!(t1.get(b"slot"), Err(RadixError::NotExist)));
    db.set(b"slot", b"taken")?;

    t1.set(b"slot", b"mine")?;
    assert!(matches!(t1.commit(), Err(RadixError::TransactionConflict)));
    Ok(())
}

#[test]
fn blind_writes_do_not_conflict() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let mut t1 = db.begin(false)?;
    let mut t2 = db.begin(false)?;
    t1.set(b"k", b"one")?;
    t2.set(b"k", b"two")?;
    t1.commit()?;
    t2.commit()?;
    assert_eq!(db.get(b"k")?, b"two");
    Ok(())
}

#[test]
fn scanned_keys_join_the_read_set() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"acct/a", b"10")?;
    db.set(b"acct/b", b"20")?;

    let mut t1 = db.begin(false)?;
    let seen = t1.forward(b"acct/")?.count();
    assert_eq!(seen, 2);
    db.set(b"acct/b", b"0")?;

    t1.set(b"total", b"30")?;
    assert!(matches!(t1.commit(), Err(RadixError::TransactionConflict)));
    Ok(())
}

#[test]
fn disjoint_readers_and_writers_commit() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"x", b"1")?;
    db.set(b"y", b"1")?;

    let mut t1 = db.begin(false)?;
    let mut t2 = db.begin(false)?;
    t1.get(b"x")?;
    t2.get(b"y")?;
    t1.set(b"x", b"2")?;
    t2.set(b"y", b"2")?;
    t1.commit()?;
    t2.commit()?;
    assert_eq!(db.get(b"x")?, b"2");
    assert_eq!(db.get(b"y")?, b"2");
    Ok(())
}

#[test]
fn concurrent_increments_are_serialisable() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = Arc::new(common::open(dir.path())?);
    db.set(b"counter", &0u64.to_le_bytes())?;

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<usize> {
                let mut retries = 0;
                for _ in 0..25 {
                    loop {
                        let mut txn = db.begin(false)?;
                        let raw = txn.get(b"counter")?;
                        let mut word = [0u8; 8];
                        word.copy_from_slice(&raw);
                        let next = u64::from_le_bytes(word) + 1;
                        txn.set(b"counter", &next.to_le_bytes())?;
                        match txn.commit() {
                            Ok(()) => break,
                            Err(RadixError::TransactionConflict) => retries += 1,
                            Err(err) => return Err(err),
                        }
                    }
                }
                Ok(retries)
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let raw = db.get(b"counter")?;
    let mut word = [0u8; 8];
    word.copy_from_slice(&raw);
    assert_eq!(u64::from_le_bytes(word), 100);
    Ok(())
}

#[test]
fn concurrent_writers_on_shared_prefixes() -> Result<()> {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 400;
    let dir = tempdir().expect("tmpdir");
    let db = Arc::new(common::open(dir.path())?);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || -> Result<()> {
                for n in 0..PER_THREAD {
                    // Interleaved keys so every thread splits the same leaves.
                    let key = format!("/shared/prefix/{:04}/{t}", n);
                    db.set(key.as_bytes(), format!("{t}:{n}").as_bytes())?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread")?;
    }

    for t in 0..THREADS {
        for n in 0..PER_THREAD {
            let key = format!("/shared/prefix/{:04}/{t}", n);
            assert_eq!(db.get(key.as_bytes())?, format!("{t}:{n}").into_bytes());
        }
    }
    let pairs = common::dump(&db)?;
    assert_eq!(pairs.len(), THREADS * PER_THREAD);
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
    Ok(())
}
