#![allow(missing_docs)]

mod common;

use radixdb::{
    types::{MAX_KEY_SIZE, MAX_VALUE_SIZE},
    RadixError, Result,
};
use tempfile::tempdir;

#[test]
fn set_then_get_in_later_transaction() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;

    let mut txn = db.begin(false)?;
    txn.set(b"alpha", b"1")?;
    txn.set(b"beta", b"2")?;
    txn.commit()?;

    let txn = db.begin(true)?;
    assert_eq!(txn.get(b"alpha")?, b"1");
    assert_eq!(txn.get(b"beta")?, b"2");
    assert!(matches!(txn.get(b"gamma"), Err(RadixError::NotExist)));
    Ok(())
}

#[test]
fn delete_then_rewrite_is_visible_again() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"k", b"first")?;
    db.del(b"k")?;
    assert!(matches!(db.get(b"k"), Err(RadixError::NotExist)));
    db.set(b"k", b"third")?;
    assert_eq!(db.get(b"k")?, b"third");
    Ok(())
}

#[test]
fn empty_values_are_not_deletes() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let db = common::open(dir.path())?;
        db.set(b"blank", b"")?;
        assert_eq!(db.get(b"blank")?, b"");
    }
    let db = common::open(dir.path())?;
    assert_eq!(db.get(b"blank")?, b"");
    Ok(())
}

#[test]
fn size_limits_are_enforced() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let mut txn = db.begin(false)?;

    assert!(matches!(txn.set(b"", b"v"), Err(RadixError::KeyIsEmpty)));
    let long_key = vec![b'k'; MAX_KEY_SIZE + 1];
    assert!(matches!(txn.set(&long_key, b"v"), Err(RadixError::KeyTooLong)));
    let long_value = vec![0u8; MAX_VALUE_SIZE + 1];
    assert!(matches!(txn.set(b"k", &long_value), Err(RadixError::ValTooLong)));

    let widest_key = vec![b'k'; MAX_KEY_SIZE];
    let widest_value = vec![7u8; MAX_VALUE_SIZE];
    txn.set(&widest_key, &widest_value)?;
    txn.commit()?;
    assert_eq!(db.get(&widest_key)?, widest_value);
    Ok(())
}

#[test]
fn oversized_transaction_is_out_of_space() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    // Small configs cap a transaction at one 1 MiB log file.
    let db = common::open(dir.path())?;
    let mut txn = db.begin(false)?;
    let value = vec![1u8; MAX_VALUE_SIZE];
    let mut failed = None;
    for n in 0..32u32 {
        if let Err(err) = txn.set(format!("big{n}").as_bytes(), &value) {
            failed = Some((n, err));
            break;
        }
    }
    let (at, err) = failed.expect("limit reached");
    assert!(matches!(err, RadixError::OutOfSpace));
    assert!(at > 10);

    // Replacing an entry does not count twice.
    txn.set(b"big0", b"small")?;
    txn.set(format!("big{at}").as_bytes(), &value)?;
    txn.commit()?;
    assert_eq!(db.get(b"big0")?, b"small");
    Ok(())
}

#[test]
fn read_only_transactions_reject_writes() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let mut txn = db.begin(true)?;
    assert!(txn.is_read_only());
    assert!(matches!(
        txn.set(b"k", b"v"),
        Err(RadixError::ReadOnlyTransaction)
    ));
    assert!(matches!(txn.del(b"k"), Err(RadixError::ReadOnlyTransaction)));
    txn.commit()?;
    Ok(())
}

#[test]
fn write_set_is_visible_to_its_transaction_only() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"shared", b"old")?;

    let mut txn = db.begin(false)?;
    txn.set(b"shared", b"new")?;
    txn.set(b"mine", b"x")?;
    txn.del(b"gone")?;
    assert_eq!(txn.get(b"shared")?, b"new");
    assert_eq!(txn.get(b"mine")?, b"x");
    assert!(matches!(txn.get(b"gone"), Err(RadixError::NotExist)));
    assert_eq!(db.get(b"shared")?, b"old");
    assert!(matches!(db.get(b"mine"), Err(RadixError::NotExist)));

    txn.rollback()?;
    assert_eq!(db.get(b"shared")?, b"old");
    assert!(matches!(db.get(b"mine"), Err(RadixError::NotExist)));
    Ok(())
}

#[test]
fn dropped_transaction_rolls_back() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    {
        let mut txn = db.begin(false)?;
        txn.set(b"ghost", b"boo")?;
    }
    assert!(matches!(db.get(b"ghost"), Err(RadixError::NotExist)));
    db.set(b"ghost", b"real")?;
    assert_eq!(db.get(b"ghost")?, b"real");
    Ok(())
}

#[test]
fn hundred_keys_survive_restart() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let db = common::open(dir.path())?;
        let mut txn = db.begin(false)?;
        for n in 0..100 {
            txn.set(format!("/u/b/u_{n}").as_bytes(), n.to_string().as_bytes())?;
        }
        txn.commit()?;
        db.close()?;
    }

    let db = common::open(dir.path())?;
    for n in 0..100 {
        assert_eq!(
            db.get(format!("/u/b/u_{n}").as_bytes())?,
            n.to_string().as_bytes()
        );
    }

    let mut expected: Vec<Vec<u8>> = (0..100)
        .map(|n| format!("/u/b/u_{n}").into_bytes())
        .collect();
    expected.sort();

    let txn = db.begin(true)?;
    let forward: Vec<Vec<u8>> = txn
        .forward(b"")?
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    assert_eq!(forward, expected);

    let backward: Vec<Vec<u8>> = txn
        .backward(b"")?
        .map(|item| item.map(|(k, _)| k))
        .collect::<Result<_>>()?;
    expected.reverse();
    assert_eq!(backward, expected);
    Ok(())
}

#[test]
fn shared_prefix_keys_survive_leaf_splits() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let before = db.stats()?.blocks;
    let value = vec![0xAB; 64];
    for chunk in 0..8 {
        let mut txn = db.begin(false)?;
        for n in 0..250 {
            let key = format!("/common/prefix/{:05}", chunk * 250 + n);
            txn.set(key.as_bytes(), &value)?;
        }
        txn.commit()?;
    }
    assert!(db.stats()?.blocks > before + 2, "leaves were split");
    for n in 0..2000 {
        let key = format!("/common/prefix/{n:05}");
        assert_eq!(db.get(key.as_bytes())?, value, "{key}");
    }
    Ok(())
}

#[test]
fn versions_of_a_widest_key_stay_readable() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let before = db.stats()?.blocks;
    let key = vec![b'w'; MAX_KEY_SIZE];

    let first = db.begin(true)?;
    db.set(&key, b"v1")?;
    let second = db.begin(true)?;
    db.set(&key, b"v2")?;
    db.set(&key, b"v3")?;

    assert!(matches!(first.get(&key), Err(RadixError::NotExist)));
    assert_eq!(second.get(&key)?, b"v1");
    assert_eq!(db.get(&key)?, b"v3");
    assert_eq!(common::dump(&db)?, vec![(key.clone(), b"v3".to_vec())]);

    // Shared version bytes promote once per byte, two pages each.
    let grown = db.stats()?.blocks - before;
    assert!(grown > 2);
    assert!(grown <= 2 * (MAX_KEY_SIZE as u64 + 8) + 16);
    drop(first);
    drop(second);

    db.close()?;
    let db = common::open(dir.path())?;
    assert_eq!(db.get(&key)?, b"v3");
    Ok(())
}
