#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use radixdb::{Result, Transaction};
use tempfile::tempdir;

fn keys_of(txn: &Transaction, prefix: &[u8], reverse: bool) -> Result<Vec<Vec<u8>>> {
    let iter = if reverse {
        txn.backward(prefix)?
    } else {
        txn.forward(prefix)?
    };
    iter.map(|item| item.map(|(k, _)| k)).collect()
}

#[test]
fn thousand_random_keys_iterate_in_order() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);

    let mut model = BTreeMap::new();
    while model.len() < 1000 {
        let len = rng.gen_range(1..24);
        let key: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'h')).collect();
        let value = format!("v{}", model.len()).into_bytes();
        model.insert(key, value);
    }
    let mut order: Vec<_> = model.iter().collect();
    order.shuffle(&mut rng);
    for batch in order.chunks(100) {
        let mut txn = db.begin(false)?;
        for (key, value) in batch {
            txn.set(key, value)?;
        }
        txn.commit()?;
    }

    let doomed: Vec<Vec<u8>> = model.keys().step_by(7).cloned().collect();
    let mut txn = db.begin(false)?;
    for key in &doomed {
        txn.del(key)?;
        model.remove(key);
    }
    txn.commit()?;

    let txn = db.begin(true)?;
    let pairs = txn.forward(b"")?.collect::<Result<Vec<_>>>()?;
    let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(pairs, expected);
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));

    let mut backward = keys_of(&txn, b"", true)?;
    backward.reverse();
    let forward: Vec<_> = model.keys().cloned().collect();
    assert_eq!(backward, forward);

    for prefix in [&b"a"[..], b"bc", b"hhh"] {
        let want: Vec<_> = model
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        assert_eq!(keys_of(&txn, prefix, false)?, want);
        let mut rev = keys_of(&txn, prefix, true)?;
        rev.reverse();
        assert_eq!(rev, want);
    }
    Ok(())
}

#[test]
fn iteration_merges_the_write_set() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    for key in ["a", "c", "e", "g"] {
        db.set(key.as_bytes(), b"stored")?;
    }

    let mut txn = db.begin(false)?;
    txn.set(b"b", b"buffered")?;
    txn.set(b"e", b"replaced")?;
    txn.del(b"g")?;
    txn.set(b"h", b"buffered")?;

    let forward = txn.forward(b"")?.collect::<Result<Vec<_>>>()?;
    let expected: Vec<(Vec<u8>, Vec<u8>)> = [
        ("a", "stored"),
        ("b", "buffered"),
        ("c", "stored"),
        ("e", "replaced"),
        ("h", "buffered"),
    ]
    .iter()
    .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
    .collect();
    assert_eq!(forward, expected);

    let mut backward = txn.backward(b"")?.collect::<Result<Vec<_>>>()?;
    backward.reverse();
    assert_eq!(backward, expected);
    txn.rollback()?;
    Ok(())
}

#[test]
fn iteration_sees_newest_visible_version_only() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let db = common::open(dir.path())?;
    db.set(b"k", b"1")?;
    let old = db.begin(true)?;
    db.set(b"k", b"2")?;
    db.set(b"k", b"3")?;
    db.set(b"other", b"o")?;

    let new = db.begin(true)?;
    let now = new.forward(b"")?.collect::<Result<Vec<_>>>()?;
    assert_eq!(
        now,
        vec![
            (b"k".to_vec(), b"3".to_vec()),
            (b"other".to_vec(), b"o".to_vec())
        ]
    );
    let then = old.backward(b"")?.collect::<Result<Vec<_>>>()?;
    assert_eq!(then, vec![(b"k".to_vec(), b"1".to_vec())]);
    Ok(())
}
