#![allow(missing_docs)]

mod common;

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use proptest::prelude::*;
use radixdb::{
    primitives::{cache::PageCache, disk::Disk, evict::EvictionOptions, locks::LockTable},
    storage::trie::{Trie, Unlogged},
    types::value,
    RadixError,
};
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Set(Vec<u8>, u64),
    Del(Vec<u8>),
}

fn arb_key() -> impl Strategy<Value = Vec<u8>> {
    // Few distinct bytes so keys share long prefixes and leaves split.
    prop::collection::vec(prop::sample::select(vec![0x01u8, b'a', b'b', 0xFE]), 1..48)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (arb_key(), value::FIRST_OFFSET..1u64 << 48).prop_map(|(k, v)| Op::Set(k, v)),
        1 => arb_key().prop_map(Op::Del),
    ]
}

fn open(dir: &Path) -> Trie {
    common::init_tracing();
    let options = EvictionOptions {
        hot_capacity: 256,
        cold_capacity: 16,
        collect_every: 64,
        interval: Duration::from_secs(3600),
    };
    let disk = Arc::new(Disk::open(dir.join("IDX")).unwrap());
    let cache = Arc::new(PageCache::new(disk, options).unwrap());
    let locks = Arc::new(LockTable::new(options).unwrap());
    Trie::new(cache, locks)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn trie_matches_ordered_map(ops in prop::collection::vec(arb_op(), 1..400)) {
        let dir = tempdir().unwrap();
        let trie = open(dir.path());
        let mut model = BTreeMap::new();

        for op in &ops {
            match op {
                Op::Set(k, v) => {
                    trie.set(k, *v, &Unlogged).unwrap();
                    model.insert(k.clone(), *v);
                }
                Op::Del(k) => {
                    trie.del(k, &Unlogged).unwrap();
                    model.remove(k);
                }
            }
        }

        for op in &ops {
            let (Op::Set(k, _) | Op::Del(k)) = op;
            match model.get(k) {
                Some(v) => prop_assert_eq!(trie.get(k).unwrap(), *v),
                None => prop_assert!(matches!(trie.get(k), Err(RadixError::NotExist))),
            }
        }

        let forward: Vec<_> = trie.forward(b"").unwrap().map(|i| i.unwrap()).collect();
        let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(&forward, &expected);

        let mut backward: Vec<_> = trie.backward(b"").unwrap().map(|i| i.unwrap()).collect();
        backward.reverse();
        prop_assert_eq!(&backward, &expected);

        let prefix = [b'a', b'b'];
        let scoped: Vec<_> = trie.forward(&prefix).unwrap().map(|i| i.unwrap().0).collect();
        let want: Vec<_> = model.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        prop_assert_eq!(scoped, want);
    }

    #[test]
    fn contents_survive_cache_eviction_and_reopen(
        entries in prop::collection::btree_map(arb_key(), value::FIRST_OFFSET..1u64 << 48, 1..300)
    ) {
        let dir = tempdir().unwrap();
        {
            let trie = open(dir.path());
            for (k, v) in &entries {
                trie.set(k, *v, &Unlogged).unwrap();
            }
        }
        let trie = open(dir.path());
        for (k, v) in &entries {
            prop_assert_eq!(trie.get(k).unwrap(), *v);
        }
    }
}
