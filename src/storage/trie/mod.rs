//! 256-ary radix trie over cached pages.
//!
//! Every prefix page routes the next key byte through its dispatch table.
//! A key whose remaining suffix is a single byte lives in the page's
//! direct-value table. Longer suffixes live in leaf pages, which may be
//! shared by a contiguous run of branch bytes (`Mixed`) until a split gives
//! a byte its own leaf (`Suffix`), and a full single-byte leaf is promoted to
//! a new prefix page.
//!
//! Locking: the branch `(page, byte)` lock covers that slot and its direct
//! value. `Mixed` and `Empty` slots of a page are covered by the lock of the
//! branch that leads into the page, so descent keeps the parent lock when
//! the next slot is one of those.

mod iter;
mod leaf;
mod node;
mod split;

use std::sync::Arc;

pub use iter::{Direction, TrieIter};
use leaf::LeafImage;
use node::{leaf_span, set_leaf_range, PrefixPage};

use crate::{
    primitives::{
        cache::{Page, PageCache},
        locks::{BranchGuard, LockTable},
        wal::{Record, Wal},
    },
    types::{value, Branch, PageId, RadixError, Result, TreeChange},
};

/// Sink for structural change records, called before the parent page of a
/// change is written.
pub trait TreeLog {
    /// Makes `change` durable.
    fn record(&self, change: TreeChange) -> Result<()>;
}

/// [`TreeLog`] that drops every record.
pub struct Unlogged;

impl TreeLog for Unlogged {
    fn record(&self, _change: TreeChange) -> Result<()> {
        Ok(())
    }
}

impl TreeLog for Wal {
    fn record(&self, change: TreeChange) -> Result<()> {
        self.append(&Record::Tree(change))
    }
}

enum Target {
    Direct,
    Leaf(PageId),
    Vacant,
}

struct Descent {
    _guard: BranchGuard,
    /// Page owning the slot `key[depth]`.
    page: Page,
    depth: usize,
    target: Target,
}

/// The index.
pub struct Trie {
    cache: Arc<PageCache>,
    locks: Arc<LockTable>,
}

pub(crate) fn write_leaf(page: &Page, image: &LeafImage) -> Result<()> {
    image.encode(&mut page.write());
    page.sync()
}

impl Trie {
    /// Builds the trie over an already formatted page cache.
    pub fn new(cache: Arc<PageCache>, locks: Arc<LockTable>) -> Self {
        Self { cache, locks }
    }

    fn lock(&self, page: PageId, byte: u8, exclusive: bool) -> Result<BranchGuard> {
        if exclusive {
            self.locks.write(page, byte)
        } else {
            self.locks.read(page, byte)
        }
    }

    fn descend(&self, key: &[u8], exclusive: bool) -> Result<Descent> {
        if key.is_empty() {
            return Err(RadixError::KeyIsEmpty);
        }
        let mut depth = 0;
        let mut guard = self.lock(PageId::ROOT, key[0], exclusive)?;
        let mut page = self.cache.get(PageId::ROOT)?;
        loop {
            if key.len() - depth == 1 {
                return Ok(Descent {
                    _guard: guard,
                    page,
                    depth,
                    target: Target::Direct,
                });
            }
            let target = match page.branch(key[depth])? {
                Branch::Prefix(child) => {
                    if child == PageId::ROOT {
                        return Err(RadixError::UnknownError("dispatch slot points at root"));
                    }
                    depth += 1;
                    let child_page = self.cache.get(child)?;
                    if key.len() - depth > 1 {
                        let shared = match child_page.branch(key[depth])? {
                            Branch::Mixed(leaf) => Some(Target::Leaf(leaf)),
                            Branch::Empty => Some(Target::Vacant),
                            _ => None,
                        };
                        if let Some(target) = shared {
                            return Ok(Descent {
                                _guard: guard,
                                page: child_page,
                                depth,
                                target,
                            });
                        }
                    }
                    drop(guard);
                    guard = self.lock(child, key[depth], exclusive)?;
                    page = child_page;
                    continue;
                }
                Branch::Suffix(leaf) | Branch::Mixed(leaf) => Target::Leaf(leaf),
                Branch::Empty => Target::Vacant,
            };
            return Ok(Descent {
                _guard: guard,
                page,
                depth,
                target,
            });
        }
    }

    /// Value stored under `key`. [`value::CANCEL`] reads as absent.
    pub fn get(&self, key: &[u8]) -> Result<u64> {
        let descent = self.descend(key, false)?;
        let found = match descent.target {
            Target::Direct => Some(descent.page.direct(key[descent.depth])),
            Target::Leaf(leaf) => {
                let leaf = self.cache.get(leaf)?;
                let buf = leaf.read();
                LeafImage::lookup(&buf, &key[descent.depth..])?
            }
            Target::Vacant => None,
        };
        match found {
            Some(v) if v != value::CANCEL => Ok(v),
            _ => Err(RadixError::NotExist),
        }
    }

    /// Stores `value` under `key`, logging structural changes to `log`.
    pub fn set(&self, key: &[u8], value: u64, log: &dyn TreeLog) -> Result<()> {
        let descent = self.descend(key, true)?;
        let suffix = &key[descent.depth..];
        match descent.target {
            Target::Direct => {
                descent.page.set_direct(suffix[0], value);
                descent.page.sync()
            }
            Target::Leaf(leaf) => self.insert_leaf(&descent.page, leaf, suffix, value, log),
            Target::Vacant => self.create_leaf(&descent.page, suffix, value, log),
        }
    }

    /// Clears `key` by storing [`value::CANCEL`].
    pub fn del(&self, key: &[u8], log: &dyn TreeLog) -> Result<()> {
        self.set(key, value::CANCEL, log)
    }

    /// Ascending iterator over keys starting with `prefix`.
    pub fn forward(&self, prefix: &[u8]) -> Result<TrieIter> {
        TrieIter::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.locks),
            prefix,
            Direction::Forward,
        )
    }

    /// Descending iterator over keys starting with `prefix`.
    pub fn backward(&self, prefix: &[u8]) -> Result<TrieIter> {
        TrieIter::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.locks),
            prefix,
            Direction::Backward,
        )
    }

    /// Re-applies a logged structural change. Used by recovery before any
    /// other access, so it takes no branch locks.
    pub fn apply(&self, change: &TreeChange) -> Result<()> {
        match change {
            TreeChange::NewSuffix {
                page,
                start,
                end,
                value,
            } => {
                let parent = self.cache.get(*page)?;
                let slots: Vec<_> = (*start..=*end).map(|b| (b, *value)).collect();
                parent.set_slots(&slots);
                if let Some(leaf) = Branch::decode(*value)?.leaf() {
                    self.repair_leaf(leaf, *start, *end)?;
                }
                parent.sync()
            }
            TreeChange::ChangePrefix { page, slots } => {
                let parent = self.cache.get(*page)?;
                parent.set_slots(slots);
                self.repair_leaves(&parent.dispatch(), slots.iter().map(|&(_, w)| w))?;
                parent.sync()
            }
            TreeChange::NewPrefix {
                parent,
                child,
                branch,
                dispatch,
                direct,
            } => {
                let child_page = self.cache.get(*child)?;
                let slots: Vec<_> = dispatch
                    .iter()
                    .enumerate()
                    .map(|(b, &w)| (b as u8, w))
                    .collect();
                child_page.set_slots(&slots);
                for &(b, v) in direct {
                    child_page.set_direct(b, v);
                }
                self.repair_leaves(dispatch, dispatch.iter().copied())?;
                child_page.sync()?;
                let parent_page = self.cache.get(*parent)?;
                parent_page.set_slots(&[(*branch, Branch::Prefix(*child).encode())]);
                parent_page.sync()
            }
        }
    }

    fn repair_leaves(&self, dispatch: &[u64], words: impl Iterator<Item = u64>) -> Result<()> {
        let mut leaves: Vec<PageId> = words
            .filter_map(|w| Branch::decode(w).ok().and_then(Branch::leaf))
            .collect();
        leaves.sort_unstable();
        leaves.dedup();
        for leaf in leaves {
            if let Some((start, end)) = leaf_span(dispatch, leaf) {
                self.repair_leaf(leaf, start, end)?;
            }
        }
        Ok(())
    }

    fn repair_leaf(&self, leaf: PageId, start: u8, end: u8) -> Result<()> {
        let page = self.cache.get(leaf)?;
        set_leaf_range(&page, start, end);
        page.sync()
    }
}
