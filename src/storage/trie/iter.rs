//! Ordered traversal of the trie.
//!
//! The iterator is a stack machine. Prefix frames walk a dispatch table one
//! branch byte at a time, leaf frames replay a snapshot of a leaf, and hold
//! frames keep the read lock of the branch leading into a prefix page until
//! the walk of that page is over.

use std::{collections::VecDeque, sync::Arc};

use super::{
    leaf::{LeafEntry, LeafImage},
    node::PrefixPage,
};
use crate::{
    primitives::{
        cache::{Page, PageCache},
        locks::{BranchGuard, LockTable},
    },
    types::{value, Branch, PageId, Result},
};

/// Traversal order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys.
    Forward,
    /// Descending keys.
    Backward,
}

enum Frame {
    Prefix {
        page: Page,
        path: Vec<u8>,
        next: i32,
        lo: i32,
        hi: i32,
    },
    Hold {
        _guard: BranchGuard,
    },
    Leaf {
        path: Vec<u8>,
        entries: VecDeque<LeafEntry>,
    },
    Direct {
        key: Vec<u8>,
        value: u64,
    },
}

/// Frames produced by visiting one branch byte, in push order, plus the
/// cursor position a shared leaf moves the parent frame to.
struct Visit {
    frames: Vec<Frame>,
    resume: Option<i32>,
}

/// Iterator over `(key, value)` pairs stored in the trie.
pub struct TrieIter {
    cache: Arc<PageCache>,
    locks: Arc<LockTable>,
    prefix: Vec<u8>,
    direction: Direction,
    stack: Vec<Frame>,
}

impl TrieIter {
    pub(super) fn new(
        cache: Arc<PageCache>,
        locks: Arc<LockTable>,
        prefix: &[u8],
        direction: Direction,
    ) -> Result<Self> {
        let root = cache.get(PageId::ROOT)?;
        let mut iter = Self {
            cache,
            locks,
            prefix: prefix.to_vec(),
            direction,
            stack: Vec::new(),
        };
        let frame = iter.prefix_frame(root, Vec::new());
        iter.stack.push(frame);
        Ok(iter)
    }

    fn prefix_frame(&self, page: Page, path: Vec<u8>) -> Frame {
        let (lo, hi) = match self.prefix.get(path.len()) {
            Some(&b) => (i32::from(b), i32::from(b)),
            None => (0, 255),
        };
        let next = match self.direction {
            Direction::Forward => lo,
            Direction::Backward => hi,
        };
        Frame::Prefix {
            page,
            path,
            next,
            lo,
            hi,
        }
    }

    fn matches(&self, path: &[u8], suffix: &[u8]) -> bool {
        let mut key = path.iter().chain(suffix);
        self.prefix.iter().all(|p| key.next() == Some(p))
    }

    fn leaf(&self, leaf: PageId) -> Result<LeafImage> {
        let page = self.cache.get(leaf)?;
        let image = LeafImage::decode(&page.read())?;
        Ok(image)
    }

    fn visit(&self, page: &Page, path: &[u8], b: u8) -> Result<Visit> {
        let mut key = path.to_vec();
        key.push(b);
        let direct = page.direct(b);
        let direct = (direct != value::CANCEL && self.matches(path, &[b])).then(|| Frame::Direct {
            key: key.clone(),
            value: direct,
        });
        let forward = self.direction == Direction::Forward;
        let mut frames = Vec::new();
        let mut resume = None;
        match page.branch(b)? {
            Branch::Empty => frames.extend(direct),
            Branch::Prefix(child) => {
                let guard = self.locks.read(page.id(), b)?;
                let child = self.cache.get(child)?;
                let walk = self.prefix_frame(child, key);
                if forward {
                    frames.push(Frame::Hold { _guard: guard });
                    frames.push(walk);
                    frames.extend(direct);
                } else {
                    frames.extend(direct);
                    frames.push(Frame::Hold { _guard: guard });
                    frames.push(walk);
                }
            }
            Branch::Suffix(leaf) => {
                let image = {
                    let _guard = self.locks.read(page.id(), b)?;
                    self.leaf(leaf)?
                };
                let leaf = Frame::Leaf {
                    path: path.to_vec(),
                    entries: image
                        .entries
                        .into_iter()
                        .filter(|e| e.value != value::CANCEL && self.matches(path, &e.suffix))
                        .collect(),
                };
                if forward {
                    frames.push(leaf);
                    frames.extend(direct);
                } else {
                    frames.extend(direct);
                    frames.push(leaf);
                }
            }
            Branch::Mixed(leaf) => {
                // The lock of the branch leading into `page` is already held
                // by an enclosing hold frame.
                let image = self.leaf(leaf)?;
                let (from, to) = if forward {
                    (b, image.end)
                } else {
                    (image.start, b)
                };
                let mut entries: Vec<LeafEntry> = image
                    .entries
                    .into_iter()
                    .filter(|e| {
                        e.value != value::CANCEL
                            && (from..=to).contains(&e.suffix[0])
                            && self.matches(path, &e.suffix)
                    })
                    .collect();
                for x in from..=to {
                    let v = page.direct(x);
                    if v != value::CANCEL && self.matches(path, &[x]) {
                        entries.push(LeafEntry::new(&[x], v));
                    }
                }
                entries.sort_by(|a, b| a.suffix.cmp(&b.suffix));
                resume = Some(if forward {
                    i32::from(to) + 1
                } else {
                    i32::from(from) - 1
                });
                frames.push(Frame::Leaf {
                    path: path.to_vec(),
                    entries: entries.into(),
                });
            }
        }
        Ok(Visit { frames, resume })
    }
}

impl Iterator for TrieIter {
    type Item = Result<(Vec<u8>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (page, path, b) = match self.stack.last_mut()? {
                Frame::Direct { .. } => {
                    if let Some(Frame::Direct { key, value }) = self.stack.pop() {
                        return Some(Ok((key, value)));
                    }
                    continue;
                }
                Frame::Leaf { path, entries } => {
                    let entry = match self.direction {
                        Direction::Forward => entries.pop_front(),
                        Direction::Backward => entries.pop_back(),
                    };
                    match entry {
                        Some(entry) => {
                            let mut key = path.clone();
                            key.extend_from_slice(&entry.suffix);
                            return Some(Ok((key, entry.value)));
                        }
                        None => {
                            self.stack.pop();
                            continue;
                        }
                    }
                }
                Frame::Hold { .. } => {
                    self.stack.pop();
                    continue;
                }
                Frame::Prefix {
                    page,
                    path,
                    next,
                    lo,
                    hi,
                } => {
                    if *next < *lo || *next > *hi {
                        self.stack.pop();
                        continue;
                    }
                    let b = *next as u8;
                    *next += match self.direction {
                        Direction::Forward => 1,
                        Direction::Backward => -1,
                    };
                    (page.clone(), path.clone(), b)
                }
            };
            match self.visit(&page, &path, b) {
                Ok(visit) => {
                    if let (Some(resume), Some(Frame::Prefix { next, .. })) =
                        (visit.resume, self.stack.last_mut())
                    {
                        *next = resume;
                    }
                    self.stack.extend(visit.frames);
                }
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
