//! Leaf placement: inserting into shared leaves, splitting them by branch
//! byte and promoting full single-byte leaves to prefix pages.
//!
//! Every structural step writes the new pages first, then logs the change,
//! then updates and syncs the parent dispatch table, and only then rewrites
//! the leaf that keeps its page. A crash between any two steps leaves the
//! parent pointing at fully written pages.

use tracing::debug;

use super::{
    leaf::{LeafEntry, LeafImage},
    node::PrefixPage,
    write_leaf, TreeLog, Trie,
};
use crate::{
    primitives::cache::Page,
    types::{page::FANOUT, Branch, PageId, RadixError, Result, TreeChange},
};

/// Placement that still has to happen after a structural step.
struct Pending {
    parent: Page,
    leaf: Page,
    image: LeafImage,
    entry: LeafEntry,
}

fn byte_range(lo: u8, hi_exclusive: u16) -> impl Iterator<Item = u8> {
    (u16::from(lo)..hi_exclusive).map(|b| b as u8)
}

impl Trie {
    /// Stores `suffix` in the leaf `leaf` reached through `parent`.
    pub(super) fn insert_leaf(
        &self,
        parent: &Page,
        leaf: PageId,
        suffix: &[u8],
        value: u64,
        log: &dyn TreeLog,
    ) -> Result<()> {
        let leaf = self.cache.get(leaf)?;
        let image = LeafImage::decode(&leaf.read())?;
        self.place(Pending {
            parent: parent.clone(),
            leaf,
            image,
            entry: LeafEntry::new(suffix, value),
        }, log)
    }

    /// Gives the empty slot `suffix[0]` of `parent` a leaf holding one entry.
    /// The leaf claims the whole run of empty slots around that byte.
    pub(super) fn create_leaf(
        &self,
        parent: &Page,
        suffix: &[u8],
        value: u64,
        log: &dyn TreeLog,
    ) -> Result<()> {
        let (start, end) = parent.vacant_span(suffix[0])?;
        let leaf = self.cache.allocate()?;
        let mut image = LeafImage::empty(start, end);
        if !image.try_put(&LeafEntry::new(suffix, value)) {
            return Err(RadixError::UnknownError("entry larger than a leaf page"));
        }
        write_leaf(&leaf, &image)?;
        let word = image.branch(leaf.id()).encode();
        log.record(TreeChange::NewSuffix {
            page: parent.id(),
            start,
            end,
            value: word,
        })?;
        let slots: Vec<_> = (start..=end).map(|b| (b, word)).collect();
        parent.set_slots(&slots);
        parent.sync()?;
        debug!(parent = %parent.id(), leaf = %leaf.id(), start, end, "trie.new_suffix");
        Ok(())
    }

    fn place(&self, mut pending: Pending, log: &dyn TreeLog) -> Result<()> {
        loop {
            if pending.image.try_put(&pending.entry) {
                return write_leaf(&pending.leaf, &pending.image);
            }
            let next = if pending.image.is_single() {
                self.promote(pending, log)?
            } else {
                self.split(pending, log)?
            };
            match next {
                Some(next) => pending = next,
                None => return Ok(()),
            }
        }
    }

    /// Splits a full shared leaf so the entry's branch byte ends up either
    /// settled or alone in a single-byte leaf.
    fn split(&self, pending: Pending, log: &dyn TreeLog) -> Result<Option<Pending>> {
        let Pending {
            parent,
            leaf,
            mut image,
            entry,
        } = pending;
        let c = entry.suffix[0];
        let (x, y) = match (image.first_byte(), image.last_byte()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(RadixError::UnknownError("full leaf without entries")),
        };
        let (start, end) = (image.start, image.end);
        debug!(leaf = %leaf.id(), start, end, branch = c, "trie.split");

        if c < x {
            let fresh = self.cache.allocate()?;
            let mut lower = LeafImage::empty(start, x - 1);
            lower.try_put(&entry);
            write_leaf(&fresh, &lower)?;
            image.start = x;
            self.relink(&parent, log, &[(&fresh, &lower)], &[(&leaf, &image)], &[])?;
            return Ok(None);
        }
        if c > y {
            let fresh = self.cache.allocate()?;
            let mut upper = LeafImage::empty(y + 1, end);
            upper.try_put(&entry);
            write_leaf(&fresh, &upper)?;
            image.end = y;
            self.relink(&parent, log, &[(&fresh, &upper)], &[(&leaf, &image)], &[])?;
            return Ok(None);
        }

        let below: Vec<u8> = byte_range(start, u16::from(c)).collect();
        let above: Vec<u8> = byte_range(c.saturating_add(1), u16::from(end) + 1)
            .filter(|&b| b > c)
            .collect();

        if x == y {
            // Every entry shares the branch byte: shrink to it, then promote.
            image.start = c;
            image.end = c;
            let vacated: Vec<u8> = below.into_iter().chain(above).collect();
            self.relink(&parent, log, &[], &[(&leaf, &image)], &vacated)?;
            return Ok(Some(Pending {
                parent,
                leaf,
                image,
                entry,
            }));
        }
        if c == x {
            let fresh = self.cache.allocate()?;
            let upper = LeafImage {
                start: c + 1,
                end,
                entries: image.take_where(|b| b > c),
            };
            write_leaf(&fresh, &upper)?;
            image.start = c;
            image.end = c;
            self.relink(&parent, log, &[(&fresh, &upper)], &[(&leaf, &image)], &below)?;
            return Ok(Some(Pending {
                parent,
                leaf,
                image,
                entry,
            }));
        }
        if c == y {
            let fresh = self.cache.allocate()?;
            let middle = LeafImage {
                start: c,
                end: c,
                entries: image.take_where(|b| b == c),
            };
            write_leaf(&fresh, &middle)?;
            image.end = c - 1;
            self.relink(&parent, log, &[(&fresh, &middle)], &[(&leaf, &image)], &above)?;
            return Ok(Some(Pending {
                parent,
                leaf: fresh,
                image: middle,
                entry,
            }));
        }

        // x < c < y: three ways.
        let upper_page = self.cache.allocate()?;
        let middle_page = self.cache.allocate()?;
        let upper = LeafImage {
            start: c + 1,
            end,
            entries: image.take_where(|b| b > c),
        };
        let middle = LeafImage {
            start: c,
            end: c,
            entries: image.take_where(|b| b == c),
        };
        write_leaf(&upper_page, &upper)?;
        write_leaf(&middle_page, &middle)?;
        image.end = c - 1;
        self.relink(
            &parent,
            log,
            &[(&upper_page, &upper), (&middle_page, &middle)],
            &[(&leaf, &image)],
            &[],
        )?;
        Ok(Some(Pending {
            parent,
            leaf: middle_page,
            image: middle,
            entry,
        }))
    }

    /// Replaces a full single-byte leaf with a prefix page whose slots all
    /// share one leaf holding the old entries minus their first byte.
    ///
    /// Each call strips one byte and allocates two pages. Entries that still
    /// share their next byte overflow the new leaf again, so versions of a
    /// key near [`MAX_KEY_SIZE`](crate::types::MAX_KEY_SIZE) cascade about one
    /// promotion per common byte, costing several thousand pages.
    fn promote(&self, pending: Pending, log: &dyn TreeLog) -> Result<Option<Pending>> {
        let Pending {
            parent,
            leaf,
            image,
            entry,
        } = pending;
        let branch = image.start;
        let child = self.cache.allocate()?;
        let lower_page = self.cache.allocate()?;

        let mut lower = LeafImage::empty(0, u8::MAX);
        let mut direct = Vec::new();
        for moved in image.entries {
            let tail = &moved.suffix[1..];
            if tail.len() == 1 {
                direct.push((tail[0], moved.value));
            } else {
                lower.entries.push(LeafEntry::new(tail, moved.value));
            }
        }
        write_leaf(&lower_page, &lower)?;

        let dispatch = vec![Branch::Mixed(lower_page.id()).encode(); FANOUT];
        child.write().fill(0);
        let slots: Vec<_> = dispatch
            .iter()
            .enumerate()
            .map(|(b, &w)| (b as u8, w))
            .collect();
        child.set_slots(&slots);
        for &(b, v) in &direct {
            child.set_direct(b, v);
        }
        child.sync()?;

        log.record(TreeChange::NewPrefix {
            parent: parent.id(),
            child: child.id(),
            branch,
            dispatch,
            direct,
        })?;
        parent.set_slots(&[(branch, Branch::Prefix(child.id()).encode())]);
        parent.sync()?;
        debug!(
            parent = %parent.id(),
            branch,
            old = %leaf.id(),
            child = %child.id(),
            "trie.promote"
        );

        let tail = &entry.suffix[1..];
        if tail.len() == 1 {
            child.set_direct(tail[0], entry.value);
            child.sync()?;
            return Ok(None);
        }
        Ok(Some(Pending {
            parent: child,
            leaf: lower_page,
            image: lower,
            entry: LeafEntry::new(tail, entry.value),
        }))
    }

    /// Points `parent` at the leaves of a split and rewrites the leaves that
    /// kept their page.
    fn relink(
        &self,
        parent: &Page,
        log: &dyn TreeLog,
        fresh: &[(&Page, &LeafImage)],
        kept: &[(&Page, &LeafImage)],
        vacated: &[u8],
    ) -> Result<()> {
        let mut slots = Vec::new();
        for (page, image) in fresh.iter().chain(kept) {
            let word = image.branch(page.id()).encode();
            slots.extend((image.start..=image.end).map(|b| (b, word)));
        }
        let empty = Branch::Empty.encode();
        slots.extend(vacated.iter().map(|&b| (b, empty)));
        log.record(TreeChange::ChangePrefix {
            page: parent.id(),
            slots: slots.clone(),
        })?;
        parent.set_slots(&slots);
        parent.sync()?;
        for (page, image) in kept {
            write_leaf(page, image)?;
        }
        Ok(())
    }
}
