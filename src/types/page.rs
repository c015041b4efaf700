use std::fmt;

use super::{RadixError, Result};

/// Size of every index page and device block.
pub const PAGE_SIZE: usize = 4096;
/// Number of dispatch slots (and direct-value slots) per prefix page.
pub const FANOUT: usize = 256;
/// Byte offset of the direct-value table inside a prefix page.
pub const DIRECT_OFFSET: usize = FANOUT * 8;
/// Pages laid down when an index file is initialised: the root and one
/// prefix page per leading byte.
pub const PREALLOCATED_PAGES: u64 = 1 + FANOUT as u64;

const ADDR_BITS: u32 = 56;
const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

const TAG_PREFIX: u64 = 0;
const TAG_SUFFIX: u64 = 1;
const TAG_MIXED: u64 = 2;
const TAG_EMPTY: u64 = 3;

/// Page number inside the index file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// The root dispatch page.
    pub const ROOT: PageId = PageId(0);

    /// Largest page number a dispatch slot can address.
    pub const MAX: u64 = ADDR_MASK;
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded dispatch slot of a prefix page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Branch {
    /// Another dispatch page.
    Prefix(PageId),
    /// Leaf owned by exactly one leading byte.
    Suffix(PageId),
    /// Leaf shared by a contiguous range of leading bytes.
    Mixed(PageId),
    /// Nothing stored under this byte yet.
    Empty,
}

impl Branch {
    /// Packs the slot into its on-disk word: page number in the low 56 bits,
    /// kind tag in the high byte.
    pub fn encode(self) -> u64 {
        match self {
            Branch::Prefix(id) => (TAG_PREFIX << ADDR_BITS) | (id.0 & ADDR_MASK),
            Branch::Suffix(id) => (TAG_SUFFIX << ADDR_BITS) | (id.0 & ADDR_MASK),
            Branch::Mixed(id) => (TAG_MIXED << ADDR_BITS) | (id.0 & ADDR_MASK),
            Branch::Empty => TAG_EMPTY << ADDR_BITS,
        }
    }

    /// Inverse of [`Branch::encode`].
    pub fn decode(word: u64) -> Result<Self> {
        let id = PageId(word & ADDR_MASK);
        match word >> ADDR_BITS {
            TAG_PREFIX => Ok(Branch::Prefix(id)),
            TAG_SUFFIX => Ok(Branch::Suffix(id)),
            TAG_MIXED => Ok(Branch::Mixed(id)),
            TAG_EMPTY => Ok(Branch::Empty),
            _ => Err(RadixError::UnknownError("unknown dispatch slot tag")),
        }
    }

    /// Leaf page referenced by this slot, if any.
    pub fn leaf(self) -> Option<PageId> {
        match self {
            Branch::Suffix(id) | Branch::Mixed(id) => Some(id),
            _ => None,
        }
    }

    /// Any page referenced by this slot.
    pub fn page(self) -> Option<PageId> {
        match self {
            Branch::Prefix(id) | Branch::Suffix(id) | Branch::Mixed(id) => Some(id),
            Branch::Empty => None,
        }
    }
}

/// Physical description of a structural index mutation, logged before the
/// affected parent page is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeChange {
    /// A full leaf became a dispatch page `child` hanging off
    /// `parent[branch]`.
    NewPrefix {
        /// Page whose slot now points at `child`.
        parent: PageId,
        /// Freshly written dispatch page.
        child: PageId,
        /// Slot of `parent` that was rewritten.
        branch: u8,
        /// All 256 dispatch words of `child`.
        dispatch: Vec<u64>,
        /// Direct values moved into `child`.
        direct: Vec<(u8, u64)>,
    },
    /// Dispatch slots of `page` rewritten after a leaf split.
    ChangePrefix {
        /// Page whose slots changed.
        page: PageId,
        /// `(slot, word)` pairs.
        slots: Vec<(u8, u64)>,
    },
    /// The empty run `start..=end` of `page` was claimed by a new leaf.
    NewSuffix {
        /// Parent dispatch page.
        page: PageId,
        /// First claimed byte.
        start: u8,
        /// Last claimed byte.
        end: u8,
        /// Dispatch word stored in every claimed slot.
        value: u64,
    },
}

impl TreeChange {
    /// Highest page number this change refers to.
    pub fn max_page(&self) -> u64 {
        let slot_page = |word: u64| {
            Branch::decode(word)
                .ok()
                .and_then(Branch::page)
                .map_or(0, |id| id.0)
        };
        match self {
            TreeChange::NewPrefix {
                parent,
                child,
                dispatch,
                ..
            } => dispatch
                .iter()
                .map(|&w| slot_page(w))
                .fold(parent.0.max(child.0), u64::max),
            TreeChange::ChangePrefix { page, slots } => slots
                .iter()
                .map(|&(_, w)| slot_page(w))
                .fold(page.0, u64::max),
            TreeChange::NewSuffix { page, value, .. } => page.0.max(slot_page(*value)),
        }
    }
}
