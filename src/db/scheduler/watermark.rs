use std::collections::BTreeMap;

use crate::types::Timestamp;

/// Multiset of the read timestamps of open transactions.
#[derive(Debug, Default)]
pub(crate) struct Watermarks {
    open: BTreeMap<Timestamp, usize>,
}

impl Watermarks {
    pub(crate) fn add(&mut self, ts: Timestamp) {
        *self.open.entry(ts).or_default() += 1;
    }

    /// Drops one registration of `ts`. Returns `false` when there was none.
    pub(crate) fn remove(&mut self, ts: Timestamp) -> bool {
        match self.open.get_mut(&ts) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.open.remove(&ts);
                true
            }
            None => false,
        }
    }

    /// Oldest snapshot still in use.
    pub(crate) fn low(&self) -> Option<Timestamp> {
        self.open.keys().next().copied()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.open.values().sum()
    }
}
