//! Storage layers: the radix trie index, its multi-version view, the value
//! store and crash recovery.

/// Append-only value store.
pub mod blob;

/// Versioned keys over the trie.
pub mod mvcc;

/// WAL replay.
pub mod recovery;

/// Radix trie index over cached pages.
pub mod trie;
