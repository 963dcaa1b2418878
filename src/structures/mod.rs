//! Hand-built containers backing the station catalog and loader staging.
//!
//! Three deliberate complexity trade-offs: `TreeIndex` for sorted traversal,
//! `HashIndex` for point lookups, `ReadingList` for append-heavy staging.

pub mod hash_index;
pub mod reading_list;
pub mod tree_index;

pub use hash_index::HashIndex;
pub use reading_list::ReadingList;
pub use tree_index::TreeIndex;
