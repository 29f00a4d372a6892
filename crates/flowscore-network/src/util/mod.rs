//! Supporting data structures.

mod list_pool;

pub use list_pool::{EntryId, ListId, ListPool};
