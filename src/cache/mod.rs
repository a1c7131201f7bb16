pub mod caching_chain;
pub mod entry;
pub mod pickle_cache;

pub use caching_chain::{combine_id, CachingChain};
pub use entry::{CacheRecord, EntryError};
pub use pickle_cache::{CacheOptions, ChainInfo, PickleCache};
