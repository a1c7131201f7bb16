use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use super::entry::{self, CacheRecord, EntryError, DEFAULT_DIR_MODE};
use crate::error::{FlowError, Result};
use crate::flow::{Chain, ChainOptions, Context, Flow, Stage, DEFAULT_CONTENT_KEY};
use crate::hashing::{sha256_hex, Canonical, CanonicalObject, Fingerprinter, DEFAULT_MAX_DEPTH};

/// Behaviour switches of a [`PickleCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Ignore existing entries and always run the wrapped chain.
    pub force: bool,
    /// Persist results; when false the cache is read-only.
    pub save: bool,
    /// Recursion limit of the structural hasher.
    pub max_depth: usize,
    /// Mode of a cache directory created by the cache itself.
    pub dir_mode: u32,
    /// Hasher debug output, 0 to 2.
    pub debug_level: u8,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            force: false,
            save: true,
            max_depth: DEFAULT_MAX_DEPTH,
            dir_mode: DEFAULT_DIR_MODE,
            debug_level: 0,
        }
    }
}

/// Identity of the wrapped chain, computed when stages are added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainInfo {
    pub len: usize,
    /// Hex SHA-256 fingerprint of the wrapped stage list.
    pub hash: String,
    /// Modification watermark, seconds since epoch (0.0 when unknown).
    pub mtime: f64,
    pub repr: String,
}

/// Stage that caches the context produced by a wrapped chain.
///
/// The entry for a call lives at
/// `directory / (sha256(content key value) + chain hash)`. A hit merges the
/// stored context into the live one, or replays a stored stop; a miss runs
/// the wrapped chain and stores its outcome. Cache I/O problems never fail
/// a call: they turn into misses.
pub struct PickleCache {
    directory: PathBuf,
    data_key: String,
    chain: Chain,
    options: CacheOptions,
    info: ChainInfo,
}

impl PickleCache {
    pub fn new(
        directory: impl Into<PathBuf>,
        data_key: impl Into<String>,
        stages: Vec<Box<dyn Stage>>,
    ) -> Result<Self> {
        Self::with_options(directory, data_key, stages, CacheOptions::default())
    }

    /// Cache keyed by the default `"id"` content key.
    pub fn keyed_by_id(directory: impl Into<PathBuf>, stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        Self::new(directory, DEFAULT_CONTENT_KEY, stages)
    }

    pub fn with_options(
        directory: impl Into<PathBuf>,
        data_key: impl Into<String>,
        stages: Vec<Box<dyn Stage>>,
        options: CacheOptions,
    ) -> Result<Self> {
        let directory = directory.into();
        let mut chain = Chain::with_kind("PickleCache", ChainOptions::default());
        chain.extend(stages)?;

        if !directory.exists() {
            entry::create_shared_dir(&directory, options.dir_mode).map_err(|source| {
                FlowError::CacheDirectory {
                    path: directory.clone(),
                    source,
                }
            })?;
        }

        let mut cache = Self {
            directory,
            data_key: data_key.into(),
            chain,
            options,
            info: ChainInfo::default(),
        };
        cache.hash_chain();
        Ok(cache)
    }

    /// Append a stage to the wrapped chain; the chain identity is recomputed.
    pub fn add<S: Stage + 'static>(&mut self, stage: S) -> Result<&mut Self> {
        self.chain.add(stage)?;
        self.hash_chain();
        Ok(self)
    }

    fn hash_chain(&mut self) {
        if !self.info.hash.is_empty() && self.info.len == self.chain.len() {
            return;
        }

        let fingerprinter =
            Fingerprinter::new(self.options.max_depth).with_debug_level(self.options.debug_level);
        let repr = self
            .chain
            .stages()
            .iter()
            .map(|s| s.canonical().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        self.info = ChainInfo {
            len: self.chain.len(),
            hash: fingerprinter.fingerprint(&self.chain.canonical_stages()),
            mtime: entry::epoch_secs(self.chain.modified()),
            repr,
        };
        debug!(
            cache = %self.chain.name(),
            chain_hash = %self.info.hash,
            "hashed wrapped chain"
        );
    }

    pub fn chain_hash(&self) -> &str {
        &self.info.hash
    }

    pub fn chain_info(&self) -> &ChainInfo {
        &self.info
    }

    pub fn data_key(&self) -> &str {
        &self.data_key
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Hex SHA-256 of the serialized content key value.
    pub fn content_hash(value: &Value) -> String {
        let bytes = serde_json::to_vec(value).unwrap_or_else(|_| value.to_string().into_bytes());
        sha256_hex(&bytes)
    }

    /// Entry path for a given content key value.
    pub fn cache_file_for(&self, key_value: &Value) -> PathBuf {
        self.directory
            .join(format!("{}{}", Self::content_hash(key_value), self.info.hash))
    }

    /// Entry path for the content key currently in `ctx`.
    pub fn cache_file(&self, ctx: &Context) -> Result<PathBuf> {
        let value = ctx
            .get(&self.data_key)
            .ok_or_else(|| FlowError::MissingContentKey {
                key: self.data_key.clone(),
            })?;
        Ok(self.cache_file_for(value))
    }

    pub fn cache_exists(&self, ctx: &Context) -> Result<bool> {
        let path = self.cache_file(ctx)?;
        debug!(cache_file = %path.display(), "Cache: {}", path.display());
        Ok(path.exists())
    }

    /// Read an entry. Corrupted entries are deleted and read as a miss.
    pub fn load(&self, path: &Path) -> Option<CacheRecord> {
        match entry::read_entry(path) {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e @ EntryError::Corrupted { .. }) => {
                warn!(
                    operation = "load",
                    status = "corrupted",
                    cache_file = %path.display(),
                    "Failed to load cache item {} (corrupted file will be deleted): {}",
                    path.display(),
                    e
                );
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to delete corrupted cache item {}: {}", path.display(), e);
                }
                None
            }
            Err(e) => {
                warn!(operation = "load", status = "error", "{}", e);
                None
            }
        }
    }

    /// Apply a loaded entry to `ctx`: a stored stop is replayed, otherwise
    /// every stored key overwrites the live context.
    pub(crate) fn replay(&self, record: CacheRecord, ctx: &mut Context) -> Flow {
        if record.stopped {
            info!(cache = %self.chain.name(), "Found in cache, replaying stop");
            return Flow::Stop;
        }
        self.check_time_consistency(record.chain_mtime);
        ctx.merge(&record.data);
        Flow::Continue
    }

    /// Replay the entry stored for `key_value`, if one can be read.
    pub(crate) fn restore(&self, key_value: &Value, ctx: &mut Context) -> Option<Flow> {
        let path = self.cache_file_for(key_value);
        let record = self.load(&path)?;
        info!(
            operation = "restore",
            status = "success",
            cache_file = %path.display(),
            "Restored {} from cache",
            self.chain.name()
        );
        Some(self.replay(record, ctx))
    }

    fn check_time_consistency(&self, cache_mtime: f64) {
        if cache_mtime != self.info.mtime {
            warn!(
                "Modification times do not correspond. Last change of chain: {} Last change in cache: {}",
                format_epoch(self.info.mtime),
                format_epoch(cache_mtime)
            );
        }
    }

    pub fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        let path = self.cache_file(ctx)?;

        if path.exists() {
            if self.options.force {
                info!(cache_file = %path.display(), "Item found in cache but force=true");
            } else if let Some(record) = self.load(&path) {
                info!(
                    operation = "get",
                    status = "success",
                    cache_file = %path.display(),
                    "Found in cache, skipping chain"
                );
                return Ok(self.replay(record, ctx));
            }
        }

        debug!(
            operation = "get",
            status = "miss",
            cache_file = %path.display(),
            "Not found in cache, processing chain"
        );
        let flow = self.chain.process(ctx)?;

        if self.options.save {
            let record = CacheRecord {
                data: ctx.as_map().clone(),
                stopped: flow.is_stop(),
                chain_repr: self.info.repr.clone(),
                chain_mtime: self.info.mtime,
            };
            match entry::write_entry(&path, &record) {
                Ok(()) => debug!(operation = "put", status = "success", cache_file = %path.display(), "stored cache item"),
                Err(e) => warn!(
                    operation = "put",
                    status = "error",
                    cache_file = %path.display(),
                    "Failed to store cache item: {:#}",
                    e
                ),
            }
        }

        Ok(flow)
    }

    pub fn close(&mut self) {
        self.chain.close();
    }
}

impl Stage for PickleCache {
    fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        PickleCache::process(self, ctx)
    }

    fn name(&self) -> String {
        self.chain.name()
    }

    fn class_name(&self) -> &'static str {
        "PickleCache"
    }

    fn requires(&self) -> Vec<String> {
        self.chain.requires().iter().cloned().collect()
    }

    fn provides(&self) -> Vec<String> {
        self.chain.provides().iter().cloned().collect()
    }

    fn canonical(&self) -> Canonical {
        CanonicalObject::new("PickleCache")
            .field("data_key", self.data_key.as_str())
            .field("chain_hash", self.info.hash.as_str())
            .into()
    }

    fn modified(&self) -> Option<SystemTime> {
        self.chain.modified()
    }

    fn close(&mut self) {
        PickleCache::close(self);
    }

    fn as_pickle_cache(&self) -> Option<&PickleCache> {
        Some(self)
    }

    fn as_pickle_cache_mut(&mut self) -> Option<&mut PickleCache> {
        Some(self)
    }
}

fn format_epoch(secs: f64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
        .unwrap_or_else(|| format!("{}", secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Add {
        val: i64,
        calls: Rc<Cell<u32>>,
    }

    impl Stage for Add {
        fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
            self.calls.set(self.calls.get() + 1);
            let input = ctx.get_i64("input").unwrap_or_default();
            ctx.set("output", input + self.val);
            Ok(Flow::Continue)
        }

        fn canonical_fields(&self) -> Vec<(String, Canonical)> {
            vec![("val".into(), self.val.into())]
        }
    }

    fn input(value: i64) -> Context {
        [("input", json!(value))].into_iter().collect()
    }

    #[test]
    fn test_file_name_is_content_hash_plus_chain_hash() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let cache = PickleCache::new(temp.path(), "input", stages![Add { val: 13, calls }]).unwrap();

        let path = cache.cache_file(&input(10)).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 128);
        assert!(name.starts_with(&sha256_hex(b"10")));
        assert!(name.ends_with(cache.chain_hash()));
    }

    #[test]
    fn test_missing_content_key_is_an_error() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut cache =
            PickleCache::new(temp.path(), "input", stages![Add { val: 1, calls }]).unwrap();

        let err = cache.process(&mut Context::new()).unwrap_err();
        assert!(matches!(err, FlowError::MissingContentKey { .. }));
    }

    #[test]
    fn test_force_reruns_chain() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let options = CacheOptions {
            force: true,
            ..Default::default()
        };
        let mut cache = PickleCache::with_options(
            temp.path(),
            "input",
            stages![Add {
                val: 1,
                calls: calls.clone()
            }],
            options,
        )
        .unwrap();

        cache.process(&mut input(1)).unwrap();
        cache.process(&mut input(1)).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_save_disabled_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let options = CacheOptions {
            save: false,
            ..Default::default()
        };
        let mut cache = PickleCache::with_options(
            temp.path(),
            "input",
            stages![Add { val: 1, calls }],
            options,
        )
        .unwrap();

        let mut ctx = input(1);
        cache.process(&mut ctx).unwrap();
        assert_eq!(ctx.get_i64("output"), Some(2));
        assert!(!cache.cache_exists(&ctx).unwrap());
    }

    #[test]
    fn test_add_rehashes_chain() {
        let temp = TempDir::new().unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut cache = PickleCache::new(
            temp.path(),
            "input",
            stages![Add {
                val: 1,
                calls: calls.clone()
            }],
        )
        .unwrap();
        let before = cache.chain_hash().to_string();

        cache.add(Add { val: 2, calls }).unwrap();

        assert_ne!(cache.chain_hash(), before);
        assert_eq!(cache.chain_info().len, 2);
        assert_eq!(cache.name(), "PickleCache[Add-Add]");
    }

    #[test]
    #[serial_test::serial]
    fn test_construction_fails_when_directory_cannot_be_created() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let result = PickleCache::new(blocker.join("cache"), "input", stages![]);
        assert!(matches!(result, Err(FlowError::CacheDirectory { .. })));
    }
}
