use std::time::SystemTime;
use tracing::{debug, info};

use super::pickle_cache::PickleCache;
use crate::error::Result;
use crate::flow::{Chain, ChainOptions, Context, Flow, Stage, DEFAULT_CONTENT_KEY};
use crate::hashing::{sha256_hex, Canonical, CanonicalObject, Fingerprinter};

/// Fold a stage fingerprint into a content key.
///
/// Ids have the shape `prefix|hash`. The prefix survives every step, only
/// the hash part rolls forward. An id without `|` is its own prefix.
///
/// Only the last `|` separates the hash. Any earlier `|` stays in the prefix
/// verbatim, so `a|b|h` keeps the prefix `a|b` instead of collapsing it to
/// `ab`.
pub fn combine_id(id: &str, stage_hash: &str) -> String {
    let (prefix, old_hash) = id.rsplit_once('|').unwrap_or((id, ""));
    let rolled = sha256_hex(format!("{}{}", old_hash, stage_hash).as_bytes());
    format!("{}|{}", prefix, rolled)
}

/// Chain that rewrites the content key as it flows through id-propagating
/// stages and resumes from the latest cache able to serve the call.
///
/// Every [`PickleCache`] and every stage with `propagates_id` contributes
/// its fingerprint to the id seen by later stages, so a cache entry deep in
/// the chain is keyed by everything upstream of it. On `process` the chain
/// looks for the last cache whose entry already exists, replays it, and
/// runs only the stages after it.
pub struct CachingChain {
    chain: Chain,
    id_slots: Vec<IdSlot>,
    id_key: String,
    fingerprinter: Fingerprinter,
}

/// How a stage feeds the rolling content key.
enum IdSlot {
    Passive,
    /// Read from the wrapped cache's current chain hash, so later edits of
    /// the cache are picked up.
    Cache,
    Fingerprint(String),
}

impl Default for CachingChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CachingChain {
    pub fn new() -> Self {
        Self::with_options(ChainOptions::default(), DEFAULT_CONTENT_KEY)
    }

    pub fn with_options(options: ChainOptions, id_key: impl Into<String>) -> Self {
        Self {
            chain: Chain::with_kind("CachingChain", options),
            id_slots: Vec::new(),
            id_key: id_key.into(),
            fingerprinter: Fingerprinter::default(),
        }
    }

    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut chain = Self::new();
        chain.extend(stages)?;
        Ok(chain)
    }

    /// Use a hasher with a different depth limit or debug level for stage
    /// fingerprints. Applies to stages added afterwards.
    pub fn fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn add<S: Stage + 'static>(&mut self, stage: S) -> Result<&mut Self> {
        self.add_boxed(Box::new(stage))
    }

    pub fn extend<I>(&mut self, stages: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = Box<dyn Stage>>,
    {
        for stage in stages {
            self.add_boxed(stage)?;
        }
        Ok(self)
    }

    pub fn add_boxed(&mut self, stage: Box<dyn Stage>) -> Result<&mut Self> {
        let slot = self.id_slot_for(stage.as_ref());
        self.chain.add_boxed(stage)?;
        self.id_slots.push(slot);
        Ok(self)
    }

    fn id_slot_for(&self, stage: &dyn Stage) -> IdSlot {
        if stage.as_pickle_cache().is_some() {
            return IdSlot::Cache;
        }
        if stage.propagates_id() {
            return IdSlot::Fingerprint(
                self.fingerprinter
                    .fingerprint(&Canonical::Seq(vec![stage.canonical()])),
            );
        }
        IdSlot::Passive
    }

    fn id_hash(&self, position: usize) -> Option<&str> {
        match &self.id_slots[position] {
            IdSlot::Passive => None,
            IdSlot::Cache => self.pickle_cache(position).map(PickleCache::chain_hash),
            IdSlot::Fingerprint(hash) => Some(hash.as_str()),
        }
    }

    pub fn name(&self) -> String {
        self.chain.name()
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Fingerprint contributed by each stage, `None` for stages that leave
    /// the id untouched.
    pub fn id_hashes(&self) -> Vec<Option<&str>> {
        (0..self.id_slots.len()).map(|p| self.id_hash(p)).collect()
    }

    /// Content key reaching each position: entry `p` is the id stage `p`
    /// runs with, the last entry is the id after the whole chain.
    pub fn rolling_ids(&self, initial: &str) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.id_slots.len() + 1);
        let mut current = initial.to_string();
        ids.push(current.clone());
        for position in 0..self.id_slots.len() {
            if let Some(hash) = self.id_hash(position) {
                current = combine_id(&current, hash);
            }
            ids.push(current.clone());
        }
        ids
    }

    /// Latest position whose cache can serve `ids`, replayed into `ctx`.
    /// Caches with `force` set never serve a resume.
    fn resume(&self, ids: &[String], ctx: &mut Context) -> Option<(usize, Flow)> {
        for position in (0..self.chain.len()).rev() {
            let Some(cache) = self.chain.stages()[position].as_pickle_cache() else {
                continue;
            };
            if cache.data_key() != self.id_key || cache.options().force {
                continue;
            }

            let id = serde_json::Value::String(ids[position].clone());
            if !cache.cache_file_for(&id).exists() {
                continue;
            }

            ctx.set_content_key(&self.id_key, ids[position].as_str());
            match cache.restore(&id, ctx) {
                Some(flow) => return Some((position, flow)),
                None => debug!(position, "cache entry unusable, looking further back"),
            }
        }
        None
    }

    pub fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        let initial = ctx.content_key(&self.id_key)?.to_string();
        let ids = self.rolling_ids(&initial);

        let start = match self.resume(&ids, ctx) {
            Some((_, Flow::Stop)) => return Ok(Flow::Stop),
            Some((position, Flow::Continue)) => {
                info!(
                    chain = %self.chain.name(),
                    position,
                    "Resuming after cached stage {}",
                    self.chain.stages()[position].name()
                );
                position + 1
            }
            None => 0,
        };

        for position in start..self.chain.len() {
            ctx.set_content_key(&self.id_key, ids[position].as_str());
            if self.chain.run_stage(position, ctx)?.is_stop() {
                return Ok(Flow::Stop);
            }
        }

        ctx.set_content_key(&self.id_key, ids[self.chain.len()].as_str());
        self.chain.finish_iteration();
        Ok(Flow::Continue)
    }

    pub fn close(&mut self) {
        self.chain.close();
    }

    /// Reach a wrapped cache, e.g. to inspect its directory.
    pub fn pickle_cache(&self, position: usize) -> Option<&PickleCache> {
        self.chain.stages().get(position)?.as_pickle_cache()
    }

    /// Mutable access to a wrapped cache. Stages added to it change the ids
    /// of every later position.
    pub fn pickle_cache_mut(&mut self, position: usize) -> Option<&mut PickleCache> {
        if position >= self.chain.len() {
            return None;
        }
        self.chain.stage_mut(position).as_pickle_cache_mut()
    }
}

impl Stage for CachingChain {
    fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        CachingChain::process(self, ctx)
    }

    fn name(&self) -> String {
        self.chain.name()
    }

    fn class_name(&self) -> &'static str {
        "CachingChain"
    }

    fn requires(&self) -> Vec<String> {
        self.chain.requires().iter().cloned().collect()
    }

    fn provides(&self) -> Vec<String> {
        self.chain.provides().iter().cloned().collect()
    }

    fn canonical(&self) -> Canonical {
        CanonicalObject::new("CachingChain")
            .field("id_key", self.id_key.as_str())
            .field("stages", self.chain.canonical_stages())
            .into()
    }

    fn propagates_id(&self) -> bool {
        self.id_slots.iter().any(|slot| !matches!(slot, IdSlot::Passive))
    }

    fn modified(&self) -> Option<SystemTime> {
        self.chain.modified()
    }

    fn close(&mut self) {
        CachingChain::close(self);
    }
}
