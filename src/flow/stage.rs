use std::time::SystemTime;

use super::context::Context;
use crate::cache::PickleCache;
use crate::error::Result;
use crate::hashing::{Canonical, CanonicalObject};

/// Outcome of one `process` call.
///
/// `Stop` asks every enclosing chain to skip its remaining stages; it is a
/// control signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

impl Flow {
    pub fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

/// A unit of work run over a shared [`Context`].
///
/// Only `process` is mandatory. The remaining methods describe the stage to
/// the dependency check (`requires`/`provides`), to the structural hasher
/// (`canonical_fields`, `cache_exempt`) and to resumable chains
/// (`propagates_id`).
pub trait Stage {
    fn process(&mut self, ctx: &mut Context) -> Result<Flow>;

    /// Display name, used in chain names and logs.
    fn name(&self) -> String {
        self.class_name().to_string()
    }

    /// Class tag written into fingerprints.
    fn class_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Context keys this stage reads.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Context keys this stage writes.
    fn provides(&self) -> Vec<String> {
        Vec::new()
    }

    /// Configuration that identifies this stage. Everything listed here
    /// participates in cache keys unless named in [`Stage::cache_exempt`].
    fn canonical_fields(&self) -> Vec<(String, Canonical)> {
        Vec::new()
    }

    /// Field names that affect behaviour but must not invalidate caches,
    /// e.g. verbosity flags.
    fn cache_exempt(&self) -> Vec<String> {
        Vec::new()
    }

    fn canonical(&self) -> Canonical {
        let mut obj = CanonicalObject::new(self.class_name()).exempt(self.cache_exempt());
        obj.fields = self.canonical_fields();
        obj.into()
    }

    /// Opt in to content key propagation inside a `CachingChain`.
    fn propagates_id(&self) -> bool {
        false
    }

    /// When this stage's implementation last changed, if known.
    fn modified(&self) -> Option<SystemTime> {
        None
    }

    /// Finalizer, called once by the owning chain's `close`.
    fn close(&mut self) {}

    fn as_pickle_cache(&self) -> Option<&PickleCache> {
        None
    }

    fn as_pickle_cache_mut(&mut self) -> Option<&mut PickleCache> {
        None
    }
}

/// `a::b::Name<c::D>` -> `Name`
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Stateless stage backed by a closure.
pub struct FnStage<F> {
    name: String,
    func: F,
    requires: Vec<String>,
    provides: Vec<String>,
}

/// Wrap a closure as a stage. The closure's name is part of its fingerprint.
pub fn stage_fn<F>(name: impl Into<String>, func: F) -> FnStage<F>
where
    F: FnMut(&mut Context) -> anyhow::Result<Flow>,
{
    FnStage {
        name: name.into(),
        func,
        requires: Vec::new(),
        provides: Vec::new(),
    }
}

impl<F> FnStage<F> {
    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn provides<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut Context) -> anyhow::Result<Flow>,
{
    fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        Ok((self.func)(ctx)?)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn class_name(&self) -> &'static str {
        "function"
    }

    fn requires(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn provides(&self) -> Vec<String> {
        self.provides.clone()
    }

    fn canonical(&self) -> Canonical {
        CanonicalObject::new("function").named(&self.name).into()
    }
}

/// Build a `Vec<Box<dyn Stage>>` from stage values.
#[macro_export]
macro_rules! stages {
    ($($stage:expr),* $(,)?) => {
        vec![$(Box::new($stage) as Box<dyn $crate::flow::Stage>),*]
    };
}
