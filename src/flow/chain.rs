use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

use super::context::Context;
use super::stage::{Flow, Stage};
use crate::error::{FlowError, Result};
use crate::hashing::{Canonical, CanonicalObject};

/// Assembly options shared by every chain flavour.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Base of the chain name; defaults to the chain kind.
    pub name: Option<String>,
    /// Verify that every stage's `requires` is provided by earlier stages.
    pub check: bool,
    /// The first stage usually reads the raw input, so its requirements are
    /// not checked.
    pub ignore_first_requirements: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            name: None,
            check: false,
            ignore_first_requirements: true,
        }
    }
}

/// Average time a stage spent per `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    pub name: String,
    pub average: Duration,
}

/// Ordered list of stages run over one shared context per `process` call.
///
/// A chain is itself a stage, so chains nest. Declared `requires` and
/// `provides` of nested chains bubble up to the parent's dependency check.
pub struct Chain {
    base_name: String,
    names: Vec<String>,
    stages: Vec<Box<dyn Stage>>,
    times: Vec<Duration>,
    iterations: u64,
    requires: BTreeSet<String>,
    provides: BTreeSet<String>,
    options: ChainOptions,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("base_name", &self.base_name)
            .field("names", &self.names)
            .field("times", &self.times)
            .field("iterations", &self.iterations)
            .field("requires", &self.requires)
            .field("provides", &self.provides)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self::with_options(ChainOptions::default())
    }

    pub fn with_options(options: ChainOptions) -> Self {
        Self::with_kind("Chain", options)
    }

    /// Empty chain whose default base name is `kind`.
    pub(crate) fn with_kind(kind: &str, options: ChainOptions) -> Self {
        Self {
            base_name: options.name.clone().unwrap_or_else(|| kind.to_string()),
            names: Vec::new(),
            stages: Vec::new(),
            times: Vec::new(),
            iterations: 0,
            requires: BTreeSet::new(),
            provides: BTreeSet::new(),
            options,
        }
    }

    /// Chain with default options over `stages`.
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut chain = Self::new();
        chain.extend(stages)?;
        Ok(chain)
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

    /// Append one stage, running the dependency check first when enabled.
    /// A rejected stage leaves the chain unchanged.
    pub fn add_boxed(&mut self, stage: Box<dyn Stage>) -> Result<&mut Self> {
        let name = stage.name();
        let is_first = self.stages.is_empty();

        let mut requires = self.requires.clone();
        if !(self.options.ignore_first_requirements && is_first) {
            requires.extend(stage.requires());
        }

        if self.options.check {
            let missing: BTreeSet<String> =
                requires.difference(&self.provides).cloned().collect();
            if !missing.is_empty() {
                return Err(FlowError::UnsatisfiedRequirements {
                    stage: name,
                    missing,
                });
            }
        }

        self.requires = requires;
        self.provides.extend(stage.provides());
        self.names.push(name);
        self.stages.push(stage);
        self.times.push(Duration::ZERO);
        Ok(self)
    }

    /// `Base[stage1-stage2-...]`
    pub fn name(&self) -> String {
        format!("{}[{}]", self.base_name, self.names.join("-"))
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    pub(crate) fn stage_mut(&mut self, index: usize) -> &mut dyn Stage {
        self.stages[index].as_mut()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Accumulated wall time per stage.
    pub fn times(&self) -> &[Duration] {
        &self.times
    }

    /// Number of completed (not stopped) `process` calls.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.provides
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    /// Run every stage in order. A `Stop` from any stage ends the call and is
    /// returned to the caller.
    pub fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        for index in 0..self.stages.len() {
            if self.run_stage(index, ctx)?.is_stop() {
                return Ok(Flow::Stop);
            }
        }
        self.iterations += 1;
        Ok(Flow::Continue)
    }

    /// Run a single stage, accumulating its wall time.
    pub(crate) fn run_stage(&mut self, index: usize, ctx: &mut Context) -> Result<Flow> {
        debug!(stage = %self.names[index], "{}.process()", self.names[index]);

        let start = Instant::now();
        let flow = self.stages[index].process(ctx)?;
        self.times[index] += start.elapsed();

        if flow.is_stop() {
            debug!(
                stage = %self.names[index],
                "{} requested stop. Processing stopped",
                self.names[index]
            );
        }
        Ok(flow)
    }

    pub(crate) fn finish_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Call every stage's finalizer in order and report average times.
    pub fn close(&mut self) -> Vec<StageTiming> {
        let iterations = self.iterations.max(1) as f64;
        let mut timings = Vec::with_capacity(self.stages.len());

        for (index, stage) in self.stages.iter_mut().enumerate() {
            stage.close();
            let average = self.times[index].div_f64(iterations);
            info!(
                stage = %self.names[index],
                average_secs = average.as_secs_f64(),
                "{} average execution time {:.2} sec",
                self.names[index],
                average.as_secs_f64()
            );
            timings.push(StageTiming {
                name: self.names[index].clone(),
                average,
            });
        }

        timings
    }

    /// Guard that closes the chain when dropped.
    pub fn scope(&mut self) -> ChainScope<'_> {
        ChainScope { chain: self }
    }

    /// Latest `modified` watermark over all stages.
    pub fn modified(&self) -> Option<SystemTime> {
        self.stages.iter().filter_map(|s| s.modified()).max()
    }

    pub(crate) fn canonical_stages(&self) -> Canonical {
        Canonical::Seq(self.stages.iter().map(|s| s.canonical()).collect())
    }
}

impl Stage for Chain {
    fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        Chain::process(self, ctx)
    }

    fn name(&self) -> String {
        Chain::name(self)
    }

    fn class_name(&self) -> &'static str {
        "Chain"
    }

    fn requires(&self) -> Vec<String> {
        self.requires.iter().cloned().collect()
    }

    fn provides(&self) -> Vec<String> {
        self.provides.iter().cloned().collect()
    }

    fn canonical(&self) -> Canonical {
        CanonicalObject::new("Chain")
            .field("name", self.base_name.as_str())
            .field("check", self.options.check)
            .field("stages", self.canonical_stages())
            .into()
    }

    fn modified(&self) -> Option<SystemTime> {
        Chain::modified(self)
    }

    fn close(&mut self) {
        Chain::close(self);
    }
}

/// Closes the wrapped chain on drop.
pub struct ChainScope<'a> {
    chain: &'a mut Chain,
}

impl Deref for ChainScope<'_> {
    type Target = Chain;

    fn deref(&self) -> &Chain {
        self.chain
    }
}

impl DerefMut for ChainScope<'_> {
    fn deref_mut(&mut self) -> &mut Chain {
        self.chain
    }
}

impl Drop for ChainScope<'_> {
    fn drop(&mut self) {
        self.chain.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::stage_fn;
    use crate::stages;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Add(i64);

    impl Stage for Add {
        fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
            let input = ctx.get_i64("input").unwrap_or_default();
            ctx.set("output", input + self.0);
            Ok(Flow::Continue)
        }

        fn requires(&self) -> Vec<String> {
            vec!["input".into()]
        }

        fn provides(&self) -> Vec<String> {
            vec!["output".into()]
        }
    }

    struct Halt;

    impl Stage for Halt {
        fn process(&mut self, _ctx: &mut Context) -> Result<Flow> {
            Ok(Flow::Stop)
        }
    }

    struct Closable(Rc<Cell<u32>>);

    impl Stage for Closable {
        fn process(&mut self, _ctx: &mut Context) -> Result<Flow> {
            Ok(Flow::Continue)
        }

        fn close(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(Chain::new().name(), "Chain[]");
        let named = Chain::with_options(ChainOptions {
            name: Some("ML-pipeline".into()),
            ..Default::default()
        });
        assert_eq!(named.name(), "ML-pipeline[]");

        let mut chain = Chain::from_stages(stages![Add(13)]).unwrap();
        assert_eq!(chain.name(), "Chain[Add]");
        chain.add(stage_fn("double", |_ctx: &mut Context| Ok(Flow::Continue))).unwrap();
        assert_eq!(chain.name(), "Chain[Add-double]");
    }

    #[test]
    fn test_stop_skips_remaining_stages() {
        let mut chain = Chain::from_stages(stages![Halt, Add(1)]).unwrap();
        let mut ctx: Context = [("input", json!(1))].into_iter().collect();

        assert_eq!(chain.process(&mut ctx).unwrap(), Flow::Stop);
        assert!(!ctx.contains_key("output"));
        assert_eq!(chain.iterations(), 0);
    }

    #[test]
    fn test_rejected_stage_leaves_chain_unchanged() {
        let mut chain = Chain::with_options(ChainOptions {
            check: true,
            ..Default::default()
        });
        chain.add(Add(1)).unwrap();
        let err = chain
            .add(stage_fn("needs_x", |_ctx: &mut Context| Ok(Flow::Continue)).requires(["x"]))
            .unwrap_err();

        assert!(matches!(err, FlowError::UnsatisfiedRequirements { .. }));
        assert_eq!(chain.len(), 1);
        assert!(!chain.requires().contains("x"));
    }

    #[test]
    fn test_scope_closes_chain() {
        let closed = Rc::new(Cell::new(0));
        let mut chain = Chain::from_stages(stages![Closable(closed.clone())]).unwrap();
        {
            let mut scope = chain.scope();
            scope.process(&mut Context::new()).unwrap();
        }
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn test_close_reports_averages() {
        let mut chain = Chain::from_stages(stages![Add(1), Add(2)]).unwrap();
        let mut ctx: Context = [("input", json!(1))].into_iter().collect();
        chain.process(&mut ctx).unwrap();
        chain.process(&mut ctx).unwrap();

        let timings = chain.close();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].name, "Add");
        assert!(timings[0].average <= chain.times()[0]);
    }
}
