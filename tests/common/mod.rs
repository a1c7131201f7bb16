// Stages shared by the integration tests.
//
// Every stage counts its `process` calls through a shared `Counter` so tests
// can tell a cache hit (no call) from a recomputation. Counters are runtime
// state and never part of a stage's canonical fields.
#![allow(dead_code)]

use serde_json::json;
use stagecache::{Canonical, Context, Flow, Stage};
use std::cell::Cell;
use std::rc::Rc;

pub type Counter = Rc<Cell<u32>>;

pub fn counter() -> Counter {
    Rc::new(Cell::new(0))
}

fn bump(counter: &Counter) {
    counter.set(counter.get() + 1);
}

/// `output = input + val`
pub struct Add {
    pub val: i64,
    pub verbose: bool,
    pub calls: Counter,
}

impl Add {
    pub fn new(val: i64, calls: &Counter) -> Self {
        Self {
            val,
            verbose: false,
            calls: calls.clone(),
        }
    }
}

impl Stage for Add {
    fn process(&mut self, ctx: &mut Context) -> stagecache::Result<Flow> {
        bump(&self.calls);
        let input = ctx.get_i64("input").unwrap_or_default();
        ctx.set("output", input + self.val);
        Ok(Flow::Continue)
    }

    fn requires(&self) -> Vec<String> {
        vec!["input".into()]
    }

    fn provides(&self) -> Vec<String> {
        vec!["output".into()]
    }

    fn canonical_fields(&self) -> Vec<(String, Canonical)> {
        vec![
            ("val".into(), self.val.into()),
            ("verbose".into(), self.verbose.into()),
        ]
    }

    fn cache_exempt(&self) -> Vec<String> {
        vec!["verbose".into()]
    }
}

/// `output = input * factor`
pub struct Mult {
    pub factor: i64,
    pub calls: Counter,
}

impl Mult {
    pub fn new(factor: i64, calls: &Counter) -> Self {
        Self {
            factor,
            calls: calls.clone(),
        }
    }
}

impl Stage for Mult {
    fn process(&mut self, ctx: &mut Context) -> stagecache::Result<Flow> {
        bump(&self.calls);
        let input = ctx.get_i64("input").unwrap_or_default();
        ctx.set("output", input * self.factor);
        Ok(Flow::Continue)
    }

    fn requires(&self) -> Vec<String> {
        vec!["input".into()]
    }

    fn provides(&self) -> Vec<String> {
        vec!["output".into()]
    }

    fn canonical_fields(&self) -> Vec<(String, Canonical)> {
        vec![("val".into(), self.factor.into())]
    }
}

/// Appends `output` to the `results` list.
pub struct Collect;

impl Stage for Collect {
    fn process(&mut self, ctx: &mut Context) -> stagecache::Result<Flow> {
        let output = ctx.get("output").cloned().unwrap_or(json!(null));
        match ctx.get_mut("results") {
            Some(serde_json::Value::Array(items)) => items.push(output),
            _ => {
                ctx.set("results", json!([output]));
            }
        }
        Ok(Flow::Continue)
    }

    fn requires(&self) -> Vec<String> {
        vec!["output".into()]
    }

    fn provides(&self) -> Vec<String> {
        vec!["results".into()]
    }
}

pub struct RequiresNonsense;

impl Stage for RequiresNonsense {
    fn process(&mut self, _ctx: &mut Context) -> stagecache::Result<Flow> {
        Ok(Flow::Continue)
    }

    fn requires(&self) -> Vec<String> {
        vec!["nonsense".into()]
    }
}

/// Sets `key = true` and contributes to the rolling content key.
pub struct Tagger {
    pub key: &'static str,
    pub level: i64,
    pub calls: Counter,
}

impl Tagger {
    pub fn new(key: &'static str, calls: &Counter) -> Self {
        Self {
            key,
            level: 1,
            calls: calls.clone(),
        }
    }
}

impl Stage for Tagger {
    fn process(&mut self, ctx: &mut Context) -> stagecache::Result<Flow> {
        bump(&self.calls);
        ctx.set(self.key, true);
        Ok(Flow::Continue)
    }

    fn name(&self) -> String {
        format!("Tagger:{}", self.key)
    }

    fn canonical_fields(&self) -> Vec<(String, Canonical)> {
        vec![
            ("key".into(), self.key.into()),
            ("level".into(), self.level.into()),
        ]
    }

    fn propagates_id(&self) -> bool {
        true
    }
}

/// Signals stop after counting the call.
pub struct Halt {
    pub calls: Counter,
}

impl Stage for Halt {
    fn process(&mut self, _ctx: &mut Context) -> stagecache::Result<Flow> {
        bump(&self.calls);
        Ok(Flow::Stop)
    }
}

/// Fails with a stage error.
pub struct Explode;

impl Stage for Explode {
    fn process(&mut self, _ctx: &mut Context) -> stagecache::Result<Flow> {
        Err(anyhow::anyhow!("exploded on purpose").into())
    }
}

pub fn input(value: i64) -> Context {
    [("input", json!(value))].into_iter().collect()
}

pub fn with_id(id: &str) -> Context {
    let mut ctx = Context::new();
    ctx.set_content_key("id", id);
    ctx
}
