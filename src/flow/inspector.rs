//! Data-flow inspection for a single stage.
//!
//! Wrap any stage with [`inspect`] to log which keys it adds to the context
//! and a summary of the shape of the values it reads and writes:
//!
//! ```rust,ignore
//! let chain = Chain::from_stages(stages![inspect(LoadDataset::new(path))])?;
//! ```

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::info;

use super::context::Context;
use super::stage::{Flow, Stage};
use crate::error::Result;
use crate::hashing::Canonical;

/// Default number of levels summarized.
pub const DEFAULT_INSPECT_DEPTH: usize = 3;

/// Mappings wider than this are summarized by their first entry.
const WIDE_MAPPING: usize = 10;

/// Wrap `stage` in an [`Inspector`] that reports on `close`.
pub fn inspect<S: Stage>(stage: S) -> Inspector<S> {
    Inspector::new(stage)
}

/// Stage wrapper collecting statistics about the data flowing through it.
///
/// The wrapper is transparent to hashing: it fingerprints exactly like the
/// stage it wraps.
pub struct Inspector<S> {
    stage: S,
    stream: bool,
    depth: usize,
    calls: u64,
    key_transitions: BTreeMap<String, u64>,
    lengths: BTreeMap<String, u64>,
    structure: Option<Value>,
}

impl<S: Stage> Inspector<S> {
    pub fn new(stage: S) -> Self {
        Self {
            stage,
            stream: false,
            depth: DEFAULT_INSPECT_DEPTH,
            calls: 0,
            key_transitions: BTreeMap::new(),
            lengths: BTreeMap::new(),
            structure: None,
        }
    }

    /// Log after every record instead of once on `close`.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn inner(&self) -> &S {
        &self.stage
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// `"[keys before] -> [keys after]"` occurrence counts.
    pub fn key_transitions(&self) -> &BTreeMap<String, u64> {
        &self.key_transitions
    }

    /// `"key: length"` occurrence counts for relevant values.
    pub fn lengths(&self) -> &BTreeMap<String, u64> {
        &self.lengths
    }

    /// Structure summary captured from the first record since the last report.
    pub fn structure(&self) -> Option<&Value> {
        self.structure.as_ref()
    }

    fn relevant_keys(&self) -> Vec<String> {
        let mut keys = self.stage.requires();
        keys.extend(self.stage.provides());
        keys
    }

    /// Values named in `requires`/`provides`, or the whole context when the
    /// stage declares neither.
    fn relevant_data(&self, ctx: &Context) -> Map<String, Value> {
        let keys = self.relevant_keys();
        if keys.is_empty() {
            return ctx.as_map().clone();
        }
        keys.into_iter()
            .filter_map(|key| ctx.get(&key).cloned().map(|value| (key, value)))
            .collect()
    }

    fn summarize(&self, data: &Value, level: usize) -> Value {
        if level >= self.depth {
            return match data {
                Value::Object(map) if map.len() > WIDE_MAPPING => match map.iter().next() {
                    Some((key, value)) => json!({
                        format!("{} keys of type string; ex: ({})", map.len(), key):
                            format!("{} ({})", json_type(value), value)
                    }),
                    None => Value::Object(Map::new()),
                },
                Value::Array(items) => match items.first() {
                    Some(first) => Value::String(format!("[list of {}]", json_type(first))),
                    None => Value::String("[empty]".to_string()),
                },
                other => other.clone(),
            };
        }

        match data {
            Value::Array(items) => match items.first() {
                Some(first) => json!({
                    format!("[len={}]", items.len()): self.summarize(first, level + 1)
                }),
                None => json!({ "[]": "empty" }),
            },
            Value::Object(map) if map.len() > WIDE_MAPPING => match map.iter().next() {
                Some((key, value)) => json!({
                    format!("string#{} times ({})", map.len(), key):
                        self.summarize(value, level + 1)
                }),
                None => Value::Object(Map::new()),
            },
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.summarize(v, level + 1)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn report(&mut self) {
        info!(stage = %self.stage.name(), calls = self.calls, "Data flow structure");
        if let Some(structure) = self.structure.take() {
            let rendered =
                serde_json::to_string_pretty(&structure).unwrap_or_else(|_| structure.to_string());
            info!("{}", rendered);
        }
        for (transition, count) in &self.key_transitions {
            info!(count, "keys {}", transition);
        }
        for (length, count) in &self.lengths {
            info!(count, "length {}", length);
        }
        info!("End of data flow structure");
    }
}

impl<S: Stage> Stage for Inspector<S> {
    fn process(&mut self, ctx: &mut Context) -> Result<Flow> {
        self.calls += 1;
        let pre_keys: Vec<String> = ctx.keys().cloned().collect();
        let flow = self.stage.process(ctx)?;
        let post_keys: Vec<String> = ctx.keys().cloned().collect();

        *self
            .key_transitions
            .entry(format!("{:?} -> {:?}", pre_keys, post_keys))
            .or_default() += 1;

        let relevant = self.relevant_data(ctx);
        for (key, value) in &relevant {
            let len = match value {
                Value::Array(items) => Some(items.len()),
                Value::Object(map) => Some(map.len()),
                Value::String(s) => Some(s.chars().count()),
                _ => None,
            };
            if let Some(len) = len {
                *self.lengths.entry(format!("{}: {}", key, len)).or_default() += 1;
            }
        }

        if self.structure.is_none() {
            self.structure = Some(self.summarize(&Value::Object(relevant), 0));
        }

        if self.stream {
            self.report();
        }
        Ok(flow)
    }

    fn name(&self) -> String {
        self.stage.name()
    }

    fn class_name(&self) -> &'static str {
        self.stage.class_name()
    }

    fn requires(&self) -> Vec<String> {
        self.stage.requires()
    }

    fn provides(&self) -> Vec<String> {
        self.stage.provides()
    }

    fn canonical(&self) -> Canonical {
        self.stage.canonical()
    }

    fn propagates_id(&self) -> bool {
        self.stage.propagates_id()
    }

    fn modified(&self) -> Option<SystemTime> {
        self.stage.modified()
    }

    fn close(&mut self) {
        self.stage.close();
        if !self.stream {
            self.report();
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
