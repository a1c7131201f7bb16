use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Default name of the content key field.
pub const DEFAULT_CONTENT_KEY: &str = "id";

/// Mutable key/value record passed by reference through every stage of one
/// `process` call.
///
/// Values are JSON values so a context can be snapshotted into a cache entry
/// and replayed later. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Read an integer value, `None` when absent or not an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Insert or overwrite a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every key of `other` into this context, overwriting existing keys.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.entries
    }

    /// The string stored under the content key field `field`.
    ///
    /// Hashing-aware stages require it to be present and string valued.
    pub fn content_key(&self, field: &str) -> Result<&str> {
        match self.entries.get(field) {
            None => Err(FlowError::MissingContentKey {
                key: field.to_string(),
            }),
            Some(Value::String(id)) => Ok(id),
            Some(_) => Err(FlowError::ContentKeyNotString {
                key: field.to_string(),
            }),
        }
    }

    pub fn set_content_key(&mut self, field: &str, id: impl Into<String>) {
        self.entries
            .insert(field.to_string(), Value::String(id.into()));
    }
}

impl From<Map<String, Value>> for Context {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

impl<K, V> FromIterator<(K, V)> for Context
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites() {
        let mut ctx: Context = [("input", json!(10)), ("output", json!(1))]
            .into_iter()
            .collect();
        let mut stored = Map::new();
        stored.insert("output".to_string(), json!(23));
        stored.insert("extra".to_string(), json!("x"));

        ctx.merge(&stored);

        assert_eq!(ctx.get_i64("output"), Some(23));
        assert_eq!(ctx.get_str("extra"), Some("x"));
        assert_eq!(ctx.get_i64("input"), Some(10));
    }

    #[test]
    fn test_content_key_must_be_string() {
        let mut ctx = Context::new();
        assert!(matches!(
            ctx.content_key("id"),
            Err(FlowError::MissingContentKey { .. })
        ));

        ctx.set("id", 5);
        assert!(matches!(
            ctx.content_key("id"),
            Err(FlowError::ContentKeyNotString { .. })
        ));

        ctx.set_content_key("id", "/data/train.csv");
        assert_eq!(ctx.content_key("id").unwrap(), "/data/train.csv");
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let ctx: Context = [("b", json!(2)), ("a", json!(1))].into_iter().collect();
        assert_eq!(serde_json::to_string(&ctx).unwrap(), r#"{"a":1,"b":2}"#);
    }
}
