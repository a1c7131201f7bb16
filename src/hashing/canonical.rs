use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Structural view of a stage (or anything a stage holds) used for
/// fingerprinting.
///
/// Stages describe themselves as a tree of these values instead of being
/// reflected on at runtime. Scalars have no structural view and are hashed
/// through the flat fallback; `Unhashable` marks a value that could not be
/// described at all and is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Ordered sequence, hashed in iteration order.
    Seq(Vec<Canonical>),
    /// Mapping, hashed in key order.
    Map(BTreeMap<String, Canonical>),
    Object(CanonicalObject),
    Unhashable(String),
}

/// An object with a class, an optional callable name and named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalObject {
    pub class: String,
    /// Distinguishes callables sharing a class (closure stages).
    pub name: Option<String>,
    pub fields: Vec<(String, Canonical)>,
    /// Field names excluded from hashing.
    pub exempt: Vec<String>,
}

impl CanonicalObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: None,
            fields: Vec::new(),
            exempt: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Canonical>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn exempt<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt.extend(names.into_iter().map(Into::into));
        self
    }

    /// Fields that take part in hashing, sorted by name.
    pub fn hashed_fields(&self) -> Vec<&(String, Canonical)> {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .filter(|(name, _)| !self.exempt.iter().any(|e| e == name))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    }
}

impl Canonical {
    /// Describe any serializable value. Serialization failures produce
    /// `Unhashable` rather than an error.
    pub fn serialized<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::from(value),
            Err(e) => Self::Unhashable(e.to_string()),
        }
    }

    /// Type tag written in front of every hashed node.
    pub fn class_tag(&self) -> &str {
        match self {
            Self::Null => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Seq(_) => "list",
            Self::Map(_) => "dict",
            Self::Object(obj) => &obj.class,
            Self::Unhashable(_) => "unhashable",
        }
    }
}

impl From<CanonicalObject> for Canonical {
    fn from(obj: CanonicalObject) -> Self {
        Self::Object(obj)
    }
}

impl From<bool> for Canonical {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Canonical {
            fn from(v: $t) -> Self {
                Self::Int(v as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Canonical {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Int)
    }
}

impl From<usize> for Canonical {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<f32> for Canonical {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for Canonical {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Canonical {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Canonical {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&String> for Canonical {
    fn from(v: &String) -> Self {
        Self::Str(v.clone())
    }
}

impl<T: Into<Canonical>> From<Vec<T>> for Canonical {
    fn from(v: Vec<T>) -> Self {
        Self::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Canonical>> From<Option<T>> for Canonical {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Canonical>> From<BTreeMap<String, T>> for Canonical {
    fn from(v: BTreeMap<String, T>) -> Self {
        Self::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<Value> for Canonical {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::Seq(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for Canonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Bytes(b) => write!(f, "b'{}'", hex::encode(b)),
            Self::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Self::Object(obj) => {
                write!(f, "{}", obj.class)?;
                if let Some(name) = &obj.name {
                    write!(f, ":{}", name)?;
                }
                write!(f, "(")?;
                for (i, (key, value)) in obj.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", key, value)?;
                }
                write!(f, ")")
            }
            Self::Unhashable(reason) => write!(f, "<unhashable: {}>", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hashed_fields_are_sorted_and_filtered() {
        let obj = CanonicalObject::new("TestModule")
            .field("attr3", 18)
            .field("attr1", 12)
            .field("attr2", 14)
            .exempt(["attr3"]);

        let names: Vec<&str> = obj
            .hashed_fields()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["attr1", "attr2"]);
    }

    #[test]
    fn test_from_json_value() {
        let canonical = Canonical::from(json!({"b": [1, 2.5], "a": null}));
        let Canonical::Map(map) = canonical else {
            panic!("expected a map");
        };
        assert_eq!(map["a"], Canonical::Null);
        assert_eq!(
            map["b"],
            Canonical::Seq(vec![Canonical::Int(1), Canonical::Float(2.5)])
        );
    }

    #[test]
    fn test_display_object() {
        let obj: Canonical = CanonicalObject::new("Add").field("val", 13).into();
        assert_eq!(obj.to_string(), "Add(val=13)");
    }
}
