//! Structural fingerprinting of stages and stage lists.
//!
//! A fingerprint is the SHA-256 of one byte image built by walking a
//! [`Canonical`] tree:
//!
//! - strings and bytes: class tag followed by the raw bytes
//! - objects: class tag, optional callable name, then every non-exempt field
//!   as `image(name) + image(value)` in field-name order
//! - maps: class tag, then `image(key) + image(value)` in key order
//! - sequences: class tag, then `image(index) + image(item)` in iteration order
//!
//! Scalars have no structural image and go through the flat fallback.
//! Anything below `max_depth` contributes nothing.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::canonical::Canonical;
use crate::flow::Stage;

/// Recursion limit used when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Error)]
enum DumpError {
    #[error("{0} has no structural image")]
    NotStructured(String),

    #[error("value cannot be hashed: {0}")]
    Unhashable(String),
}

/// Builds byte images and digests of canonical trees.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    max_depth: usize,
    debug_level: u8,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Fingerprinter {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            debug_level: 0,
        }
    }

    /// 0 is silent, 1 logs the top level digest, 2 traces every node.
    pub fn with_debug_level(mut self, debug_level: u8) -> Self {
        self.debug_level = debug_level;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Full byte image of `obj`, before digesting.
    pub fn image(&self, obj: &Canonical) -> Vec<u8> {
        let mut out = Vec::new();
        self.append(obj, 0, &mut out);
        out
    }

    /// Hex encoded SHA-256 of the image of `obj`.
    pub fn fingerprint(&self, obj: &Canonical) -> String {
        let image = self.image(obj);
        let digest = sha256_hex(&image);
        if self.debug_level > 0 {
            debug!(
                operation = "fingerprint",
                image_bytes = image.len(),
                digest = %digest,
                "image is {}",
                String::from_utf8_lossy(&image)
            );
        }
        digest
    }

    /// Fingerprint of an ordered stage list. Order is significant.
    pub fn fingerprint_stages<'a, I>(&self, stages: I) -> String
    where
        I: IntoIterator<Item = &'a dyn Stage>,
    {
        let list = Canonical::Seq(stages.into_iter().map(|s| s.canonical()).collect());
        self.fingerprint(&list)
    }

    /// Append the image of `obj`, degrading to the flat image and finally to
    /// nothing when a value cannot be described.
    fn append(&self, obj: &Canonical, level: usize, out: &mut Vec<u8>) {
        match self.structural(obj, level) {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(_) => match flat(obj) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => {
                    warn!(
                        operation = "fingerprint",
                        class = obj.class_tag(),
                        level,
                        "skipping value in fingerprint: {}",
                        e
                    );
                }
            },
        }
    }

    fn structural(&self, obj: &Canonical, level: usize) -> Result<Vec<u8>, DumpError> {
        if level > self.max_depth {
            return Ok(Vec::new());
        }

        let mut out = obj.class_tag().as_bytes().to_vec();
        if self.debug_level >= 2 {
            trace!(level, class = obj.class_tag(), "fingerprint node");
        }

        match obj {
            Canonical::Str(s) => out.extend_from_slice(s.as_bytes()),
            Canonical::Bytes(b) => out.extend_from_slice(b),
            Canonical::Object(object) => {
                if let Some(name) = &object.name {
                    out.extend_from_slice(name.as_bytes());
                }
                for (name, value) in object.hashed_fields() {
                    if self.debug_level >= 2 {
                        trace!(level, attribute = %name, "fingerprint attribute");
                    }
                    self.append(&Canonical::Str(name.clone()), level + 1, &mut out);
                    self.append(value, level + 1, &mut out);
                }
            }
            Canonical::Map(map) => {
                for (key, value) in map {
                    self.append(&Canonical::Str(key.clone()), level + 1, &mut out);
                    self.append(value, level + 1, &mut out);
                }
            }
            Canonical::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.append(&Canonical::Str(i.to_string()), level + 1, &mut out);
                    self.append(item, level + 1, &mut out);
                }
            }
            Canonical::Unhashable(reason) => return Err(DumpError::Unhashable(reason.clone())),
            Canonical::Null | Canonical::Bool(_) | Canonical::Int(_) | Canonical::Float(_) => {
                return Err(DumpError::NotStructured(obj.class_tag().to_string()))
            }
        }

        Ok(out)
    }
}

/// Last resort image: type tag plus a fixed binary encoding of scalars.
fn flat(obj: &Canonical) -> Result<Vec<u8>, DumpError> {
    let mut out = obj.class_tag().as_bytes().to_vec();
    match obj {
        Canonical::Null => {}
        Canonical::Bool(b) => out.push(u8::from(*b)),
        Canonical::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
        Canonical::Float(x) => out.extend_from_slice(&x.to_bits().to_le_bytes()),
        Canonical::Str(s) => out.extend_from_slice(s.as_bytes()),
        Canonical::Bytes(b) => out.extend_from_slice(b),
        Canonical::Unhashable(reason) => return Err(DumpError::Unhashable(reason.clone())),
        Canonical::Seq(_) | Canonical::Map(_) | Canonical::Object(_) => {
            return Err(DumpError::Unhashable(format!(
                "no flat image for {}",
                obj.class_tag()
            )))
        }
    }
    Ok(out)
}

/// Hex encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::CanonicalObject;

    fn module(attr1: i64, attr2: i64, attr3: i64) -> Canonical {
        CanonicalObject::new("TestModule")
            .field("attr1", attr1)
            .field("attr2", attr2)
            .field("attr3", attr3)
            .exempt(["attr3"])
            .into()
    }

    #[test]
    fn test_string_image_is_tag_and_bytes() {
        let fp = Fingerprinter::default();
        assert_eq!(fp.image(&Canonical::from("abc")), b"strabc".to_vec());
    }

    #[test]
    fn test_exempt_fields_do_not_change_fingerprint() {
        let fp = Fingerprinter::default();
        assert_eq!(
            fp.fingerprint(&module(12, 14, 18)),
            fp.fingerprint(&module(12, 14, 20))
        );
        assert_ne!(
            fp.fingerprint(&module(12, 14, 18)),
            fp.fingerprint(&module(12, 12, 18))
        );
    }

    #[test]
    fn test_field_declaration_order_is_irrelevant() {
        let fp = Fingerprinter::default();
        let a: Canonical = CanonicalObject::new("M").field("x", 1).field("y", 2).into();
        let b: Canonical = CanonicalObject::new("M").field("y", 2).field("x", 1).into();
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_sequence_order_matters() {
        let fp = Fingerprinter::default();
        let a = Canonical::Seq(vec![module(1, 2, 3), module(4, 5, 6)]);
        let b = Canonical::Seq(vec![module(4, 5, 6), module(1, 2, 3)]);
        assert_ne!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_class_name_matters() {
        let fp = Fingerprinter::default();
        let add: Canonical = CanonicalObject::new("Add").field("val", 13).into();
        let mult: Canonical = CanonicalObject::new("Mult").field("val", 13).into();
        assert_ne!(fp.fingerprint(&add), fp.fingerprint(&mult));
    }

    #[test]
    fn test_callable_name_matters() {
        let fp = Fingerprinter::default();
        let a: Canonical = CanonicalObject::new("function").named("load").into();
        let b: Canonical = CanonicalObject::new("function").named("save").into();
        assert_ne!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_unhashable_field_is_skipped() {
        let fp = Fingerprinter::default();
        let with_bad: Canonical = CanonicalObject::new("M")
            .field("x", 1)
            .field("bad", Canonical::Unhashable("socket".to_string()))
            .into();
        let image = fp.image(&with_bad);
        // name of the skipped field is still part of the image, its value is not
        assert!(image.windows(6).any(|w| w == b"strbad"));
        assert!(!image.windows(6).any(|w| w == b"socket"));
    }

    #[test]
    fn test_depth_guard_bounds_image() {
        let mut nested = Canonical::from("leaf");
        for _ in 0..50 {
            nested = Canonical::Seq(vec![nested]);
        }
        let shallow = Fingerprinter::new(2).image(&nested);
        let deep = Fingerprinter::new(20).image(&nested);
        assert!(shallow.len() < deep.len());
        assert!(!shallow.windows(4).any(|w| w == b"leaf"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let digest = Fingerprinter::default().fingerprint(&Canonical::from("x"));
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_hex(b"strx"));
    }
}
