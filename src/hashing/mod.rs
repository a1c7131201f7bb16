pub mod canonical;
pub mod fingerprint;

pub use canonical::{Canonical, CanonicalObject};
pub use fingerprint::{sha256_hex, Fingerprinter, DEFAULT_MAX_DEPTH};
