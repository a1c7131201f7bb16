//! Pipeline executor with a content-addressable result cache.
//!
//! A [`Chain`] runs [`Stage`]s over a shared [`Context`]. A [`PickleCache`]
//! wraps a sub-chain and stores its result on disk, keyed by the content
//! key value and a structural fingerprint of the wrapped stages' settings.
//! A [`CachingChain`] propagates that identity through the pipeline and
//! resumes from the latest cached stage.

pub mod cache;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod flow;
pub mod hashing;
pub mod logging;
pub mod xdg;

pub use cache::{combine_id, CacheOptions, CachingChain, PickleCache};
pub use config::StagecacheConfig;
pub use error::{FlowError, Result};
pub use flow::{inspect, stage_fn, Chain, ChainOptions, Context, Flow, Inspector, Stage};
pub use hashing::{Canonical, CanonicalObject, Fingerprinter};
