pub mod chain;
pub mod context;
pub mod inspector;
pub mod stage;

pub use chain::{Chain, ChainOptions, ChainScope, StageTiming};
pub use context::{Context, DEFAULT_CONTENT_KEY};
pub use inspector::{inspect, Inspector};
pub use stage::{short_type_name, stage_fn, Flow, FnStage, Stage};
