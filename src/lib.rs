#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::float_cmp,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]

//! pagepilot drives a remote browser through a JSON action DSL on behalf of
//! an LLM agent. It resolves ambiguous, LLM-authored element references into
//! high-confidence element indices against a volatile page, rewrites action
//! batches accordingly, and executes them against an external automation
//! server with structured retry and async task orchestration.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod dom;
pub mod normalize;
pub mod optimizer;
pub mod resolver;
pub mod tasks;

pub use catalog::{CatalogEntry, CatalogLookup, ElementCatalog};
pub use config::Config;
pub use dispatch::{DispatchClient, ExecutionError, ExecutionResult, Observation, Transport};
pub use dom::{DomLookup, DomSnapshotNode};
pub use optimizer::{optimize_actions, ActionKind, ActionOptimizer};
pub use resolver::{IndexResolution, ResolutionSource};
pub use tasks::{PageFetcher, TaskManager, TaskSnapshot, TaskStatus};
