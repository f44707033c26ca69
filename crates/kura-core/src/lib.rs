//! # kura-core
//!
//! Core types, traits, and the closure-table algebra for the kura
//! hierarchical classification index.
//!
//! This crate provides the data model shared by the storage and HTTP
//! crates, the repository traits they implement, and [`MemoryCatalog`], an
//! in-memory implementation of every trait.
//!
//! ## Log Level Contract
//!
//! Events carry `subsystem`, `component` and `op` fields plus the ids they
//! concern (`class_id`, `parent_id`, `classification_id`).
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (e.g. dangling preferred link) |
//! | INFO  | Lifecycle events, committed hierarchy mutations |
//! | DEBUG | Rejected mutations, decision points |
//! | TRACE | Per-edge and per-row detail |

pub mod closure;
pub mod defaults;
pub mod error;
pub mod memory;
pub mod models;
pub mod search;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use closure::{ClosureDelta, ClosureTable, ParentMap};
pub use error::{Error, Result};
pub use memory::MemoryCatalog;
pub use models::*;
pub use search::{display_string, escape_like, rank_hits, sanitize_search_term};
pub use traits::*;
pub use uuid_utils::new_v7;
