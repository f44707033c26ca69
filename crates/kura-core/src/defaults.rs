//! Centralized default constants for the classification index.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// SEARCH
// =============================================================================

/// Maximum characters kept from a raw search term.
pub const SEARCH_TERM_MAX_LEN: usize = 64;

/// Maximum candidate classes considered per search.
pub const SEARCH_LIMIT: i64 = 50;

// =============================================================================
// LISTING
// =============================================================================

/// Default number of directly assigned object ids returned for a class.
pub const DIRECT_OBJECTS_LIMIT: i64 = 500;

// =============================================================================
// HIERARCHY MAINTENANCE
// =============================================================================

/// Attempts a hierarchy mutation makes to lock a stable ancestor set before
/// giving up with a conflict.
pub const HIERARCHY_MAX_ATTEMPTS: u32 = 3;

/// Batch size for closure rows written during a rebuild.
pub const CLOSURE_REBUILD_BATCH: usize = 1000;
