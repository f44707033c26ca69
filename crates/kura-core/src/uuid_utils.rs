//! UUID v7 utilities for time-ordered identifiers.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
///
/// IDs generated later sort after earlier ones, so class and classification
/// ids double as creation order.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
