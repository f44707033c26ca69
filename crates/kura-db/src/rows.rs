//! Row-to-model mapping shared by the repositories.

use sqlx::postgres::PgRow;
use sqlx::Row;

use kura_core::{Classification, ClassificationScheme, Error, LocalClass, Result};

/// Column list for `local_class` reads, qualified with alias `c`.
pub(crate) const CLASS_COLUMNS: &str = "c.id, c.label_primary, c.label_secondary, c.local_number, \
     c.description, c.parent_id, c.preferred_classification_id, c.sort_order, \
     c.created_at_utc, c.updated_at_utc";

/// Column list for `classification` reads, qualified with alias `k`.
pub(crate) const CLASSIFICATION_COLUMNS: &str =
    "k.id, k.scheme, k.uri, k.label_primary, k.label_secondary, k.kind, k.created_at_utc";

/// Root and child ordering: sort_order (nulls first), local_number in byte order
/// (nulls last), id. Byte order keeps this identical to the in-memory catalog.
pub(crate) const TREE_ORDER: &str =
    "c.sort_order ASC NULLS FIRST, c.local_number COLLATE \"C\" ASC NULLS LAST, c.id ASC";

pub(crate) fn class_from_row(r: &PgRow) -> LocalClass {
    LocalClass {
        id: r.get("id"),
        label_primary: r.get("label_primary"),
        label_secondary: r.get("label_secondary"),
        local_number: r.get("local_number"),
        description: r.get("description"),
        parent_id: r.get("parent_id"),
        preferred_classification_id: r.get("preferred_classification_id"),
        sort_order: r.get("sort_order"),
        created_at_utc: r.get("created_at_utc"),
        updated_at_utc: r.get("updated_at_utc"),
    }
}

pub(crate) fn classification_from_row(r: &PgRow) -> Result<Classification> {
    let scheme: String = r.get("scheme");
    let scheme = scheme
        .parse::<ClassificationScheme>()
        .map_err(Error::Internal)?;
    Ok(Classification {
        id: r.get("id"),
        scheme,
        uri: r.get("uri"),
        label_primary: r.get("label_primary"),
        label_secondary: r.get("label_secondary"),
        kind: r.get("kind"),
        created_at_utc: r.get("created_at_utc"),
    })
}
