//! Core data models for the classification index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// LOCAL CLASSES
// =============================================================================

/// A node in the project's own classification tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LocalClass {
    pub id: Uuid,
    /// Primary-language label (English).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_primary: Option<String>,
    /// Secondary-language label (Japanese).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_secondary: Option<String>,
    /// Human-facing catalog code, e.g. "C-012".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parent class ID (None = root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Classification designated as canonical for interchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_classification_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl LocalClass {
    /// Title shown in breadcrumbs and search results.
    ///
    /// Falls back from the secondary label to the primary label, then to the
    /// local number, then to the id.
    pub fn display_title(&self) -> String {
        self.label_secondary
            .as_deref()
            .or(self.label_primary.as_deref())
            .or(self.local_number.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One row of the closure index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
pub struct ClosureEdge {
    pub ancestor_id: Uuid,
    pub descendant_id: Uuid,
    /// Path length along parent links (0 = self).
    pub depth: i32,
}

impl ClosureEdge {
    pub fn new(ancestor_id: Uuid, descendant_id: Uuid, depth: i32) -> Self {
        Self {
            ancestor_id,
            descendant_id,
            depth,
        }
    }

    pub fn is_self(&self) -> bool {
        self.depth == 0
    }
}

/// Trim a label, mapping blank input to `None`.
pub fn normalize_label(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn require_label(primary: &Option<String>, secondary: &Option<String>) -> Result<()> {
    if primary.is_none() && secondary.is_none() {
        return Err(Error::InvalidInput(
            "a local class needs at least one non-empty label".to_string(),
        ));
    }
    Ok(())
}

/// Request to create a new local class.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateLocalClassRequest {
    #[serde(default)]
    pub label_primary: Option<String>,
    #[serde(default)]
    pub label_secondary: Option<String>,
    #[serde(default)]
    pub local_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Parent to create the class under (None = new root).
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

impl CreateLocalClassRequest {
    /// Convenience constructor for a class with a primary label only.
    pub fn labeled(label: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        Self {
            label_primary: Some(label.into()),
            parent_id,
            ..Default::default()
        }
    }

    /// Trim text fields and enforce the at-least-one-label rule.
    pub fn normalized(self) -> Result<Self> {
        let req = Self {
            label_primary: normalize_label(self.label_primary),
            label_secondary: normalize_label(self.label_secondary),
            local_number: normalize_label(self.local_number),
            description: normalize_label(self.description),
            ..self
        };
        require_label(&req.label_primary, &req.label_secondary)?;
        Ok(req)
    }
}

/// Parent change carried by an update request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParentUpdate {
    /// Leave the parent unchanged.
    #[default]
    Keep,
    /// Detach to a root.
    Root,
    /// Move under the given class.
    Under(Uuid),
}

/// Request to update the descriptive fields of a local class.
///
/// Text fields replace the stored values; a parent change is routed through
/// the hierarchy maintainer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UpdateLocalClassRequest {
    #[serde(default)]
    pub label_primary: Option<String>,
    #[serde(default)]
    pub label_secondary: Option<String>,
    #[serde(default)]
    pub local_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub parent: ParentUpdate,
}

impl UpdateLocalClassRequest {
    pub fn normalized(self) -> Result<Self> {
        let req = Self {
            label_primary: normalize_label(self.label_primary),
            label_secondary: normalize_label(self.label_secondary),
            local_number: normalize_label(self.local_number),
            description: normalize_label(self.description),
            ..self
        };
        require_label(&req.label_primary, &req.label_secondary)?;
        Ok(req)
    }
}

/// Direction for reordering root classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

impl std::fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

impl std::str::FromStr for MoveDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            _ => Err(format!("Invalid move direction: {}", s)),
        }
    }
}

// =============================================================================
// EXTERNAL CLASSIFICATIONS
// =============================================================================

/// Controlled vocabulary an external classification comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationScheme {
    /// Getty Art & Architecture Thesaurus.
    Aat,
    Wikidata,
}

impl ClassificationScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aat => "aat",
            Self::Wikidata => "wikidata",
        }
    }
}

impl std::fmt::Display for ClassificationScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClassificationScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aat" => Ok(Self::Aat),
            "wikidata" => Ok(Self::Wikidata),
            _ => Err(format!("Invalid classification scheme: {}", s)),
        }
    }
}

/// Default `kind` for classifications created through linking.
pub const DEFAULT_CLASSIFICATION_KIND: &str = "concept";

/// A record from an external controlled vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Classification {
    pub id: Uuid,
    pub scheme: ClassificationScheme,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_primary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_secondary: Option<String>,
    pub kind: String,
    pub created_at_utc: DateTime<Utc>,
}

/// Association between a local class and an external classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LocalClassLink {
    pub local_class_id: Uuid,
    pub classification_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub created_at_utc: DateTime<Utc>,
}

/// A classification as seen from one of its linked local classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LinkedClassification {
    #[serde(flatten)]
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// True when this is the class's preferred external link.
    pub preferred: bool,
}

/// Request to link a local class to an external authority record,
/// creating the record if it is not in the catalog yet.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LinkExternalRequest {
    pub scheme: String,
    pub uri: String,
    #[serde(default)]
    pub label_primary: Option<String>,
    #[serde(default)]
    pub label_secondary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Validated form of [`LinkExternalRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    pub scheme: ClassificationScheme,
    pub uri: String,
    pub label_primary: Option<String>,
    pub label_secondary: Option<String>,
    pub confidence: Option<f32>,
}

impl LinkExternalRequest {
    pub fn new(scheme: &str, uri: &str, label: Option<&str>) -> Self {
        Self {
            scheme: scheme.to_string(),
            uri: uri.to_string(),
            label_primary: label.map(str::to_string),
            label_secondary: None,
            confidence: None,
        }
    }

    pub fn validate(self) -> Result<ExternalRecord> {
        let scheme = self
            .scheme
            .parse::<ClassificationScheme>()
            .map_err(Error::InvalidInput)?;
        let uri = self.uri.trim().to_string();
        if uri.is_empty() {
            return Err(Error::InvalidInput(
                "classification uri must not be empty".to_string(),
            ));
        }
        let confidence = validate_confidence(self.confidence)?;
        Ok(ExternalRecord {
            scheme,
            uri,
            label_primary: normalize_label(self.label_primary),
            label_secondary: normalize_label(self.label_secondary),
            confidence,
        })
    }
}

/// Confidence scores live in [0, 1].
pub fn validate_confidence(confidence: Option<f32>) -> Result<Option<f32>> {
    match confidence {
        Some(c) if !(0.0..=1.0).contains(&c) => Err(Error::InvalidInput(format!(
            "confidence must be within [0, 1], got {}",
            c
        ))),
        other => Ok(other),
    }
}

// =============================================================================
// READ MODELS
// =============================================================================

/// Direct and total object counts for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClassCounts {
    pub class_id: Uuid,
    /// Objects assigned exactly to this class.
    pub direct: i64,
    /// Objects assigned to this class or any descendant.
    pub total: i64,
}

/// One ancestor in a breadcrumb trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BreadcrumbEntry {
    pub id: Uuid,
    pub title: String,
    /// Distance from the class the breadcrumb was built for.
    pub depth: i32,
}

/// Search hit with breadcrumb and counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClassSearchHit {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_primary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_secondary: Option<String>,
    /// Ancestor titles, root first.
    pub parent_path: Vec<String>,
    pub object_count_direct: i64,
    pub object_count_total: i64,
    pub display: String,
}

/// Everything the class detail view needs in one read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClassDetail {
    pub class: LocalClass,
    pub breadcrumb: Vec<BreadcrumbEntry>,
    pub counts: ClassCounts,
    pub children: Vec<LocalClass>,
    pub links: Vec<LinkedClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred: Option<Classification>,
}

/// Result of comparing the stored closure index against parent links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClosureReport {
    pub node_count: i64,
    pub edge_count: i64,
    /// Edges implied by parent links but absent from the index.
    pub missing: Vec<ClosureEdge>,
    /// Edges present in the index without a parent-chain path.
    pub unexpected: Vec<ClosureEdge>,
}

impl ClosureReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}
