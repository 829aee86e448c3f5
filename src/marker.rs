use crate::models::{CustomAttribute, OrderDraft};
use chrono::{DateTime, SecondsFormat, Utc};

pub const DEFAULT_MARKER_TAG: &str = "AI_GENERATED";
pub const SOURCE_KEY: &str = "source";
pub const SOURCE_VALUE: &str = "synthetic_data";
pub const GENERATED_AT_KEY: &str = "generated_at";
pub const ORDERED_AT_KEY: &str = "ordered_at";

/// Stable tag stamped on every synthetic entity and used to find it again for
/// clear/reset. One value per process, passed to the applier and the lifecycle
/// manager at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    tag: String,
}

impl Marker {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Search expression for the orders index.
    pub fn order_query(&self) -> String {
        format!("tag:{}", self.tag)
    }

    /// Reference document URI attached to inventory adjustments.
    pub fn reference_uri(&self, adjustment_id: &str) -> String {
        format!("gid://synthstore/{}/InventoryAdjustment/{adjustment_id}", self.tag)
    }

    pub fn matches_tags(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| tag.trim() == self.tag)
    }

    /// Adds the marker tag and the `source`/`generated_at` attributes in place.
    /// Re-stamping is harmless: the tag is not duplicated and attributes are
    /// overwritten rather than appended.
    pub fn stamp_order(&self, draft: &mut OrderDraft, generated_at: DateTime<Utc>) {
        if !self.matches_tags(&draft.tags) {
            draft.tags.push(self.tag.clone());
        }
        upsert_attribute(&mut draft.custom_attributes, SOURCE_KEY, SOURCE_VALUE);
        upsert_attribute(
            &mut draft.custom_attributes,
            GENERATED_AT_KEY,
            &generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let ordered_at = draft.created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        upsert_attribute(&mut draft.custom_attributes, ORDERED_AT_KEY, &ordered_at);
    }

    pub fn is_stamped(&self, draft: &OrderDraft) -> bool {
        self.matches_tags(&draft.tags)
            && draft
                .custom_attributes
                .iter()
                .any(|attr| attr.key == SOURCE_KEY && attr.value == SOURCE_VALUE)
            && draft
                .custom_attributes
                .iter()
                .any(|attr| attr.key == GENERATED_AT_KEY)
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_TAG)
    }
}

fn upsert_attribute(attributes: &mut Vec<CustomAttribute>, key: &str, value: &str) {
    match attributes.iter_mut().find(|attr| attr.key == key) {
        Some(existing) => existing.value = value.to_string(),
        None => attributes.push(CustomAttribute {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
