use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ProductId, UserId};

/// Product snapshot as stored and published.
///
/// The owner is fixed at creation; only the owner may mutate or delete the
/// product (enforced by the store's owner filter, not by this type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Ordered media references (URLs / object keys).
    pub media: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub owner: UserId,
}

impl Product {
    /// Build a not-yet-persisted product with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        media: Vec<String>,
        owner: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ProductId::generate(),
            name: name.into(),
            description: description.into(),
            media,
            created_at,
            updated_at: None,
            owner,
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

/// Partial update: only the fields actually present.
///
/// Store adapters translate this into a parameterized statement touching exactly
/// these columns (plus `updated_at`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Media references to merge (set union, existing order kept).
    pub media: Option<Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

impl ProductPatch {
    /// Empty strings / empty lists count as "not provided".
    pub fn new(
        name: Option<String>,
        description: Option<String>,
        media: Option<Vec<String>>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.filter(|s| !s.is_empty()),
            description: description.filter(|s| !s.is_empty()),
            media: media.filter(|m| !m.is_empty()),
            updated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.media.is_none()
    }

    /// Apply the patch in place (used by in-memory stores).
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(media) = &self.media {
            for item in media {
                if !product.media.contains(item) {
                    product.media.push(item.clone());
                }
            }
        }
        product.updated_at = Some(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp() -> Product {
        Product::new(
            "Lamp",
            "desk lamp",
            vec!["a.png".to_string()],
            UserId::from("u1"),
            Utc::now(),
        )
    }

    #[test]
    fn new_product_has_id_and_no_update_timestamp() {
        let p = lamp();
        assert!(!p.id.is_empty());
        assert!(p.updated_at.is_none());
        assert!(p.is_owned_by(&UserId::from("u1")));
        assert!(!p.is_owned_by(&UserId::from("u2")));
    }

    #[test]
    fn patch_treats_blank_fields_as_absent() {
        let patch = ProductPatch::new(Some(String::new()), None, Some(vec![]), Utc::now());
        assert!(patch.is_empty());

        let patch = ProductPatch::new(Some("NewLamp".into()), None, None, Utc::now());
        assert!(!patch.is_empty());
    }

    #[test]
    fn apply_merges_media_without_duplicates() {
        let mut p = lamp();
        let at = Utc::now();
        let patch = ProductPatch::new(
            Some("NewLamp".into()),
            None,
            Some(vec!["a.png".into(), "b.png".into()]),
            at,
        );

        patch.apply_to(&mut p);

        assert_eq!(p.name, "NewLamp");
        assert_eq!(p.description, "desk lamp");
        assert_eq!(p.media, vec!["a.png".to_string(), "b.png".to_string()]);
        assert_eq!(p.updated_at, Some(at));
    }
}
