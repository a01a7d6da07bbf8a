use serde::{Deserialize, Serialize};

use auction_product_core::{ProductId, UserId};

use crate::Envelope;

/// Business operation a message belongs to.
///
/// Each operation is bound to exactly one inbound subject and one durable consumer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    FindOne,
    FindMany,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::FindOne,
        Operation::FindMany,
    ];

    /// Suffix used to derive the durable consumer name.
    pub fn consumer_suffix(self) -> &'static str {
        match self {
            Operation::Create => "command-create-product",
            Operation::Update => "command-update-product",
            Operation::Delete => "command-delete-product",
            Operation::FindOne => "query-find-product",
            Operation::FindMany => "query-find-products",
        }
    }

    /// Deterministic consumer name: `<app>-consumer-<suffix>`.
    pub fn consumer_name(self, app_name: &str) -> String {
        format!("{app_name}-consumer-{}", self.consumer_suffix())
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.consumer_suffix())
    }
}

/// Payload: create a product owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub media: Vec<String>,
    /// Declared owner; the service always stamps the caller identity instead.
    #[serde(default)]
    pub owner: Option<UserId>,
}

/// Payload: partial update of a product owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub id: ProductId,
    pub owner: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media: Option<Vec<String>>,
}

/// Payload: delete a product owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProduct {
    pub id: ProductId,
    pub owner: UserId,
}

pub type CreateProductCommand = Envelope<CreateProduct>;
pub type UpdateProductCommand = Envelope<UpdateProduct>;
pub type DeleteProductCommand = Envelope<DeleteProduct>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_names_are_deterministic() {
        assert_eq!(
            Operation::Create.consumer_name("product-service"),
            "product-service-consumer-command-create-product"
        );
        assert_eq!(
            Operation::FindMany.consumer_name("svc"),
            "svc-consumer-query-find-products"
        );
    }

    #[test]
    fn update_payload_fields_default_to_absent() {
        let cmd: UpdateProductCommand = serde_json::from_value(serde_json::json!({
            "key": "k",
            "value": {"id": "p1", "owner": "u1", "name": "NewLamp"}
        }))
        .unwrap();

        assert_eq!(cmd.value.name.as_deref(), Some("NewLamp"));
        assert!(cmd.value.description.is_none());
        assert!(cmd.value.media.is_none());
    }
}
