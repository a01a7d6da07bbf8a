use serde::{Deserialize, Serialize};

use auction_product_core::ProductId;

use crate::Envelope;

/// Payload: fetch one product by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindProduct {
    pub id: ProductId,
}

/// Payload: list products (bounded by the configured limit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindProducts {
    /// Optional caller-requested limit; capped by the service limit.
    #[serde(default)]
    pub limit: Option<u32>,
}

pub type FindProductQuery = Envelope<FindProduct>;
pub type FindProductsQuery = Envelope<FindProducts>;
