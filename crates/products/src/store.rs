//! Entity Store Port.
//!
//! The store owns product instances; callers never cache them across requests.
//! Correctness under concurrency comes from the store's own constraints
//! (unique id, unique `(owner, name)`, owner filter on writes), not from
//! in-process locking.
//!
//! ## Command keys
//!
//! Creates and updates carry the key of the inbound command. The store keeps the
//! key of the last write applied to each product; a write whose key matches it is
//! a redelivery and returns the stored snapshot untouched. `None` disables the
//! check.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use auction_product_core::{Classify, ErrorKind, Product, ProductId, ProductPatch, UserId};

/// Store operation error.
///
/// Two conditions are distinguishable by callers (conflict, not-found); every
/// other failure is a backend error and is treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("product not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        if self.is_conflict() {
            ErrorKind::Conflict
        } else if self.is_not_found() {
            ErrorKind::NotFound
        } else {
            ErrorKind::Internal
        }
    }
}

/// CRUD persistence for products.
///
/// Writes return the post-mutation snapshot as persisted, so generated fields
/// (timestamps, identifiers) are authoritative.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert a new product. Duplicate id or `(owner, name)` is a conflict,
    /// unless the owner's product was created by the same `command_key`.
    async fn create(
        &self,
        product: Product,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError>;

    /// Apply `patch` to the product `id` owned by `owner`.
    ///
    /// A product owned by someone else is reported as not found. A product whose
    /// last write carried `command_key` is returned unchanged.
    async fn update(
        &self,
        id: &ProductId,
        owner: &UserId,
        patch: ProductPatch,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError>;

    /// Remove the product `id` owned by `owner`, returning the removed snapshot.
    async fn delete(&self, id: &ProductId, owner: &UserId) -> Result<Product, StoreError>;

    async fn find_one(&self, id: &ProductId) -> Result<Product, StoreError>;

    /// At most `limit` products, oldest first. No match is an empty list.
    async fn find_all(&self, limit: u32) -> Result<Vec<Product>, StoreError>;
}

#[async_trait]
impl<S> ProductStore for Arc<S>
where
    S: ProductStore + ?Sized,
{
    async fn create(
        &self,
        product: Product,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        (**self).create(product, command_key).await
    }

    async fn update(
        &self,
        id: &ProductId,
        owner: &UserId,
        patch: ProductPatch,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        (**self).update(id, owner, patch, command_key).await
    }

    async fn delete(&self, id: &ProductId, owner: &UserId) -> Result<Product, StoreError> {
        (**self).delete(id, owner).await
    }

    async fn find_one(&self, id: &ProductId) -> Result<Product, StoreError> {
        (**self).find_one(id).await
    }

    async fn find_all(&self, limit: u32) -> Result<Vec<Product>, StoreError> {
        (**self).find_all(limit).await
    }
}
