//! Request validation rules.
//!
//! Every rule fails with [`ValidationError`], which the service classifies as
//! [`ErrorKind::Validation`](auction_product_core::ErrorKind::Validation).

use thiserror::Error;

use auction_product_core::{ProductId, UserId};
use auction_product_events::{CreateProduct, DeleteProduct, UpdateProduct};

/// Explicit marker for rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service validation error: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

pub fn caller(caller: &UserId) -> Result<(), ValidationError> {
    if caller.is_empty() {
        return Err(ValidationError::new("auth user id is empty"));
    }
    Ok(())
}

pub fn create(value: &CreateProduct) -> Result<(), ValidationError> {
    if value.name.is_empty() {
        return Err(ValidationError::new("name is empty"));
    }
    if value.description.is_empty() {
        return Err(ValidationError::new("description is empty"));
    }
    Ok(())
}

pub fn update(value: &UpdateProduct) -> Result<(), ValidationError> {
    let has_name = value.name.as_deref().is_some_and(|s| !s.is_empty());
    let has_description = value.description.as_deref().is_some_and(|s| !s.is_empty());
    let has_media = value.media.as_ref().is_some_and(|m| !m.is_empty());

    if !(has_name || has_description || has_media) {
        return Err(ValidationError::new(
            "all values are empty, nothing to update",
        ));
    }
    Ok(())
}

pub fn delete(value: &DeleteProduct) -> Result<(), ValidationError> {
    product_id(&value.id)?;
    if value.owner.is_empty() {
        return Err(ValidationError::new("owner is empty"));
    }
    Ok(())
}

/// Only the owner may mutate or delete a product.
pub fn ownership(caller: &UserId, owner: &UserId) -> Result<(), ValidationError> {
    if caller != owner {
        return Err(ValidationError::new("you are not owner of this product"));
    }
    Ok(())
}

pub fn product_id(id: &ProductId) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::new("product id is empty"));
    }
    Ok(())
}
