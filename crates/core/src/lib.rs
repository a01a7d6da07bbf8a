//! `auction-product-core`: domain foundation for the product service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the product entity, its patch value object, identifiers and the error taxonomy
//! shared by every other crate.

pub mod error;
pub mod id;
pub mod product;

pub use error::{Classify, ErrorKind};
pub use id::{ProductId, UserId};
pub use product::{Product, ProductPatch};
