//! Product store adapters.
//!
//! The store port lives in `auction-product-catalog`; this module provides the
//! Postgres-backed implementation.

pub mod postgres;

pub use postgres::PostgresProductStore;
