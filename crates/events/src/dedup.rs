//! Deduplication key derivation for outbound events.
//!
//! Mutation outcomes get keys derived from the entity, so a redelivered command
//! (or a retried publish) collapses onto the same broker dedup entry. Read
//! outcomes and error reports get a fresh token per publish attempt.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use auction_product_core::Product;

use crate::ErrorRecord;

const PREFIX_CREATED: &str = "created_product";
const PREFIX_UPDATED: &str = "updated_product";
const PREFIX_DELETED: &str = "deleted_product";
const PREFIX_FOUND: &str = "found_product";
const PREFIX_LIST_FOUND: &str = "found_products";
const PREFIX_ERROR: &str = "product_event_error";

pub fn created_key(product: &Product) -> String {
    format!("{PREFIX_CREATED}_{}", product.id)
}

/// Distinct updates to one product stay distinct through the update timestamp;
/// redeliveries of the identical update share it.
pub fn updated_key(product: &Product) -> String {
    let at = product.updated_at.unwrap_or(product.created_at);
    format!("{PREFIX_UPDATED}_{}_{}", product.id, timestamp_token(at))
}

pub fn deleted_key(product: &Product) -> String {
    format!("{PREFIX_DELETED}_{}", product.id)
}

pub fn found_key() -> String {
    format!("{PREFIX_FOUND}_{}", fresh_token())
}

pub fn list_found_key() -> String {
    format!("{PREFIX_LIST_FOUND}_{}", fresh_token())
}

pub fn error_key(record: &ErrorRecord) -> String {
    format!("{PREFIX_ERROR}_{}_{}", record.reference_key, fresh_token())
}

fn timestamp_token(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn fresh_token() -> String {
    Uuid::now_v7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use auction_product_core::UserId;
    use chrono::Duration;

    fn product() -> Product {
        Product::new("Lamp", "desk lamp", vec![], UserId::from("u1"), Utc::now())
    }

    #[test]
    fn mutation_keys_are_deterministic() {
        let p = product();
        assert_eq!(created_key(&p), created_key(&p.clone()));
        assert_eq!(deleted_key(&p), format!("deleted_product_{}", p.id));
        assert_ne!(created_key(&p), deleted_key(&p));
    }

    #[test]
    fn distinct_updates_produce_distinct_keys() {
        let mut first = product();
        first.updated_at = Some(first.created_at + Duration::seconds(1));
        let mut second = first.clone();
        second.updated_at = Some(first.created_at + Duration::seconds(2));

        assert_eq!(updated_key(&first), updated_key(&first.clone()));
        assert_ne!(updated_key(&first), updated_key(&second));
    }

    #[test]
    fn read_keys_are_fresh_per_call() {
        assert_ne!(found_key(), found_key());
        assert_ne!(list_found_key(), list_found_key());
        assert!(found_key().starts_with("found_product_"));
    }

    #[test]
    fn error_keys_carry_the_inbound_message_id() {
        let record = ErrorRecord {
            stream_name: "PRODUCT".to_string(),
            consumer_name: "c".to_string(),
            subject: "s".to_string(),
            reference_key: "m1".to_string(),
            message: "boom".to_string(),
            code: 13,
            data: vec![],
            headers: String::new(),
            time: Utc::now(),
        };

        assert!(error_key(&record).starts_with("product_event_error_m1_"));
        assert_ne!(error_key(&record), error_key(&record));
    }
}
