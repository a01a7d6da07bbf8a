//! Business Service.
//!
//! One operation per command/query plus one publish operation per outcome type.
//! The service validates input, enforces ownership, delegates to the store and
//! classifies every failure through a single taxonomy shared by all operations.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument};

use auction_product_core::{Classify, ErrorKind, Product, ProductPatch, UserId};
use auction_product_events::{
    CreateProductCommand, DeleteProductCommand, Envelope, ErrorRecord, FindProductQuery,
    FindProductsQuery, OutcomeEvent, OutcomePublisher, PublishAck, PublishError,
    UpdateProductCommand, dedup,
};

use crate::store::{ProductStore, StoreError};
use crate::validation::{self, ValidationError};

pub const DEFAULT_FIND_ALL_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl ServiceError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_not_found())
    }
}

impl Classify for ServiceError {
    fn kind(&self) -> ErrorKind {
        if self.is_validation() {
            ErrorKind::Validation
        } else if self.is_conflict() {
            ErrorKind::Conflict
        } else if self.is_not_found() {
            ErrorKind::NotFound
        } else {
            ErrorKind::Internal
        }
    }
}

/// Product use cases over an injected store and publisher.
#[derive(Debug, Clone)]
pub struct ProductService<S, P> {
    store: S,
    publisher: P,
    find_all_limit: u32,
}

impl<S, P> ProductService<S, P>
where
    S: ProductStore,
    P: OutcomePublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            find_all_limit: DEFAULT_FIND_ALL_LIMIT,
        }
    }

    pub fn with_find_all_limit(mut self, limit: u32) -> Self {
        self.find_all_limit = limit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a product owned by the caller.
    ///
    /// The declared owner in the payload is ignored; the caller identity is the owner.
    /// A redelivered command (same key) returns the product it created.
    #[instrument(skip_all, fields(caller = %caller, key = %command.key))]
    pub async fn create(
        &self,
        caller: &UserId,
        command: CreateProductCommand,
    ) -> Result<Product, ServiceError> {
        validation::caller(caller)?;
        validation::create(&command.value)?;

        let key = command_key(&command.key);
        let value = command.value;
        let product = Product::new(
            value.name,
            value.description,
            value.media,
            caller.clone(),
            Utc::now(),
        );

        let created = self.store.create(product, key).await?;
        debug!(product_id = %created.id, "product created");
        Ok(created)
    }

    #[instrument(skip_all, fields(caller = %caller, key = %command.key, product_id = %command.value.id))]
    pub async fn update(
        &self,
        caller: &UserId,
        command: UpdateProductCommand,
    ) -> Result<Product, ServiceError> {
        validation::caller(caller)?;
        validation::update(&command.value)?;
        validation::ownership(caller, &command.value.owner)?;

        let key = command_key(&command.key);
        let value = command.value;
        let patch = ProductPatch::new(value.name, value.description, value.media, Utc::now());

        Ok(self.store.update(&value.id, caller, patch, key).await?)
    }

    #[instrument(skip_all, fields(caller = %caller, key = %command.key, product_id = %command.value.id))]
    pub async fn delete(
        &self,
        caller: &UserId,
        command: DeleteProductCommand,
    ) -> Result<Product, ServiceError> {
        validation::caller(caller)?;
        validation::delete(&command.value)?;
        validation::ownership(caller, &command.value.owner)?;

        Ok(self.store.delete(&command.value.id, caller).await?)
    }

    #[instrument(skip_all, fields(caller = %caller, product_id = %query.value.id))]
    pub async fn find_one(
        &self,
        caller: &UserId,
        query: FindProductQuery,
    ) -> Result<Product, ServiceError> {
        validation::caller(caller)?;
        validation::product_id(&query.value.id)?;

        Ok(self.store.find_one(&query.value.id).await?)
    }

    /// Bounded listing; an empty result is a success.
    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn find_many(
        &self,
        caller: &UserId,
        query: FindProductsQuery,
    ) -> Result<Vec<Product>, ServiceError> {
        validation::caller(caller)?;

        let limit = query
            .value
            .limit
            .filter(|l| *l > 0)
            .map_or(self.find_all_limit, |l| l.min(self.find_all_limit));

        Ok(self.store.find_all(limit).await?)
    }

    pub async fn publish_created(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        let key = dedup::created_key(product);
        self.emit(caller, key, OutcomeEvent::ProductCreated(product.clone()))
            .await
    }

    pub async fn publish_updated(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        let key = dedup::updated_key(product);
        self.emit(caller, key, OutcomeEvent::ProductUpdated(product.clone()))
            .await
    }

    pub async fn publish_deleted(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        let key = dedup::deleted_key(product);
        self.emit(caller, key, OutcomeEvent::ProductDeleted(product.clone()))
            .await
    }

    pub async fn publish_found(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        self.emit(
            caller,
            dedup::found_key(),
            OutcomeEvent::ProductFound(product.clone()),
        )
        .await
    }

    pub async fn publish_list_found(
        &self,
        caller: &UserId,
        products: &[Product],
    ) -> Result<PublishAck, ServiceError> {
        self.emit(
            caller,
            dedup::list_found_key(),
            OutcomeEvent::ProductsFound(products.to_vec()),
        )
        .await
    }

    pub async fn publish_error(
        &self,
        caller: &UserId,
        record: ErrorRecord,
    ) -> Result<PublishAck, ServiceError> {
        let key = dedup::error_key(&record);
        self.emit(caller, key, OutcomeEvent::ErrorOccurred(record))
            .await
    }

    async fn emit(
        &self,
        caller: &UserId,
        key: String,
        event: OutcomeEvent,
    ) -> Result<PublishAck, ServiceError> {
        Ok(self.publisher.publish(caller, Envelope::new(key, event)).await?)
    }
}

/// Blank keys disable redelivery detection.
fn command_key(key: &str) -> Option<&str> {
    Some(key).filter(|k| !k.trim().is_empty())
}

/// Object-safe view of [`ProductService`] used by the dispatch layer.
#[async_trait]
pub trait ProductOperations: Send + Sync {
    async fn create(
        &self,
        caller: &UserId,
        command: CreateProductCommand,
    ) -> Result<Product, ServiceError>;

    async fn update(
        &self,
        caller: &UserId,
        command: UpdateProductCommand,
    ) -> Result<Product, ServiceError>;

    async fn delete(
        &self,
        caller: &UserId,
        command: DeleteProductCommand,
    ) -> Result<Product, ServiceError>;

    async fn find_one(
        &self,
        caller: &UserId,
        query: FindProductQuery,
    ) -> Result<Product, ServiceError>;

    async fn find_many(
        &self,
        caller: &UserId,
        query: FindProductsQuery,
    ) -> Result<Vec<Product>, ServiceError>;

    async fn publish_created(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError>;

    async fn publish_updated(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError>;

    async fn publish_deleted(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError>;

    async fn publish_found(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError>;

    async fn publish_list_found(
        &self,
        caller: &UserId,
        products: &[Product],
    ) -> Result<PublishAck, ServiceError>;

    async fn publish_error(
        &self,
        caller: &UserId,
        record: ErrorRecord,
    ) -> Result<PublishAck, ServiceError>;
}

#[async_trait]
impl<S, P> ProductOperations for ProductService<S, P>
where
    S: ProductStore,
    P: OutcomePublisher,
{
    async fn create(
        &self,
        caller: &UserId,
        command: CreateProductCommand,
    ) -> Result<Product, ServiceError> {
        ProductService::create(self, caller, command).await
    }

    async fn update(
        &self,
        caller: &UserId,
        command: UpdateProductCommand,
    ) -> Result<Product, ServiceError> {
        ProductService::update(self, caller, command).await
    }

    async fn delete(
        &self,
        caller: &UserId,
        command: DeleteProductCommand,
    ) -> Result<Product, ServiceError> {
        ProductService::delete(self, caller, command).await
    }

    async fn find_one(
        &self,
        caller: &UserId,
        query: FindProductQuery,
    ) -> Result<Product, ServiceError> {
        ProductService::find_one(self, caller, query).await
    }

    async fn find_many(
        &self,
        caller: &UserId,
        query: FindProductsQuery,
    ) -> Result<Vec<Product>, ServiceError> {
        ProductService::find_many(self, caller, query).await
    }

    async fn publish_created(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_created(self, caller, product).await
    }

    async fn publish_updated(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_updated(self, caller, product).await
    }

    async fn publish_deleted(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_deleted(self, caller, product).await
    }

    async fn publish_found(
        &self,
        caller: &UserId,
        product: &Product,
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_found(self, caller, product).await
    }

    async fn publish_list_found(
        &self,
        caller: &UserId,
        products: &[Product],
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_list_found(self, caller, products).await
    }

    async fn publish_error(
        &self,
        caller: &UserId,
        record: ErrorRecord,
    ) -> Result<PublishAck, ServiceError> {
        ProductService::publish_error(self, caller, record).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use auction_product_core::ProductId;
    use auction_product_events::{
        CreateProduct, DeleteProduct, FindProduct, FindProducts, IdempotentPublisher,
        InMemoryBroker, PublisherSettings, UpdateProduct,
    };

    use super::*;
    use crate::in_memory::InMemoryProductStore;

    type TestService =
        ProductService<Arc<InMemoryProductStore>, IdempotentPublisher<InMemoryBroker>>;

    fn service() -> (TestService, Arc<InMemoryProductStore>, InMemoryBroker) {
        let store = Arc::new(InMemoryProductStore::new());
        let broker = InMemoryBroker::new();
        let publisher = IdempotentPublisher::new(broker.clone(), PublisherSettings::default());
        (
            ProductService::new(Arc::clone(&store), publisher),
            store,
            broker,
        )
    }

    /// Every call is a distinct command (fresh key).
    fn create_cmd(name: &str) -> CreateProductCommand {
        Envelope::new(
            ProductId::generate().into_inner(),
            CreateProduct {
                name: name.to_string(),
                description: "desk lamp".to_string(),
                media: vec![],
                owner: None,
            },
        )
    }

    fn update_cmd(id: &ProductId, owner: &str) -> UpdateProductCommand {
        Envelope::new(
            ProductId::generate().into_inner(),
            UpdateProduct {
                id: id.clone(),
                owner: UserId::from(owner),
                name: Some("NewLamp".to_string()),
                description: None,
                media: None,
            },
        )
    }

    fn delete_cmd(id: &ProductId, owner: &str) -> DeleteProductCommand {
        Envelope::new(
            "cmd-3",
            DeleteProduct {
                id: id.clone(),
                owner: UserId::from(owner),
            },
        )
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn create_returns_persisted_snapshot_owned_by_caller() {
        let (service, _, _) = service();

        let product = service
            .create(&UserId::from("u1"), create_cmd("Lamp"))
            .await
            .unwrap();

        assert!(!product.id.is_empty());
        assert_eq!(product.owner, UserId::from("u1"));
        assert_eq!(product.name, "Lamp");
        assert!(product.updated_at.is_none());
    }

    #[tokio::test]
    async fn create_ignores_declared_owner() {
        let (service, _, _) = service();
        let mut cmd = create_cmd("Lamp");
        cmd.value.owner = Some(UserId::from("someone-else"));

        let product = service.create(&UserId::from("u1"), cmd).await.unwrap();
        assert_eq!(product.owner, UserId::from("u1"));
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let (service, _, _) = service();
        let caller = UserId::from("u1");
        service.create(&caller, create_cmd("Lamp")).await.unwrap();

        let err = service.create(&caller, create_cmd("Lamp")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn redelivered_create_returns_original_product() {
        let (service, store, _) = service();
        let caller = UserId::from("u1");
        let cmd = create_cmd("Lamp");

        let first = service.create(&caller, cmd.clone()).await.unwrap();
        let again = service.create(&caller, cmd).await.unwrap();

        assert_eq!(again, first);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn redelivered_update_keeps_first_update_timestamp() {
        let (service, _, _) = service();
        let caller = UserId::from("u1");
        let created = service.create(&caller, create_cmd("Lamp")).await.unwrap();
        let cmd = update_cmd(&created.id, "u1");

        let first = service.update(&caller, cmd.clone()).await.unwrap();
        let again = service.update(&caller, cmd).await.unwrap();

        assert_eq!(again.updated_at, first.updated_at);
        assert_eq!(dedup::updated_key(&again), dedup::updated_key(&first));
    }

    #[test]
    fn blank_command_keys_are_ignored() {
        assert_eq!(command_key("  "), None);
        assert_eq!(command_key("cmd-1"), Some("cmd-1"));
    }

    #[tokio::test]
    async fn empty_caller_is_validation_for_every_operation() {
        let (service, _, _) = service();
        let nobody = UserId::from("");
        let id = ProductId::from("p1");

        let errors = vec![
            service.create(&nobody, create_cmd("Lamp")).await.unwrap_err(),
            service.update(&nobody, update_cmd(&id, "")).await.unwrap_err(),
            service.delete(&nobody, delete_cmd(&id, "")).await.unwrap_err(),
            service
                .find_one(&nobody, Envelope::new("q", FindProduct { id: id.clone() }))
                .await
                .unwrap_err(),
            service
                .find_many(&nobody, Envelope::new("q", FindProducts::default()))
                .await
                .unwrap_err(),
        ];

        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[tokio::test]
    async fn update_by_owner_returns_post_mutation_snapshot() {
        let (service, _, _) = service();
        let caller = UserId::from("u1");
        let created = service.create(&caller, create_cmd("Lamp")).await.unwrap();

        let updated = service
            .update(&caller, update_cmd(&created.id, "u1"))
            .await
            .unwrap();

        assert_eq!(updated.name, "NewLamp");
        assert_eq!(updated.description, "desk lamp");
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn update_of_missing_product_is_not_found() {
        let (service, _, _) = service();

        let err = service
            .update(&UserId::from("u1"), update_cmd(&ProductId::from("nope"), "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn find_many_with_no_products_is_empty_success() {
        let (service, _, _) = service();

        let found = service
            .find_many(&UserId::from("u1"), Envelope::new("q", FindProducts::default()))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn find_many_caps_requested_limit() {
        let (service, _, _) = service();
        let service = service.with_find_all_limit(2);
        let caller = UserId::from("u1");
        for name in ["a", "b", "c"] {
            service.create(&caller, create_cmd(name)).await.unwrap();
        }

        let found = service
            .find_many(&caller, Envelope::new("q", FindProducts { limit: Some(10) }))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn store_outage_classifies_as_internal() {
        let (service, store, _) = service();
        store.set_unavailable(true);

        let err = service
            .create(&UserId::from("u1"), create_cmd("Lamp"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn publishing_same_mutation_outcome_twice_yields_one_event() {
        let (service, _, broker) = service();
        let caller = UserId::from("u1");
        let product = service.create(&caller, create_cmd("Lamp")).await.unwrap();

        service.publish_created(&caller, &product).await.unwrap();
        let again = service.publish_created(&caller, &product).await.unwrap();

        assert!(again.duplicate);
        assert_eq!(broker.published_on("product.event.product_created").len(), 1);
    }

    #[tokio::test]
    async fn read_outcomes_are_never_deduplicated() {
        let (service, _, broker) = service();
        let caller = UserId::from("u1");
        let product = service.create(&caller, create_cmd("Lamp")).await.unwrap();

        service.publish_found(&caller, &product).await.unwrap();
        service.publish_found(&caller, &product).await.unwrap();
        service.publish_list_found(&caller, &[]).await.unwrap();

        assert_eq!(broker.published_on("product.event.product_found").len(), 2);
        assert_eq!(broker.published_on("product.event.products_found").len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn created_product_is_owned_by_caller(caller in "[a-z0-9]{1,16}", name in "[A-Za-z]{1,12}") {
            let rt = runtime();
            let (service, _, _) = service();

            let product = rt
                .block_on(service.create(&UserId::from(caller.as_str()), create_cmd(&name)))
                .unwrap();

            prop_assert_eq!(product.owner.as_str(), caller.as_str());
        }

        #[test]
        fn non_owner_mutations_are_validation_errors(
            caller in "[a-z0-9]{1,12}",
            owner in "[a-z0-9]{1,12}",
        ) {
            prop_assume!(caller != owner);
            let rt = runtime();
            let (service, store, _) = service();
            let created = rt
                .block_on(service.create(&UserId::from(owner.as_str()), create_cmd("Lamp")))
                .unwrap();

            // Caller claims to be the owner: the store filter hides the row.
            let spoofed = rt
                .block_on(service.update(&UserId::from(caller.as_str()), update_cmd(&created.id, &caller)))
                .unwrap_err();
            prop_assert_eq!(spoofed.kind(), ErrorKind::NotFound);

            let update = rt
                .block_on(service.update(&UserId::from(caller.as_str()), update_cmd(&created.id, &owner)))
                .unwrap_err();
            prop_assert_eq!(update.kind(), ErrorKind::Validation);

            let delete = rt
                .block_on(service.delete(&UserId::from(caller.as_str()), delete_cmd(&created.id, &owner)))
                .unwrap_err();
            prop_assert_eq!(delete.kind(), ErrorKind::Validation);

            prop_assert_eq!(store.len(), 1);
        }
    }
}
