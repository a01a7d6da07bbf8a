use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use auction_product_core::{Product, ProductId, ProductPatch, UserId};

use crate::store::{ProductStore, StoreError};

/// In-memory product store.
///
/// Intended for tests/dev. Enforces the same constraints as the SQL adapter:
/// unique id, unique `(owner, name)`, owner filter on writes, command-key replay.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    products: RwLock<HashMap<ProductId, Stored>>,
    unavailable: AtomicBool,
}

#[derive(Debug, Clone)]
struct Stored {
    product: Product,
    last_command_key: Option<String>,
}

impl Stored {
    fn written_by(&self, command_key: Option<&str>) -> bool {
        command_key.is_some() && self.last_command_key.as_deref() == command_key
    }
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.products.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::backend("connection refused"));
        }
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::backend("lock poisoned")
}

fn name_taken(products: &HashMap<ProductId, Stored>, candidate: &Product) -> bool {
    products.values().any(|s| {
        s.product.id != candidate.id
            && s.product.owner == candidate.owner
            && s.product.name == candidate.name
    })
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn create(
        &self,
        product: Product,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut products = self.products.write().map_err(|_| poisoned())?;

        if let Some(existing) = products
            .values()
            .find(|s| s.product.owner == product.owner && s.written_by(command_key))
        {
            return Ok(existing.product.clone());
        }

        if products.contains_key(&product.id) {
            return Err(StoreError::conflict(format!(
                "product id already exists: {}",
                product.id
            )));
        }
        if name_taken(&products, &product) {
            return Err(StoreError::conflict(format!(
                "product name already exists for owner {}: {}",
                product.owner, product.name
            )));
        }

        products.insert(
            product.id.clone(),
            Stored {
                product: product.clone(),
                last_command_key: command_key.map(str::to_string),
            },
        );
        Ok(product)
    }

    async fn update(
        &self,
        id: &ProductId,
        owner: &UserId,
        patch: ProductPatch,
        command_key: Option<&str>,
    ) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut products = self.products.write().map_err(|_| poisoned())?;

        let stored = products
            .get(id)
            .filter(|s| s.product.is_owned_by(owner))
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        if stored.written_by(command_key) {
            return Ok(stored.product.clone());
        }

        let mut updated = stored.product.clone();
        patch.apply_to(&mut updated);

        if name_taken(&products, &updated) {
            return Err(StoreError::conflict(format!(
                "product name already exists for owner {}: {}",
                updated.owner, updated.name
            )));
        }

        products.insert(
            id.clone(),
            Stored {
                product: updated.clone(),
                last_command_key: command_key.map(str::to_string),
            },
        );
        Ok(updated)
    }

    async fn delete(&self, id: &ProductId, owner: &UserId) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut products = self.products.write().map_err(|_| poisoned())?;

        if !products.get(id).is_some_and(|s| s.product.is_owned_by(owner)) {
            return Err(StoreError::not_found(id.as_str()));
        }
        products
            .remove(id)
            .map(|s| s.product)
            .ok_or_else(|| StoreError::not_found(id.as_str()))
    }

    async fn find_one(&self, id: &ProductId) -> Result<Product, StoreError> {
        self.check_available()?;
        let products = self.products.read().map_err(|_| poisoned())?;

        products
            .get(id)
            .map(|s| s.product.clone())
            .ok_or_else(|| StoreError::not_found(id.as_str()))
    }

    async fn find_all(&self, limit: u32) -> Result<Vec<Product>, StoreError> {
        self.check_available()?;
        let products = self.products.read().map_err(|_| poisoned())?;

        let mut all: Vec<Product> = products.values().map(|s| s.product.clone()).collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        all.truncate(limit as usize);
        Ok(all)
    }
}
