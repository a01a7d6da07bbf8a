//! Product catalog: Business Service and Entity Store Port.
//!
//! - `store`: the persistence port and its error predicates
//! - `in_memory`: store implementation for tests/dev
//! - `validation`: request rules (all failures classify as validation)
//! - `service`: `ProductService`, the use cases driven by the dispatch layer

pub mod in_memory;
pub mod service;
pub mod store;
pub mod validation;

pub use in_memory::InMemoryProductStore;
pub use service::{DEFAULT_FIND_ALL_LIMIT, ProductOperations, ProductService, ServiceError};
pub use store::{ProductStore, StoreError};
pub use validation::ValidationError;
