//! Simple in-memory document store for testing.
//!
//! This module provides an in-memory store that implements the `Store` trait from
//! `batchflow_shared::store`. It allows for error injection to test negative cases in the builders
//! and the pipeline driver.
//!
//! # Features
//! - Full `Store` trait implementation
//! - Error injection for all I/O operations (connect, query, distinct, count, update)
//! - Latency injection for query and update
//! - Accounting of connects and update batches, so tests can assert on sink calls
//!
//! # Example
//! ```ignore
//! use batchflow_testing::simplestore::SimpleStore;
//! use batchflow_shared::store::Store;
//!
//! let store = SimpleStore::new("materials", "task_id");
//! store.insert(serde_json::json!({"task_id": 1, "energy": -1.5}));
//!
//! // Error injection
//! store.error_injector().fail_updates(1); // Next update will fail
//! assert!(store.update(vec![]).await.is_err());
//! ```

/// Error types for the simple store.
mod error;
/// Error injection controller.
mod error_injector;
/// Core store implementation.
mod store;

// Re-exports
pub use error::{Result, SimpleStoreError};
pub use error_injector::StoreErrorInjector;
pub use store::SimpleStore;
