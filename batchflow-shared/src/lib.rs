/// Errors exposed by the shared library.
pub mod error;

/// Schema-less records and key values that flow between stores and builders.
pub mod record;

/// Store abstraction consumed by the builders.
pub mod store;
