#![allow(dead_code)]
//! Batchflow Testing Utilities.

/// Simple in-memory document store for testing builders and the pipeline driver.
pub mod simplestore;
