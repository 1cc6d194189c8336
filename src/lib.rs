// Library exports for the admin binary, integration tests and embedding services

pub mod access;
pub mod config;
pub mod connectors;
pub mod counters;
pub mod db;
pub mod import;
pub mod library;
pub mod storage;

// Test support (only available with test-utils feature)
#[cfg(feature = "test-utils")]
pub mod test_support;
