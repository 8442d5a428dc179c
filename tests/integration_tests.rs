// Gateway file to expose integration tests from the integration/ subdirectory
// This file allows Rust's test runner to discover tests in subdirectories

mod common;

// Each test file in integration/ needs to be included here
#[path = "integration/test_collection_lifecycle.rs"]
mod test_collection_lifecycle;

#[path = "integration/test_concurrent_ingest_query.rs"]
mod test_concurrent_ingest_query;

#[path = "integration/test_index_scenarios.rs"]
mod test_index_scenarios;

#[path = "integration/test_settings_layering.rs"]
mod test_settings_layering;
